//! CLI command definitions and subcommands

use std::fs;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use eyre::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::blackboard::IdentityQuery;
use crate::domain::{Identity, MemberId, ProvidesSpec, RequiresSpec, RunId};

/// ctxbroker - contextualization broker for groups of booting instances
#[derive(Parser)]
#[command(
    name = "ctxbroker",
    about = "Contextualization broker: role and data barrier for groups of booting instances",
    version = env!("CARGO_PKG_VERSION"),
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Override the daemon socket path
    #[arg(short, long, global = true)]
    pub socket: Option<PathBuf>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the broker daemon
    Serve {
        /// Don't fork to background (run in foreground)
        #[arg(long)]
        foreground: bool,
    },

    /// Create a run and print its id
    Create {
        /// Use this run id instead of assigning one
        #[arg(long)]
        run_id: Option<RunId>,

        /// Refuse data injections for this run
        #[arg(long)]
        no_injections: bool,

        /// Identity of the caller creating the run
        #[arg(long)]
        creator: Option<String>,

        /// Destroy the run after this many seconds
        #[arg(long)]
        lifetime_secs: Option<u64>,
    },

    /// Destroy a run
    Destroy { run_id: RunId },

    /// Register a member from a YAML member file
    Register {
        run_id: RunId,
        member_id: MemberId,

        /// YAML file with `identities`, `requires` and `provides`
        #[arg(long, value_name = "FILE")]
        spec: PathBuf,

        /// Total number of members expected in the run
        #[arg(short, long)]
        total: usize,
    },

    /// Inject a named value into a run
    Inject { run_id: RunId, name: String, value: String },

    /// Close the injection phase of a run
    Close { run_id: RunId },

    /// Report that a member configured successfully
    #[command(name = "ok")]
    OkExit { run_id: RunId, member_id: MemberId },

    /// Report that a member failed to configure
    #[command(name = "error")]
    ErrorExit {
        run_id: RunId,
        member_id: MemberId,

        /// Exit code reported by the member
        #[arg(long, allow_negative_numbers = true)]
        code: i16,

        /// Error message reported by the member
        #[arg(short, long, default_value = "")]
        message: String,
    },

    /// List registered identities
    Identities {
        run_id: RunId,

        /// Only identities with this hostname
        #[arg(long, conflicts_with = "ip")]
        host: Option<String>,

        /// Only identities with this IP address
        #[arg(long)]
        ip: Option<String>,
    },

    /// Retrieve a member's resolved document
    Retrieve {
        run_id: RunId,
        member_id: MemberId,

        /// YAML list of identities the member observed on itself
        #[arg(long, value_name = "FILE")]
        identities: Option<PathBuf>,

        /// Poll until ready or failed
        #[arg(short, long)]
        wait: bool,
    },

    /// Print a snapshot of a run
    Context { run_id: RunId },

    /// Check if the daemon is alive
    Ping,

    /// Stop the daemon
    Shutdown,
}

/// Builds the identity query from `identities` flags
pub fn identity_query(host: Option<String>, ip: Option<String>) -> IdentityQuery {
    match (host, ip) {
        (Some(host), _) => IdentityQuery::Host(host),
        (None, Some(ip)) => IdentityQuery::Ip(ip),
        (None, None) => IdentityQuery::All,
    }
}

/// Member description read by `register`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemberFile {
    pub identities: Vec<Identity>,
    pub requires: Option<RequiresSpec>,
    pub provides: Option<ProvidesSpec>,
}

impl MemberFile {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).context(format!("Failed to read {}", path.display()))?;
        serde_yaml::from_str(&content).context(format!("Failed to parse {}", path.display()))
    }
}

/// Read a YAML list of identities
pub fn load_identities(path: &Path) -> Result<Vec<Identity>> {
    let content = fs::read_to_string(path).context(format!("Failed to read {}", path.display()))?;
    serde_yaml::from_str(&content).context(format!("Failed to parse {}", path.display()))
}
