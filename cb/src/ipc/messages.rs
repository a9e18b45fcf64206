//! IPC message types for broker communication
//!
//! Simple JSON-over-newline protocol. Each message is a single line of JSON followed by `\n`.

use serde::{Deserialize, Serialize};

use crate::blackboard::IdentityQuery;
use crate::domain::{ContextSnapshot, Identity, MemberId, ProvidesSpec, RequiresSpec, ResolvedDocument, RunId};
use crate::error::{BrokerError, ErrorKind};

/// Requests from clients to the broker daemon
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum BrokerRequest {
    /// Ping to check if the daemon is alive
    Ping,

    /// Create a new run
    CreateRun {
        /// Caller-chosen id; the daemon assigns one when absent
        #[serde(default)]
        run_id: Option<RunId>,
        #[serde(default)]
        allow_injections: Option<bool>,
        #[serde(default)]
        creator_identity: Option<String>,
        #[serde(default)]
        lifetime_secs: Option<u64>,
    },

    /// Tear down a run
    DestroyRun { run_id: RunId },

    /// Register a member
    AddWorkspace {
        run_id: RunId,
        member_id: MemberId,
        #[serde(default)]
        identities: Vec<Identity>,
        #[serde(default)]
        requires: Option<RequiresSpec>,
        #[serde(default)]
        provides: Option<ProvidesSpec>,
        total_members: usize,
    },

    /// Add one named value to the run
    InjectData { run_id: RunId, name: String, value: String },

    /// Close the injection phase
    NoMoreInjections { run_id: RunId },

    /// Member finished configuring
    OkExit { run_id: RunId, member_id: MemberId },

    /// Member failed configuring
    ErrorExit {
        run_id: RunId,
        member_id: MemberId,
        code: i16,
        message: String,
    },

    /// Snapshot of registered identities
    IdentityQuery { run_id: RunId, query: IdentityQuery },

    /// Ask for a member's resolved document
    Retrieve {
        run_id: RunId,
        member_id: MemberId,
        #[serde(default)]
        identities: Vec<Identity>,
    },

    /// Read-only view of a whole run
    Context { run_id: RunId },

    /// Request daemon to stop gracefully
    Shutdown,
}

/// Responses from the broker daemon to clients
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum BrokerResponse {
    /// Acknowledgment
    Ok,

    /// Pong response to ping
    Pong { version: String },

    /// Run was created
    RunCreated { run_id: RunId },

    /// Identity query result
    Identities { identities: Vec<Identity> },

    /// Member document is complete
    Retrieved { document: ResolvedDocument },

    /// Member document is not complete yet
    NotReady,

    /// Run snapshot
    Context { context: ContextSnapshot },

    /// Error response
    Error { kind: ErrorKind, message: String },
}

impl BrokerResponse {
    /// Error response for a malformed or unexpected request
    pub fn protocol_error(message: impl Into<String>) -> Self {
        BrokerResponse::Error {
            kind: ErrorKind::Protocol,
            message: message.into(),
        }
    }
}

impl From<BrokerError> for BrokerResponse {
    fn from(err: BrokerError) -> Self {
        BrokerResponse::Error {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}
