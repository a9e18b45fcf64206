//! Broker daemon
//!
//! Serves a [`Broker`] over the IPC socket, sweeps expired runs, and manages
//! the PID file of the background process.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use eyre::{Context, Result};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::broker::{Broker, CreateOptions, lifetime_from_secs};
use crate::config::DaemonConfig;
use crate::domain::Retrieval;
use crate::ipc::listener::{read_request, send_response};
use crate::ipc::{BrokerRequest, BrokerResponse};

/// Current version (set at compile time)
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default PID file location (alongside the socket)
fn default_pid_path() -> PathBuf {
    crate::ipc::runtime_dir().join("ctxbroker.pid")
}

/// Daemon that answers broker requests on a Unix socket
#[derive(Debug)]
pub struct BrokerDaemon {
    broker: Arc<Broker>,
    config: DaemonConfig,
    shutdown_tx: mpsc::Sender<()>,
    shutdown_rx: mpsc::Receiver<()>,
}

impl BrokerDaemon {
    pub fn new(broker: Broker, config: DaemonConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        Self {
            broker: Arc::new(broker),
            config,
            shutdown_tx,
            shutdown_rx,
        }
    }

    pub fn broker(&self) -> &Arc<Broker> {
        &self.broker
    }

    /// Sender that stops [`BrokerDaemon::run`] when signalled
    pub fn shutdown_handle(&self) -> mpsc::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Accept connections until shutdown is requested
    pub async fn run(mut self, listener: UnixListener) -> Result<()> {
        let sweep_every = Duration::from_secs(self.config.expire_interval_secs.max(1));
        let mut sweep = tokio::time::interval(sweep_every);
        info!(?sweep_every, "broker daemon running");

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, _)) => {
                            let broker = Arc::clone(&self.broker);
                            let shutdown_tx = self.shutdown_tx.clone();
                            let max_size = self.config.max_message_size;
                            let read_timeout = Duration::from_millis(self.config.timeout_ms.max(1));
                            tokio::spawn(async move {
                                let handled = handle_connection(stream, &broker, shutdown_tx, max_size, read_timeout);
                                if let Err(e) = handled.await {
                                    warn!(error = %e, "IPC connection failed");
                                }
                            });
                        }
                        Err(e) => warn!(error = %e, "Failed to accept IPC connection"),
                    }
                }

                _ = sweep.tick() => {
                    if let Err(e) = self.broker.expire(Utc::now()) {
                        error!(error = %e, "expire sweep failed");
                    }
                }

                _ = self.shutdown_rx.recv() => {
                    info!("broker daemon stopping");
                    break;
                }
            }
        }

        debug!("run: complete");
        Ok(())
    }
}

/// Handle one connection: one request, one response
///
/// A client that never finishes its request line is answered with a protocol
/// error after `read_timeout`.
async fn handle_connection(
    mut stream: UnixStream,
    broker: &Broker,
    shutdown_tx: mpsc::Sender<()>,
    max_size: usize,
    read_timeout: Duration,
) -> Result<()> {
    let read = tokio::time::timeout(read_timeout, read_request(&mut stream, max_size)).await;
    let request = match read {
        Ok(request) => request,
        Err(_) => {
            warn!(?read_timeout, "client sent no complete request in time");
            return send_response(&mut stream, &BrokerResponse::protocol_error("Request timeout")).await;
        }
    };
    let response = match request {
        Ok(BrokerRequest::Shutdown) => {
            debug!("handle_connection: Shutdown");
            let _ = shutdown_tx.try_send(());
            BrokerResponse::Ok
        }
        Ok(request) => dispatch(broker, request),
        Err(e) => {
            warn!(error = %e, "rejecting malformed request");
            BrokerResponse::protocol_error(format!("{:#}", e))
        }
    };
    send_response(&mut stream, &response).await
}

/// Apply one request to the broker
///
/// `Shutdown` is acknowledged here but acted on by the daemon loop.
pub fn dispatch(broker: &Broker, request: BrokerRequest) -> BrokerResponse {
    debug!(?request, "dispatch: called");
    let result = match request {
        BrokerRequest::Ping => Ok(BrokerResponse::Pong {
            version: VERSION.to_string(),
        }),
        BrokerRequest::Shutdown => Ok(BrokerResponse::Ok),
        BrokerRequest::CreateRun {
            run_id,
            allow_injections,
            creator_identity,
            lifetime_secs,
        } => {
            lifetime_secs
                .map(lifetime_from_secs)
                .transpose()
                .and_then(|lifetime| {
                    let options = CreateOptions {
                        allow_injections,
                        creator_identity,
                        bootstrap: None,
                        lifetime,
                    };
                    match run_id {
                        Some(id) => broker.create_with_id(id, options),
                        None => broker.create(options),
                    }
                })
                .map(|session| BrokerResponse::RunCreated {
                    run_id: session.id().to_string(),
                })
        }
        BrokerRequest::DestroyRun { run_id } => broker.destroy(&run_id).map(|_| BrokerResponse::Ok),
        BrokerRequest::AddWorkspace {
            run_id,
            member_id,
            identities,
            requires,
            provides,
            total_members,
        } => broker
            .session(&run_id)
            .and_then(|s| s.add_workspace(member_id, identities, requires.as_ref(), provides.as_ref(), total_members))
            .map(|_| BrokerResponse::Ok),
        BrokerRequest::InjectData { run_id, name, value } => broker
            .session(&run_id)
            .and_then(|s| s.inject_data(&name, &value))
            .map(|_| BrokerResponse::Ok),
        BrokerRequest::NoMoreInjections { run_id } => broker
            .session(&run_id)
            .and_then(|s| s.no_more_injections())
            .map(|_| BrokerResponse::Ok),
        BrokerRequest::OkExit { run_id, member_id } => broker
            .session(&run_id)
            .and_then(|s| s.ok_exit(member_id))
            .map(|_| BrokerResponse::Ok),
        BrokerRequest::ErrorExit {
            run_id,
            member_id,
            code,
            message,
        } => broker
            .session(&run_id)
            .and_then(|s| s.error_exit(member_id, code, &message))
            .map(|_| BrokerResponse::Ok),
        BrokerRequest::IdentityQuery { run_id, query } => broker
            .session(&run_id)
            .and_then(|s| s.identity_query(&query))
            .map(|identities| BrokerResponse::Identities { identities }),
        BrokerRequest::Retrieve {
            run_id,
            member_id,
            identities,
        } => broker
            .session(&run_id)
            .and_then(|s| s.retrieve(member_id, &identities))
            .map(|retrieval| match retrieval {
                Retrieval::Ready(document) => BrokerResponse::Retrieved { document: *document },
                Retrieval::NotReady => BrokerResponse::NotReady,
            }),
        BrokerRequest::Context { run_id } => broker
            .session(&run_id)
            .and_then(|s| s.context())
            .map(|context| BrokerResponse::Context { context }),
    };
    result.unwrap_or_else(BrokerResponse::from)
}

/// Tracks the background daemon through its PID file
///
/// Liveness is decided by pinging the socket; the PID file only records which
/// process owns it.
#[derive(Debug)]
pub struct DaemonManager {
    pid_file: PathBuf,
}

impl Default for DaemonManager {
    fn default() -> Self {
        Self::new()
    }
}

impl DaemonManager {
    pub fn new() -> Self {
        Self::with_pid_file(default_pid_path())
    }

    pub fn with_pid_file(pid_file: PathBuf) -> Self {
        Self { pid_file }
    }

    pub fn pid_file(&self) -> &Path {
        &self.pid_file
    }

    /// PID recorded by the last daemon, if the file is readable
    pub fn read_pid(&self) -> Option<u32> {
        fs::read_to_string(&self.pid_file).ok()?.trim().parse().ok()
    }

    fn write_pid(&self, pid: u32) -> Result<()> {
        if let Some(dir) = self.pid_file.parent() {
            fs::create_dir_all(dir).context(format!("Failed to create {}", dir.display()))?;
        }
        fs::write(&self.pid_file, pid.to_string())
            .context(format!("Failed to write {}", self.pid_file.display()))?;
        debug!(pid, pid_file = ?self.pid_file, "write_pid: done");
        Ok(())
    }

    pub fn remove_pid_file(&self) -> Result<()> {
        if self.pid_file.exists() {
            fs::remove_file(&self.pid_file).context(format!("Failed to remove {}", self.pid_file.display()))?;
            debug!(pid_file = ?self.pid_file, "remove_pid_file: done");
        }
        Ok(())
    }

    /// Record this process as the running broker
    pub fn register_self(&self) -> Result<()> {
        let pid = std::process::id();
        self.write_pid(pid)?;
        info!(pid, version = VERSION, pid_file = ?self.pid_file, "broker daemon registered");
        Ok(())
    }

    /// Spawn `ctxbroker serve --foreground` detached from this terminal
    ///
    /// The child registers its own PID once it is listening.
    pub fn start(&self, config_path: Option<&Path>, socket_path: Option<&Path>) -> Result<u32> {
        let exe = std::env::current_exe().context("Failed to locate the ctxbroker executable")?;
        let mut command = Command::new(&exe);
        if let Some(path) = config_path {
            command.arg("--config").arg(path);
        }
        if let Some(path) = socket_path {
            command.arg("--socket").arg(path);
        }
        command
            .args(["serve", "--foreground"])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        let child = command.spawn().context(format!("Failed to spawn {}", exe.display()))?;
        let pid = child.id();
        info!(pid, "broker daemon spawned");
        Ok(pid)
    }
}
