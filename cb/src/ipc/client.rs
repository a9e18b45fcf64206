//! IPC client for communicating with the broker daemon
//!
//! One request per connection over the Unix Domain Socket.

use std::path::PathBuf;
use std::time::Duration;

use eyre::{Context, Result};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tracing::debug;

use super::get_socket_path;
use super::messages::{BrokerRequest, BrokerResponse};
use crate::blackboard::IdentityQuery;
use crate::config::DaemonConfig;
use crate::domain::{ContextSnapshot, Identity, MemberId, ProvidesSpec, RequiresSpec, ResolvedDocument, RunId};
use crate::error::ErrorKind;

/// Default timeout for IPC operations
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default maximum message size
const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Error the daemon returned for a request
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Broker error ({kind:?}): {message}")]
pub struct RemoteError {
    pub kind: ErrorKind,
    pub message: String,
}

impl RemoteError {
    /// True when polling again can never succeed
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::UnsatisfiableRequirement | ErrorKind::Creation | ErrorKind::UnknownRun
        )
    }
}

/// Options for [`BrokerClient::create_run`]
#[derive(Debug, Clone, Default)]
pub struct CreateRunRequest {
    pub run_id: Option<RunId>,
    pub allow_injections: Option<bool>,
    pub creator_identity: Option<String>,
    pub lifetime_secs: Option<u64>,
}

/// Client for communicating with the broker daemon via IPC
#[derive(Debug, Clone)]
pub struct BrokerClient {
    socket_path: PathBuf,
    timeout: Duration,
    max_message_size: usize,
}

impl Default for BrokerClient {
    fn default() -> Self {
        Self::new()
    }
}

impl BrokerClient {
    /// Create a new client with the default socket path
    pub fn new() -> Self {
        Self::with_socket_path(get_socket_path())
    }

    /// Create a client with a custom socket path
    pub fn with_socket_path(socket_path: PathBuf) -> Self {
        Self {
            socket_path,
            timeout: DEFAULT_TIMEOUT,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }

    /// Create a client from daemon settings
    pub fn from_config(config: &DaemonConfig) -> Self {
        Self {
            socket_path: config.socket_path(),
            timeout: Duration::from_millis(config.timeout_ms),
            max_message_size: config.max_message_size,
        }
    }

    /// Set a custom timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Check if the daemon socket exists
    pub fn socket_exists(&self) -> bool {
        self.socket_path.exists()
    }

    /// Check if daemon is alive and get its version
    pub async fn ping(&self) -> Result<String> {
        debug!("BrokerClient: pinging daemon");
        match self.send_message(BrokerRequest::Ping).await? {
            BrokerResponse::Pong { version } => Ok(version),
            other => Err(unexpected(other)),
        }
    }

    pub async fn create_run(&self, request: CreateRunRequest) -> Result<RunId> {
        let msg = BrokerRequest::CreateRun {
            run_id: request.run_id,
            allow_injections: request.allow_injections,
            creator_identity: request.creator_identity,
            lifetime_secs: request.lifetime_secs,
        };
        match self.send_message(msg).await? {
            BrokerResponse::RunCreated { run_id } => Ok(run_id),
            other => Err(unexpected(other)),
        }
    }

    pub async fn destroy_run(&self, run_id: &str) -> Result<()> {
        let msg = BrokerRequest::DestroyRun {
            run_id: run_id.to_string(),
        };
        self.expect_ok(msg).await
    }

    pub async fn add_workspace(
        &self,
        run_id: &str,
        member_id: MemberId,
        identities: Vec<Identity>,
        requires: Option<RequiresSpec>,
        provides: Option<ProvidesSpec>,
        total_members: usize,
    ) -> Result<()> {
        let msg = BrokerRequest::AddWorkspace {
            run_id: run_id.to_string(),
            member_id,
            identities,
            requires,
            provides,
            total_members,
        };
        self.expect_ok(msg).await
    }

    pub async fn inject_data(&self, run_id: &str, name: &str, value: &str) -> Result<()> {
        let msg = BrokerRequest::InjectData {
            run_id: run_id.to_string(),
            name: name.to_string(),
            value: value.to_string(),
        };
        self.expect_ok(msg).await
    }

    pub async fn no_more_injections(&self, run_id: &str) -> Result<()> {
        let msg = BrokerRequest::NoMoreInjections {
            run_id: run_id.to_string(),
        };
        self.expect_ok(msg).await
    }

    pub async fn ok_exit(&self, run_id: &str, member_id: MemberId) -> Result<()> {
        let msg = BrokerRequest::OkExit {
            run_id: run_id.to_string(),
            member_id,
        };
        self.expect_ok(msg).await
    }

    pub async fn error_exit(&self, run_id: &str, member_id: MemberId, code: i16, message: &str) -> Result<()> {
        let msg = BrokerRequest::ErrorExit {
            run_id: run_id.to_string(),
            member_id,
            code,
            message: message.to_string(),
        };
        self.expect_ok(msg).await
    }

    pub async fn identities(&self, run_id: &str, query: IdentityQuery) -> Result<Vec<Identity>> {
        let msg = BrokerRequest::IdentityQuery {
            run_id: run_id.to_string(),
            query,
        };
        match self.send_message(msg).await? {
            BrokerResponse::Identities { identities } => Ok(identities),
            other => Err(unexpected(other)),
        }
    }

    /// Retrieve a member's document; `None` means not ready yet
    pub async fn retrieve(
        &self,
        run_id: &str,
        member_id: MemberId,
        identities: Vec<Identity>,
    ) -> Result<Option<ResolvedDocument>> {
        let msg = BrokerRequest::Retrieve {
            run_id: run_id.to_string(),
            member_id,
            identities,
        };
        match self.send_message(msg).await? {
            BrokerResponse::Retrieved { document } => Ok(Some(document)),
            BrokerResponse::NotReady => Ok(None),
            other => Err(unexpected(other)),
        }
    }

    pub async fn context(&self, run_id: &str) -> Result<ContextSnapshot> {
        let msg = BrokerRequest::Context {
            run_id: run_id.to_string(),
        };
        match self.send_message(msg).await? {
            BrokerResponse::Context { context } => Ok(context),
            other => Err(unexpected(other)),
        }
    }

    /// Request daemon to shutdown gracefully
    pub async fn shutdown(&self) -> Result<()> {
        debug!("BrokerClient: requesting daemon shutdown");
        self.expect_ok(BrokerRequest::Shutdown).await
    }

    async fn expect_ok(&self, msg: BrokerRequest) -> Result<()> {
        match self.send_message(msg).await? {
            BrokerResponse::Ok => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    /// Send a message to the daemon and wait for response
    async fn send_message(&self, msg: BrokerRequest) -> Result<BrokerResponse> {
        debug!(?self.socket_path, ?msg, "BrokerClient: sending message");

        let mut stream = tokio::time::timeout(self.timeout, UnixStream::connect(&self.socket_path))
            .await
            .context("Connection timeout")?
            .context("Failed to connect to broker socket")?;

        let msg_json = serde_json::to_string(&msg).context("Failed to serialize message")?;
        if msg_json.len() > self.max_message_size {
            return Err(eyre::eyre!("Message too large: {} bytes", msg_json.len()));
        }

        tokio::time::timeout(self.timeout, async {
            stream
                .write_all(msg_json.as_bytes())
                .await
                .context("Failed to write message")?;
            stream.write_all(b"\n").await.context("Failed to write newline")?;
            stream.flush().await.context("Failed to flush stream")?;
            Ok::<_, eyre::Error>(())
        })
        .await
        .context("Write timeout")??;

        // Documents and snapshots may exceed the request limit
        let mut reader = BufReader::new(&mut stream);
        let mut response_line = String::new();
        tokio::time::timeout(self.timeout, reader.read_line(&mut response_line))
            .await
            .context("Read timeout")?
            .context("Failed to read response")?;

        let response: BrokerResponse =
            serde_json::from_str(response_line.trim()).context("Failed to parse broker response")?;

        debug!(?response, "BrokerClient: received response");
        Ok(response)
    }
}

fn unexpected(response: BrokerResponse) -> eyre::Report {
    match response {
        BrokerResponse::Error { kind, message } => RemoteError { kind, message }.into(),
        other => eyre::eyre!("Unexpected response: {:?}", other),
    }
}
