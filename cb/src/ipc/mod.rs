//! Inter-Process Communication with the broker daemon
//!
//! Unix Domain Socket transport: members and hosts connect, send one JSON
//! request line and read one JSON response line.

use std::path::PathBuf;

pub mod client;
pub mod listener;
pub mod messages;

pub use client::{BrokerClient, CreateRunRequest, RemoteError};
pub use messages::{BrokerRequest, BrokerResponse};

/// Get the default socket path for broker IPC
///
/// Uses the same base directory as the PID file.
pub fn get_socket_path() -> PathBuf {
    runtime_dir().join("broker.sock")
}

/// Directory holding the socket and PID file
pub fn runtime_dir() -> PathBuf {
    dirs::runtime_dir()
        .or_else(dirs::data_local_dir)
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("ctxbroker")
}
