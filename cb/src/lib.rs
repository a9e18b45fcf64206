//! ctxbroker - contextualization broker
//!
//! Coordinates a group of booting instances ("members") that must learn each
//! other's network identities, role assignments and injected configuration
//! before they can finish configuring themselves. Each run is a barrier: a
//! member's retrieve answers "not ready" until everything it depends on is
//! known, then releases the complete document in one piece.
//!
//! The core (`validation`, `blackboard`, `registry`, `session`) is
//! synchronous and transport-free. `broker`, `ipc` and `daemon` host it
//! behind a Unix socket.

pub mod blackboard;
pub mod broker;
pub mod cli;
pub mod config;
pub mod daemon;
pub mod domain;
pub mod error;
pub mod ipc;
pub mod registry;
pub mod session;
pub mod validation;

pub use blackboard::{Blackboard, ErrorExitPolicy, IdentityQuery};
pub use broker::{Broker, CreateOptions};
pub use config::Config;
pub use domain::{
    ContextSnapshot, Identity, MemberId, ProvidesSpec, RequiresSpec, ResolvedDocument, Retrieval, RunId,
};
pub use error::{BrokerError, BrokerResult, ErrorKind};
pub use registry::RunRegistry;
pub use session::Session;
