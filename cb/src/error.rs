//! Broker error types

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur during broker operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrokerError {
    #[error("Invalid specification: {0}")]
    InvalidSpecification(String),

    #[error("Injections are closed for run {run_id}")]
    InjectionsClosed { run_id: String },

    #[error("Injections are not allowed for run {run_id}")]
    InjectionsNotAllowed { run_id: String },

    #[error("Usage error: {0}")]
    Usage(String),

    #[error("Unsatisfiable requirement for member #{member_id}: {reason}")]
    UnsatisfiableRequirement { member_id: u32, reason: String },

    #[error("Unknown member #{0}")]
    UnknownMember(u32),

    #[error("Member #{0} is already registered")]
    DuplicateMember(u32),

    #[error("Unknown run: {0}")]
    UnknownRun(String),

    #[error("Failed to create run: {0}")]
    Creation(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Stable, machine-readable error category carried over IPC
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidSpecification,
    InjectionsClosed,
    InjectionsNotAllowed,
    Usage,
    UnsatisfiableRequirement,
    UnknownMember,
    DuplicateMember,
    UnknownRun,
    Creation,
    Internal,
    Protocol,
}

impl BrokerError {
    /// Get the category of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            BrokerError::InvalidSpecification(_) => ErrorKind::InvalidSpecification,
            BrokerError::InjectionsClosed { .. } => ErrorKind::InjectionsClosed,
            BrokerError::InjectionsNotAllowed { .. } => ErrorKind::InjectionsNotAllowed,
            BrokerError::Usage(_) => ErrorKind::Usage,
            BrokerError::UnsatisfiableRequirement { .. } => ErrorKind::UnsatisfiableRequirement,
            BrokerError::UnknownMember(_) => ErrorKind::UnknownMember,
            BrokerError::DuplicateMember(_) => ErrorKind::DuplicateMember,
            BrokerError::UnknownRun(_) => ErrorKind::UnknownRun,
            BrokerError::Creation(_) => ErrorKind::Creation,
            BrokerError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Check if retrying the same call can never succeed
    ///
    /// Caller errors (bad input, closed window) are not terminal for the run,
    /// only for the request that produced them.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BrokerError::UnsatisfiableRequirement { .. } | BrokerError::Creation(_) | BrokerError::UnknownRun(_)
        )
    }

    pub(crate) fn poisoned(what: &str) -> Self {
        BrokerError::Internal(format!("{} lock poisoned", what))
    }
}

/// Result type for broker operations
pub type BrokerResult<T> = Result<T, BrokerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsatisfiable_message() {
        let err = BrokerError::UnsatisfiableRequirement {
            member_id: 7,
            reason: "no provider for role 'torqueserver'".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("#7"));
        assert!(msg.contains("torqueserver"));
    }

    #[test]
    fn test_kind_mapping() {
        assert_eq!(
            BrokerError::InjectionsClosed {
                run_id: "r".to_string()
            }
            .kind(),
            ErrorKind::InjectionsClosed
        );
        assert_eq!(BrokerError::DuplicateMember(1).kind(), ErrorKind::DuplicateMember);
    }

    #[test]
    fn test_is_terminal() {
        assert!(
            BrokerError::UnsatisfiableRequirement {
                member_id: 1,
                reason: "x".to_string()
            }
            .is_terminal()
        );
        assert!(!BrokerError::InvalidSpecification("x".to_string()).is_terminal());
        assert!(
            !BrokerError::InjectionsClosed {
                run_id: "r".to_string()
            }
            .is_terminal()
        );
    }

    #[test]
    fn test_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::UnsatisfiableRequirement).unwrap();
        assert_eq!(json, r#""unsatisfiable_requirement""#);
    }
}
