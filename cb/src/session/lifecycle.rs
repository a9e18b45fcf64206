//! Security and lifetime attributes a host attaches to a session
//!
//! The broker stores these and hands them back; it never authorizes anyone.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identities allowed to manage and use a run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityContext {
    /// Caller that created the run
    pub creator_identity: Option<String>,
    /// Identity of the bootstrap credential members boot with
    pub bootstrap_identity: Option<String>,
}

impl SecurityContext {
    pub fn new(creator_identity: Option<String>, bootstrap_identity: Option<String>) -> Self {
        Self {
            creator_identity,
            bootstrap_identity,
        }
    }

    /// Identities a host should map to this run's permissions
    pub fn allowed_identities(&self) -> Vec<&str> {
        [self.creator_identity.as_deref(), self.bootstrap_identity.as_deref()]
            .into_iter()
            .flatten()
            .collect()
    }
}

/// Bootstrap credential handed to members so they can reach the broker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bootstrap {
    pub identity: String,
    /// Opaque credential material
    pub credential: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct Lifecycle {
    pub security: SecurityContext,
    pub bootstrap: Option<Bootstrap>,
    /// `None` means the run never expires on its own
    pub termination_time: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allowed_identities() {
        let ctx = SecurityContext::new(Some("/CN=creator".to_string()), None);
        assert_eq!(ctx.allowed_identities(), vec!["/CN=creator"]);

        let ctx = SecurityContext::new(Some("/CN=creator".to_string()), Some("/CN=boot".to_string()));
        assert_eq!(ctx.allowed_identities().len(), 2);
        assert!(SecurityContext::default().allowed_identities().is_empty());
    }
}
