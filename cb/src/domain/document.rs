//! Documents released to members and hosts

use serde::{Deserialize, Serialize};

use super::{DataPair, Identity, MemberId};

/// Terminal status a member reports about its own configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExitStatus {
    /// Still booting, nothing reported
    #[default]
    Pending,
    /// Configuration completed
    Ok,
    /// Configuration failed
    Error { code: i16, message: String },
}

impl ExitStatus {
    pub fn is_error(&self) -> bool {
        matches!(self, ExitStatus::Error { .. })
    }
}

impl std::fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Ok => write!(f, "ok"),
            Self::Error { code, .. } => write!(f, "error({})", code),
        }
    }
}

/// One provider's contribution to a resolved role
///
/// `hostname` and `public_key` are only present when the requirer asked for
/// them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleProvider {
    pub member_id: MemberId,
    pub interface_name: Option<String>,
    pub ip: Option<String>,
    pub hostname: Option<String>,
    pub public_key: Option<String>,
    /// Value from the provider's role description
    pub value: Option<String>,
}

/// A required role with every provider filled in
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedRole {
    pub name: String,
    pub providers: Vec<RoleProvider>,
}

/// The complete configuration released to one member
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedDocument {
    /// Every identity in the run, present only when all identities were required
    pub identities: Option<Vec<Identity>>,
    pub roles: Vec<ResolvedRole>,
    pub data: Vec<DataPair>,
}

impl ResolvedDocument {
    /// Find a resolved role by name
    pub fn role(&self, name: &str) -> Option<&ResolvedRole> {
        self.roles.iter().find(|r| r.name == name)
    }

    /// Find a resolved data value by name
    pub fn data_value(&self, name: &str) -> Option<&str> {
        self.data
            .iter()
            .find(|d| d.name == name)
            .and_then(|d| d.value.as_deref())
    }
}

/// Outcome of a retrieve that did not fail
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Retrieval {
    /// Every dependency is satisfied
    Ready(Box<ResolvedDocument>),
    /// Something is still missing; poll again later
    NotReady,
}

impl Retrieval {
    pub fn is_ready(&self) -> bool {
        matches!(self, Retrieval::Ready(_))
    }

    /// Take the document, if ready
    pub fn into_document(self) -> Option<ResolvedDocument> {
        match self {
            Retrieval::Ready(doc) => Some(*doc),
            Retrieval::NotReady => None,
        }
    }
}

/// Per-member view in a [`ContextSnapshot`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberSummary {
    pub member_id: MemberId,
    pub identities: Vec<Identity>,
    pub provided_roles: Vec<String>,
    pub exit: ExitStatus,
    /// Set when a provider this member depends on failed
    pub failed_dependency: Option<MemberId>,
}

/// Read-only view of a whole run, serialized by hosts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextSnapshot {
    pub run_id: String,
    /// Expected member count, unknown until the first registration
    pub expected_members: Option<usize>,
    pub registered_members: usize,
    /// Every expected member has registered
    pub complete: bool,
    /// Every expected member reported ok
    pub all_ok: bool,
    /// At least one member reported an error
    pub error_present: bool,
    pub no_more_injections: bool,
    pub members: Vec<MemberSummary>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_status_serialize() {
        let json = serde_json::to_string(&ExitStatus::Error {
            code: 3,
            message: "boom".to_string(),
        })
        .unwrap();
        assert_eq!(json, r#"{"status":"error","code":3,"message":"boom"}"#);
        assert_eq!(serde_json::to_string(&ExitStatus::Ok).unwrap(), r#"{"status":"ok"}"#);
    }

    #[test]
    fn test_document_lookup() {
        let doc = ResolvedDocument {
            identities: None,
            roles: vec![ResolvedRole {
                name: "nfsserver".to_string(),
                providers: vec![],
            }],
            data: vec![DataPair::new("foo", Some("bar".to_string()))],
        };
        assert!(doc.role("nfsserver").is_some());
        assert!(doc.role("torqueserver").is_none());
        assert_eq!(doc.data_value("foo"), Some("bar"));
    }

    #[test]
    fn test_retrieval_into_document() {
        assert!(Retrieval::NotReady.into_document().is_none());
        let ready = Retrieval::Ready(Box::default());
        assert!(ready.is_ready());
        assert!(ready.into_document().is_some());
    }
}
