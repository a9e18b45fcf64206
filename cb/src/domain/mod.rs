//! Domain types for ctxbroker
//!
//! Identity and role records, the raw requires/provides input a member sends,
//! and the documents the broker releases.

mod document;
mod identity;
mod role;
mod spec;

pub use document::{ContextSnapshot, ExitStatus, MemberSummary, ResolvedDocument, ResolvedRole, Retrieval, RoleProvider};
pub use identity::Identity;
pub use role::{DataPair, ProvidedRoleDescription, RequiredRole};
pub use spec::{
    IdentityPlaceholder, ProvidesRoleSpec, ProvidesSpec, RequiresDataSpec, RequiresRoleSpec, RequiresSpec,
};

/// Member identifier within a run
pub type MemberId = u32;

/// Run identifier assigned by the host
pub type RunId = String;
