//! Normalized role and data records
//!
//! These are produced by [`crate::validation`] and never constructed from
//! unchecked input anywhere else.

use serde::{Deserialize, Serialize};

/// A role a member depends on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequiredRole {
    /// Role name, never blank
    pub name: String,
    /// Provider hostnames must be released to this member
    pub host_required: bool,
    /// Provider public keys must be released to this member
    pub key_required: bool,
}

impl RequiredRole {
    pub fn new(name: impl Into<String>, host_required: bool, key_required: bool) -> Self {
        Self {
            name: name.into(),
            host_required,
            key_required,
        }
    }
}

/// A role a member offers, bound to one of its interfaces
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvidedRoleDescription {
    /// Role name, matched exactly against [`RequiredRole::name`]
    pub name: String,
    /// Opaque value passed through to requirers
    pub value: Option<String>,
    /// Interface providing the role; `None` means every interface of the member
    pub interface_name: Option<String>,
}

impl ProvidedRoleDescription {
    pub fn new(name: impl Into<String>, value: Option<String>, interface_name: Option<String>) -> Self {
        Self {
            name: name.into(),
            value,
            interface_name,
        }
    }
}

/// Opaque named data
///
/// In a requirement the value is a fallback used once injections close; in an
/// injection or a resolved document it is the payload itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataPair {
    pub name: String,
    pub value: Option<String>,
}

impl DataPair {
    pub fn new(name: impl Into<String>, value: Option<String>) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}
