//! Raw requires/provides sections as members send them
//!
//! Everything is optional here; [`crate::validation::validate`] decides what
//! is acceptable.
//!
//! ```text
//! requires:
//!   identity: [{}]
//!   role:
//!     - { name: torqueserver, hostname: true, pubkey: true }
//!     - { name: nfsserver }
//!   data:
//!     - { name: shared-secret }
//! provides:
//!   role:
//!     - { name: torqueclient, interface: privatenic }
//! ```

use serde::{Deserialize, Serialize};

/// Requires section of one member
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequiresSpec {
    /// Identity placeholders; only zero or one empty placeholder is supported
    #[serde(default)]
    pub identity: Vec<IdentityPlaceholder>,

    #[serde(default)]
    pub role: Vec<RequiresRoleSpec>,

    #[serde(default)]
    pub data: Vec<RequiresDataSpec>,
}

/// Identity element inside a requires section
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityPlaceholder {
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default)]
    pub pubkey: Option<String>,
}

impl IdentityPlaceholder {
    /// True when no host, ip or key is set
    pub fn is_empty(&self) -> bool {
        self.hostname.is_none() && self.ip.is_none() && self.pubkey.is_none()
    }
}

/// Role element inside a requires section
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequiresRoleSpec {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub hostname: Option<bool>,
    #[serde(default)]
    pub pubkey: Option<bool>,
}

impl RequiresRoleSpec {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            hostname: None,
            pubkey: None,
        }
    }

    pub fn with_hostname(mut self, hostname: bool) -> Self {
        self.hostname = Some(hostname);
        self
    }

    pub fn with_pubkey(mut self, pubkey: bool) -> Self {
        self.pubkey = Some(pubkey);
        self
    }
}

/// Data element inside a requires section
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequiresDataSpec {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
}

impl RequiresDataSpec {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            value: None,
        }
    }
}

/// Provides section of one member
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvidesSpec {
    #[serde(default)]
    pub role: Vec<ProvidesRoleSpec>,
}

/// Role element inside a provides section
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvidesRoleSpec {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub interface: Option<String>,
}

impl ProvidesRoleSpec {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            value: None,
            interface: None,
        }
    }

    pub fn on_interface(mut self, interface: impl Into<String>) -> Self {
        self.interface = Some(interface.into());
        self
    }
}
