//! Network identity of a member

use serde::{Deserialize, Serialize};

/// One network interface a member exposes
///
/// Members register identities when they are added to a run and report the
/// rest (hostname, public key) on their first retrieve, once the instance has
/// booted far enough to know them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Interface name, e.g. "publicnic"
    #[serde(default, rename = "interface")]
    pub interface_name: Option<String>,

    /// IP address on this interface
    #[serde(default)]
    pub ip: Option<String>,

    /// Hostname bound to this interface
    #[serde(default)]
    pub hostname: Option<String>,

    /// SSH host public key
    #[serde(default, rename = "pubkey")]
    pub public_key: Option<String>,
}

impl Identity {
    pub fn new(
        interface_name: impl Into<String>,
        ip: impl Into<String>,
        hostname: Option<String>,
        public_key: Option<String>,
    ) -> Self {
        Self {
            interface_name: Some(interface_name.into()),
            ip: Some(ip.into()),
            hostname,
            public_key,
        }
    }

    /// True when a non-blank hostname is known
    pub fn has_hostname(&self) -> bool {
        self.hostname.as_deref().is_some_and(|h| !h.trim().is_empty())
    }

    /// True when a non-blank public key is known
    pub fn has_public_key(&self) -> bool {
        self.public_key.as_deref().is_some_and(|k| !k.trim().is_empty())
    }

    /// Overwrite fields with the non-blank values reported in `other`
    ///
    /// Returns true if anything changed.
    pub fn merge_reported(&mut self, other: &Identity) -> bool {
        let mut changed = false;
        for (mine, theirs) in [
            (&mut self.ip, &other.ip),
            (&mut self.hostname, &other.hostname),
            (&mut self.public_key, &other.public_key),
        ] {
            if let Some(value) = theirs.as_deref().filter(|v| !v.trim().is_empty())
                && mine.as_deref() != Some(value)
            {
                *mine = Some(value.to_string());
                changed = true;
            }
        }
        changed
    }
}
