//! Requirement validation
//!
//! Turns the raw requires/provides sections a member sends into the
//! normalized records the blackboard stores. Validation is all-or-nothing:
//! either every record is produced or nothing is, so a rejected member never
//! leaves a partial registration behind.

use tracing::{debug, trace};

use crate::domain::{
    DataPair, MemberId, ProvidedRoleDescription, ProvidesSpec, RequiredRole, RequiresDataSpec, RequiresRoleSpec,
    RequiresSpec,
};
use crate::error::{BrokerError, BrokerResult};

/// Normalized declarations for one member
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidatedSpec {
    /// Member asked for every identity in the run
    pub all_identities_required: bool,
    pub required_roles: Option<Vec<RequiredRole>>,
    pub required_data: Option<Vec<DataPair>>,
    pub provided_roles: Option<Vec<ProvidedRoleDescription>>,
}

impl ValidatedSpec {
    /// True when the member depends on anything at all
    pub fn requires_anything(&self) -> bool {
        self.all_identities_required || self.required_roles.is_some() || self.required_data.is_some()
    }
}

/// Validate one member's requires and provides sections
pub fn validate(
    member_id: MemberId,
    requires: Option<&RequiresSpec>,
    provides: Option<&ProvidesSpec>,
) -> BrokerResult<ValidatedSpec> {
    debug!(member_id, has_requires = requires.is_some(), has_provides = provides.is_some(), "validate: called");

    let requires_empty = requires.is_none_or(|r| r.identity.is_empty() && r.role.is_empty() && r.data.is_empty());
    let provides_empty = provides.is_none_or(|p| p.role.is_empty());
    if requires_empty && provides_empty {
        return Err(BrokerError::InvalidSpecification(format!(
            "both provides and requires are empty, member #{} contributes nothing to the run",
            member_id
        )));
    }

    let (all_identities_required, required_roles, required_data) = match requires {
        Some(requires) => (
            all_identities_required(member_id, requires)?,
            required_roles(member_id, &requires.role)?,
            required_data(&requires.data)?,
        ),
        None => (false, None, None),
    };

    let provided_roles = match provides {
        Some(provides) => provided_roles(member_id, provides)?,
        None => None,
    };

    Ok(ValidatedSpec {
        all_identities_required,
        required_roles,
        required_data,
        provided_roles,
    })
}

/// Zero placeholders: false. Exactly one empty placeholder: true.
///
/// Selecting a subset of identities through placeholders is not supported,
/// so every other shape is rejected instead of being misread.
fn all_identities_required(member_id: MemberId, requires: &RequiresSpec) -> BrokerResult<bool> {
    match requires.identity.as_slice() {
        [] => {
            trace!(member_id, "no identity element in requires section, not all identities required");
            Ok(false)
        }
        [placeholder] if placeholder.is_empty() => Ok(true),
        [_] => Err(BrokerError::InvalidSpecification(format!(
            "requires section of member #{} has an identity element with information in it, only zero or one \
             empty identity element is supported",
            member_id
        ))),
        many => Err(BrokerError::InvalidSpecification(format!(
            "requires section of member #{} has {} identity elements, only zero or one empty identity element is \
             supported",
            member_id,
            many.len()
        ))),
    }
}

fn required_roles(member_id: MemberId, specs: &[RequiresRoleSpec]) -> BrokerResult<Option<Vec<RequiredRole>>> {
    if specs.is_empty() {
        trace!(member_id, "requires section has no role elements");
        return Ok(None);
    }

    let mut roles: Vec<RequiredRole> = Vec::with_capacity(specs.len());
    for spec in specs {
        let name = non_blank(spec.name.as_deref()).ok_or_else(|| {
            BrokerError::InvalidSpecification(format!("member #{} requires a role with an empty name", member_id))
        })?;
        let host_required = spec.hostname.unwrap_or(false);
        let key_required = spec.pubkey.unwrap_or(false);

        // Same role listed twice: keep one entry asking for everything either asked for
        match roles.iter_mut().find(|r| r.name == name) {
            Some(existing) => {
                existing.host_required |= host_required;
                existing.key_required |= key_required;
            }
            None => roles.push(RequiredRole::new(name, host_required, key_required)),
        }
    }
    Ok(Some(roles))
}

fn required_data(specs: &[RequiresDataSpec]) -> BrokerResult<Option<Vec<DataPair>>> {
    if specs.is_empty() {
        return Ok(None);
    }

    let mut pairs: Vec<DataPair> = Vec::with_capacity(specs.len());
    for spec in specs {
        let name = non_blank(spec.name.as_deref())
            .ok_or_else(|| BrokerError::InvalidSpecification("empty data element name".to_string()))?;
        match pairs.iter_mut().find(|p| p.name == name) {
            Some(existing) => {
                if existing.value.is_none() {
                    existing.value = spec.value.clone();
                }
            }
            None => pairs.push(DataPair::new(name, spec.value.clone())),
        }
    }
    Ok(Some(pairs))
}

fn provided_roles(member_id: MemberId, provides: &ProvidesSpec) -> BrokerResult<Option<Vec<ProvidedRoleDescription>>> {
    if provides.role.is_empty() {
        trace!(
            member_id,
            "provides section has no role elements, member only contributes identities"
        );
        return Ok(None);
    }

    let mut descs: Vec<ProvidedRoleDescription> = Vec::with_capacity(provides.role.len());
    for spec in &provides.role {
        let name = non_blank(spec.name.as_deref()).ok_or_else(|| {
            BrokerError::InvalidSpecification(format!("member #{} provides a role with an empty name", member_id))
        })?;
        let desc = ProvidedRoleDescription::new(name, spec.value.clone(), spec.interface.clone());
        if !descs.contains(&desc) {
            descs.push(desc);
        }
    }
    Ok(Some(descs))
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}
