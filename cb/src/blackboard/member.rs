//! Member records owned by the blackboard

use tracing::debug;

use crate::domain::{
    DataPair, ExitStatus, Identity, MemberId, MemberSummary, ProvidedRoleDescription, RequiredRole,
};
use crate::validation::ValidatedSpec;

/// Everything the blackboard knows about one member
#[derive(Debug, Clone)]
pub(crate) struct Member {
    pub id: MemberId,
    pub identities: Vec<Identity>,
    pub all_identities_required: bool,
    pub required_roles: Option<Vec<RequiredRole>>,
    pub required_data: Option<Vec<DataPair>>,
    pub provided_roles: Option<Vec<ProvidedRoleDescription>>,
    pub exit: ExitStatus,
    /// Provider whose error exit made this member's requirements unsatisfiable
    pub failed_dependency: Option<MemberId>,
}

impl Member {
    pub fn new(id: MemberId, identities: Vec<Identity>, spec: ValidatedSpec) -> Self {
        Self {
            id,
            identities,
            all_identities_required: spec.all_identities_required,
            required_roles: spec.required_roles,
            required_data: spec.required_data,
            provided_roles: spec.provided_roles,
            exit: ExitStatus::Pending,
            failed_dependency: None,
        }
    }

    /// Role descriptions matching `role`
    pub fn provided(&self, role: &str) -> impl Iterator<Item = &ProvidedRoleDescription> {
        self.provided_roles.iter().flatten().filter(move |d| d.name == role)
    }

    pub fn provides(&self, role: &str) -> bool {
        self.provided(role).next().is_some()
    }

    /// Identities bound to a role description
    pub fn identities_for<'a>(&'a self, desc: &'a ProvidedRoleDescription) -> impl Iterator<Item = &'a Identity> {
        self.identities
            .iter()
            .filter(move |id| desc.interface_name.is_none() || id.interface_name == desc.interface_name)
    }

    /// Check whether this member requires any role `provider` provides
    pub fn depends_on(&self, provider: &Member) -> bool {
        self.required_roles
            .iter()
            .flatten()
            .any(|r| provider.provides(&r.name))
    }

    /// Merge identities reported by the member itself
    ///
    /// Reports are matched to registered identities by interface name. A report
    /// without an interface name applies to the only registered identity, if
    /// there is exactly one. Anything else is a new interface and is appended.
    pub fn merge_reported(&mut self, reported: &[Identity]) {
        for report in reported {
            let target = match report.interface_name.as_deref() {
                Some(name) => self
                    .identities
                    .iter_mut()
                    .find(|id| id.interface_name.as_deref() == Some(name)),
                None if self.identities.len() == 1 => self.identities.first_mut(),
                None => None,
            };
            match target {
                Some(existing) => {
                    if existing.merge_reported(report) {
                        debug!(member_id = self.id, interface = ?report.interface_name, "merged reported identity");
                    }
                }
                None if report.interface_name.is_some() => {
                    debug!(member_id = self.id, interface = ?report.interface_name, "appending reported identity");
                    self.identities.push(report.clone());
                }
                None => {
                    debug!(member_id = self.id, "ignoring reported identity without interface name");
                }
            }
        }
    }

    pub fn summary(&self) -> MemberSummary {
        MemberSummary {
            member_id: self.id,
            identities: self.identities.clone(),
            provided_roles: self.provided_roles.iter().flatten().map(|d| d.name.clone()).collect(),
            exit: self.exit.clone(),
            failed_dependency: self.failed_dependency,
        }
    }
}
