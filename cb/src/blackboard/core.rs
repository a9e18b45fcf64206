//! Blackboard: per-run barrier state and resolution

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::domain::{
    ContextSnapshot, DataPair, ExitStatus, Identity, MemberId, ResolvedDocument, ResolvedRole, Retrieval,
    RoleProvider, RunId,
};
use crate::error::{BrokerError, BrokerResult};
use crate::validation::ValidatedSpec;

use super::member::Member;

/// How a member's error exit affects members depending on its roles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorExitPolicy {
    /// Mark dependents failed when the error is reported
    #[default]
    Eager,
    /// Fail dependents only when they next retrieve
    OnRetrieve,
    /// Errors do not affect other members
    Ignore,
}

impl std::fmt::Display for ErrorExitPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Eager => write!(f, "eager"),
            Self::OnRetrieve => write!(f, "on-retrieve"),
            Self::Ignore => write!(f, "ignore"),
        }
    }
}

/// Identity snapshot filter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", content = "value", rename_all = "snake_case")]
pub enum IdentityQuery {
    All,
    Host(String),
    Ip(String),
}

impl IdentityQuery {
    fn matches(&self, identity: &Identity) -> bool {
        match self {
            IdentityQuery::All => true,
            IdentityQuery::Host(host) => identity.hostname.as_deref() == Some(host.as_str()),
            IdentityQuery::Ip(ip) => identity.ip.as_deref() == Some(ip.as_str()),
        }
    }
}

/// State of one contextualization run
///
/// Not synchronized; the session facade owns the only lock.
#[derive(Debug)]
pub struct Blackboard {
    run_id: RunId,
    policy: ErrorExitPolicy,
    /// Fixed by the first registration
    expected_members: Option<usize>,
    members: BTreeMap<MemberId, Member>,
    injected: BTreeMap<String, String>,
}

impl Blackboard {
    pub fn new(run_id: impl Into<RunId>, policy: ErrorExitPolicy) -> Self {
        let run_id = run_id.into();
        debug!(%run_id, %policy, "Blackboard::new: called");
        Self {
            run_id,
            policy,
            expected_members: None,
            members: BTreeMap::new(),
            injected: BTreeMap::new(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn policy(&self) -> ErrorExitPolicy {
        self.policy
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    pub fn expected_members(&self) -> Option<usize> {
        self.expected_members
    }

    /// Every expected member has registered
    pub fn is_complete(&self) -> bool {
        self.expected_members.is_some_and(|n| self.members.len() >= n)
    }

    /// Register a member's declarations
    ///
    /// Only records; readiness is computed on retrieve.
    pub fn add_member(
        &mut self,
        member_id: MemberId,
        identities: Vec<Identity>,
        spec: ValidatedSpec,
        total_expected: usize,
    ) -> BrokerResult<()> {
        debug!(run_id = %self.run_id, member_id, identity_count = identities.len(), total_expected, "add_member: called");

        if total_expected == 0 {
            return Err(BrokerError::InvalidSpecification(format!(
                "member #{} declares zero expected members",
                member_id
            )));
        }
        if let Some(expected) = self.expected_members
            && expected != total_expected
        {
            return Err(BrokerError::InvalidSpecification(format!(
                "member #{} declares {} expected members, run {} expects {}",
                member_id, total_expected, self.run_id, expected
            )));
        }
        if self.members.contains_key(&member_id) {
            return Err(BrokerError::DuplicateMember(member_id));
        }
        if self.members.len() >= total_expected {
            return Err(BrokerError::InvalidSpecification(format!(
                "run {} already has all {} expected members, cannot add #{}",
                self.run_id, total_expected, member_id
            )));
        }
        if let Some(descs) = &spec.provided_roles {
            if identities.is_empty() {
                return Err(BrokerError::InvalidSpecification(format!(
                    "member #{} provides roles but has no identities",
                    member_id
                )));
            }
            for desc in descs {
                if let Some(interface) = desc.interface_name.as_deref()
                    && !identities.iter().any(|id| id.interface_name.as_deref() == Some(interface))
                {
                    return Err(BrokerError::InvalidSpecification(format!(
                        "member #{} provides role '{}' on unknown interface '{}'",
                        member_id, desc.name, interface
                    )));
                }
            }
        }

        let mut member = Member::new(member_id, identities, spec);
        if self.policy == ErrorExitPolicy::Eager {
            member.failed_dependency = self
                .members
                .values()
                .find(|p| p.exit.is_error() && member.depends_on(p))
                .map(|p| p.id);
            if let Some(failed) = member.failed_dependency {
                warn!(run_id = %self.run_id, member_id, failed, "new member depends on a provider that already failed");
            }
        }

        self.expected_members = Some(total_expected);
        self.members.insert(member_id, member);
        info!(
            run_id = %self.run_id,
            member_id,
            registered = self.members.len(),
            expected = total_expected,
            "member registered"
        );
        Ok(())
    }

    /// Store injected data, overwriting any earlier value under the same name
    pub fn inject_data(&mut self, name: &str, value: &str) -> BrokerResult<()> {
        debug!(run_id = %self.run_id, %name, "inject_data: called");
        if name.trim().is_empty() {
            return Err(BrokerError::InvalidSpecification("empty injected data name".to_string()));
        }
        if self.injected.insert(name.to_string(), value.to_string()).is_some() {
            debug!(run_id = %self.run_id, %name, "inject_data: overwrote earlier value");
        }
        Ok(())
    }

    pub fn ok_exit(&mut self, member_id: MemberId) -> BrokerResult<()> {
        self.report_exit(member_id, ExitStatus::Ok)
    }

    pub fn error_exit(&mut self, member_id: MemberId, code: i16, message: &str) -> BrokerResult<()> {
        self.report_exit(
            member_id,
            ExitStatus::Error {
                code,
                message: message.to_string(),
            },
        )
    }

    fn report_exit(&mut self, member_id: MemberId, status: ExitStatus) -> BrokerResult<()> {
        debug!(run_id = %self.run_id, member_id, %status, "report_exit: called");
        let member = self
            .members
            .get_mut(&member_id)
            .ok_or(BrokerError::UnknownMember(member_id))?;

        match &member.exit {
            ExitStatus::Pending => {}
            current if *current == status => {
                warn!(run_id = %self.run_id, member_id, %status, "exit already reported, ignoring repeat");
                return Ok(());
            }
            current => {
                return Err(BrokerError::Usage(format!(
                    "member #{} already reported {}, cannot report {}",
                    member_id, current, status
                )));
            }
        }

        let is_error = status.is_error();
        member.exit = status;
        info!(run_id = %self.run_id, member_id, exit = %member.exit, "member reported exit");

        if is_error && self.policy == ErrorExitPolicy::Eager {
            self.mark_dependents_failed(member_id);
        }
        Ok(())
    }

    fn mark_dependents_failed(&mut self, failed_id: MemberId) {
        let Some(failed) = self.members.get(&failed_id).cloned() else {
            return;
        };
        for member in self.members.values_mut() {
            if member.id != failed_id && member.failed_dependency.is_none() && member.depends_on(&failed) {
                warn!(run_id = %self.run_id, member_id = member.id, failed_id, "dependency failed");
                member.failed_dependency = Some(failed_id);
            }
        }
    }

    /// Identities of every registered member matching `query`
    pub fn identities(&self, query: &IdentityQuery) -> Vec<Identity> {
        debug!(run_id = %self.run_id, ?query, "identities: called");
        self.members
            .values()
            .flat_map(|m| m.identities.iter())
            .filter(|id| query.matches(id))
            .cloned()
            .collect()
    }

    /// Record reported identities, then try to resolve the member's document
    pub fn retrieve(
        &mut self,
        member_id: MemberId,
        reported: &[Identity],
        injections_closed: bool,
    ) -> BrokerResult<Retrieval> {
        debug!(run_id = %self.run_id, member_id, reported = reported.len(), injections_closed, "retrieve: called");
        self.members
            .get_mut(&member_id)
            .ok_or(BrokerError::UnknownMember(member_id))?
            .merge_reported(reported);
        self.resolve(member_id, injections_closed)
    }

    /// Resolve one member's document, or report why it cannot be resolved
    ///
    /// Permanent failures are checked before anything that could still change,
    /// so a member is never left polling for something that cannot arrive.
    pub fn resolve(&self, member_id: MemberId, injections_closed: bool) -> BrokerResult<Retrieval> {
        let member = self
            .members
            .get(&member_id)
            .ok_or(BrokerError::UnknownMember(member_id))?;
        let complete = self.is_complete();

        self.check_satisfiable(member, complete, injections_closed)?;

        let mut doc = ResolvedDocument::default();

        if member.all_identities_required {
            if !complete || self.members.values().any(|m| m.identities.is_empty()) {
                debug!(run_id = %self.run_id, member_id, "resolve: waiting for all identities");
                return Ok(Retrieval::NotReady);
            }
            doc.identities = Some(self.identities(&IdentityQuery::All));
        }

        for required in member.required_roles.iter().flatten() {
            if !complete {
                debug!(run_id = %self.run_id, member_id, role = %required.name, "resolve: waiting for members");
                return Ok(Retrieval::NotReady);
            }
            let mut providers = Vec::new();
            for provider in self.members.values() {
                for desc in provider.provided(&required.name) {
                    for identity in provider.identities_for(desc) {
                        if (required.host_required && !identity.has_hostname())
                            || (required.key_required && !identity.has_public_key())
                        {
                            debug!(
                                run_id = %self.run_id,
                                member_id,
                                provider = provider.id,
                                role = %required.name,
                                "resolve: provider has not reported identity yet"
                            );
                            return Ok(Retrieval::NotReady);
                        }
                        providers.push(RoleProvider {
                            member_id: provider.id,
                            interface_name: identity.interface_name.clone(),
                            ip: identity.ip.clone(),
                            hostname: identity.hostname.clone().filter(|_| required.host_required),
                            public_key: identity.public_key.clone().filter(|_| required.key_required),
                            value: desc.value.clone(),
                        });
                    }
                }
            }
            doc.roles.push(ResolvedRole {
                name: required.name.clone(),
                providers,
            });
        }

        for required in member.required_data.iter().flatten() {
            let value = match self.injected.get(&required.name) {
                Some(value) => Some(value.clone()),
                None if injections_closed => required.value.clone(),
                None => {
                    debug!(run_id = %self.run_id, member_id, data = %required.name, "resolve: waiting for injection");
                    return Ok(Retrieval::NotReady);
                }
            };
            doc.data.push(DataPair::new(required.name.clone(), value));
        }

        info!(run_id = %self.run_id, member_id, roles = doc.roles.len(), data = doc.data.len(), "document resolved");
        Ok(Retrieval::Ready(Box::new(doc)))
    }

    fn check_satisfiable(&self, member: &Member, complete: bool, injections_closed: bool) -> BrokerResult<()> {
        let unsatisfiable = |reason: String| BrokerError::UnsatisfiableRequirement {
            member_id: member.id,
            reason,
        };

        if self.policy != ErrorExitPolicy::Ignore {
            if let Some(failed) = member.failed_dependency {
                return Err(unsatisfiable(format!("provider #{} reported an error exit", failed)));
            }
            if let Some(failed) = self
                .members
                .values()
                .find(|p| p.id != member.id && p.exit.is_error() && member.depends_on(p))
            {
                return Err(unsatisfiable(format!("provider #{} reported an error exit", failed.id)));
            }
        }

        if complete {
            for required in member.required_roles.iter().flatten() {
                if !self.members.values().any(|m| m.provides(&required.name)) {
                    return Err(unsatisfiable(format!(
                        "all {} members registered and none provides role '{}'",
                        self.members.len(),
                        required.name
                    )));
                }
                // An exited provider will never report the missing fields
                if let Some(provider) = self.members.values().find(|p| {
                    p.exit != ExitStatus::Pending
                        && p.provided(&required.name)
                            .flat_map(|desc| p.identities_for(desc))
                            .any(|id| {
                                (required.host_required && !id.has_hostname())
                                    || (required.key_required && !id.has_public_key())
                            })
                }) {
                    return Err(unsatisfiable(format!(
                        "provider #{} of role '{}' exited ({}) without reporting the identity this member needs",
                        provider.id, required.name, provider.exit
                    )));
                }
            }
        }

        if injections_closed {
            for required in member.required_data.iter().flatten() {
                if required.value.is_none() && !self.injected.contains_key(&required.name) {
                    return Err(unsatisfiable(format!(
                        "data '{}' was never injected and injections are closed",
                        required.name
                    )));
                }
            }
        }
        Ok(())
    }

    /// Whole-run view for hosts
    pub fn snapshot(&self, injections_closed: bool) -> ContextSnapshot {
        let complete = self.is_complete();
        let error_present = self.members.values().any(|m| m.exit.is_error());
        ContextSnapshot {
            run_id: self.run_id.clone(),
            expected_members: self.expected_members,
            registered_members: self.members.len(),
            complete,
            all_ok: complete && self.members.values().all(|m| m.exit == ExitStatus::Ok),
            error_present,
            no_more_injections: injections_closed,
            members: self.members.values().map(Member::summary).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ProvidedRoleDescription, RequiredRole};

    fn requires_role(name: &str, host: bool, key: bool) -> ValidatedSpec {
        ValidatedSpec {
            required_roles: Some(vec![RequiredRole::new(name, host, key)]),
            ..Default::default()
        }
    }

    fn provides_role(name: &str) -> ValidatedSpec {
        ValidatedSpec {
            provided_roles: Some(vec![ProvidedRoleDescription::new(name, None, None)]),
            ..Default::default()
        }
    }

    fn requires_data(name: &str, default: Option<&str>) -> ValidatedSpec {
        ValidatedSpec {
            required_data: Some(vec![DataPair::new(name, default.map(str::to_string))]),
            ..Default::default()
        }
    }

    fn nic(ip: &str, host: Option<&str>) -> Identity {
        Identity::new("eth0", ip, host.map(str::to_string), None)
    }

    #[test]
    fn test_add_member_duplicate_rejected() {
        let mut bb = Blackboard::new("run", ErrorExitPolicy::default());
        bb.add_member(1, vec![], requires_role("r", false, false), 2).unwrap();
        let err = bb.add_member(1, vec![], requires_role("r", false, false), 2).unwrap_err();
        assert_eq!(err, BrokerError::DuplicateMember(1));
        assert_eq!(bb.member_count(), 1);
    }

    #[test]
    fn test_add_member_total_mismatch_rejected() {
        let mut bb = Blackboard::new("run", ErrorExitPolicy::default());
        bb.add_member(1, vec![], requires_role("r", false, false), 2).unwrap();
        let err = bb.add_member(2, vec![], requires_role("r", false, false), 3).unwrap_err();
        assert!(matches!(err, BrokerError::InvalidSpecification(_)));
        assert_eq!(bb.member_count(), 1);
    }

    #[test]
    fn test_add_member_beyond_expected_rejected() {
        let mut bb = Blackboard::new("run", ErrorExitPolicy::default());
        bb.add_member(1, vec![nic("10.0.0.1", None)], provides_role("r"), 1).unwrap();
        assert!(bb.is_complete());
        assert!(bb.add_member(2, vec![], requires_role("r", false, false), 1).is_err());
    }

    #[test]
    fn test_add_member_unknown_interface_rejected() {
        let mut bb = Blackboard::new("run", ErrorExitPolicy::default());
        let spec = ValidatedSpec {
            provided_roles: Some(vec![ProvidedRoleDescription::new("r", None, Some("ib0".to_string()))]),
            ..Default::default()
        };
        let err = bb.add_member(1, vec![nic("10.0.0.1", None)], spec, 1).unwrap_err();
        assert!(matches!(err, BrokerError::InvalidSpecification(_)));
        assert_eq!(bb.member_count(), 0);
        assert_eq!(bb.expected_members(), None);
    }

    #[test]
    fn test_role_not_ready_until_complete() {
        let mut bb = Blackboard::new("run", ErrorExitPolicy::default());
        bb.add_member(1, vec![nic("10.0.0.1", None)], requires_role("nfsserver", true, false), 2)
            .unwrap();
        assert_eq!(bb.retrieve(1, &[], false).unwrap(), Retrieval::NotReady);

        bb.add_member(2, vec![nic("10.0.0.2", Some("nfs.local"))], provides_role("nfsserver"), 2)
            .unwrap();
        let doc = bb.retrieve(1, &[], false).unwrap().into_document().unwrap();
        let role = doc.role("nfsserver").unwrap();
        assert_eq!(role.providers.len(), 1);
        assert_eq!(role.providers[0].hostname.as_deref(), Some("nfs.local"));
        assert_eq!(role.providers[0].public_key, None);
    }

    #[test]
    fn test_hostname_trimmed_when_not_required() {
        let mut bb = Blackboard::new("run", ErrorExitPolicy::default());
        bb.add_member(1, vec![nic("10.0.0.1", None)], requires_role("nfsserver", false, false), 2)
            .unwrap();
        bb.add_member(2, vec![nic("10.0.0.2", Some("nfs.local"))], provides_role("nfsserver"), 2)
            .unwrap();
        let doc = bb.retrieve(1, &[], false).unwrap().into_document().unwrap();
        let provider = &doc.role("nfsserver").unwrap().providers[0];
        assert_eq!(provider.hostname, None);
        assert_eq!(provider.ip.as_deref(), Some("10.0.0.2"));
    }

    #[test]
    fn test_provider_key_reported_on_retrieve() {
        let mut bb = Blackboard::new("run", ErrorExitPolicy::default());
        bb.add_member(1, vec![nic("10.0.0.1", None)], requires_role("torqueserver", false, true), 2)
            .unwrap();
        bb.add_member(2, vec![nic("10.0.0.2", None)], provides_role("torqueserver"), 2)
            .unwrap();
        assert_eq!(bb.retrieve(1, &[], false).unwrap(), Retrieval::NotReady);

        let report = Identity {
            interface_name: Some("eth0".to_string()),
            public_key: Some("ssh-rsa AAAA".to_string()),
            ..Default::default()
        };
        // the provider's own retrieve is how it reports its key
        assert!(bb.retrieve(2, &[report], false).unwrap().is_ready());
        let doc = bb.retrieve(1, &[], false).unwrap().into_document().unwrap();
        assert_eq!(
            doc.role("torqueserver").unwrap().providers[0].public_key.as_deref(),
            Some("ssh-rsa AAAA")
        );
    }

    #[test]
    fn test_no_provider_unsatisfiable_when_complete() {
        let mut bb = Blackboard::new("run", ErrorExitPolicy::default());
        bb.add_member(1, vec![nic("10.0.0.1", None)], requires_role("torqueserver", true, true), 2)
            .unwrap();
        bb.add_member(2, vec![nic("10.0.0.2", None)], provides_role("nfsserver"), 2)
            .unwrap();
        let err = bb.retrieve(1, &[], false).unwrap_err();
        assert!(matches!(err, BrokerError::UnsatisfiableRequirement { member_id: 1, .. }));
    }

    #[test]
    fn test_exited_provider_without_hostname_unsatisfiable() {
        let mut bb = Blackboard::new("run", ErrorExitPolicy::default());
        bb.add_member(1, vec![nic("10.0.0.1", None)], requires_role("nfs", true, false), 2)
            .unwrap();
        bb.add_member(2, vec![nic("10.0.0.2", None)], provides_role("nfs"), 2).unwrap();
        assert_eq!(bb.retrieve(1, &[], false).unwrap(), Retrieval::NotReady);

        bb.ok_exit(2).unwrap();
        let err = bb.retrieve(1, &[], true).unwrap_err();
        assert!(matches!(err, BrokerError::UnsatisfiableRequirement { member_id: 1, .. }));
        assert!(err.to_string().contains("#2"));
    }

    #[test]
    fn test_exited_provider_with_reported_key_still_resolves() {
        let mut bb = Blackboard::new("run", ErrorExitPolicy::default());
        bb.add_member(1, vec![nic("10.0.0.1", None)], requires_role("ssh", false, true), 2)
            .unwrap();
        bb.add_member(2, vec![nic("10.0.0.2", None)], provides_role("ssh"), 2).unwrap();
        let report = Identity {
            interface_name: Some("eth0".to_string()),
            public_key: Some("ssh-ed25519 AAAA".to_string()),
            ..Default::default()
        };
        bb.retrieve(2, &[report], false).unwrap();
        bb.ok_exit(2).unwrap();

        let doc = bb.retrieve(1, &[], true).unwrap().into_document().unwrap();
        assert_eq!(
            doc.role("ssh").unwrap().providers[0].public_key.as_deref(),
            Some("ssh-ed25519 AAAA")
        );
    }

    #[test]
    fn test_all_identities_waits_for_all_members() {
        let mut bb = Blackboard::new("run", ErrorExitPolicy::default());
        let spec = ValidatedSpec {
            all_identities_required: true,
            ..Default::default()
        };
        bb.add_member(1, vec![nic("10.0.0.1", None)], spec, 2).unwrap();
        assert_eq!(bb.retrieve(1, &[], false).unwrap(), Retrieval::NotReady);

        bb.add_member(2, vec![nic("10.0.0.2", None)], provides_role("x"), 2).unwrap();
        let doc = bb.retrieve(1, &[], false).unwrap().into_document().unwrap();
        assert_eq!(doc.identities.unwrap().len(), 2);
    }

    #[test]
    fn test_data_waits_for_injection() {
        let mut bb = Blackboard::new("run", ErrorExitPolicy::default());
        bb.add_member(1, vec![nic("10.0.0.1", None)], requires_data("foo", None), 1)
            .unwrap();
        assert_eq!(bb.retrieve(1, &[], false).unwrap(), Retrieval::NotReady);
        bb.inject_data("foo", "bar").unwrap();
        let doc = bb.retrieve(1, &[], false).unwrap().into_document().unwrap();
        assert_eq!(doc.data_value("foo"), Some("bar"));
    }

    #[test]
    fn test_data_default_used_when_injections_closed() {
        let mut bb = Blackboard::new("run", ErrorExitPolicy::default());
        bb.add_member(1, vec![], requires_data("foo", Some("fallback")), 1).unwrap();
        assert_eq!(bb.retrieve(1, &[], false).unwrap(), Retrieval::NotReady);
        let doc = bb.retrieve(1, &[], true).unwrap().into_document().unwrap();
        assert_eq!(doc.data_value("foo"), Some("fallback"));
    }

    #[test]
    fn test_data_missing_after_close_unsatisfiable() {
        let mut bb = Blackboard::new("run", ErrorExitPolicy::default());
        bb.add_member(1, vec![], requires_data("foo", None), 1).unwrap();
        assert!(matches!(
            bb.retrieve(1, &[], true),
            Err(BrokerError::UnsatisfiableRequirement { .. })
        ));
    }

    #[test]
    fn test_inject_overwrites() {
        let mut bb = Blackboard::new("run", ErrorExitPolicy::default());
        bb.add_member(1, vec![], requires_data("foo", None), 1).unwrap();
        bb.inject_data("foo", "one").unwrap();
        bb.inject_data("foo", "two").unwrap();
        let doc = bb.retrieve(1, &[], false).unwrap().into_document().unwrap();
        assert_eq!(doc.data_value("foo"), Some("two"));
        assert!(bb.inject_data(" ", "x").is_err());
    }

    #[test]
    fn test_error_exit_fails_dependents_eager() {
        let mut bb = Blackboard::new("run", ErrorExitPolicy::Eager);
        bb.add_member(1, vec![nic("10.0.0.1", None)], requires_role("nfsserver", true, false), 2)
            .unwrap();
        bb.add_member(2, vec![nic("10.0.0.2", None)], provides_role("nfsserver"), 2)
            .unwrap();
        bb.error_exit(2, 1, "mount failed").unwrap();

        let snapshot = bb.snapshot(false);
        assert_eq!(snapshot.members[0].failed_dependency, Some(2));
        assert!(snapshot.error_present);
        assert!(matches!(
            bb.retrieve(1, &[], false),
            Err(BrokerError::UnsatisfiableRequirement { member_id: 1, .. })
        ));
    }

    #[test]
    fn test_error_exit_on_retrieve_does_not_mark() {
        let mut bb = Blackboard::new("run", ErrorExitPolicy::OnRetrieve);
        bb.add_member(1, vec![nic("10.0.0.1", None)], requires_role("nfsserver", true, false), 2)
            .unwrap();
        bb.add_member(2, vec![nic("10.0.0.2", None)], provides_role("nfsserver"), 2)
            .unwrap();
        bb.error_exit(2, 1, "mount failed").unwrap();
        assert_eq!(bb.snapshot(false).members[0].failed_dependency, None);
        assert!(bb.retrieve(1, &[], false).is_err());
    }

    #[test]
    fn test_error_exit_ignored() {
        let mut bb = Blackboard::new("run", ErrorExitPolicy::Ignore);
        bb.add_member(1, vec![nic("10.0.0.1", None)], requires_role("nfsserver", true, false), 2)
            .unwrap();
        bb.add_member(2, vec![nic("10.0.0.2", Some("nfs"))], provides_role("nfsserver"), 2)
            .unwrap();
        bb.error_exit(2, 1, "mount failed").unwrap();
        assert!(bb.retrieve(1, &[], false).unwrap().is_ready());
    }

    #[test]
    fn test_report_exit_twice() {
        let mut bb = Blackboard::new("run", ErrorExitPolicy::default());
        bb.add_member(1, vec![nic("10.0.0.1", None)], provides_role("x"), 1).unwrap();
        bb.ok_exit(1).unwrap();
        bb.ok_exit(1).unwrap();
        assert!(matches!(bb.error_exit(1, 2, "late"), Err(BrokerError::Usage(_))));
        assert_eq!(bb.ok_exit(9), Err(BrokerError::UnknownMember(9)));
        assert!(bb.snapshot(false).all_ok);
    }

    #[test]
    fn test_identities_query() {
        let mut bb = Blackboard::new("run", ErrorExitPolicy::default());
        bb.add_member(1, vec![nic("10.0.0.1", Some("a"))], provides_role("x"), 2).unwrap();
        bb.add_member(2, vec![nic("10.0.0.2", Some("b"))], provides_role("x"), 2).unwrap();
        assert_eq!(bb.identities(&IdentityQuery::All).len(), 2);
        let by_host = bb.identities(&IdentityQuery::Host("b".to_string()));
        assert_eq!(by_host.len(), 1);
        assert_eq!(by_host[0].ip.as_deref(), Some("10.0.0.2"));
        assert_eq!(bb.identities(&IdentityQuery::Ip("10.0.0.1".to_string())).len(), 1);
        assert!(bb.identities(&IdentityQuery::Ip("10.9.9.9".to_string())).is_empty());
    }

    #[test]
    fn test_retrieve_unknown_member() {
        let mut bb = Blackboard::new("run", ErrorExitPolicy::default());
        assert_eq!(bb.retrieve(4, &[], false), Err(BrokerError::UnknownMember(4)));
    }

    #[test]
    fn test_self_providing_role() {
        let mut bb = Blackboard::new("run", ErrorExitPolicy::default());
        let spec = ValidatedSpec {
            required_roles: Some(vec![RequiredRole::new("node", true, false)]),
            provided_roles: Some(vec![ProvidedRoleDescription::new("node", None, None)]),
            ..Default::default()
        };
        bb.add_member(1, vec![nic("10.0.0.1", Some("n1"))], spec.clone(), 2).unwrap();
        bb.add_member(2, vec![nic("10.0.0.2", Some("n2"))], spec, 2).unwrap();
        let doc = bb.retrieve(1, &[], false).unwrap().into_document().unwrap();
        assert_eq!(doc.role("node").unwrap().providers.len(), 2);
    }
}
