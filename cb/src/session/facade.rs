//! Session facade for one run

use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::blackboard::{Blackboard, IdentityQuery};
use crate::domain::{ContextSnapshot, Identity, MemberId, ProvidesSpec, RequiresSpec, Retrieval, RunId};
use crate::error::{BrokerError, BrokerResult};
use crate::registry::{RunRegistry, SharedBlackboard};
use crate::validation;

use super::lifecycle::{Bootstrap, Lifecycle, SecurityContext};

#[derive(Debug)]
struct SessionStatus {
    no_more_injections: bool,
}

/// Per-run API surface
///
/// Every operation holds the session's status lock for its full duration, so
/// each one is atomic with respect to every other operation on the run. Guards
/// release the lock on every exit path, including errors.
#[derive(Debug)]
pub struct Session {
    run_id: RunId,
    allow_injections: bool,
    registry: Arc<RunRegistry>,
    blackboard: OnceLock<SharedBlackboard>,
    status: Mutex<SessionStatus>,
    lifecycle: Mutex<Lifecycle>,
}

impl Session {
    /// Create a session for `run_id`
    ///
    /// `allow_injections` is fixed for the life of the run. When false the
    /// injection phase starts out closed.
    pub fn new(run_id: impl Into<RunId>, allow_injections: bool, registry: Arc<RunRegistry>) -> BrokerResult<Self> {
        let run_id = run_id.into();
        debug!(%run_id, allow_injections, "Session::new: called");
        if run_id.trim().is_empty() {
            error!("cannot create session without a run id");
            return Err(BrokerError::Creation("no run id".to_string()));
        }
        Ok(Self {
            run_id,
            allow_injections,
            registry,
            blackboard: OnceLock::new(),
            status: Mutex::new(SessionStatus {
                no_more_injections: !allow_injections,
            }),
            lifecycle: Mutex::new(Lifecycle::default()),
        })
    }

    pub fn id(&self) -> &str {
        &self.run_id
    }

    pub fn allow_injections(&self) -> bool {
        self.allow_injections
    }

    // === Blackboard access ===

    // Always go through here: the registry does the atomic get-or-create, the
    // once-cell only caches the result.
    fn blackboard(&self) -> BrokerResult<&SharedBlackboard> {
        if let Some(board) = self.blackboard.get() {
            return Ok(board);
        }
        let board = self.registry.get_or_create(&self.run_id)?;
        Ok(self.blackboard.get_or_init(|| board))
    }

    fn lock_status(&self) -> BrokerResult<MutexGuard<'_, SessionStatus>> {
        self.status.lock().map_err(|_| BrokerError::poisoned("session status"))
    }

    fn lock_lifecycle(&self) -> BrokerResult<MutexGuard<'_, Lifecycle>> {
        self.lifecycle.lock().map_err(|_| BrokerError::poisoned("session lifecycle"))
    }

    /// Run `f` against the blackboard while holding the status lock
    fn with_blackboard<T>(&self, f: impl FnOnce(&mut Blackboard, bool) -> BrokerResult<T>) -> BrokerResult<T> {
        let status = self.lock_status()?;
        let board = self.blackboard()?;
        let mut board = board.lock().map_err(|_| BrokerError::poisoned("blackboard"))?;
        f(&mut board, status.no_more_injections)
    }

    // === Registration ===

    /// Register a member with its identities and raw requires/provides sections
    pub fn add_workspace(
        &self,
        member_id: MemberId,
        identities: Vec<Identity>,
        requires: Option<&RequiresSpec>,
        provides: Option<&ProvidesSpec>,
        total_members: usize,
    ) -> BrokerResult<()> {
        debug!(run_id = %self.run_id, member_id, total_members, "add_workspace: called");
        let spec = validation::validate(member_id, requires, provides)?;
        self.with_blackboard(|board, _| board.add_member(member_id, identities, spec, total_members))
    }

    // === Injection ===

    pub fn inject_data(&self, name: &str, value: &str) -> BrokerResult<()> {
        debug!(run_id = %self.run_id, %name, "inject_data: called");
        if !self.allow_injections {
            return Err(BrokerError::InjectionsNotAllowed {
                run_id: self.run_id.clone(),
            });
        }
        self.with_blackboard(|board, closed| {
            if closed {
                return Err(BrokerError::InjectionsClosed {
                    run_id: self.run_id.clone(),
                });
            }
            board.inject_data(name, value)
        })
    }

    /// Close the injection phase
    ///
    /// Repeated calls are a no-op. Calling this on a run that never allowed
    /// injections is a usage error.
    pub fn no_more_injections(&self) -> BrokerResult<()> {
        debug!(run_id = %self.run_id, "no_more_injections: called");
        if !self.allow_injections {
            warn!(run_id = %self.run_id, "no_more_injections called but injections were never allowed");
            return Err(BrokerError::Usage(format!(
                "noMoreInjections called on run {} but injections weren't expected in the first place",
                self.run_id
            )));
        }
        let mut status = self.lock_status()?;
        if status.no_more_injections {
            warn!(run_id = %self.run_id, "no_more_injections called but run was already closed for injections");
        } else {
            status.no_more_injections = true;
            info!(run_id = %self.run_id, "injections closed");
        }
        Ok(())
    }

    pub fn is_no_more_injections(&self) -> BrokerResult<bool> {
        Ok(self.lock_status()?.no_more_injections)
    }

    // === Exit reports ===

    pub fn ok_exit(&self, member_id: MemberId) -> BrokerResult<()> {
        self.with_blackboard(|board, _| board.ok_exit(member_id))
    }

    pub fn error_exit(&self, member_id: MemberId, exit_code: i16, error_message: &str) -> BrokerResult<()> {
        self.with_blackboard(|board, _| board.error_exit(member_id, exit_code, error_message))
    }

    // === Identity queries ===

    pub fn identity_query_all(&self) -> BrokerResult<Vec<Identity>> {
        self.identity_query(&IdentityQuery::All)
    }

    pub fn identity_query_host(&self, host: &str) -> BrokerResult<Vec<Identity>> {
        self.identity_query(&IdentityQuery::Host(host.to_string()))
    }

    pub fn identity_query_ip(&self, ip: &str) -> BrokerResult<Vec<Identity>> {
        self.identity_query(&IdentityQuery::Ip(ip.to_string()))
    }

    pub fn identity_query(&self, query: &IdentityQuery) -> BrokerResult<Vec<Identity>> {
        self.with_blackboard(|board, _| Ok(board.identities(query)))
    }

    // === Retrieve ===

    /// Return the member's complete document, or `NotReady`
    ///
    /// Never returns a partial document. `reported` carries the identities the
    /// member observed on itself after booting.
    pub fn retrieve(&self, member_id: MemberId, reported: &[Identity]) -> BrokerResult<Retrieval> {
        let result = self.with_blackboard(|board, closed| board.retrieve(member_id, reported, closed));
        match &result {
            Ok(Retrieval::NotReady) => debug!(run_id = %self.run_id, member_id, "retrieve: not ready yet"),
            Err(e) if e.is_terminal() => warn!(run_id = %self.run_id, member_id, error = %e, "retrieve failed"),
            _ => {}
        }
        result
    }

    /// Snapshot of the whole run for hosts to serialize
    pub fn context(&self) -> BrokerResult<ContextSnapshot> {
        self.with_blackboard(|board, closed| Ok(board.snapshot(closed)))
            .inspect_err(|e| error!(run_id = %self.run_id, error = %e, "could not build context snapshot"))
    }

    // === Lifecycle ===

    /// Record who may manage this run
    pub fn init_secure_resource(
        &self,
        creator_identity: Option<String>,
        bootstrap_identity: Option<String>,
    ) -> BrokerResult<()> {
        debug!(run_id = %self.run_id, ?creator_identity, ?bootstrap_identity, "init_secure_resource: called");
        self.lock_lifecycle()?.security = SecurityContext::new(creator_identity, bootstrap_identity);
        Ok(())
    }

    pub fn security(&self) -> BrokerResult<SecurityContext> {
        Ok(self.lock_lifecycle()?.security.clone())
    }

    pub fn bootstrap(&self) -> BrokerResult<Option<Bootstrap>> {
        Ok(self.lock_lifecycle()?.bootstrap.clone())
    }

    pub fn set_bootstrap(&self, bootstrap: Bootstrap) -> BrokerResult<()> {
        self.lock_lifecycle()?.bootstrap = Some(bootstrap);
        Ok(())
    }

    pub fn termination_time(&self) -> BrokerResult<Option<DateTime<Utc>>> {
        Ok(self.lock_lifecycle()?.termination_time)
    }

    pub fn set_termination_time(&self, time: Option<DateTime<Utc>>) -> BrokerResult<()> {
        debug!(run_id = %self.run_id, ?time, "set_termination_time: called");
        self.lock_lifecycle()?.termination_time = time;
        Ok(())
    }

    pub fn current_time(&self) -> DateTime<Utc> {
        Utc::now()
    }

    /// True once the termination time has passed
    pub fn is_expired(&self, now: DateTime<Utc>) -> BrokerResult<bool> {
        Ok(self.termination_time()?.is_some_and(|t| t <= now))
    }
}
