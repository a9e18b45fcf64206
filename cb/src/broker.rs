//! Broker: hosting lifecycle manager
//!
//! Assigns run ids, owns one [`Session`] per run, and tears runs down when
//! they are destroyed or their termination time passes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use crate::config::BrokerConfig;
use crate::domain::RunId;
use crate::error::{BrokerError, BrokerResult};
use crate::registry::RunRegistry;
use crate::session::{Bootstrap, Session};

/// Options for creating a run
#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
    /// Overrides the configured default when set
    pub allow_injections: Option<bool>,
    pub creator_identity: Option<String>,
    pub bootstrap: Option<Bootstrap>,
    /// Overrides the configured default lifetime when set
    pub lifetime: Option<Duration>,
}

/// Owns every live run in the process
#[derive(Debug)]
pub struct Broker {
    config: BrokerConfig,
    registry: Arc<RunRegistry>,
    sessions: Mutex<HashMap<RunId, Arc<Session>>>,
}

impl Broker {
    pub fn new(config: BrokerConfig) -> Self {
        debug!(?config, "Broker::new: called");
        Self {
            registry: Arc::new(RunRegistry::new(config.error_exit_policy)),
            config,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Create a run with a freshly assigned id
    pub fn create(&self, options: CreateOptions) -> BrokerResult<Arc<Session>> {
        self.create_with_id(assign_run_id(), options)
    }

    /// Create a run under an id chosen by the caller
    pub fn create_with_id(&self, run_id: impl Into<RunId>, options: CreateOptions) -> BrokerResult<Arc<Session>> {
        let run_id = run_id.into();
        debug!(%run_id, ?options, "Broker::create_with_id: called");

        // Lifetime is resolved before the sessions lock is taken
        let lifetime = match options.lifetime {
            Some(lifetime) => Some(lifetime),
            None => self.config.default_lifetime_secs.map(lifetime_from_secs).transpose()?,
        };
        let termination_time = lifetime.map(termination_after).transpose()?;

        let mut sessions = self.sessions.lock().map_err(|_| BrokerError::poisoned("broker sessions"))?;
        if sessions.contains_key(&run_id) {
            return Err(BrokerError::Creation(format!("run {} already exists", run_id)));
        }

        let allow_injections = options.allow_injections.unwrap_or(self.config.allow_injections);
        let session = Session::new(run_id.clone(), allow_injections, Arc::clone(&self.registry))?;

        let bootstrap_identity = options.bootstrap.as_ref().map(|b| b.identity.clone());
        session.init_secure_resource(options.creator_identity, bootstrap_identity)?;
        if let Some(bootstrap) = options.bootstrap {
            session.set_bootstrap(bootstrap)?;
        }
        if termination_time.is_some() {
            session.set_termination_time(termination_time)?;
        }

        let session = Arc::new(session);
        sessions.insert(run_id.clone(), Arc::clone(&session));
        info!(%run_id, allow_injections, ?lifetime, "run created");
        Ok(session)
    }

    /// Look up a live run
    pub fn session(&self, run_id: &str) -> BrokerResult<Arc<Session>> {
        let sessions = self.sessions.lock().map_err(|_| BrokerError::poisoned("broker sessions"))?;
        sessions
            .get(run_id)
            .cloned()
            .ok_or_else(|| BrokerError::UnknownRun(run_id.to_string()))
    }

    /// Destroy a run and its blackboard; returns true if it existed
    pub fn destroy(&self, run_id: &str) -> BrokerResult<bool> {
        let removed = self
            .sessions
            .lock()
            .map_err(|_| BrokerError::poisoned("broker sessions"))?
            .remove(run_id)
            .is_some();
        self.registry.remove(run_id)?;
        if removed {
            info!(%run_id, "run destroyed");
        }
        Ok(removed)
    }

    /// Destroy every run whose termination time is at or before `now`
    pub fn expire(&self, now: DateTime<Utc>) -> BrokerResult<Vec<RunId>> {
        let expired: Vec<RunId> = {
            let sessions = self.sessions.lock().map_err(|_| BrokerError::poisoned("broker sessions"))?;
            let mut expired = Vec::new();
            for (run_id, session) in sessions.iter() {
                if session.is_expired(now)? {
                    expired.push(run_id.clone());
                }
            }
            expired
        };
        for run_id in &expired {
            self.destroy(run_id)?;
        }
        if !expired.is_empty() {
            info!(count = expired.len(), "expired runs destroyed");
        }
        Ok(expired)
    }

    pub fn run_ids(&self) -> BrokerResult<Vec<RunId>> {
        let sessions = self.sessions.lock().map_err(|_| BrokerError::poisoned("broker sessions"))?;
        let mut ids: Vec<RunId> = sessions.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}

/// Convert a lifetime in seconds, rejecting values chrono cannot represent
pub fn lifetime_from_secs(secs: u64) -> BrokerResult<Duration> {
    i64::try_from(secs)
        .ok()
        .and_then(Duration::try_seconds)
        .ok_or_else(|| BrokerError::InvalidSpecification(format!("run lifetime of {} seconds is out of range", secs)))
}

fn termination_after(lifetime: Duration) -> BrokerResult<DateTime<Utc>> {
    Utc::now().checked_add_signed(lifetime).ok_or_else(|| {
        BrokerError::InvalidSpecification(format!("run lifetime {} puts termination out of range", lifetime))
    })
}

/// Assign a new run id
pub fn assign_run_id() -> RunId {
    uuid::Uuid::now_v7().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_assigns_unique_ids() {
        let broker = Broker::new(BrokerConfig::default());
        let a = broker.create(CreateOptions::default()).unwrap();
        let b = broker.create(CreateOptions::default()).unwrap();
        assert_ne!(a.id(), b.id());
        assert_eq!(broker.run_ids().unwrap().len(), 2);
    }

    #[test]
    fn test_create_uses_config_defaults() {
        let broker = Broker::new(BrokerConfig {
            allow_injections: false,
            ..Default::default()
        });
        let session = broker.create(CreateOptions::default()).unwrap();
        assert!(!session.allow_injections());
        assert!(session.termination_time().unwrap().is_none());

        let session = broker
            .create(CreateOptions {
                allow_injections: Some(true),
                ..Default::default()
            })
            .unwrap();
        assert!(session.allow_injections());
    }

    #[test]
    fn test_create_records_security() {
        let broker = Broker::new(BrokerConfig::default());
        let session = broker
            .create(CreateOptions {
                creator_identity: Some("/CN=alice".to_string()),
                bootstrap: Some(Bootstrap {
                    identity: "/CN=boot".to_string(),
                    credential: Some("secret".to_string()),
                }),
                ..Default::default()
            })
            .unwrap();
        let security = session.security().unwrap();
        assert_eq!(security.creator_identity.as_deref(), Some("/CN=alice"));
        assert_eq!(security.bootstrap_identity.as_deref(), Some("/CN=boot"));
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let broker = Broker::new(BrokerConfig::default());
        broker.create_with_id("run-1", CreateOptions::default()).unwrap();
        assert!(matches!(
            broker.create_with_id("run-1", CreateOptions::default()),
            Err(BrokerError::Creation(_))
        ));
    }

    #[test]
    fn test_session_lookup_and_destroy() {
        let broker = Broker::new(BrokerConfig::default());
        let session = broker.create(CreateOptions::default()).unwrap();
        let run_id = session.id().to_string();
        assert!(Arc::ptr_eq(&session, &broker.session(&run_id).unwrap()));

        assert!(broker.destroy(&run_id).unwrap());
        assert!(!broker.destroy(&run_id).unwrap());
        assert!(matches!(broker.session(&run_id), Err(BrokerError::UnknownRun(_))));
    }

    #[test]
    fn test_lifetime_out_of_range_rejected() {
        assert!(lifetime_from_secs(3600).is_ok());
        assert!(matches!(
            lifetime_from_secs(u64::MAX),
            Err(BrokerError::InvalidSpecification(_))
        ));

        let broker = Broker::new(BrokerConfig::default());
        let err = broker
            .create_with_id(
                "huge",
                CreateOptions {
                    lifetime: Some(Duration::MAX),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, BrokerError::InvalidSpecification(_)));
        assert!(broker.run_ids().unwrap().is_empty());
    }

    #[test]
    fn test_bad_default_lifetime_rejected() {
        let broker = Broker::new(BrokerConfig {
            default_lifetime_secs: Some(u64::MAX),
            ..Default::default()
        });
        assert!(matches!(
            broker.create(CreateOptions::default()),
            Err(BrokerError::InvalidSpecification(_))
        ));
        assert!(broker.run_ids().unwrap().is_empty());
    }

    #[test]
    fn test_expire() {
        let broker = Broker::new(BrokerConfig::default());
        let short = broker
            .create(CreateOptions {
                lifetime: Some(Duration::seconds(10)),
                ..Default::default()
            })
            .unwrap();
        let forever = broker.create(CreateOptions::default()).unwrap();

        let later = Utc::now() + Duration::seconds(60);
        let expired = broker.expire(later).unwrap();
        assert_eq!(expired, vec![short.id().to_string()]);
        assert!(broker.session(forever.id()).is_ok());
        assert!(broker.session(short.id()).is_err());
    }
}
