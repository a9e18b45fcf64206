//! Run registry
//!
//! Maps run ids to their blackboard. Lookup and creation happen in one
//! critical section, so two concurrent first callers always share the same
//! blackboard.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::{debug, info};

use crate::blackboard::{Blackboard, ErrorExitPolicy};
use crate::domain::RunId;
use crate::error::{BrokerError, BrokerResult};

/// Shared handle to one run's blackboard
pub type SharedBlackboard = Arc<Mutex<Blackboard>>;

/// Registry of blackboards, owned by the hosting process
#[derive(Debug, Default)]
pub struct RunRegistry {
    policy: ErrorExitPolicy,
    runs: Mutex<HashMap<RunId, SharedBlackboard>>,
}

impl RunRegistry {
    pub fn new(policy: ErrorExitPolicy) -> Self {
        debug!(%policy, "RunRegistry::new: called");
        Self {
            policy,
            runs: Mutex::new(HashMap::new()),
        }
    }

    /// Get the blackboard for `run_id`, creating it on first access
    pub fn get_or_create(&self, run_id: &str) -> BrokerResult<SharedBlackboard> {
        if run_id.trim().is_empty() {
            return Err(BrokerError::Creation("empty run id".to_string()));
        }
        let mut runs = self.runs.lock().map_err(|_| BrokerError::poisoned("registry"))?;
        let blackboard = runs
            .entry(run_id.to_string())
            .or_insert_with(|| {
                info!(%run_id, policy = %self.policy, "creating blackboard");
                Arc::new(Mutex::new(Blackboard::new(run_id, self.policy)))
            })
            .clone();
        Ok(blackboard)
    }

    /// Look up an existing blackboard without creating one
    pub fn get(&self, run_id: &str) -> BrokerResult<Option<SharedBlackboard>> {
        let runs = self.runs.lock().map_err(|_| BrokerError::poisoned("registry"))?;
        Ok(runs.get(run_id).cloned())
    }

    /// Drop a run's blackboard; returns true if it existed
    pub fn remove(&self, run_id: &str) -> BrokerResult<bool> {
        let mut runs = self.runs.lock().map_err(|_| BrokerError::poisoned("registry"))?;
        let removed = runs.remove(run_id).is_some();
        debug!(%run_id, removed, "RunRegistry::remove: called");
        Ok(removed)
    }

    pub fn len(&self) -> usize {
        self.runs.lock().map(|runs| runs.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
