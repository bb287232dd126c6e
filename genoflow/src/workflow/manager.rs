//! Thread-safe workflow state machine.
//!
//! Owns the in-memory cache of workflow states and the persistence port.
//! Every read-modify-write runs under a per-workflow mutex and follows the
//! database-first pattern: the store is written before the cache.
//!
//! Only workflows that can still change are held in memory. Once a workflow
//! reaches COMPLETED or FAILED its cache entry and lock are dropped and reads
//! go to the store.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde_json::Value;

use genoflow_shared::constants::{FINAL_RESULTS_KEY, stages};
use genoflow_shared::errors::{GenoflowError, GenoflowResult};

use super::state::{WorkflowError, WorkflowId, WorkflowState, WorkflowStatus};
use crate::db::{WorkflowFilter, WorkflowStore};

/// Overall progress for `local` percent of the stage at `stage_index`.
///
/// `local` is clamped to [0, 100]. Each stage owns an equal slice of the
/// overall 0..100 range.
pub fn stage_progress(stage_index: usize, stage_count: usize, local: f64) -> f64 {
    if stage_count == 0 {
        return 0.0;
    }
    let local = if local.is_nan() { 0.0 } else { local.clamp(0.0, 100.0) };
    let slice = 100.0 / stage_count as f64;
    let overall = (stage_index as f64 * 100.0) / stage_count as f64 + (local / 100.0) * slice;
    overall.min(100.0)
}

/// Manager for workflow state.
///
/// Cloneable via `Arc`; all clones share the same cache and lock map.
#[derive(Clone)]
pub struct WorkflowManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    store: Arc<dyn WorkflowStore>,
    workflows: RwLock<HashMap<WorkflowId, WorkflowState>>,
    locks: Mutex<HashMap<WorkflowId, Arc<Mutex<()>>>>,
}

impl std::fmt::Debug for WorkflowManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowManager")
            .field("cached", &self.inner.workflows.read().len())
            .finish()
    }
}

impl WorkflowManager {
    pub fn new(store: Arc<dyn WorkflowStore>) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                store,
                workflows: RwLock::new(HashMap::new()),
                locks: Mutex::new(HashMap::new()),
            }),
        }
    }

    fn lock_for(&self, id: &WorkflowId) -> Arc<Mutex<()>> {
        let mut locks = self.inner.locks.lock();
        Arc::clone(locks.entry(id.clone()).or_default())
    }

    /// Current state from cache, falling back to the store.
    fn load(&self, id: &WorkflowId) -> GenoflowResult<WorkflowState> {
        if let Some(state) = self.inner.workflows.read().get(id) {
            return Ok(state.clone());
        }
        let state = self
            .inner
            .store
            .load(id)?
            .ok_or_else(|| GenoflowError::NotFound(id.clone()))?;
        if !state.status.is_terminal() {
            self.inner
                .workflows
                .write()
                .insert(id.clone(), state.clone());
        }
        Ok(state)
    }

    /// Persist, then cache the state or evict it if terminal.
    fn commit(&self, state: WorkflowState) -> GenoflowResult<WorkflowState> {
        self.inner.store.save(&state)?;
        let mut workflows = self.inner.workflows.write();
        if state.status.is_terminal() {
            workflows.remove(&state.workflow_id);
        } else {
            workflows.insert(state.workflow_id.clone(), state.clone());
        }
        Ok(state)
    }

    /// Run `mutate` on the current state under the workflow's lock and commit
    /// the result. Terminal workflows are rejected before `mutate` runs.
    fn update<F>(&self, id: &WorkflowId, mutate: F) -> GenoflowResult<WorkflowState>
    where
        F: FnOnce(&mut WorkflowState) -> GenoflowResult<()>,
    {
        let lock = self.lock_for(id);
        let state = {
            let _guard = lock.lock();

            let mut state = self.load(id)?;
            if state.status.is_terminal() {
                return Err(GenoflowError::InvalidState(format!(
                    "workflow {} is already {}",
                    id, state.status
                )));
            }
            mutate(&mut state)?;
            state.touch();
            self.commit(state)?
        };

        // Terminal states reject every later update, so a fresh lock is
        // equivalent to this one.
        if state.status.is_terminal() {
            self.inner.locks.lock().remove(id);
        }
        Ok(state)
    }

    /// Register a new workflow.
    ///
    /// Database-first: saves to the store before caching in memory.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if a workflow with this id already exists.
    pub fn register(&self, state: WorkflowState) -> GenoflowResult<()> {
        let lock = self.lock_for(&state.workflow_id);
        let _guard = lock.lock();

        if self.inner.workflows.read().contains_key(&state.workflow_id)
            || self.inner.store.load(&state.workflow_id)?.is_some()
        {
            return Err(GenoflowError::InvalidArgument(format!(
                "workflow {} already registered",
                state.workflow_id
            )));
        }

        tracing::debug!(
            workflow_id = %state.workflow_id,
            status = %state.status,
            "Registering workflow"
        );
        self.commit(state)?;
        Ok(())
    }

    /// Apply a stage's progress report.
    ///
    /// Sets `current_agent` and the stage's status, raises progress to the
    /// computed value (never lowers it), stores `result` under the stage name
    /// and appends `error`.
    pub fn record_progress(
        &self,
        id: &WorkflowId,
        agent: &str,
        local_progress: f64,
        result: Option<Value>,
        error: Option<WorkflowError>,
    ) -> GenoflowResult<WorkflowState> {
        let status = WorkflowStatus::for_stage(agent).ok_or_else(|| {
            GenoflowError::InvalidArgument(format!("unknown stage '{}'", agent))
        })?;
        let stage_index = stages::ORDER
            .iter()
            .position(|s| *s == agent)
            .ok_or_else(|| GenoflowError::InvalidArgument(format!("unknown stage '{}'", agent)))?;
        let computed = stage_progress(stage_index, stages::ORDER.len(), local_progress);

        let state = self.update(id, |state| {
            state.current_agent = agent.to_string();
            state.status = status;
            state.progress_percentage = state.progress_percentage.max(computed);
            if let Some(result) = result {
                state.results.insert(agent.to_string(), result);
            }
            if let Some(error) = error {
                state.errors.push(error);
            }
            Ok(())
        })?;

        tracing::trace!(
            workflow_id = %id,
            stage = %agent,
            progress = state.progress_percentage,
            "Recorded progress"
        );
        Ok(state)
    }

    /// Mark the workflow COMPLETED with `final_results` stored under `"final"`.
    pub fn complete(&self, id: &WorkflowId, final_results: Value) -> GenoflowResult<WorkflowState> {
        let state = self.update(id, |state| {
            state.status = WorkflowStatus::Completed;
            state.progress_percentage = 100.0;
            state
                .results
                .insert(FINAL_RESULTS_KEY.to_string(), final_results);
            Ok(())
        })?;
        tracing::info!(workflow_id = %id, "Workflow completed");
        Ok(state)
    }

    /// Mark the workflow FAILED, appending an orchestrator error.
    /// Progress is left where it was.
    pub fn fail(
        &self,
        id: &WorkflowId,
        error_type: &str,
        message: impl Into<String>,
    ) -> GenoflowResult<WorkflowState> {
        let message = message.into();
        let state = self.update(id, |state| {
            state.status = WorkflowStatus::Failed;
            state
                .errors
                .push(WorkflowError::orchestrator(error_type, message.clone()).non_recoverable());
            Ok(())
        })?;
        tracing::warn!(workflow_id = %id, error_type = %error_type, message = %message, "Workflow failed");
        Ok(state)
    }

    /// Snapshot of a workflow.
    pub fn get(&self, id: &WorkflowId) -> GenoflowResult<WorkflowState> {
        self.load(id)
    }

    /// Matching workflows from the store, newest first.
    pub fn list(&self, filter: &WorkflowFilter) -> GenoflowResult<Vec<WorkflowState>> {
        self.inner.store.list(filter)
    }

    /// Delete a workflow that is not mid-pipeline.
    ///
    /// Returns `Ok(false)` if it does not exist.
    pub fn remove(&self, id: &WorkflowId) -> GenoflowResult<bool> {
        let lock = self.lock_for(id);
        let removed = {
            let _guard = lock.lock();
            let state = match self.load(id) {
                Ok(state) => state,
                Err(GenoflowError::NotFound(_)) => return Ok(false),
                Err(e) => return Err(e),
            };
            if state.status.is_active() {
                return Err(GenoflowError::InvalidState(format!(
                    "cannot delete workflow {} while {}",
                    id, state.status
                )));
            }

            let removed = self.inner.store.delete(id)?;
            self.inner.workflows.write().remove(id);
            removed
        };
        self.inner.locks.lock().remove(id);

        tracing::info!(workflow_id = %id, "Removed workflow");
        Ok(removed)
    }

    /// Fail every persisted workflow that a previous shutdown caught
    /// mid-pipeline. Returns how many were marked interrupted.
    ///
    /// Only active statuses are queried; nothing is loaded into the cache.
    pub fn recover(&self) -> GenoflowResult<usize> {
        let mut interrupted = 0;
        for status in stages::ORDER.iter().filter_map(|s| WorkflowStatus::for_stage(s)) {
            let filter = WorkflowFilter::default().with_status(status);
            for mut state in self.inner.store.list(&filter)? {
                tracing::warn!(
                    workflow_id = %state.workflow_id,
                    status = %state.status,
                    "Workflow was mid-pipeline at shutdown, marking failed"
                );
                state.set_status(WorkflowStatus::Failed);
                state.errors.push(WorkflowError::orchestrator(
                    "Interrupted",
                    "orchestrator stopped while workflow was running",
                ));
                self.inner.store.save(&state)?;
                interrupted += 1;
            }
        }

        tracing::info!(interrupted, "Workflow recovery complete");
        Ok(interrupted)
    }
}
