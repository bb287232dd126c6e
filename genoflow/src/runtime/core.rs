//! Public orchestrator entry point.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

use genoflow_shared::constants::stages;
use genoflow_shared::errors::{GenoflowError, GenoflowResult};

use super::layout::HomeLayout;
use super::metrics::{RuntimeMetrics, RuntimeMetricsStorage};
use super::options::{OrchestratorOptions, Persistence};
use super::sequencer::Sequencer;
use crate::agent::AgentRegistry;
use crate::db::{
    Database, MemoryWorkflowStore, SqliteWorkflowStore, WorkflowFilter, WorkflowStore,
};
use crate::init_logging_for;
use crate::pipeline::{
    MetricsStore, ParallelExecutionMetrics, ParallelScheduler, PerformanceSummary, PipelinePlan,
};
use crate::workflow::{
    WorkflowId, WorkflowManager, WorkflowState, WorkflowStatus, generate_workflow_id,
};

/// Entry point for starting and running workflows.
///
/// **Cloning**: cheaply cloneable via `Arc`; all clones share the same
/// workers, state and metrics.
///
/// **Concurrency**: many workflows may run at once. They share one bounded
/// worker pool (`max_workers`).
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<OrchestratorInner>,
}

struct OrchestratorInner {
    options: OrchestratorOptions,
    plan: PipelinePlan,
    registry: AgentRegistry,
    manager: WorkflowManager,
    scheduler: ParallelScheduler,
    metrics: MetricsStore,
    runtime_metrics: Arc<RuntimeMetricsStorage>,
    /// Workflows currently inside `run`.
    running: Mutex<HashSet<WorkflowId>>,
}

/// Removes a workflow from the running set when the run ends.
struct RunGuard<'a> {
    running: &'a Mutex<HashSet<WorkflowId>>,
    workflow_id: WorkflowId,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.running.lock().remove(&self.workflow_id);
    }
}

impl Orchestrator {
    /// Create an orchestrator with the store selected by `options.persistence`.
    ///
    /// **Prepare Before Execute**: filesystem, logging, persistence and
    /// recovery all complete before returning.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - options fail validation
    /// - a stage of the plan has no registered agent
    /// - the home directory or database cannot be initialized
    pub fn new(options: OrchestratorOptions, registry: AgentRegistry) -> GenoflowResult<Self> {
        let plan = Self::checked_plan(&options, &registry)?;
        let layout = Self::prepare_home(&options)?;

        let store: Arc<dyn WorkflowStore> = match options.persistence {
            Persistence::Sqlite => {
                let db = Database::open(&layout.db_path()).map_err(|e| {
                    GenoflowError::Storage(format!(
                        "Failed to initialize database at {}: {}",
                        layout.db_path().display(),
                        e
                    ))
                })?;
                Arc::new(SqliteWorkflowStore::new(db))
            }
            Persistence::Memory => Arc::new(MemoryWorkflowStore::new()),
        };

        Self::assemble(options, registry, plan, store)
    }

    /// Create an orchestrator over a caller-supplied store.
    /// `options.persistence` is ignored; logs still go under `home_dir`.
    pub fn with_store(
        options: OrchestratorOptions,
        registry: AgentRegistry,
        store: Arc<dyn WorkflowStore>,
    ) -> GenoflowResult<Self> {
        let plan = Self::checked_plan(&options, &registry)?;
        Self::prepare_home(&options)?;
        Self::assemble(options, registry, plan, store)
    }

    /// Validate options and check every stage of the plan has an agent.
    fn checked_plan(
        options: &OrchestratorOptions,
        registry: &AgentRegistry,
    ) -> GenoflowResult<PipelinePlan> {
        options.sanitize()?;

        let plan = PipelinePlan::standard(options.enable_parallel_execution);
        plan.validate()?;
        let missing: Vec<&str> = plan
            .stage_names()
            .filter(|stage| !registry.contains(stage))
            .collect();
        if !missing.is_empty() {
            return Err(GenoflowError::Config(format!(
                "no agent registered for stage(s): {}",
                missing.join(", ")
            )));
        }
        Ok(plan)
    }

    fn prepare_home(options: &OrchestratorOptions) -> GenoflowResult<HomeLayout> {
        let layout = HomeLayout::new(options.home_dir.clone());
        layout.prepare().map_err(|e| {
            GenoflowError::Storage(format!(
                "Failed to initialize filesystem at {}: {}",
                layout.home_dir().display(),
                e
            ))
        })?;

        init_logging_for(&layout)?;
        Ok(layout)
    }

    fn assemble(
        options: OrchestratorOptions,
        registry: AgentRegistry,
        plan: PipelinePlan,
        store: Arc<dyn WorkflowStore>,
    ) -> GenoflowResult<Self> {
        let manager = WorkflowManager::new(store);
        let metrics = MetricsStore::new();
        let runtime_metrics = RuntimeMetricsStorage::new();
        let scheduler = ParallelScheduler::new(
            options.max_workers,
            options.task_timeout(),
            manager.clone(),
            metrics.clone(),
            Arc::clone(&runtime_metrics),
        );

        let interrupted = manager.recover()?;
        if interrupted > 0 {
            tracing::warn!(interrupted, "Marked interrupted workflows as failed");
        }

        tracing::debug!(
            home_dir = %options.home_dir.display(),
            max_workers = options.max_workers,
            parallel = options.enable_parallel_execution,
            "initialized orchestrator"
        );

        Ok(Self {
            inner: Arc::new(OrchestratorInner {
                options,
                plan,
                registry,
                manager,
                scheduler,
                metrics,
                runtime_metrics,
                running: Mutex::new(HashSet::new()),
            }),
        })
    }

    pub fn options(&self) -> &OrchestratorOptions {
        &self.inner.options
    }

    /// Create and persist a new workflow in INITIATED state.
    pub fn start(&self, input_data: Value) -> GenoflowResult<WorkflowId> {
        let workflow_id = generate_workflow_id();
        let first_stage = self.inner.plan.stage_names().next().unwrap_or(stages::GENOMICS);
        let state = WorkflowState::new(workflow_id.clone(), input_data, first_stage);
        self.inner.manager.register(state)?;

        RuntimeMetricsStorage::incr(&self.inner.runtime_metrics.workflows_started);
        tracing::info!(workflow_id = %workflow_id, "Workflow created");
        Ok(workflow_id)
    }

    /// Drive an INITIATED workflow to COMPLETED or FAILED.
    ///
    /// Stage failures do not make this return `Err`; inspect the returned
    /// state. Only orchestration errors (persistence, unknown id, workflow not
    /// runnable) are returned.
    pub async fn run(&self, workflow_id: &str) -> GenoflowResult<WorkflowState> {
        let workflow_id = workflow_id.to_string();
        if !self.inner.running.lock().insert(workflow_id.clone()) {
            return Err(GenoflowError::InvalidState(format!(
                "workflow {} is already running",
                workflow_id
            )));
        }
        let _guard = RunGuard {
            running: &self.inner.running,
            workflow_id: workflow_id.clone(),
        };

        let state = self.inner.manager.get(&workflow_id)?;
        if !state.status.can_run() {
            return Err(GenoflowError::InvalidState(format!(
                "workflow {} cannot run from status {}",
                workflow_id, state.status
            )));
        }

        Sequencer {
            workflow_id,
            plan: &self.inner.plan,
            registry: &self.inner.registry,
            scheduler: &self.inner.scheduler,
            manager: &self.inner.manager,
            failure_policy: self.inner.options.failure_policy,
            runtime_metrics: &self.inner.runtime_metrics,
        }
        .run()
        .await
    }

    /// `start` followed by `run`.
    pub async fn execute(&self, input_data: Value) -> GenoflowResult<WorkflowState> {
        let workflow_id = self.start(input_data)?;
        self.run(&workflow_id).await
    }

    /// Snapshot of a workflow in any status.
    pub fn get_status(&self, workflow_id: &str) -> GenoflowResult<WorkflowState> {
        self.inner.manager.get(&workflow_id.to_string())
    }

    /// Results of a COMPLETED workflow, including the `"final"` aggregate.
    pub fn get_results(
        &self,
        workflow_id: &str,
    ) -> GenoflowResult<std::collections::BTreeMap<String, Value>> {
        let state = self.get_status(workflow_id)?;
        if state.status != WorkflowStatus::Completed {
            return Err(GenoflowError::InvalidState(format!(
                "workflow {} is {}, results are available once completed",
                workflow_id, state.status
            )));
        }
        Ok(state.results)
    }

    /// The workflow's concurrency-group metrics, if any group has run.
    pub fn get_execution_metrics(&self, workflow_id: &str) -> Option<ParallelExecutionMetrics> {
        self.inner.metrics.representative(&workflow_id.to_string())
    }

    /// Every group's metrics for a workflow, in execution order.
    pub fn get_group_metrics(&self, workflow_id: &str) -> Vec<ParallelExecutionMetrics> {
        self.inner.metrics.groups(&workflow_id.to_string())
    }

    pub fn get_performance_summary(&self) -> PerformanceSummary {
        self.inner
            .metrics
            .summary(self.inner.options.enable_parallel_execution)
    }

    pub fn list_workflows(&self, filter: &WorkflowFilter) -> GenoflowResult<Vec<WorkflowState>> {
        self.inner.manager.list(filter)
    }

    /// Delete a workflow that is not running. Returns whether it existed.
    pub fn delete_workflow(&self, workflow_id: &str) -> GenoflowResult<bool> {
        let workflow_id = workflow_id.to_string();
        if self.inner.running.lock().contains(&workflow_id) {
            return Err(GenoflowError::InvalidState(format!(
                "cannot delete workflow {} while it is running",
                workflow_id
            )));
        }
        let removed = self.inner.manager.remove(&workflow_id)?;
        if removed {
            self.inner.metrics.remove(&workflow_id);
        }
        Ok(removed)
    }

    /// Orchestrator-wide counters.
    pub fn runtime_metrics(&self) -> RuntimeMetrics {
        RuntimeMetrics::snapshot(&self.inner.runtime_metrics)
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("home_dir", &self.inner.options.home_dir)
            .field("scheduler", &self.inner.scheduler)
            .finish()
    }
}

// Compile-time assertion that Orchestrator can be shared across tasks.
const _: () = {
    const fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<Orchestrator>();
};
