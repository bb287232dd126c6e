//! Drives one workflow through the plan.

use std::collections::BTreeMap;

use serde_json::{Value, json};

use genoflow_shared::errors::{GenoflowError, GenoflowResult};

use super::metrics::RuntimeMetricsStorage;
use super::options::FailurePolicy;
use crate::agent::{AgentRegistry, StageInput};
use crate::pipeline::{ParallelExecutionMetrics, ParallelScheduler, PipelinePlan, StageInvocation};
use crate::workflow::{WorkflowId, WorkflowManager, WorkflowState, WorkflowStatus};

/// How a stage settled.
type Settled = Result<Value, String>;

/// Per-run driver. Borrowed pieces all belong to the orchestrator.
pub(crate) struct Sequencer<'a> {
    pub(crate) workflow_id: WorkflowId,
    pub(crate) plan: &'a PipelinePlan,
    pub(crate) registry: &'a AgentRegistry,
    pub(crate) scheduler: &'a ParallelScheduler,
    pub(crate) manager: &'a WorkflowManager,
    pub(crate) failure_policy: FailurePolicy,
    pub(crate) runtime_metrics: &'a RuntimeMetricsStorage,
}

impl Sequencer<'_> {
    /// Run every group, then complete or fail the workflow.
    ///
    /// Stage failures end in a COMPLETED or FAILED state, returned as `Ok`.
    /// On an orchestration error the workflow is marked FAILED if possible and
    /// the original error is returned.
    pub(crate) async fn run(self) -> GenoflowResult<WorkflowState> {
        match self.drive().await {
            Ok(state) => {
                let counter = if state.status == WorkflowStatus::Failed {
                    &self.runtime_metrics.workflows_failed
                } else {
                    &self.runtime_metrics.workflows_completed
                };
                RuntimeMetricsStorage::incr(counter);
                Ok(state)
            }
            Err(e) => {
                tracing::error!(workflow_id = %self.workflow_id, error = %e, "Workflow run aborted");
                if let Err(fail_err) =
                    self.manager
                        .fail(&self.workflow_id, "OrchestrationError", e.to_string())
                {
                    tracing::warn!(
                        workflow_id = %self.workflow_id,
                        error = %fail_err,
                        "Could not mark workflow failed"
                    );
                }
                RuntimeMetricsStorage::incr(&self.runtime_metrics.workflows_failed);
                Err(e)
            }
        }
    }

    async fn drive(&self) -> GenoflowResult<WorkflowState> {
        let id = &self.workflow_id;
        let input_data = self.manager.get(id)?.input_data;

        let mut settled: BTreeMap<String, Settled> = BTreeMap::new();
        let mut succeeded: Vec<String> = Vec::new();
        let mut failed: Vec<String> = Vec::new();
        let mut concurrency_metrics: Option<ParallelExecutionMetrics> = None;

        tracing::info!(workflow_id = %id, "Workflow run started");

        for group in self.plan.groups() {
            let mut tasks = Vec::with_capacity(group.len());
            for stage in &group.tasks {
                let agent = self.registry.get(stage).ok_or_else(|| {
                    GenoflowError::Config(format!("no agent registered for stage '{}'", stage))
                })?;

                let mut input = StageInput::new(id.clone(), stage.clone(), input_data.clone());
                for dep in self.plan.dependencies(stage) {
                    match settled.get(dep) {
                        Some(Ok(result)) => {
                            input.upstream.insert(dep.clone(), result.clone());
                        }
                        Some(Err(message)) => {
                            input.upstream_errors.insert(dep.clone(), message.clone());
                        }
                        None => {
                            return Err(GenoflowError::Internal(format!(
                                "stage '{}' scheduled before '{}' settled",
                                stage, dep
                            )));
                        }
                    }
                }
                if input.is_degraded() {
                    tracing::debug!(
                        workflow_id = %id,
                        stage = %stage,
                        failed_upstream = ?input.upstream_errors.keys().collect::<Vec<_>>(),
                        "Dispatching with failed upstream"
                    );
                }
                tasks.push(StageInvocation::new(agent, input));
            }

            let metrics = self
                .scheduler
                .execute_group(id, tasks, group.execution)
                .await?;

            for result in &metrics.execution_results {
                let outcome = match (&result.results, &result.error) {
                    (Some(value), _) if result.success => Ok(value.clone()),
                    (_, Some(err)) => Err(err.to_string()),
                    _ => Err("stage produced no result".to_string()),
                };
                if outcome.is_ok() {
                    succeeded.push(result.agent_name.clone());
                } else {
                    failed.push(result.agent_name.clone());
                }
                settled.insert(result.agent_name.clone(), outcome);
            }

            let group_failed = metrics.has_failures();
            if group.is_group() {
                concurrency_metrics = Some(metrics);
            }

            let is_final = group
                .tasks
                .iter()
                .any(|s| Some(s.as_str()) == self.plan.final_stage());
            if group_failed && !is_final && self.failure_policy == FailurePolicy::FailFast {
                return self.manager.fail(
                    id,
                    "StageFailed",
                    format!("stage(s) {} failed", failed.join(", ")),
                );
            }
        }

        let final_stage = self
            .plan
            .final_stage()
            .ok_or_else(|| GenoflowError::Internal("plan has no stages".into()))?;

        match settled.get(final_stage) {
            Some(Ok(output)) => {
                let aggregate = json!({
                    "decision": output,
                    "succeeded_stages": succeeded,
                    "failed_stages": failed,
                    "parallel_execution": concurrency_metrics.as_ref().map(ParallelExecutionMetrics::summary),
                });
                self.manager.complete(id, aggregate)
            }
            Some(Err(message)) => self.manager.fail(
                id,
                "StageFailed",
                format!("final stage '{}' failed: {}", final_stage, message),
            ),
            None => Err(GenoflowError::Internal(format!(
                "final stage '{}' never ran",
                final_stage
            ))),
        }
    }
}
