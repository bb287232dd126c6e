//! Bounded parallel execution of stage groups.
//!
//! Every task takes a permit from a shared semaphore and runs its agent on
//! tokio's blocking pool. A task's failure, panic or timeout is captured as an
//! unsuccessful [`AgentExecutionResult`]; siblings always run to completion.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::future::join_all;
use tokio::sync::Semaphore;

use genoflow_shared::errors::GenoflowResult;

use super::metrics::{AgentExecutionResult, MetricsStore, ParallelExecutionMetrics};
use super::stage::ExecutionMode;
use super::task::StageInvocation;
use crate::agent::StageError;
use crate::runtime::RuntimeMetricsStorage;
use crate::workflow::{WorkflowError, WorkflowId, WorkflowManager};

/// Worker pool shared by every workflow run on one orchestrator.
pub struct ParallelScheduler {
    permits: Arc<Semaphore>,
    max_workers: usize,
    task_timeout: Option<Duration>,
    manager: WorkflowManager,
    metrics: MetricsStore,
    runtime_metrics: Arc<RuntimeMetricsStorage>,
}

impl ParallelScheduler {
    pub fn new(
        max_workers: usize,
        task_timeout: Option<Duration>,
        manager: WorkflowManager,
        metrics: MetricsStore,
        runtime_metrics: Arc<RuntimeMetricsStorage>,
    ) -> Self {
        let max_workers = max_workers.max(1);
        Self {
            permits: Arc::new(Semaphore::new(max_workers)),
            max_workers,
            task_timeout,
            manager,
            metrics,
            runtime_metrics,
        }
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Run a group and record its outcome.
    ///
    /// Before dispatch each member is marked as entered (local progress 0).
    /// After the last member finishes, progress, results and errors are
    /// recorded in declared order and the group metrics are stored.
    ///
    /// # Errors
    ///
    /// Only state machine failures (persistence, unknown workflow) are
    /// returned. Stage failures are part of the metrics.
    pub async fn execute_group(
        &self,
        workflow_id: &WorkflowId,
        tasks: Vec<StageInvocation>,
        mode: ExecutionMode,
    ) -> GenoflowResult<ParallelExecutionMetrics> {
        for task in &tasks {
            self.manager
                .record_progress(workflow_id, task.stage(), 0.0, None, None)?;
        }

        tracing::debug!(
            workflow_id = %workflow_id,
            stages = ?tasks.iter().map(StageInvocation::stage).collect::<Vec<_>>(),
            mode = %mode,
            "Dispatching group"
        );

        let group_start = Instant::now();
        let results = match mode {
            ExecutionMode::Parallel => join_all(tasks.into_iter().map(|t| self.run_task(t))).await,
            ExecutionMode::Sequential => {
                let mut results = Vec::with_capacity(tasks.len());
                for task in tasks {
                    results.push(self.run_task(task).await);
                }
                results
            }
        };
        let metrics = ParallelExecutionMetrics::from_results(results, group_start.elapsed(), mode);

        for result in &metrics.execution_results {
            let error = result
                .error
                .as_ref()
                .map(|e| WorkflowError::from_stage(&result.agent_name, e));
            let local = if result.success { 100.0 } else { 0.0 };
            self.manager.record_progress(
                workflow_id,
                &result.agent_name,
                local,
                result.results.clone(),
                error,
            )?;
        }

        let failures = metrics.failed().count() as u64;
        RuntimeMetricsStorage::incr(&self.runtime_metrics.groups_executed);
        RuntimeMetricsStorage::add(
            &self.runtime_metrics.stage_invocations,
            metrics.execution_results.len() as u64,
        );
        RuntimeMetricsStorage::add(&self.runtime_metrics.stage_failures, failures);

        tracing::info!(
            workflow_id = %workflow_id,
            stages = ?metrics.agents_executed,
            failures = failures,
            elapsed_ms = metrics.total_execution_time.as_millis() as u64,
            saved_ms = metrics.time_saved.as_millis() as u64,
            "Group finished"
        );

        self.metrics.record(workflow_id, metrics.clone());
        Ok(metrics)
    }

    /// Run one task to an outcome. Never fails.
    async fn run_task(&self, task: StageInvocation) -> AgentExecutionResult {
        let stage = task.stage().to_string();
        let workflow_id = task.input.workflow_id.clone();

        let permit = match Arc::clone(&self.permits).acquire_owned().await {
            Ok(permit) => permit,
            Err(e) => {
                return AgentExecutionResult::failed(
                    stage,
                    StageError::fatal("SchedulerClosed", e.to_string()),
                    Utc::now(),
                    Duration::ZERO,
                );
            }
        };

        let dispatched_at = Utc::now();
        let dispatch_clock = Instant::now();
        let handle = tokio::task::spawn_blocking(move || {
            // Released when the agent returns, even if the caller stopped waiting.
            let _permit = permit;
            let started_at = Utc::now();
            let clock = Instant::now();
            let outcome = task.agent.invoke(&task.input);
            (outcome, started_at, clock.elapsed())
        });

        let joined = match self.task_timeout {
            Some(limit) => match tokio::time::timeout(limit, handle).await {
                Ok(joined) => joined,
                Err(_) => {
                    tracing::warn!(
                        workflow_id = %workflow_id,
                        stage = %stage,
                        timeout_ms = limit.as_millis() as u64,
                        "Stage timed out, detaching worker"
                    );
                    return AgentExecutionResult::failed(
                        stage,
                        StageError::timeout(limit),
                        dispatched_at,
                        limit,
                    );
                }
            },
            None => handle.await,
        };

        match joined {
            Ok((Ok(value), started_at, elapsed)) => {
                tracing::debug!(
                    workflow_id = %workflow_id,
                    stage = %stage,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Stage succeeded"
                );
                AgentExecutionResult::succeeded(stage, value, started_at, elapsed)
            }
            Ok((Err(err), started_at, elapsed)) => {
                tracing::warn!(
                    workflow_id = %workflow_id,
                    stage = %stage,
                    error = %err,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Stage failed"
                );
                AgentExecutionResult::failed(stage, err, started_at, elapsed)
            }
            Err(join_err) => {
                let message = if join_err.is_panic() {
                    let payload = join_err.into_panic();
                    payload
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| payload.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "stage panicked".to_string())
                } else {
                    "stage worker was cancelled".to_string()
                };
                tracing::error!(
                    workflow_id = %workflow_id,
                    stage = %stage,
                    message = %message,
                    "Stage panicked"
                );
                AgentExecutionResult::failed(
                    stage,
                    StageError::panicked(message),
                    dispatched_at,
                    dispatch_clock.elapsed(),
                )
            }
        }
    }
}

impl std::fmt::Debug for ParallelScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParallelScheduler")
            .field("max_workers", &self.max_workers)
            .field("available", &self.permits.available_permits())
            .field("task_timeout", &self.task_timeout)
            .finish()
    }
}
