//! Per-invocation results and per-group timing metrics.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::stage::ExecutionMode;
use crate::agent::StageError;
use crate::workflow::WorkflowId;

/// Outcome of one stage invocation attempt.
///
/// `results` is set iff `success`; `error` is set iff not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentExecutionResult {
    pub agent_name: String,
    pub success: bool,
    pub results: Option<Value>,
    pub error: Option<StageError>,
    pub execution_time: Duration,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub memory_usage: Option<u64>,
}

fn end_of(start_time: DateTime<Utc>, elapsed: Duration) -> DateTime<Utc> {
    start_time + chrono::Duration::from_std(elapsed).unwrap_or_else(|_| chrono::Duration::zero())
}

impl AgentExecutionResult {
    pub fn succeeded(
        agent_name: impl Into<String>,
        results: Value,
        start_time: DateTime<Utc>,
        execution_time: Duration,
    ) -> Self {
        Self {
            agent_name: agent_name.into(),
            success: true,
            results: Some(results),
            error: None,
            execution_time,
            start_time,
            end_time: end_of(start_time, execution_time),
            memory_usage: None,
        }
    }

    pub fn failed(
        agent_name: impl Into<String>,
        error: StageError,
        start_time: DateTime<Utc>,
        execution_time: Duration,
    ) -> Self {
        Self {
            agent_name: agent_name.into(),
            success: false,
            results: None,
            error: Some(error),
            execution_time,
            start_time,
            end_time: end_of(start_time, execution_time),
            memory_usage: None,
        }
    }
}

/// Timing of one executed group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParallelExecutionMetrics {
    /// Observed wall clock from dispatch to the last completion.
    pub total_execution_time: Duration,
    /// Sum of the members' execution times.
    pub sequential_time_estimate: Duration,
    pub time_saved: Duration,
    pub parallel_efficiency: f64,
    pub agents_executed: Vec<String>,
    pub execution_results: Vec<AgentExecutionResult>,
    pub execution_mode: ExecutionMode,
}

impl ParallelExecutionMetrics {
    /// Derive group metrics.
    ///
    /// Savings are only reported for parallel groups of more than one member;
    /// everything else reports zero.
    pub fn from_results(
        execution_results: Vec<AgentExecutionResult>,
        total_execution_time: Duration,
        execution_mode: ExecutionMode,
    ) -> Self {
        let sequential_time_estimate: Duration =
            execution_results.iter().map(|r| r.execution_time).sum();

        let concurrent =
            execution_mode == ExecutionMode::Parallel && execution_results.len() > 1;
        let (time_saved, parallel_efficiency) = if concurrent {
            let saved = sequential_time_estimate.saturating_sub(total_execution_time);
            let efficiency = if sequential_time_estimate.is_zero() {
                0.0
            } else {
                saved.as_secs_f64() / sequential_time_estimate.as_secs_f64()
            };
            (saved, efficiency)
        } else {
            (Duration::ZERO, 0.0)
        };

        Self {
            total_execution_time,
            sequential_time_estimate,
            time_saved,
            parallel_efficiency,
            agents_executed: execution_results
                .iter()
                .map(|r| r.agent_name.clone())
                .collect(),
            execution_results,
            execution_mode,
        }
    }

    pub fn succeeded(&self) -> impl Iterator<Item = &AgentExecutionResult> {
        self.execution_results.iter().filter(|r| r.success)
    }

    pub fn failed(&self) -> impl Iterator<Item = &AgentExecutionResult> {
        self.execution_results.iter().filter(|r| !r.success)
    }

    pub fn has_failures(&self) -> bool {
        self.failed().next().is_some()
    }

    /// Compact JSON view for the final aggregate.
    pub fn summary(&self) -> Value {
        json!({
            "execution_mode": self.execution_mode,
            "agents_executed": self.agents_executed,
            "total_execution_ms": self.total_execution_time.as_millis() as u64,
            "sequential_time_estimate_ms": self.sequential_time_estimate.as_millis() as u64,
            "time_saved_ms": self.time_saved.as_millis() as u64,
            "parallel_efficiency": self.parallel_efficiency,
        })
    }
}

/// Averages across workflows.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceSummary {
    pub total_workflows: usize,
    pub average_time_saved: Duration,
    pub average_efficiency: f64,
    pub total_time_saved: Duration,
    pub parallel_execution_enabled: bool,
}

impl PerformanceSummary {
    /// All-zero when `metrics` is empty.
    pub fn from_metrics<'a>(
        metrics: impl IntoIterator<Item = &'a ParallelExecutionMetrics>,
        parallel_execution_enabled: bool,
    ) -> Self {
        let mut total_workflows = 0usize;
        let mut total_time_saved = Duration::ZERO;
        let mut efficiency_sum = 0.0;
        for m in metrics {
            total_workflows += 1;
            total_time_saved += m.time_saved;
            efficiency_sum += m.parallel_efficiency;
        }

        let (average_time_saved, average_efficiency) = if total_workflows == 0 {
            (Duration::ZERO, 0.0)
        } else {
            (
                total_time_saved / total_workflows as u32,
                efficiency_sum / total_workflows as f64,
            )
        };

        Self {
            total_workflows,
            average_time_saved,
            average_efficiency,
            total_time_saved,
            parallel_execution_enabled,
        }
    }
}

/// Group metrics retained per workflow, in execution order.
#[derive(Clone, Default)]
pub struct MetricsStore {
    groups: Arc<RwLock<HashMap<WorkflowId, Vec<ParallelExecutionMetrics>>>>,
}

impl MetricsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, workflow_id: &WorkflowId, metrics: ParallelExecutionMetrics) {
        self.groups
            .write()
            .entry(workflow_id.clone())
            .or_default()
            .push(metrics);
    }

    /// Every group executed for the workflow.
    pub fn groups(&self, workflow_id: &WorkflowId) -> Vec<ParallelExecutionMetrics> {
        self.groups
            .read()
            .get(workflow_id)
            .cloned()
            .unwrap_or_default()
    }

    /// The workflow's concurrency-group metrics: the last group with more
    /// than one member, else the last group.
    pub fn representative(&self, workflow_id: &WorkflowId) -> Option<ParallelExecutionMetrics> {
        let groups = self.groups.read();
        let all = groups.get(workflow_id)?;
        all.iter()
            .rev()
            .find(|m| m.execution_results.len() > 1)
            .or_else(|| all.last())
            .cloned()
    }

    pub fn summary(&self, parallel_execution_enabled: bool) -> PerformanceSummary {
        let groups = self.groups.read();
        let representatives = groups.values().filter_map(|all| {
            all.iter()
                .rev()
                .find(|m| m.execution_results.len() > 1)
                .or_else(|| all.last())
        });
        PerformanceSummary::from_metrics(representatives, parallel_execution_enabled)
    }

    pub fn remove(&self, workflow_id: &WorkflowId) {
        self.groups.write().remove(workflow_id);
    }
}

impl std::fmt::Debug for MetricsStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsStore")
            .field("workflows", &self.groups.read().len())
            .finish()
    }
}
