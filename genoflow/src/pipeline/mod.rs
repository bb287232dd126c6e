//! Table-driven pipeline execution.
//!
//! ```text
//! PipelinePlan → Stage groups → StageInvocations
//!
//! - PipelinePlan: ordered groups plus declared dependencies
//! - Stage: tasks dispatched together, parallel or sequential
//! - StageInvocation: one agent call with its prepared input
//! ```
//!
//! [`ParallelScheduler`] runs one group at a time on a bounded worker pool
//! and produces [`ParallelExecutionMetrics`].

mod metrics;
mod plan;
mod scheduler;
mod stage;
mod task;

pub use metrics::{
    AgentExecutionResult, MetricsStore, ParallelExecutionMetrics, PerformanceSummary,
};
pub use plan::PipelinePlan;
pub use scheduler::ParallelScheduler;
pub use stage::{ExecutionMode, Stage};
pub use task::StageInvocation;
