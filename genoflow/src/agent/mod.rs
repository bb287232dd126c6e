//! Stage contract.
//!
//! Every pipeline stage implements [`Agent`]: a synchronous function from a
//! [`StageInput`] to a JSON result or a [`StageError`]. Agents know nothing
//! about orchestration. The scheduler offloads `invoke` onto a blocking worker
//! and turns every outcome (including panics) into an `AgentExecutionResult`.

mod cached;
mod registry;

pub use cached::CachedAgent;
pub use registry::AgentRegistry;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::workflow::WorkflowId;

/// Trait implemented by every analysis stage.
///
/// Implementations must be callable from any worker thread and must not
/// touch orchestration state; all observable effects go through the return
/// value.
pub trait Agent: Send + Sync {
    /// Registered stage name (e.g. `"genomics"`).
    fn name(&self) -> &str;

    /// Run the stage.
    fn invoke(&self, input: &StageInput) -> Result<Value, StageError>;
}

/// Shared handle to a registered agent.
pub type SharedAgent = Arc<dyn Agent>;

/// Input handed to a stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageInput {
    pub workflow_id: WorkflowId,
    pub stage: String,
    /// Snapshot of the workflow's original input.
    pub input_data: Value,
    /// Results of declared upstream stages that succeeded.
    #[serde(default)]
    pub upstream: BTreeMap<String, Value>,
    /// Failure messages of declared upstream stages that did not succeed.
    #[serde(default)]
    pub upstream_errors: BTreeMap<String, String>,
}

impl StageInput {
    pub fn new(workflow_id: impl Into<WorkflowId>, stage: impl Into<String>, input_data: Value) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            stage: stage.into(),
            input_data,
            upstream: BTreeMap::new(),
            upstream_errors: BTreeMap::new(),
        }
    }

    pub fn with_upstream(mut self, stage: impl Into<String>, result: Value) -> Self {
        self.upstream.insert(stage.into(), result);
        self
    }

    pub fn with_upstream_error(mut self, stage: impl Into<String>, message: impl Into<String>) -> Self {
        self.upstream_errors.insert(stage.into(), message.into());
        self
    }

    /// Result of an upstream stage, if it succeeded.
    pub fn upstream_result(&self, stage: &str) -> Option<&Value> {
        self.upstream.get(stage)
    }

    /// Whether any declared upstream stage failed.
    pub fn is_degraded(&self) -> bool {
        !self.upstream_errors.is_empty()
    }
}

/// Failure returned by a stage.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{error_type}: {message}")]
pub struct StageError {
    pub error_type: String,
    pub message: String,
    pub recoverable: bool,
}

impl StageError {
    pub fn new(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error_type: error_type.into(),
            message: message.into(),
            recoverable: true,
        }
    }

    /// A failure the stage considers unrecoverable.
    pub fn fatal(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            recoverable: false,
            ..Self::new(error_type, message)
        }
    }

    pub(crate) fn timeout(limit: Duration) -> Self {
        Self::new(
            "Timeout",
            format!("stage did not finish within {}ms", limit.as_millis()),
        )
    }

    pub(crate) fn panicked(message: impl Into<String>) -> Self {
        Self::fatal("Panic", message)
    }
}
