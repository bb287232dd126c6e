//! Workflow status and mutable workflow state.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use genoflow_shared::constants::{ORCHESTRATOR_AGENT, stages};
use genoflow_shared::errors::GenoflowError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::agent::StageError;

/// Opaque workflow identifier (UUID v4, hyphenated).
pub type WorkflowId = String;

/// Generate a fresh workflow id.
pub fn generate_workflow_id() -> WorkflowId {
    uuid::Uuid::new_v4().to_string()
}

/// Lifecycle status of a workflow.
///
/// ```text
/// Initiated → GenomicsProcessing → ProteomicsProcessing
///           → LiteratureProcessing / DrugProcessing → ReportGeneration → Completed
///
/// Failed is reachable from every non-terminal status.
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Initiated,
    GenomicsProcessing,
    ProteomicsProcessing,
    LiteratureProcessing,
    DrugProcessing,
    ReportGeneration,
    Completed,
    Failed,
}

impl WorkflowStatus {
    /// Status entered when the named stage reports progress.
    pub fn for_stage(stage: &str) -> Option<Self> {
        match stage {
            stages::GENOMICS => Some(Self::GenomicsProcessing),
            stages::PROTEOMICS => Some(Self::ProteomicsProcessing),
            stages::LITERATURE => Some(Self::LiteratureProcessing),
            stages::DRUG => Some(Self::DrugProcessing),
            stages::DECISION => Some(Self::ReportGeneration),
            _ => None,
        }
    }

    /// Completed or Failed. No further mutation is accepted.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Stage work is in flight.
    pub fn is_active(&self) -> bool {
        !self.is_terminal() && *self != Self::Initiated
    }

    /// Whether a sequencer may pick the workflow up.
    pub fn can_run(&self) -> bool {
        *self == Self::Initiated
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initiated => "initiated",
            Self::GenomicsProcessing => "genomics_processing",
            Self::ProteomicsProcessing => "proteomics_processing",
            Self::LiteratureProcessing => "literature_processing",
            Self::DrugProcessing => "drug_processing",
            Self::ReportGeneration => "report_generation",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for WorkflowStatus {
    type Err = GenoflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let status = match s.to_ascii_lowercase().as_str() {
            "initiated" => Self::Initiated,
            "genomics_processing" => Self::GenomicsProcessing,
            "proteomics_processing" => Self::ProteomicsProcessing,
            "literature_processing" => Self::LiteratureProcessing,
            "drug_processing" => Self::DrugProcessing,
            "report_generation" => Self::ReportGeneration,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            other => {
                return Err(GenoflowError::InvalidArgument(format!(
                    "unknown workflow status '{}'",
                    other
                )));
            }
        };
        Ok(status)
    }
}

fn default_recoverable() -> bool {
    true
}

/// An error recorded against a workflow. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowError {
    /// Stage name, or `"orchestrator"` for errors raised by the engine.
    pub agent: String,
    pub error_type: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default = "default_recoverable")]
    pub recoverable: bool,
}

impl WorkflowError {
    pub fn new(
        agent: impl Into<String>,
        error_type: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            agent: agent.into(),
            error_type: error_type.into(),
            message: message.into(),
            timestamp: Utc::now(),
            recoverable: true,
        }
    }

    /// Record a stage failure against the stage that produced it.
    pub fn from_stage(agent: &str, err: &StageError) -> Self {
        Self {
            agent: agent.to_string(),
            error_type: err.error_type.clone(),
            message: err.message.clone(),
            timestamp: Utc::now(),
            recoverable: err.recoverable,
        }
    }

    /// Error attributed to the orchestrator itself rather than a stage.
    pub fn orchestrator(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ORCHESTRATOR_AGENT, error_type, message)
    }

    pub fn non_recoverable(mut self) -> Self {
        self.recoverable = false;
        self
    }
}

/// Mutable record describing one analysis run.
///
/// Only `WorkflowManager` mutates persisted instances; everything else works
/// on snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    pub workflow_id: WorkflowId,
    pub status: WorkflowStatus,
    pub current_agent: String,
    pub progress_percentage: f64,
    #[serde(default)]
    pub results: BTreeMap<String, Value>,
    #[serde(default)]
    pub errors: Vec<WorkflowError>,
    #[serde(default)]
    pub input_data: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowState {
    /// Fresh state for a new run: status Initiated, progress 0.
    pub fn new(workflow_id: WorkflowId, input_data: Value, first_stage: &str) -> Self {
        let now = Utc::now();
        Self {
            workflow_id,
            status: WorkflowStatus::Initiated,
            current_agent: first_stage.to_string(),
            progress_percentage: 0.0,
            results: BTreeMap::new(),
            errors: Vec::new(),
            input_data,
            created_at: now,
            updated_at: now,
        }
    }

    /// User id carried in the original input, if any.
    pub fn user_id(&self) -> Option<&str> {
        self.input_data.get("user_id").and_then(Value::as_str)
    }

    pub fn set_status(&mut self, status: WorkflowStatus) {
        self.status = status;
        self.touch();
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Errors recorded against a particular stage.
    pub fn errors_for<'a>(&'a self, agent: &'a str) -> impl Iterator<Item = &'a WorkflowError> {
        self.errors.iter().filter(move |e| e.agent == agent)
    }
}
