//! Workflow state and the state machine that mutates it.

mod manager;
mod state;

pub use manager::{WorkflowManager, stage_progress};
pub use state::{
    WorkflowError, WorkflowId, WorkflowState, WorkflowStatus, generate_workflow_id,
};
