//! Unit of work handed to the scheduler.

use crate::agent::{SharedAgent, StageInput};

/// One stage invocation: the agent plus its prepared input.
#[derive(Clone)]
pub struct StageInvocation {
    pub agent: SharedAgent,
    pub input: StageInput,
}

impl StageInvocation {
    pub fn new(agent: SharedAgent, input: StageInput) -> Self {
        Self { agent, input }
    }

    pub fn stage(&self) -> &str {
        &self.input.stage
    }
}

impl std::fmt::Debug for StageInvocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageInvocation")
            .field("stage", &self.input.stage)
            .field("workflow_id", &self.input.workflow_id)
            .finish()
    }
}
