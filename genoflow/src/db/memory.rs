//! In-process workflow store.

use std::collections::HashMap;

use parking_lot::RwLock;

use genoflow_shared::errors::GenoflowResult;

use super::{WorkflowFilter, WorkflowStore};
use crate::workflow::{WorkflowId, WorkflowState};

/// Volatile [`WorkflowStore`]. Nothing survives the process.
#[derive(Default)]
pub struct MemoryWorkflowStore {
    workflows: RwLock<HashMap<WorkflowId, WorkflowState>>,
}

impl MemoryWorkflowStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl WorkflowStore for MemoryWorkflowStore {
    fn save(&self, state: &WorkflowState) -> GenoflowResult<()> {
        self.workflows
            .write()
            .insert(state.workflow_id.clone(), state.clone());
        Ok(())
    }

    fn load(&self, id: &WorkflowId) -> GenoflowResult<Option<WorkflowState>> {
        Ok(self.workflows.read().get(id).cloned())
    }

    fn list(&self, filter: &WorkflowFilter) -> GenoflowResult<Vec<WorkflowState>> {
        let mut states: Vec<WorkflowState> = self
            .workflows
            .read()
            .values()
            .filter(|s| filter.matches(s))
            .cloned()
            .collect();
        states.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(states)
    }

    fn delete(&self, id: &WorkflowId) -> GenoflowResult<bool> {
        Ok(self.workflows.write().remove(id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_memory_store_basics() {
        let store = MemoryWorkflowStore::new();
        let state = WorkflowState::new("wf".into(), json!({"user_id": "u"}), "genomics");
        store.save(&state).unwrap();

        assert_eq!(store.load(&"wf".to_string()).unwrap(), Some(state));
        assert_eq!(
            store
                .list(&WorkflowFilter::default().with_user("u"))
                .unwrap()
                .len(),
            1
        );
        assert!(store.delete(&"wf".to_string()).unwrap());
        assert!(store.list(&WorkflowFilter::default()).unwrap().is_empty());
    }
}
