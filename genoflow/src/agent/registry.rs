//! Name → agent map built at startup.

use std::collections::HashMap;
use std::sync::Arc;

use genoflow_shared::errors::{GenoflowError, GenoflowResult};

use super::{Agent, SharedAgent};

/// Registry of stage implementations, keyed by `Agent::name`.
///
/// Built once before the orchestrator starts and treated as immutable after.
#[derive(Clone, Default)]
pub struct AgentRegistry {
    agents: HashMap<String, SharedAgent>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an agent under its own name.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if an agent with the same name is already registered.
    pub fn register<A: Agent + 'static>(&mut self, agent: A) -> GenoflowResult<()> {
        self.register_shared(Arc::new(agent))
    }

    pub fn register_shared(&mut self, agent: SharedAgent) -> GenoflowResult<()> {
        let name = agent.name().to_string();
        if self.agents.contains_key(&name) {
            return Err(GenoflowError::InvalidArgument(format!(
                "agent '{}' already registered",
                name
            )));
        }
        tracing::debug!(stage = %name, "Registered agent");
        self.agents.insert(name, agent);
        Ok(())
    }

    /// Builder-style registration.
    pub fn with<A: Agent + 'static>(mut self, agent: A) -> GenoflowResult<Self> {
        self.register(agent)?;
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Option<SharedAgent> {
        self.agents.get(name).map(Arc::clone)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.agents.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.agents.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

impl std::fmt::Debug for AgentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRegistry")
            .field("agents", &self.names())
            .finish()
    }
}
