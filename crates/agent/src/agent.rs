use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use steward_core::new_id;

/// A worker identity capable of executing tasks. Created by a caller and
/// owned by the lifecycle manager thereafter; the manager is the sole
/// mutator of lifecycle fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub name: String,
    pub agent_type: String,
    /// Task types this agent declares it can execute.
    pub capabilities: HashSet<String>,
}

impl Agent {
    pub fn new(name: &str, agent_type: &str) -> Self {
        Self {
            id: new_id(),
            name: name.to_string(),
            agent_type: agent_type.to_string(),
            capabilities: HashSet::new(),
        }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.id = id.to_string();
        self
    }

    pub fn with_capability(mut self, capability: &str) -> Self {
        self.capabilities.insert(capability.to_string());
        self
    }

    pub fn can_handle(&self, task_type: &str) -> bool {
        self.capabilities.contains(task_type)
    }
}
