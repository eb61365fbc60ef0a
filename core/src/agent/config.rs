//! Agent configuration structures

use crate::config::{ChatConfig, DEFAULT_SYSTEM_PROMPT};
use serde::{Deserialize, Serialize};

/// Configuration for a single agent run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Maximum number of model calls before the run gives up
    pub max_steps: usize,

    /// Instruction placed at the top of every conversation
    pub system_prompt: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: 20,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }
}

impl AgentConfig {
    /// Set maximum steps
    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }
}

impl From<&ChatConfig> for AgentConfig {
    fn from(chat: &ChatConfig) -> Self {
        Self {
            max_steps: chat.max_steps,
            system_prompt: chat.system_prompt.clone(),
        }
    }
}
