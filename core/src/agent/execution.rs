//! Agent execution result structures

use crate::llm::Usage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Result of agent execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentExecution {
    /// Whether the execution was successful
    pub success: bool,

    /// Final answer, or the failure description
    pub final_result: String,

    /// Number of model calls made
    pub steps_executed: usize,

    /// Number of tool invocations made
    pub tool_calls: usize,

    /// Token usage summed over all model calls
    pub usage: Usage,

    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl AgentExecution {
    /// Create a successful execution result
    pub fn success(final_result: String, steps_executed: usize, started_at: DateTime<Utc>) -> Self {
        Self {
            success: true,
            final_result,
            steps_executed,
            tool_calls: 0,
            usage: Usage::default(),
            started_at,
            finished_at: Utc::now(),
        }
    }

    pub fn with_tool_calls(mut self, tool_calls: usize) -> Self {
        self.tool_calls = tool_calls;
        self
    }

    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = usage;
        self
    }

    /// Total execution time in milliseconds
    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }
}
