//! Agent event model and the output abstraction runs report through
//!
//! The agent never writes to a transport directly. It emits [`AgentEvent`]s
//! to an [`AgentOutput`], and callers decide what to do with them. Runs
//! started for a request forward them over a channel.

use crate::tools::ToolResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Error type returned by output handlers
pub type OutputError = Box<dyn std::error::Error + Send + Sync>;

/// Events emitted while an agent run progresses
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// A model call is about to be made
    AgentInput { input: String, step: usize },

    /// Incremental text produced by the model
    AgentStream { delta: String },

    /// The model asked for a tool to be invoked
    ToolCall {
        tool_id: String,
        tool_name: String,
        tool_kwargs: serde_json::Value,
    },

    /// A tool invocation finished
    ToolCallResult {
        tool_id: String,
        tool_name: String,
        tool_kwargs: serde_json::Value,
        output: ToolResult,
    },

    /// Complete model output for one step
    AgentOutput { response: String, step: usize },

    /// The run stopped because of an error
    RunFailed { message: String },
}

impl AgentEvent {
    /// Short name of the event kind, used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            AgentEvent::AgentInput { .. } => "agent_input",
            AgentEvent::AgentStream { .. } => "agent_stream",
            AgentEvent::ToolCall { .. } => "tool_call",
            AgentEvent::ToolCallResult { .. } => "tool_call_result",
            AgentEvent::AgentOutput { .. } => "agent_output",
            AgentEvent::RunFailed { .. } => "run_failed",
        }
    }
}

/// Abstract output interface for agent execution
#[async_trait]
pub trait AgentOutput: Send + Sync {
    /// Emit an agent event
    async fn emit_event(&self, event: AgentEvent) -> Result<(), OutputError>;
}

/// Output handler that forwards events into an unbounded channel
pub struct ChannelOutput {
    sender: mpsc::UnboundedSender<AgentEvent>,
}

impl ChannelOutput {
    pub fn new(sender: mpsc::UnboundedSender<AgentEvent>) -> Self {
        Self { sender }
    }

    /// Create an output together with the receiving end of its channel
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<AgentEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self::new(sender), receiver)
    }
}

#[async_trait]
impl AgentOutput for ChannelOutput {
    async fn emit_event(&self, event: AgentEvent) -> Result<(), OutputError> {
        self.sender
            .send(event)
            .map_err(|e| format!("event receiver dropped ({})", e.0.kind()).into())
    }
}
