//! Translation of agent events into the plain-text chunks sent to clients

use crate::agent::AgentEvent;
use futures::{Stream, StreamExt};

/// Maps agent events to client-visible text.
///
/// Model deltas pass through unchanged and a tool call shows up as the tool's
/// name. Tool outputs are only forwarded when `forward_tool_results` is set.
/// Input echoes and full step outputs are never sent.
#[derive(Debug, Clone, Copy, Default)]
pub struct EventTranslator {
    forward_tool_results: bool,
}

impl EventTranslator {
    pub fn new(forward_tool_results: bool) -> Self {
        Self {
            forward_tool_results,
        }
    }

    pub fn forwards_tool_results(&self) -> bool {
        self.forward_tool_results
    }

    /// Text to send for one event, if any
    pub fn translate(&self, event: &AgentEvent) -> Option<String> {
        match event {
            AgentEvent::AgentStream { delta } => (!delta.is_empty()).then(|| delta.clone()),
            AgentEvent::ToolCall { tool_name, .. } => Some(tool_name.clone()),
            AgentEvent::ToolCallResult {
                tool_name, output, ..
            } => {
                if self.forward_tool_results {
                    Some(output.content.clone())
                } else {
                    tracing::debug!(tool = %tool_name, "Tool result not forwarded");
                    None
                }
            }
            AgentEvent::AgentInput { .. } | AgentEvent::AgentOutput { .. } => None,
            AgentEvent::RunFailed { message } => Some(format!("\nError: {}", message)),
        }
    }

    /// Translate a whole event stream, keeping order and skipping silent events
    pub fn translate_stream<S>(self, events: S) -> impl Stream<Item = String>
    where
        S: Stream<Item = AgentEvent>,
    {
        events.filter_map(move |event| futures::future::ready(self.translate(&event)))
    }
}
