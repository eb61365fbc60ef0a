//! Spawned agent runs and their event streams

use super::config::AgentConfig;
use super::core::AgentCore;
use super::events::{AgentEvent, ChannelOutput};
use super::execution::AgentExecution;
use crate::error::{AgentError, Result};
use crate::llm::LlmClient;
use crate::tools::ToolSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;

/// Handle to an agent run executing on the runtime.
///
/// Events arrive in emission order. Dropping the handle does not cancel the
/// run; the agent keeps going and its remaining events are discarded.
pub struct RunHandle {
    events: mpsc::UnboundedReceiver<AgentEvent>,
    task: JoinHandle<Result<AgentExecution>>,
}

impl RunHandle {
    /// Spawn a fresh agent for `query` over the given client and tools
    pub fn spawn(
        config: AgentConfig,
        llm_client: Arc<dyn LlmClient>,
        tools: ToolSet,
        query: String,
    ) -> Self {
        let (output, events) = ChannelOutput::channel();
        let task = tokio::spawn(async move {
            let mut agent = AgentCore::new(config, llm_client, &tools, Box::new(output));
            agent.run(&query).await
        });

        Self { events, task }
    }

    /// Receive the next event, or `None` once the run has finished
    pub async fn next_event(&mut self) -> Option<AgentEvent> {
        self.events.recv().await
    }

    /// Detach the run and expose its events as a stream
    pub fn into_event_stream(self) -> UnboundedReceiverStream<AgentEvent> {
        UnboundedReceiverStream::new(self.events)
    }

    /// Wait for the run to finish, discarding events not yet received
    pub async fn join(self) -> Result<AgentExecution> {
        drop(self.events);
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(AgentError::Aborted {
                message: e.to_string(),
            }
            .into()),
        }
    }
}
