//! Chat service tying the tool cache, the model client and the agent together

use crate::agent::{AgentConfig, RunHandle};
use crate::config::ChatConfig;
use crate::error::Result;
use crate::llm::LlmClient;
use crate::stream::EventTranslator;
use crate::tools::{ToolCache, ToolSet};
use futures::stream::{BoxStream, StreamExt};
use std::sync::Arc;

/// Shared state behind every chat request.
///
/// One instance lives for the whole process. Each query gets its own agent
/// run; the model client and the tool set are shared.
pub struct ChatService {
    llm_client: Arc<dyn LlmClient>,
    tools: ToolCache,
    chat: ChatConfig,
    translator: EventTranslator,
}

impl ChatService {
    pub fn new(llm_client: Arc<dyn LlmClient>, tools: ToolCache, chat: ChatConfig) -> Self {
        let translator = EventTranslator::new(chat.forward_tool_results);
        Self {
            llm_client,
            tools,
            chat,
            translator,
        }
    }

    pub fn is_tools_ready(&self) -> bool {
        self.tools.is_ready()
    }

    /// Provisioned tools, initializing them on first use
    pub async fn tools(&self) -> Result<ToolSet> {
        self.tools.get_or_init().await
    }

    /// Provision tools ahead of the first request; returns how many were loaded
    pub async fn warm_up(&self) -> Result<usize> {
        Ok(self.tools().await?.len())
    }

    /// Start an agent run for `query` over an already provisioned tool set
    pub fn start_run(&self, query: &str, tools: ToolSet) -> RunHandle {
        RunHandle::spawn(
            AgentConfig::from(&self.chat),
            Arc::clone(&self.llm_client),
            tools,
            query.to_string(),
        )
    }

    /// Answer `query` as a stream of text chunks.
    ///
    /// Fails before anything is streamed when the tools cannot be provisioned.
    pub async fn chat(&self, query: &str) -> Result<BoxStream<'static, String>> {
        let tools = self.tools().await?;
        tracing::info!(tools = tools.len(), "Starting chat run");
        let events = self.start_run(query, tools).into_event_stream();
        Ok(self.translator.translate_stream(events).boxed())
    }
}
