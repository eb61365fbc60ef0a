//! AgentCore implementation

use super::config::AgentConfig;
use super::events::{AgentEvent, AgentOutput};
use super::execution::AgentExecution;
use crate::error::{AgentError, Result};
use crate::llm::{
    ChatOptions, ContentBlock, LlmClient, LlmMessage, LlmResponse, MessageContent, MessageRole,
    ToolCallDelta, ToolDefinition, Usage,
};
use crate::tools::{Tool, ToolCall, ToolExecutor, ToolResult};
use chrono::Utc;
use futures::StreamExt;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Longest tool output echoed into the logs
const LOG_PREVIEW_CHARS: usize = 200;

/// Function-calling agent driving one conversation.
///
/// Each step sends the history to the model, streams its answer and runs any
/// tool calls it asks for. The run ends when the model answers without
/// calling a tool.
pub struct AgentCore {
    config: AgentConfig,
    llm_client: Arc<dyn LlmClient>,
    tool_executor: ToolExecutor,
    conversation_history: Vec<LlmMessage>,
    output: Box<dyn AgentOutput>,
    usage: Usage,
    tool_calls: usize,
}

/// Tool call assembled from streamed fragments
#[derive(Default)]
struct PartialToolCall {
    id: Option<String>,
    name: String,
    arguments: String,
}

impl AgentCore {
    /// Create an agent bound to a client, a tool set and an output handler
    pub fn new(
        config: AgentConfig,
        llm_client: Arc<dyn LlmClient>,
        tools: &[Arc<dyn Tool>],
        output: Box<dyn AgentOutput>,
    ) -> Self {
        Self {
            config,
            llm_client,
            tool_executor: ToolExecutor::from_tools(tools),
            conversation_history: Vec::new(),
            output,
            usage: Usage::default(),
            tool_calls: 0,
        }
    }

    /// Get agent configuration
    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Run the agent on a user query.
    ///
    /// Failures are reported as a `RunFailed` event before being returned.
    pub async fn run(&mut self, query: &str) -> Result<AgentExecution> {
        let started_at = Utc::now();
        tracing::debug!(model = %self.llm_client.model_name(), "Starting agent run");

        match self.run_steps(query).await {
            Ok((answer, steps)) => {
                tracing::debug!(steps, tool_calls = self.tool_calls, "Agent run finished");
                Ok(AgentExecution::success(answer, steps, started_at)
                    .with_tool_calls(self.tool_calls)
                    .with_usage(self.usage.clone()))
            }
            Err(e) => {
                tracing::error!("Agent run failed: {}", e);
                self.emit(AgentEvent::RunFailed {
                    message: e.to_string(),
                })
                .await;
                Err(e)
            }
        }
    }

    fn system_prompt(&self) -> String {
        let tools = self.tool_executor.list_tools();
        if tools.is_empty() {
            self.config.system_prompt.clone()
        } else {
            format!(
                "{}\n\nAvailable tools: {}",
                self.config.system_prompt,
                tools.join(", ")
            )
        }
    }

    async fn run_steps(&mut self, query: &str) -> Result<(String, usize)> {
        if query.trim().is_empty() {
            return Err(AgentError::InvalidTask {
                message: "query is empty".to_string(),
            }
            .into());
        }

        self.conversation_history.push(LlmMessage::user(query));

        for step in 1..=self.config.max_steps {
            if let Some(answer) = self.execute_step(step).await? {
                return Ok((answer, step));
            }
        }

        Err(AgentError::MaxStepsExceeded {
            max_steps: self.config.max_steps,
        }
        .into())
    }

    /// Execute a single step; returns the final answer once the model stops calling tools
    async fn execute_step(&mut self, step: usize) -> Result<Option<String>> {
        let input = self
            .conversation_history
            .last()
            .map(step_input)
            .unwrap_or_default();
        self.emit(AgentEvent::AgentInput { input, step }).await;

        let mut messages = Vec::with_capacity(self.conversation_history.len() + 1);
        messages.push(LlmMessage::system(self.system_prompt()));
        messages.extend(self.conversation_history.iter().cloned());

        let tool_definitions = self.tool_executor.get_tool_definitions();
        let response = if self.llm_client.supports_streaming() {
            self.execute_step_with_streaming(messages, tool_definitions)
                .await?
        } else {
            self.execute_step_without_streaming(messages, tool_definitions)
                .await?
        };

        if let Some(usage) = &response.usage {
            self.usage.prompt_tokens += usage.prompt_tokens;
            self.usage.completion_tokens += usage.completion_tokens;
            self.usage.total_tokens += usage.total_tokens;
        }

        let text = response.message.get_text().unwrap_or_default();
        self.emit(AgentEvent::AgentOutput {
            response: text.clone(),
            step,
        })
        .await;

        self.conversation_history.push(response.message.clone());

        if !response.message.has_tool_use() {
            return Ok(Some(text));
        }

        for tool_use in response.message.get_tool_uses() {
            if let ContentBlock::ToolUse { id, name, input } = tool_use {
                self.execute_tool(id, name, input).await;
            }
        }

        Ok(None)
    }

    /// Invoke one tool and append its result to the conversation
    async fn execute_tool(&mut self, id: &str, name: &str, input: &serde_json::Value) {
        tracing::debug!(tool = %name, id = %id, "Tool call: {}", input);
        self.tool_calls += 1;

        self.emit(AgentEvent::ToolCall {
            tool_id: id.to_string(),
            tool_name: name.to_string(),
            tool_kwargs: input.clone(),
        })
        .await;

        let call = ToolCall {
            id: id.to_string(),
            name: name.to_string(),
            parameters: input.clone(),
        };
        let result = match self.tool_executor.execute(call).await {
            Ok(result) => result,
            Err(e) => ToolResult::error(id.to_string(), e.to_string()),
        };

        tracing::info!(
            tool = %name,
            success = result.success,
            duration_ms = ?result.duration_ms,
            "Tool result: {}",
            preview(&result.content)
        );

        self.conversation_history.push(LlmMessage::tool_result(
            id,
            result.content.as_str(),
            !result.success,
        ));

        self.emit(AgentEvent::ToolCallResult {
            tool_id: id.to_string(),
            tool_name: name.to_string(),
            tool_kwargs: input.clone(),
            output: result,
        })
        .await;
    }

    /// Execute a step with streaming LLM response
    async fn execute_step_with_streaming(
        &self,
        messages: Vec<LlmMessage>,
        tool_definitions: Vec<ToolDefinition>,
    ) -> Result<LlmResponse> {
        let options = Some(ChatOptions {
            stream: Some(true),
            ..Default::default()
        });

        let mut stream = self
            .llm_client
            .chat_completion_stream(messages, Some(tool_definitions), options)
            .await?;

        let mut full_content = String::new();
        let mut final_usage = None;
        let mut final_finish_reason = None;
        let mut partial_calls: BTreeMap<u32, PartialToolCall> = BTreeMap::new();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;

            if let Some(delta) = chunk.delta.filter(|d| !d.is_empty()) {
                tracing::trace!(delta = %delta, "Model delta");
                self.emit(AgentEvent::AgentStream {
                    delta: delta.clone(),
                })
                .await;
                full_content.push_str(&delta);
            }

            for fragment in chunk.tool_calls.into_iter().flatten() {
                accumulate_tool_call(&mut partial_calls, fragment);
            }

            if chunk.usage.is_some() {
                final_usage = chunk.usage;
            }
            if chunk.finish_reason.is_some() {
                final_finish_reason = chunk.finish_reason;
            }
        }

        let tool_uses: Vec<ContentBlock> = partial_calls
            .into_values()
            .filter_map(finish_tool_call)
            .collect();

        let content = if tool_uses.is_empty() {
            MessageContent::Text(full_content)
        } else {
            let mut blocks = Vec::with_capacity(tool_uses.len() + 1);
            if !full_content.is_empty() {
                blocks.push(ContentBlock::Text { text: full_content });
            }
            blocks.extend(tool_uses);
            MessageContent::MultiModal(blocks)
        };

        Ok(LlmResponse {
            message: LlmMessage {
                role: MessageRole::Assistant,
                content,
            },
            usage: final_usage,
            model: self.llm_client.model_name().to_string(),
            finish_reason: final_finish_reason,
        })
    }

    /// Execute a step with a single blocking completion; its text becomes one delta
    async fn execute_step_without_streaming(
        &self,
        messages: Vec<LlmMessage>,
        tool_definitions: Vec<ToolDefinition>,
    ) -> Result<LlmResponse> {
        let response = self
            .llm_client
            .chat_completion(messages, Some(tool_definitions), None)
            .await?;

        if let Some(text) = response.message.get_text().filter(|t| !t.is_empty()) {
            self.emit(AgentEvent::AgentStream { delta: text }).await;
        }

        Ok(response)
    }

    /// Send an event; a closed output does not stop the run
    async fn emit(&self, event: AgentEvent) {
        let kind = event.kind();
        if let Err(e) = self.output.emit_event(event).await {
            tracing::trace!(event = kind, "Failed to emit event: {}", e);
        }
    }
}

fn accumulate_tool_call(partial_calls: &mut BTreeMap<u32, PartialToolCall>, fragment: ToolCallDelta) {
    let entry = partial_calls.entry(fragment.index).or_default();
    if let Some(id) = fragment.id.filter(|id| !id.is_empty()) {
        entry.id = Some(id);
    }
    if let Some(name) = fragment.name {
        entry.name.push_str(&name);
    }
    if let Some(arguments) = fragment.arguments {
        entry.arguments.push_str(&arguments);
    }
}

/// Turn accumulated fragments into a tool use block.
///
/// Arguments that are not valid JSON are passed on as a string so the tool
/// rejects them and the model sees the error.
fn finish_tool_call(partial: PartialToolCall) -> Option<ContentBlock> {
    if partial.name.is_empty() {
        tracing::warn!("Dropping streamed tool call without a name");
        return None;
    }

    let input = if partial.arguments.trim().is_empty() {
        serde_json::json!({})
    } else {
        match serde_json::from_str(&partial.arguments) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(tool = %partial.name, "Failed to parse tool arguments: {}", e);
                serde_json::Value::String(partial.arguments)
            }
        }
    };

    Some(ContentBlock::ToolUse {
        id: partial
            .id
            .unwrap_or_else(|| format!("call_{}", uuid::Uuid::new_v4().simple())),
        name: partial.name,
        input,
    })
}

/// Text of the newest message sent in a step: the query first, tool output afterwards
fn step_input(message: &LlmMessage) -> String {
    if let Some(text) = message.get_text() {
        return text;
    }
    match &message.content {
        MessageContent::Text(text) => text.clone(),
        MessageContent::MultiModal(blocks) => blocks
            .iter()
            .filter_map(|block| match block {
                ContentBlock::ToolResult { content, .. } => Some(content.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

fn preview(content: &str) -> String {
    if content.chars().count() <= LOG_PREVIEW_CHARS {
        content.to_string()
    } else {
        let truncated: String = content.chars().take(LOG_PREVIEW_CHARS).collect();
        format!("{}...", truncated)
    }
}
