//! OpenAI-compatible client implementation using async-openai library
//!
//! DeepSeek exposes an OpenAI-compatible chat completions API, so the same
//! client serves both.

use crate::config::ResolvedLlmConfig;
use crate::error::{LlmError, Result};
use crate::llm::{
    ChatOptions, ContentBlock, FinishReason, LlmClient, LlmMessage, LlmResponse, LlmStream,
    LlmStreamChunk, MessageContent, MessageRole, ToolCallDelta, ToolDefinition, Usage,
};
use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::{
        ChatCompletionMessageToolCall, ChatCompletionRequestAssistantMessage,
        ChatCompletionRequestAssistantMessageContent, ChatCompletionRequestMessage,
        ChatCompletionRequestSystemMessage, ChatCompletionRequestToolMessage,
        ChatCompletionRequestToolMessageContent, ChatCompletionRequestUserMessage,
        ChatCompletionTool, ChatCompletionToolType, CreateChatCompletionRequest,
        CreateChatCompletionRequestArgs, FunctionObject,
    },
    Client,
};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;

/// OpenAI-compatible client using async-openai library
pub struct OpenAiClient {
    client: Client<OpenAIConfig>,
    model: String,
    params: crate::config::ModelParams,
}

impl OpenAiClient {
    /// Create a new client from resolved LLM config
    pub fn new(config: &ResolvedLlmConfig) -> Result<Self> {
        if config.api_key.is_empty() {
            return Err(LlmError::Authentication {
                message: "No API key found for the chat model".to_string(),
            }
            .into());
        }

        let openai_config = OpenAIConfig::new()
            .with_api_key(&config.api_key)
            .with_api_base(config.base_url.trim_end_matches('/'));

        let mut client = Client::with_config(openai_config);

        // Extra headers need a custom reqwest client
        if !config.headers.is_empty() {
            let mut headers = HeaderMap::new();
            for (key, value) in &config.headers {
                let name = HeaderName::from_bytes(key.as_bytes()).map_err(|e| {
                    LlmError::InvalidRequest {
                        message: format!("Invalid header name '{}': {}", key, e),
                    }
                })?;
                let value = HeaderValue::from_str(value).map_err(|e| LlmError::InvalidRequest {
                    message: format!("Invalid value for header '{}': {}", key, e),
                })?;
                headers.insert(name, value);
            }
            let http_client = reqwest::Client::builder()
                .default_headers(headers)
                .build()?;
            client = client.with_http_client(http_client);
        }

        Ok(Self {
            client,
            model: config.model.clone(),
            params: config.params.clone(),
        })
    }

    /// Convert our internal message format to async-openai format
    fn convert_messages(
        &self,
        messages: Vec<LlmMessage>,
    ) -> Result<Vec<ChatCompletionRequestMessage>> {
        let mut converted = Vec::new();

        for message in messages {
            match message.role {
                MessageRole::System => {
                    let content = extract_text_content(&message.content);
                    converted.push(ChatCompletionRequestMessage::System(
                        ChatCompletionRequestSystemMessage {
                            content: content.into(),
                            name: None,
                        },
                    ));
                }
                MessageRole::User => {
                    let content = extract_text_content(&message.content);
                    converted.push(ChatCompletionRequestMessage::User(
                        ChatCompletionRequestUserMessage {
                            content: content.into(),
                            name: None,
                        },
                    ));
                }
                MessageRole::Assistant => {
                    converted.push(ChatCompletionRequestMessage::Assistant(
                        convert_assistant_message(&message.content),
                    ));
                }
                MessageRole::Tool => {
                    let mut pushed_any = false;
                    if let MessageContent::MultiModal(blocks) = &message.content {
                        for block in blocks {
                            if let ContentBlock::ToolResult {
                                tool_use_id,
                                content,
                                ..
                            } = block
                            {
                                converted.push(ChatCompletionRequestMessage::Tool(
                                    ChatCompletionRequestToolMessage {
                                        content: ChatCompletionRequestToolMessageContent::Text(
                                            content.clone(),
                                        ),
                                        tool_call_id: tool_use_id.clone(),
                                    },
                                ));
                                pushed_any = true;
                            }
                        }
                    }
                    if !pushed_any {
                        return Err(LlmError::InvalidRequest {
                            message: "Tool message must contain ToolResult".to_string(),
                        }
                        .into());
                    }
                }
            }
        }

        Ok(converted)
    }

    /// Build a request; per-call options take precedence over configured params
    fn build_request(
        &self,
        messages: Vec<LlmMessage>,
        tools: Option<Vec<ToolDefinition>>,
        options: Option<ChatOptions>,
        stream: bool,
    ) -> Result<CreateChatCompletionRequest> {
        let converted_messages = self.convert_messages(messages)?;
        let options = options.unwrap_or_default();

        let mut request_builder = CreateChatCompletionRequestArgs::default();
        request_builder.model(&self.model);
        request_builder.messages(converted_messages);
        if stream {
            request_builder.stream(true);
        }

        if let Some(tools) = tools.filter(|t| !t.is_empty()) {
            tracing::debug!("Chat request with {} tools enabled", tools.len());
            request_builder.tools(convert_tools(tools));
        }

        if let Some(max_tokens) = options.max_tokens.or(self.params.max_tokens) {
            #[allow(deprecated)]
            request_builder.max_tokens(max_tokens);
        }
        if let Some(temperature) = options.temperature.or(self.params.temperature) {
            request_builder.temperature(temperature);
        }
        if let Some(top_p) = options.top_p.or(self.params.top_p) {
            request_builder.top_p(top_p);
        }

        request_builder.build().map_err(|e| {
            tracing::error!("Failed to build chat request: {}", e);
            LlmError::InvalidRequest {
                message: format!("Failed to build request: {}", e),
            }
            .into()
        })
    }
}

/// Extract text content from MessageContent
fn extract_text_content(content: &MessageContent) -> String {
    match content {
        MessageContent::Text(text) => text.clone(),
        MessageContent::MultiModal(blocks) => blocks
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

fn convert_assistant_message(content: &MessageContent) -> ChatCompletionRequestAssistantMessage {
    match content {
        MessageContent::Text(text) => ChatCompletionRequestAssistantMessage {
            content: Some(ChatCompletionRequestAssistantMessageContent::Text(
                text.clone(),
            )),
            ..Default::default()
        },
        MessageContent::MultiModal(blocks) => {
            let mut text = String::new();
            let mut tool_calls = Vec::new();

            for block in blocks {
                match block {
                    ContentBlock::Text { text: part } => {
                        if !text.is_empty() {
                            text.push('\n');
                        }
                        text.push_str(part);
                    }
                    ContentBlock::ToolUse { id, name, input } => {
                        tool_calls.push(ChatCompletionMessageToolCall {
                            id: id.clone(),
                            r#type: ChatCompletionToolType::Function,
                            function: async_openai::types::FunctionCall {
                                name: name.clone(),
                                arguments: tool_arguments(input),
                            },
                        });
                    }
                    ContentBlock::ToolResult { .. } => {}
                }
            }

            ChatCompletionRequestAssistantMessage {
                content: (!text.is_empty())
                    .then(|| ChatCompletionRequestAssistantMessageContent::Text(text)),
                tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
                ..Default::default()
            }
        }
    }
}

/// Convert our tool definitions to async-openai format
/// Arguments that never parsed as JSON are sent back exactly as the model wrote them
fn tool_arguments(input: &Value) -> String {
    match input {
        Value::String(raw) => raw.clone(),
        other => other.to_string(),
    }
}

fn convert_tools(tools: Vec<ToolDefinition>) -> Vec<ChatCompletionTool> {
    tools
        .into_iter()
        .map(|tool| ChatCompletionTool {
            r#type: ChatCompletionToolType::Function,
            function: FunctionObject {
                name: tool.function.name,
                description: Some(tool.function.description),
                parameters: Some(tool.function.parameters),
                strict: None,
            },
        })
        .collect()
}

fn convert_finish_reason(reason: async_openai::types::FinishReason) -> FinishReason {
    match reason {
        async_openai::types::FinishReason::Stop => FinishReason::Stop,
        async_openai::types::FinishReason::Length => FinishReason::Length,
        async_openai::types::FinishReason::ToolCalls => FinishReason::ToolCalls,
        async_openai::types::FinishReason::ContentFilter => FinishReason::ContentFilter,
        async_openai::types::FinishReason::FunctionCall => FinishReason::ToolCalls,
    }
}

fn convert_usage(usage: async_openai::types::CompletionUsage) -> Usage {
    Usage {
        prompt_tokens: usage.prompt_tokens,
        completion_tokens: usage.completion_tokens,
        total_tokens: usage.total_tokens,
    }
}

fn api_error(error: OpenAIError) -> crate::error::Error {
    let status = match &error {
        OpenAIError::Reqwest(e) => e.status().map(|s| s.as_u16()).unwrap_or(502),
        // async-openai doesn't expose status codes for API errors
        _ => 500,
    };
    LlmError::ApiError {
        status,
        message: error.to_string(),
    }
    .into()
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn chat_completion(
        &self,
        messages: Vec<LlmMessage>,
        tools: Option<Vec<ToolDefinition>>,
        options: Option<ChatOptions>,
    ) -> Result<LlmResponse> {
        let request = self.build_request(messages, tools, options, false)?;

        let response = self.client.chat().create(request).await.map_err(|e| {
            tracing::error!("Chat completion call failed: {}", e);
            api_error(e)
        })?;

        self.convert_response(response)
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn provider_name(&self) -> &str {
        "openai_compat"
    }

    fn supports_streaming(&self) -> bool {
        true
    }

    async fn chat_completion_stream(
        &self,
        messages: Vec<LlmMessage>,
        tools: Option<Vec<ToolDefinition>>,
        options: Option<ChatOptions>,
    ) -> Result<LlmStream<'_>> {
        let request = self.build_request(messages, tools, options, true)?;

        let stream = self
            .client
            .chat()
            .create_stream(request)
            .await
            .map_err(|e| {
                tracing::error!("Streaming chat completion call failed: {}", e);
                api_error(e)
            })?;

        let converted_stream = stream.map(|result| match result {
            Ok(chunk) => Ok(convert_stream_chunk(chunk)),
            Err(e) => Err(LlmError::Stream {
                message: e.to_string(),
            }
            .into()),
        });

        Ok(Box::new(Box::pin(converted_stream)))
    }
}

impl OpenAiClient {
    /// Convert async-openai response to our internal format
    fn convert_response(
        &self,
        response: async_openai::types::CreateChatCompletionResponse,
    ) -> Result<LlmResponse> {
        let choice =
            response
                .choices
                .into_iter()
                .next()
                .ok_or_else(|| LlmError::InvalidRequest {
                    message: "No choices in response".to_string(),
                })?;

        let mut blocks = Vec::new();
        if let Some(content) = choice.message.content {
            blocks.push(ContentBlock::Text { text: content });
        }
        for tool_call in choice.message.tool_calls.unwrap_or_default() {
            let function = &tool_call.function;
            let args: Value = serde_json::from_str(&function.arguments)
                .unwrap_or_else(|_| Value::String(function.arguments.clone()));

            blocks.push(ContentBlock::ToolUse {
                id: tool_call.id,
                name: function.name.clone(),
                input: args,
            });
        }

        let message_content = match blocks.as_slice() {
            [] => MessageContent::Text(String::new()),
            [ContentBlock::Text { text }] => MessageContent::Text(text.clone()),
            _ => MessageContent::MultiModal(blocks),
        };

        Ok(LlmResponse {
            message: LlmMessage {
                role: MessageRole::Assistant,
                content: message_content,
            },
            usage: response.usage.map(convert_usage),
            model: response.model,
            finish_reason: choice.finish_reason.map(convert_finish_reason),
        })
    }
}

/// Convert async-openai stream chunk to our internal format
fn convert_stream_chunk(
    chunk: async_openai::types::CreateChatCompletionStreamResponse,
) -> LlmStreamChunk {
    let choice = chunk.choices.into_iter().next();

    let delta = choice.as_ref().and_then(|c| c.delta.content.clone());

    // Fragments are passed through raw; the agent accumulates them by index
    let tool_calls = choice
        .as_ref()
        .and_then(|c| c.delta.tool_calls.as_ref())
        .map(|tool_calls| {
            tool_calls
                .iter()
                .map(|tool_call| ToolCallDelta {
                    index: tool_call.index,
                    id: tool_call.id.clone(),
                    name: tool_call.function.as_ref().and_then(|f| f.name.clone()),
                    arguments: tool_call
                        .function
                        .as_ref()
                        .and_then(|f| f.arguments.clone()),
                })
                .collect::<Vec<_>>()
        })
        .filter(|calls| !calls.is_empty());

    let finish_reason = choice
        .and_then(|c| c.finish_reason)
        .map(convert_finish_reason);

    LlmStreamChunk {
        delta,
        tool_calls,
        finish_reason,
        usage: chunk.usage.map(convert_usage),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_config() -> ResolvedLlmConfig {
        ResolvedLlmConfig::new(
            "https://api.deepseek.com".to_string(),
            "sk-test".to_string(),
            "deepseek-chat".to_string(),
        )
    }

    #[test]
    fn test_new_requires_api_key() {
        let mut config = test_config();
        config.api_key.clear();
        assert!(OpenAiClient::new(&config).is_err());
    }

    #[test]
    fn test_new_rejects_invalid_header() {
        let mut config = test_config();
        config
            .headers
            .insert("bad header".to_string(), "value".to_string());
        assert!(OpenAiClient::new(&config).is_err());
    }

    #[test]
    fn test_convert_messages_keeps_tool_round_trip() {
        let client = OpenAiClient::new(&test_config()).unwrap();
        let messages = vec![
            LlmMessage::system("system"),
            LlmMessage::user("find papers on transformers"),
            LlmMessage {
                role: MessageRole::Assistant,
                content: MessageContent::MultiModal(vec![ContentBlock::ToolUse {
                    id: "call_1".to_string(),
                    name: "papers-search-basic".to_string(),
                    input: json!({"query": "transformers"}),
                }]),
            },
            LlmMessage::tool_result("call_1", "[]", false),
        ];

        let converted = client.convert_messages(messages).unwrap();
        assert_eq!(converted.len(), 4);
        match &converted[2] {
            ChatCompletionRequestMessage::Assistant(message) => {
                let calls = message.tool_calls.as_ref().unwrap();
                assert_eq!(calls[0].function.name, "papers-search-basic");
                assert!(message.content.is_none());
            }
            other => panic!("unexpected message: {:?}", other),
        }
        assert!(matches!(converted[3], ChatCompletionRequestMessage::Tool(_)));
    }

    #[test]
    fn test_unparsed_tool_arguments_are_sent_verbatim() {
        let content = MessageContent::MultiModal(vec![
            ContentBlock::ToolUse {
                id: "call_1".to_string(),
                name: "papers-search-basic".to_string(),
                input: Value::String("{\"query\": \"gnn\"".to_string()),
            },
            ContentBlock::ToolUse {
                id: "call_2".to_string(),
                name: "papers-search-basic".to_string(),
                input: json!({"query": "gnn"}),
            },
        ]);

        let message = convert_assistant_message(&content);
        let calls = message.tool_calls.unwrap();
        assert_eq!(calls[0].function.arguments, "{\"query\": \"gnn\"");
        assert_eq!(calls[1].function.arguments, "{\"query\":\"gnn\"}");
    }

    #[test]
    fn test_tool_message_without_result_is_rejected() {
        let client = OpenAiClient::new(&test_config()).unwrap();
        let messages = vec![LlmMessage {
            role: MessageRole::Tool,
            content: MessageContent::Text("orphan".to_string()),
        }];
        assert!(client.convert_messages(messages).is_err());
    }

    #[test]
    fn test_build_request_sets_stream_and_tools() {
        let client = OpenAiClient::new(&test_config()).unwrap();
        let tools = vec![ToolDefinition {
            tool_type: "function".to_string(),
            function: crate::llm::FunctionDefinition {
                name: "search".to_string(),
                description: "Search papers".to_string(),
                parameters: json!({"type": "object"}),
            },
        }];

        let request = client
            .build_request(vec![LlmMessage::user("hi")], Some(tools), None, true)
            .unwrap();
        assert_eq!(request.model, "deepseek-chat");
        assert_eq!(request.stream, Some(true));
        assert_eq!(request.tools.as_ref().map(Vec::len), Some(1));
    }

    #[test]
    fn test_configured_params_fill_missing_options() {
        let config = test_config().with_params(crate::config::ModelParams {
            max_tokens: Some(512),
            temperature: Some(0.3),
            top_p: None,
        });
        let client = OpenAiClient::new(&config).unwrap();

        let options = ChatOptions {
            temperature: Some(0.9),
            stream: Some(true),
            ..Default::default()
        };
        let request = client
            .build_request(vec![LlmMessage::user("hi")], None, Some(options), true)
            .unwrap();
        assert_eq!(request.temperature, Some(0.9));
        #[allow(deprecated)]
        let max_tokens = request.max_tokens;
        assert_eq!(max_tokens, Some(512));
        assert!(request.tools.is_none());
    }
}
