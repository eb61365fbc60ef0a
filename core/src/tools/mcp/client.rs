//! MCP (Model Context Protocol) stdio client
//!
//! Speaks newline-delimited JSON-RPC 2.0 with a child process.

use crate::config::McpServerConfig;
use crate::error::{McpError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::time::{timeout, Duration};

/// Protocol revision announced during `initialize`
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// A tool advertised by an MCP server
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct McpToolInfo {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "inputSchema", default = "default_input_schema")]
    pub input_schema: Value,
}

fn default_input_schema() -> Value {
    json!({"type": "object", "properties": {}})
}

/// One content item of a `tools/call` result
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum McpContent {
    Text {
        text: String,
    },
    Image {
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    Resource {
        resource: Value,
    },
    #[serde(other)]
    Unsupported,
}

/// Result of a `tools/call` request
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct McpCallResult {
    #[serde(default)]
    pub content: Vec<McpContent>,
    #[serde(rename = "isError", default)]
    pub is_error: bool,
}

impl McpCallResult {
    /// Flatten the content items into text for the model
    pub fn text(&self) -> String {
        self.content
            .iter()
            .map(|item| match item {
                McpContent::Text { text } => text.clone(),
                McpContent::Image { mime_type } => format!("[image: {}]", mime_type),
                McpContent::Resource { resource } => resource
                    .get("text")
                    .and_then(|t| t.as_str())
                    .map(str::to_string)
                    .unwrap_or_else(|| resource.to_string()),
                McpContent::Unsupported => "[unsupported content]".to_string(),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Deserialize)]
struct ListToolsResult {
    #[serde(default)]
    tools: Vec<McpToolInfo>,
    #[serde(rename = "nextCursor", default)]
    next_cursor: Option<String>,
}

/// Connection to one MCP server process
pub struct McpClient {
    config: McpServerConfig,
    process: Option<Child>,
    stdin: Option<ChildStdin>,
    stdout: Option<BufReader<ChildStdout>>,
    request_id: u64,
    server_info: Option<Value>,
}

impl McpClient {
    pub fn new(config: McpServerConfig) -> Self {
        Self {
            config,
            process: None,
            stdin: None,
            stdout: None,
            request_id: 0,
            server_info: None,
        }
    }

    /// Server info reported during initialization
    pub fn server_info(&self) -> Option<&Value> {
        self.server_info.as_ref()
    }

    pub fn is_started(&self) -> bool {
        self.process.is_some()
    }

    /// Spawn the server process and perform the MCP handshake
    pub async fn start(&mut self) -> Result<()> {
        if self.is_started() {
            return Ok(());
        }

        if self.config.command.trim().is_empty() {
            return Err(McpError::EmptyCommand.into());
        }

        let program =
            which::which(&self.config.command).map_err(|_| McpError::ExecutableNotFound {
                command: self.config.command.clone(),
            })?;

        tracing::debug!(
            server = %self.config.name,
            command = %program.display(),
            args = ?self.config.redacted_args(),
            "Spawning MCP server"
        );

        let mut cmd = Command::new(program);
        cmd.args(&self.config.args)
            .envs(&self.config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn()?;
        self.stdin = child.stdin.take();
        self.stdout = child.stdout.take().map(BufReader::new);

        // Drain stderr so the child never blocks on a full pipe
        if let Some(stderr) = child.stderr.take() {
            let server = self.config.name.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(server = %server, "{}", line);
                }
            });
        }

        self.process = Some(child);

        if let Err(e) = self.initialize().await {
            self.stop().await;
            return Err(e);
        }

        Ok(())
    }

    /// Stop the MCP server
    pub async fn stop(&mut self) {
        self.stdin = None;
        self.stdout = None;
        if let Some(mut process) = self.process.take() {
            let _ = process.kill().await;
        }
    }

    /// Send initialization request to MCP server
    async fn initialize(&mut self) -> Result<()> {
        let result = self
            .send_request(
                "initialize",
                Some(json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": {
                        "name": "scholar-chat",
                        "version": crate::VERSION
                    }
                })),
            )
            .await?;

        self.server_info = result.get("serverInfo").cloned();
        self.send_notification("notifications/initialized").await?;
        Ok(())
    }

    /// Get next request ID
    fn next_request_id(&mut self) -> u64 {
        self.request_id += 1;
        self.request_id
    }

    async fn write_message(&mut self, message: &Value) -> Result<()> {
        let stdin = self.stdin.as_mut().ok_or(McpError::NotStarted)?;
        let line = serde_json::to_string(message)?;
        stdin.write_all(line.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;
        Ok(())
    }

    async fn send_notification(&mut self, method: &str) -> Result<()> {
        self.write_message(&json!({
            "jsonrpc": "2.0",
            "method": method
        }))
        .await
    }

    /// Send a JSON-RPC request and wait for the matching response
    pub async fn send_request(&mut self, method: &str, params: Option<Value>) -> Result<Value> {
        let id = self.next_request_id();
        let mut request = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method
        });
        if let Some(params) = params {
            request["params"] = params;
        }

        self.write_message(&request).await?;

        let seconds = self.config.timeout_seconds;
        timeout(Duration::from_secs(seconds), self.read_response(id))
            .await
            .map_err(|_| McpError::Timeout {
                method: method.to_string(),
                seconds,
            })?
    }

    /// Read lines until the response with `id` arrives
    async fn read_response(&mut self, id: u64) -> Result<Value> {
        let stdout = self.stdout.as_mut().ok_or(McpError::NotStarted)?;
        let mut line = String::new();

        loop {
            line.clear();
            if stdout.read_line(&mut line).await? == 0 {
                return Err(McpError::Closed.into());
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            let message: Value = match serde_json::from_str(trimmed) {
                Ok(message) => message,
                Err(_) => {
                    tracing::debug!("Ignoring non JSON-RPC output: {}", trimmed);
                    continue;
                }
            };

            if message.get("id").and_then(Value::as_u64) != Some(id) {
                // Notifications and server-initiated requests
                tracing::trace!("Skipping MCP message: {}", trimmed);
                continue;
            }

            return parse_response(message);
        }
    }

    /// List available tools from MCP server, following pagination
    pub async fn list_tools(&mut self) -> Result<Vec<McpToolInfo>> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let params = cursor.as_ref().map(|c| json!({ "cursor": c }));
            let result = self.send_request("tools/list", params).await?;
            let page: ListToolsResult =
                serde_json::from_value(result).map_err(|e| McpError::MalformedResponse {
                    message: format!("invalid tools/list result: {}", e),
                })?;

            tools.extend(page.tools);
            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }

        Ok(tools)
    }

    /// Call a tool on the MCP server
    pub async fn call_tool(&mut self, tool_name: &str, arguments: Value) -> Result<McpCallResult> {
        let result = self
            .send_request(
                "tools/call",
                Some(json!({
                    "name": tool_name,
                    "arguments": arguments
                })),
            )
            .await?;

        serde_json::from_value(result).map_err(|e| {
            McpError::MalformedResponse {
                message: format!("invalid tools/call result: {}", e),
            }
            .into()
        })
    }
}

/// Split a JSON-RPC response into its result or error
fn parse_response(message: Value) -> Result<Value> {
    if let Some(error) = message.get("error") {
        return Err(McpError::Rpc {
            code: error.get("code").and_then(Value::as_i64).unwrap_or(0),
            message: error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string(),
        }
        .into());
    }

    message.get("result").cloned().ok_or_else(|| {
        McpError::MalformedResponse {
            message: "response has neither result nor error".to_string(),
        }
        .into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn test_parse_response_result() {
        let result = parse_response(json!({"jsonrpc": "2.0", "id": 1, "result": {"ok": true}}));
        assert_eq!(result.unwrap(), json!({"ok": true}));
    }

    #[test]
    fn test_parse_response_error() {
        let result = parse_response(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": {"code": -32601, "message": "Method not found"}
        }));
        match result {
            Err(Error::Mcp(McpError::Rpc { code, message })) => {
                assert_eq!(code, -32601);
                assert_eq!(message, "Method not found");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_parse_response_missing_result() {
        let result = parse_response(json!({"jsonrpc": "2.0", "id": 1}));
        assert!(matches!(
            result,
            Err(Error::Mcp(McpError::MalformedResponse { .. }))
        ));
    }

    #[test]
    fn test_tool_info_defaults_schema() {
        let info: McpToolInfo = serde_json::from_value(json!({"name": "papers-search-basic"}))
            .unwrap();
        assert_eq!(info.name, "papers-search-basic");
        assert!(info.description.is_none());
        assert_eq!(info.input_schema["type"], "object");
    }

    #[test]
    fn test_list_tools_page() {
        let page: ListToolsResult = serde_json::from_value(json!({
            "tools": [
                {"name": "a", "description": "first", "inputSchema": {"type": "object"}},
                {"name": "b"}
            ],
            "nextCursor": "2"
        }))
        .unwrap();
        assert_eq!(page.tools.len(), 2);
        assert_eq!(page.tools[0].description.as_deref(), Some("first"));
        assert_eq!(page.next_cursor.as_deref(), Some("2"));
    }

    #[test]
    fn test_call_result_text() {
        let result: McpCallResult = serde_json::from_value(json!({
            "content": [
                {"type": "text", "text": "Attention Is All You Need"},
                {"type": "image", "mimeType": "image/png", "data": "..."},
                {"type": "resource", "resource": {"uri": "x", "text": "abstract"}},
                {"type": "audio", "data": "..."}
            ]
        }))
        .unwrap();
        assert!(!result.is_error);
        assert_eq!(
            result.text(),
            "Attention Is All You Need\n[image: image/png]\nabstract\n[unsupported content]"
        );
    }

    #[test]
    fn test_call_result_error_flag() {
        let result: McpCallResult = serde_json::from_value(json!({
            "content": [{"type": "text", "text": "rate limited"}],
            "isError": true
        }))
        .unwrap();
        assert!(result.is_error);
    }

    #[tokio::test]
    async fn test_start_fails_for_missing_executable() {
        let mut config = McpServerConfig::semantic_scholar("key", "profile");
        config.command = "definitely-not-an-mcp-launcher".to_string();
        let mut client = McpClient::new(config);
        let result = client.start().await;
        assert!(matches!(
            result,
            Err(Error::Mcp(McpError::ExecutableNotFound { .. }))
        ));
        assert!(!client.is_started());
    }

    #[tokio::test]
    async fn test_request_before_start_fails() {
        let mut client = McpClient::new(McpServerConfig::semantic_scholar("key", "profile"));
        let result = client.send_request("tools/list", None).await;
        assert!(matches!(result, Err(Error::Mcp(McpError::NotStarted))));
    }
}
