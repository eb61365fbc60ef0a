//! Agent tool backed by a remote MCP tool

use super::client::{McpClient, McpToolInfo};
use crate::error::{Result, ToolError};
use crate::tools::{Tool, ToolCall, ToolResult};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;

/// One tool advertised by an MCP server.
///
/// All tools of a server share the same client; calls are serialized on
/// its mutex because the stdio transport carries one exchange at a time.
pub struct McpTool {
    info: McpToolInfo,
    client: Arc<Mutex<McpClient>>,
}

impl McpTool {
    pub fn new(info: McpToolInfo, client: Arc<Mutex<McpClient>>) -> Self {
        Self { info, client }
    }
}

#[async_trait]
impl Tool for McpTool {
    fn name(&self) -> &str {
        &self.info.name
    }

    fn description(&self) -> &str {
        self.info.description.as_deref().unwrap_or("")
    }

    fn parameters_schema(&self) -> serde_json::Value {
        self.info.input_schema.clone()
    }

    async fn execute(&self, call: ToolCall) -> Result<ToolResult> {
        let arguments = match call.parameters {
            serde_json::Value::Object(map) => serde_json::Value::Object(map),
            serde_json::Value::Null => serde_json::json!({}),
            other => {
                return Err(ToolError::InvalidParameters {
                    message: format!("expected a JSON object of arguments, got {}", other),
                }
                .into())
            }
        };

        let mut client = self.client.lock().await;
        let result = client
            .call_tool(&self.info.name, arguments)
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                name: self.info.name.clone(),
                message: e.to_string(),
            })?;

        let text = result.text();
        if result.is_error {
            Ok(ToolResult::error(call.id, text))
        } else {
            Ok(ToolResult::success(call.id, text))
        }
    }
}
