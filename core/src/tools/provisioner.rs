//! Turns an external tool provider into agent tools

use crate::config::McpServerConfig;
use crate::error::Result;
use crate::tools::mcp::{McpClient, McpTool};
use crate::tools::Tool;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Source of the tool list shared by all agent runs
#[async_trait]
pub trait ToolProvisioner: Send + Sync {
    /// Connect to the provider and list its tools.
    ///
    /// Failures are logged and reported as `None`; they never propagate.
    async fn provision(&self) -> Option<Vec<Arc<dyn Tool>>>;
}

/// Provisions tools from an MCP server launched as a child process
pub struct McpToolProvisioner {
    config: McpServerConfig,
}

impl McpToolProvisioner {
    pub fn new(config: McpServerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &McpServerConfig {
        &self.config
    }

    async fn try_provision(&self) -> Result<Vec<Arc<dyn Tool>>> {
        let mut client = McpClient::new(self.config.clone());
        client.start().await?;
        let infos = client.list_tools().await?;

        if let Some(info) = client.server_info() {
            tracing::debug!(server = %self.config.name, "MCP server info: {}", info);
        }

        let client = Arc::new(Mutex::new(client));
        Ok(infos
            .into_iter()
            .map(|info| Arc::new(McpTool::new(info, Arc::clone(&client))) as Arc<dyn Tool>)
            .collect())
    }
}

#[async_trait]
impl ToolProvisioner for McpToolProvisioner {
    async fn provision(&self) -> Option<Vec<Arc<dyn Tool>>> {
        tracing::info!(server = %self.config.name, "Attempting to initialize MCP client and tools...");

        match self.try_provision().await {
            Ok(tools) => {
                if tools.is_empty() {
                    tracing::warn!(server = %self.config.name, "MCP server advertised no tools");
                }
                let names: Vec<&str> = tools.iter().map(|t| t.name()).collect();
                tracing::info!(
                    server = %self.config.name,
                    tools = ?names,
                    "MCP tools loaded successfully"
                );
                Some(tools)
            }
            Err(e) => {
                tracing::error!(server = %self.config.name, "Failed to initialize MCP tools: {}", e);
                None
            }
        }
    }
}
