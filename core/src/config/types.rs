//! Configuration types for scholar-chat core
//!
//! Core only accepts fully resolved, validated configuration.
//! All discovery, loading, and merging happens in the server layer.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Default OpenAI-compatible endpoint used for the chat model
pub const DEFAULT_BASE_URL: &str = "https://api.deepseek.com";

/// Default chat model
pub const DEFAULT_MODEL: &str = "deepseek-chat";

/// Default launcher for the Semantic Scholar MCP server
pub const DEFAULT_MCP_COMMAND: &str = "npx";

/// Smithery package that exposes the Semantic Scholar tools
pub const DEFAULT_MCP_PACKAGE: &str = "@hamid-vakilzadeh/mcpsemanticscholar";

/// Smithery profile used when none is configured
pub const DEFAULT_MCP_PROFILE: &str = "intellectual-toucan-DB0osA";

/// Timeout applied to every exchange with the MCP server
pub const DEFAULT_MCP_TIMEOUT_SECONDS: u64 = 120;

/// Instruction given to every agent run
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are an academic research assistant. For the user's \
research question, call the appropriate tool to look up the relevant literature and return \
the results.";

/// Model parameters for LLM requests
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelParams {
    /// Maximum tokens to generate
    pub max_tokens: Option<u32>,
    /// Temperature for sampling (0.0 to 2.0)
    pub temperature: Option<f32>,
    /// Top-p sampling parameter
    pub top_p: Option<f32>,
}

/// A fully resolved LLM configuration ready for use by core
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedLlmConfig {
    /// Base URL for the OpenAI-compatible API
    pub base_url: String,
    /// API key for authentication
    pub api_key: String,
    /// Model name/identifier
    pub model: String,
    /// Model parameters
    #[serde(default)]
    pub params: ModelParams,
    /// Additional headers for requests
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

impl ResolvedLlmConfig {
    /// Create a new resolved LLM config
    pub fn new(base_url: String, api_key: String, model: String) -> Self {
        Self {
            base_url,
            api_key,
            model,
            params: ModelParams::default(),
            headers: HashMap::new(),
        }
    }

    /// Set model parameters
    pub fn with_params(mut self, params: ModelParams) -> Self {
        self.params = params;
        self
    }

    /// Add multiple headers
    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers.extend(headers);
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_key.is_empty() {
            return Err(ConfigError::MissingField {
                field: "llm.api_key".to_string(),
            });
        }

        if self.model.is_empty() {
            return Err(ConfigError::MissingField {
                field: "llm.model".to_string(),
            });
        }

        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(ConfigError::InvalidValue {
                field: "llm.base_url".to_string(),
                value: self.base_url.clone(),
            });
        }

        if let Some(temp) = self.params.temperature {
            if !(0.0..=2.0).contains(&temp) {
                return Err(ConfigError::InvalidValue {
                    field: "llm.params.temperature".to_string(),
                    value: temp.to_string(),
                });
            }
        }

        if let Some(top_p) = self.params.top_p {
            if !(0.0..=1.0).contains(&top_p) {
                return Err(ConfigError::InvalidValue {
                    field: "llm.params.top_p".to_string(),
                    value: top_p.to_string(),
                });
            }
        }

        Ok(())
    }
}

/// MCP server launch configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerConfig {
    /// Human readable server name, used in logs
    pub name: String,
    /// Executable to launch
    pub command: String,
    /// Arguments passed to the executable
    pub args: Vec<String>,
    /// Extra environment variables for the child process
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Timeout for each request/response exchange
    pub timeout_seconds: u64,
}

impl McpServerConfig {
    /// Launch configuration for the Smithery-hosted Semantic Scholar server
    pub fn semantic_scholar(smithery_key: &str, profile: &str) -> Self {
        Self {
            name: "semantic-scholar".to_string(),
            command: DEFAULT_MCP_COMMAND.to_string(),
            args: vec![
                "-y".to_string(),
                "@smithery/cli@latest".to_string(),
                "run".to_string(),
                DEFAULT_MCP_PACKAGE.to_string(),
                "--key".to_string(),
                smithery_key.to_string(),
                "--profile".to_string(),
                profile.to_string(),
            ],
            env: HashMap::new(),
            timeout_seconds: DEFAULT_MCP_TIMEOUT_SECONDS,
        }
    }

    /// Set the exchange timeout
    pub fn with_timeout(mut self, timeout_seconds: u64) -> Self {
        self.timeout_seconds = timeout_seconds;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.command.trim().is_empty() {
            return Err(ConfigError::MissingField {
                field: "mcp.command".to_string(),
            });
        }

        if self.timeout_seconds == 0 {
            return Err(ConfigError::InvalidValue {
                field: "mcp.timeout_seconds".to_string(),
                value: "0".to_string(),
            });
        }

        // The launcher embeds the provider key right after `--key`.
        if let Some(pos) = self.args.iter().position(|a| a == "--key") {
            let key = self.args.get(pos + 1).map(String::as_str).unwrap_or("");
            if key.trim().is_empty() {
                return Err(ConfigError::MissingField {
                    field: "mcp.key".to_string(),
                });
            }
        }

        Ok(())
    }

    /// Arguments with the provider key masked, for logging
    pub fn redacted_args(&self) -> Vec<String> {
        let mut masked = Vec::with_capacity(self.args.len());
        let mut hide_next = false;
        for arg in &self.args {
            if hide_next {
                masked.push("***".to_string());
                hide_next = false;
            } else {
                hide_next = arg == "--key";
                masked.push(arg.clone());
            }
        }
        masked
    }
}

/// Settings shared by every chat request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Instruction given to the agent
    pub system_prompt: String,
    /// Upper bound on model calls per run
    pub max_steps: usize,
    /// Whether tool outputs are streamed to the client
    #[serde(default)]
    pub forward_tool_results: bool,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            max_steps: 20,
            forward_tool_results: false,
        }
    }
}
