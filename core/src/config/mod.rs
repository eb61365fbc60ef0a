//! Minimal configuration module for scholar-chat core
//!
//! Only exports pure data types. All loading logic is in the server layer.

pub mod types;

pub use types::{
    ChatConfig, McpServerConfig, ModelParams, ResolvedLlmConfig, DEFAULT_BASE_URL,
    DEFAULT_MCP_PROFILE, DEFAULT_MCP_TIMEOUT_SECONDS, DEFAULT_MODEL, DEFAULT_SYSTEM_PROMPT,
};
