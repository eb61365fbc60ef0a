//! Tool system: tool traits, MCP-backed tools and the shared tool cache

pub mod base;
pub mod cache;
pub mod mcp;
pub mod provisioner;

pub use base::{Tool, ToolCall, ToolExecutor, ToolResult};
pub use cache::{ToolCache, ToolSet};
pub use provisioner::{McpToolProvisioner, ToolProvisioner};
