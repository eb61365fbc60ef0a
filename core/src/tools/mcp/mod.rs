//! MCP (Model Context Protocol) tool support

pub mod client;
pub mod tool;

pub use client::{McpCallResult, McpClient, McpContent, McpToolInfo};
pub use tool::McpTool;
