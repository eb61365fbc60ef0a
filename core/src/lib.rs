//! # scholar-chat Core
//!
//! Core library for scholar-chat - a streaming research assistant backend.
//!
//! This library provides the building blocks the HTTP server is assembled from:
//! an OpenAI-compatible LLM client, an MCP stdio client that turns a remote
//! tool provider into agent tools, a lazily initialized shared tool cache, a
//! small agent loop that reports its progress as a stream of events, and the
//! translator that turns those events into plain-text chunks for the client.

// Core modules
pub mod agent;
pub mod config;
pub mod error;
pub mod llm;
pub mod service;
pub mod stream;
pub mod tools;

// Re-export commonly used types
pub use agent::{AgentConfig, AgentEvent, RunHandle};
pub use config::{ChatConfig, McpServerConfig, ModelParams, ResolvedLlmConfig};
pub use service::ChatService;
pub use stream::EventTranslator;
pub use tools::{McpToolProvisioner, ToolCache, ToolProvisioner, ToolSet};

/// Current version of the scholar-chat-core library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize tracing for the library
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
}

/// Initialize tracing with a specific debug mode
///
/// `RUST_LOG` still wins when it is set.
pub fn init_tracing_with_debug(debug: bool) {
    let default_filter = if debug { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}
