//! Error types and handling for scholar-chat core

use thiserror::Error;

/// Result type alias for scholar-chat operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for scholar-chat core
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// LLM client errors
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    /// Tool execution errors
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    /// Agent execution errors
    #[error("Agent error: {0}")]
    Agent(#[from] AgentError),

    /// MCP protocol errors
    #[error("MCP error: {0}")]
    Mcp(#[from] McpError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP client construction errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Generic error with message
    #[error("{0}")]
    Generic(String),
}

/// Configuration-specific errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid value for field '{field}': {value}")]
    InvalidValue { field: String, value: String },
}

/// LLM client errors
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("API error: {status} - {message}")]
    ApiError { status: u16, message: String },

    #[error("Stream error: {message}")]
    Stream { message: String },
}

/// Tool execution errors
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("Tool not found: {name}")]
    NotFound { name: String },

    #[error("Tool execution failed: {name} - {message}")]
    ExecutionFailed { name: String, message: String },

    #[error("Invalid tool parameters: {message}")]
    InvalidParameters { message: String },

    #[error("Failed to initialize MCP tools")]
    ProvisioningFailed,
}

/// Agent execution errors
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Maximum steps exceeded: {max_steps}")]
    MaxStepsExceeded { max_steps: usize },

    #[error("Invalid task: {message}")]
    InvalidTask { message: String },

    #[error("Agent run aborted: {message}")]
    Aborted { message: String },
}

/// MCP client errors
#[derive(Error, Debug)]
pub enum McpError {
    #[error("MCP server command is empty")]
    EmptyCommand,

    #[error("MCP server executable not found: {command}")]
    ExecutableNotFound { command: String },

    #[error("MCP server not started")]
    NotStarted,

    #[error("MCP server closed its output stream")]
    Closed,

    #[error("MCP server returned error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Malformed MCP response: {message}")]
    MalformedResponse { message: String },

    #[error("MCP request '{method}' timed out after {seconds}s")]
    Timeout { method: String, seconds: u64 },
}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Generic(msg)
    }
}

impl From<&str> for Error {
    fn from(msg: &str) -> Self {
        Error::Generic(msg.to_string())
    }
}
