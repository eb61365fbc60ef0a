//! Agent core logic and execution engine

pub mod config;
pub mod core;
pub mod events;
pub mod execution;
pub mod run;

pub use config::AgentConfig;
pub use core::AgentCore;
pub use events::{AgentEvent, AgentOutput, ChannelOutput, OutputError};
pub use execution::AgentExecution;
pub use run::RunHandle;
