//! Configuration loading for the server

pub mod loader;
pub mod secret;

pub use loader::{RawConfig, RawMcpConfig, ServerConfigLoader, ServerSettings, DEFAULT_ALLOWED_ORIGIN};
pub use secret::{load_secrets, parse_secrets, SECRET_FILE_NAME};
