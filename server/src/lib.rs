//! # scholar-chat server
//!
//! HTTP front end for scholar-chat. Exposes `POST /chat`, which streams the
//! agent's answer as plain text, and `GET /health`.

pub mod config;
pub mod http;

pub use config::{ServerConfigLoader, ServerSettings};
pub use http::{cors_layer, router, AppState};
