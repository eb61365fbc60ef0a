//! # scholar-chat
//!
//! Research assistant backend. Answers academic questions with a DeepSeek
//! agent that uses Semantic Scholar tools served over MCP, streaming the
//! answer back as plain text.

use anyhow::{Context, Result};
use clap::Parser;
use scholar_chat_core::llm::{LlmClient, OpenAiClient};
use scholar_chat_core::{ChatService, McpToolProvisioner, ToolCache};
use scholar_chat_server::{cors_layer, router, AppState, ServerConfigLoader};
use std::path::PathBuf;
use std::sync::Arc;

/// scholar-chat - streaming research assistant backend
#[derive(Parser)]
#[command(name = "scholar-chat")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Streaming research assistant backed by Semantic Scholar tools")]
#[command(long_about = None)]
struct Cli {
    /// Configuration file or directory path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to bind
    #[arg(long, env = "SCHOLAR_CHAT_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Port to listen on
    #[arg(long, env = "SCHOLAR_CHAT_PORT", default_value_t = 8000)]
    port: u16,

    /// Allowed CORS origin (repeatable)
    #[arg(long = "allowed-origin")]
    allowed_origins: Vec<String>,

    /// Model name override
    #[arg(long)]
    model: Option<String>,

    /// Base URL override
    #[arg(long)]
    base_url: Option<String>,

    /// Stream tool outputs to the client
    #[arg(long)]
    forward_tool_results: bool,

    /// Skip provisioning tools at startup
    #[arg(long)]
    lazy_tools: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

/// Build a configuration loader from CLI arguments
fn build_config_loader(cli: &Cli) -> ServerConfigLoader {
    let mut loader = ServerConfigLoader::new();

    if let Some(config_path) = &cli.config {
        loader = loader.with_config_override(config_path.clone());
    }

    if let Some(model) = &cli.model {
        loader = loader.with_model_override(model.clone());
    }

    if let Some(base_url) = &cli.base_url {
        loader = loader.with_base_url_override(base_url.clone());
    }

    if cli.forward_tool_results {
        loader = loader.with_forward_tool_results_override(true);
    }

    loader.with_allowed_origins_override(cli.allowed_origins.clone())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    scholar_chat_core::init_tracing_with_debug(cli.verbose);

    let settings = build_config_loader(&cli).load().await?;
    tracing::info!(
        model = %settings.llm.model,
        base_url = %settings.llm.base_url,
        "Chat model configured"
    );
    tracing::debug!(
        command = %settings.mcp.command,
        args = ?settings.mcp.redacted_args(),
        "Tool provider configured"
    );

    let llm_client: Arc<dyn LlmClient> = Arc::new(
        OpenAiClient::new(&settings.llm).context("Failed to create chat model client")?,
    );
    let tools = ToolCache::new(Arc::new(McpToolProvisioner::new(settings.mcp.clone())));
    let service = Arc::new(ChatService::new(llm_client, tools, settings.chat.clone()));

    if !cli.lazy_tools {
        match service.warm_up().await {
            Ok(count) => tracing::info!("{} tools ready", count),
            Err(e) => tracing::warn!("Tools unavailable at startup, retrying on first request: {}", e),
        }
    }

    let app = router(AppState::new(service), cors_layer(&settings.allowed_origins)?);

    let addr = format!("{}:{}", cli.host, cli.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!(origins = ?settings.allowed_origins, "Listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    tracing::info!("Shutting down...");
    Ok(())
}
