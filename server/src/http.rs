//! HTTP surface: chat streaming, health and CORS

use anyhow::Context;
use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt};
use scholar_chat_core::error::{Error, ToolError};
use scholar_chat_core::ChatService;
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

/// Chat endpoint path.
pub const CHAT_PATH: &str = "/chat";
/// Health endpoint path.
pub const HEALTH_PATH: &str = "/health";

/// Body sent when the tool provider cannot be reached
pub const PROVISIONING_FAILED_MESSAGE: &str = "Error: Failed to initialize MCP tools on demand.";

const TEXT_PLAIN_UTF8: &str = "text/plain; charset=utf-8";

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ChatService>,
}

impl AppState {
    pub fn new(service: Arc<ChatService>) -> Self {
        Self { service }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = match &self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (code, body).into_response()
    }
}

/// Body of a chat request
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub query: String,
}

impl ChatRequest {
    /// Parse a request body regardless of its declared content type
    pub fn from_body(body: &[u8]) -> Result<Self, ApiError> {
        let request: ChatRequest = serde_json::from_slice(body)
            .map_err(|e| ApiError::BadRequest(format!("invalid chat request: {}", e)))?;
        if request.query.trim().is_empty() {
            return Err(ApiError::BadRequest("query must not be empty".to_string()));
        }
        Ok(request)
    }
}

/// Build the application router
pub fn router(state: AppState, cors: CorsLayer) -> Router {
    Router::new()
        .route(CHAT_PATH, post(chat))
        .route(HEALTH_PATH, get(health))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// CORS policy allowing `origins` with credentials.
///
/// Methods and headers are mirrored from the preflight request. Requests
/// from other origins get no `Access-Control-Allow-Origin` header. A `*`
/// origin is rejected since browsers refuse it on credentialed requests.
pub fn cors_layer(origins: &[String]) -> anyhow::Result<CorsLayer> {
    let origins = origins
        .iter()
        .map(|origin| {
            if origin.trim() == "*" {
                anyhow::bail!("Wildcard origin cannot be combined with credentials");
            }
            HeaderValue::from_str(origin)
                .with_context(|| format!("Invalid allowed origin: {}", origin))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    Ok(CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true))
}

async fn health(State(st): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "tools_ready": st.service.is_tools_ready(),
    }))
}

async fn chat(State(st): State<AppState>, body: Bytes) -> Result<Response, ApiError> {
    let request = ChatRequest::from_body(&body)?;
    tracing::info!(query = %request.query, "Chat request");

    match st.service.chat(&request.query).await {
        Ok(chunks) => Ok(plain_text_stream(chunks)),
        Err(Error::Tool(ToolError::ProvisioningFailed)) => {
            tracing::warn!("Rejecting chat request: tools unavailable");
            Ok(plain_text(PROVISIONING_FAILED_MESSAGE))
        }
        Err(e) => Err(ApiError::Internal(e.to_string())),
    }
}

fn plain_text(text: &'static str) -> Response {
    ([(header::CONTENT_TYPE, TEXT_PLAIN_UTF8)], text).into_response()
}

fn plain_text_stream(chunks: BoxStream<'static, String>) -> Response {
    let body = Body::from_stream(chunks.map(|chunk| Ok::<_, Infallible>(Bytes::from(chunk))));
    ([(header::CONTENT_TYPE, TEXT_PLAIN_UTF8)], body).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_request_parsing() {
        let request = ChatRequest::from_body(br#"{"query": "graph neural networks"}"#).unwrap();
        assert_eq!(request.query, "graph neural networks");

        assert!(ChatRequest::from_body(b"not json").is_err());
        assert!(ChatRequest::from_body(br#"{"question": "x"}"#).is_err());
        assert!(ChatRequest::from_body(br#"{"query": 42}"#).is_err());
        assert!(ChatRequest::from_body(br#"{"query": "  "}"#).is_err());
    }

    #[test]
    fn test_invalid_origin_is_rejected() {
        assert!(cors_layer(&["http://localhost:5173".to_string()]).is_ok());
        assert!(cors_layer(&["bad\norigin".to_string()]).is_err());
    }

    #[test]
    fn test_wildcard_origin_is_rejected() {
        let err = cors_layer(&["http://localhost:5173".to_string(), "*".to_string()]).unwrap_err();
        assert!(err.to_string().contains("Wildcard origin"));
    }
}
