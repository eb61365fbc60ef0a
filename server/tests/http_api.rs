use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use futures::StreamExt;
use scholar_chat_core::config::ChatConfig;
use scholar_chat_core::error::Result;
use scholar_chat_core::llm::{
    ChatOptions, FinishReason, LlmClient, LlmMessage, LlmResponse, LlmStream, LlmStreamChunk,
    ToolCallDelta, ToolDefinition,
};
use scholar_chat_core::tools::{Tool, ToolCall, ToolResult};
use scholar_chat_core::{ChatService, ToolCache, ToolProvisioner};
use scholar_chat_server::http::PROVISIONING_FAILED_MESSAGE;
use scholar_chat_server::{cors_layer, router, AppState};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tower::ServiceExt;

const FRONTEND_ORIGIN: &str = "http://localhost:5173";

/// Streams scripted turns, answering "ok" once the script runs out
struct ScriptedLlm {
    turns: Mutex<VecDeque<Vec<LlmStreamChunk>>>,
}

impl ScriptedLlm {
    fn new(turns: Vec<Vec<LlmStreamChunk>>) -> Arc<Self> {
        Arc::new(Self {
            turns: Mutex::new(turns.into()),
        })
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn chat_completion(
        &self,
        _messages: Vec<LlmMessage>,
        _tools: Option<Vec<ToolDefinition>>,
        _options: Option<ChatOptions>,
    ) -> Result<LlmResponse> {
        Ok(LlmResponse {
            message: LlmMessage::assistant("ok"),
            usage: None,
            model: "scripted".to_string(),
            finish_reason: Some(FinishReason::Stop),
        })
    }

    fn model_name(&self) -> &str {
        "scripted"
    }

    fn provider_name(&self) -> &str {
        "test"
    }

    fn supports_streaming(&self) -> bool {
        true
    }

    async fn chat_completion_stream(
        &self,
        _messages: Vec<LlmMessage>,
        _tools: Option<Vec<ToolDefinition>>,
        _options: Option<ChatOptions>,
    ) -> Result<LlmStream<'_>> {
        let chunks = self
            .turns
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| vec![text("ok")]);
        Ok(Box::new(futures::stream::iter(chunks.into_iter().map(Ok))))
    }
}

/// Sends one delta, then waits for the test before finishing
struct GatedLlm {
    gate: Arc<Notify>,
}

#[async_trait]
impl LlmClient for GatedLlm {
    async fn chat_completion(
        &self,
        _messages: Vec<LlmMessage>,
        _tools: Option<Vec<ToolDefinition>>,
        _options: Option<ChatOptions>,
    ) -> Result<LlmResponse> {
        unreachable!("streaming client")
    }

    fn model_name(&self) -> &str {
        "gated"
    }

    fn provider_name(&self) -> &str {
        "test"
    }

    fn supports_streaming(&self) -> bool {
        true
    }

    async fn chat_completion_stream(
        &self,
        _messages: Vec<LlmMessage>,
        _tools: Option<Vec<ToolDefinition>>,
        _options: Option<ChatOptions>,
    ) -> Result<LlmStream<'_>> {
        let gate = Arc::clone(&self.gate);
        let rest = futures::stream::once(async move {
            gate.notified().await;
            Ok(text("second"))
        });
        let stream = futures::stream::iter(vec![Ok(text("first"))]).chain(rest);
        Ok(Box::new(Box::pin(stream)))
    }
}

struct SearchTool;

#[async_trait]
impl Tool for SearchTool {
    fn name(&self) -> &str {
        "papers-search-basic"
    }

    fn description(&self) -> &str {
        "Search Semantic Scholar"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({"type": "object", "properties": {"query": {"type": "string"}}})
    }

    async fn execute(&self, call: ToolCall) -> Result<ToolResult> {
        Ok(ToolResult::success(
            call.id,
            "Attention Is All You Need (2017)".to_string(),
        ))
    }
}

struct CountingProvisioner {
    calls: AtomicUsize,
    succeed: bool,
}

impl CountingProvisioner {
    fn new(succeed: bool) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            succeed,
        })
    }
}

#[async_trait]
impl ToolProvisioner for CountingProvisioner {
    async fn provision(&self) -> Option<Vec<Arc<dyn Tool>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        self.succeed
            .then(|| vec![Arc::new(SearchTool) as Arc<dyn Tool>])
    }
}

fn text(delta: &str) -> LlmStreamChunk {
    LlmStreamChunk {
        delta: Some(delta.to_string()),
        ..Default::default()
    }
}

fn search_call(arguments: &str) -> LlmStreamChunk {
    LlmStreamChunk {
        tool_calls: Some(vec![ToolCallDelta {
            index: 0,
            id: Some("call_1".to_string()),
            name: Some("papers-search-basic".to_string()),
            arguments: Some(arguments.to_string()),
        }]),
        finish_reason: Some(FinishReason::ToolCalls),
        ..Default::default()
    }
}

fn make_service(llm: Arc<dyn LlmClient>, provisioner: Arc<dyn ToolProvisioner>) -> Arc<ChatService> {
    Arc::new(ChatService::new(
        llm,
        ToolCache::new(provisioner),
        ChatConfig::default(),
    ))
}

fn make_app(service: Arc<ChatService>) -> Router {
    let cors = cors_layer(&[FRONTEND_ORIGIN.to_string()]).unwrap();
    router(AppState::new(service), cors)
}

fn chat_request(body: &str) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri("/chat")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_text(body: Body) -> String {
    let bytes = to_bytes(body, usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn test_chat_streams_deltas_and_tool_names() {
    let llm = ScriptedLlm::new(vec![
        vec![text("Looking up. "), search_call(r#"{"query":"transformers"}"#)],
        vec![text("Found "), text("one paper.")],
    ]);
    let app = make_app(make_service(llm, CountingProvisioner::new(true)));

    let resp = app
        .oneshot(chat_request(r#"{"query":"transformer papers"}"#))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers()[header::CONTENT_TYPE],
        "text/plain; charset=utf-8"
    );

    let body = body_text(resp.into_body()).await;
    assert_eq!(body, "Looking up. papers-search-basicFound one paper.");
    assert!(!body.contains("Attention Is All You Need"));
}

#[tokio::test]
async fn test_first_chunk_arrives_before_run_completes() {
    let gate = Arc::new(Notify::new());
    let llm = Arc::new(GatedLlm {
        gate: Arc::clone(&gate),
    });
    let app = make_app(make_service(llm, CountingProvisioner::new(true)));

    let resp = app
        .oneshot(chat_request(r#"{"query":"slow question"}"#))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let mut frames = resp.into_body().into_data_stream();
    let first = tokio::time::timeout(Duration::from_secs(5), frames.next())
        .await
        .expect("first chunk should not wait for the run to finish")
        .unwrap()
        .unwrap();
    assert_eq!(&first[..], b"first");

    gate.notify_one();
    let mut rest = Vec::new();
    while let Some(frame) = frames.next().await {
        rest.extend_from_slice(&frame.unwrap());
    }
    assert_eq!(rest, b"second");
}

#[tokio::test]
async fn test_missing_query_is_bad_request() {
    let app = make_app(make_service(ScriptedLlm::new(Vec::new()), CountingProvisioner::new(true)));

    for body in [r#"{}"#, r#"{"query": 7}"#, "not json", r#"{"query": ""}"#] {
        let resp = app.clone().oneshot(chat_request(body)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "body: {}", body);
        let payload: Value = serde_json::from_str(&body_text(resp.into_body()).await).unwrap();
        assert!(payload["error"].as_str().unwrap().starts_with("bad request"));
    }
}

#[tokio::test]
async fn test_provisioning_failure_returns_error_text() {
    let provisioner = CountingProvisioner::new(false);
    let app = make_app(make_service(ScriptedLlm::new(Vec::new()), provisioner.clone()));

    for attempt in 1..=2 {
        let resp = app
            .clone()
            .oneshot(chat_request(r#"{"query":"anything"}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_text(resp.into_body()).await, PROVISIONING_FAILED_MESSAGE);
        assert_eq!(provisioner.calls.load(Ordering::SeqCst), attempt);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_first_requests_provision_once() {
    let provisioner = CountingProvisioner::new(true);
    let app = make_app(make_service(ScriptedLlm::new(Vec::new()), provisioner.clone()));

    let requests = (0..8).map(|_| {
        let app = app.clone();
        tokio::spawn(async move {
            let resp = app
                .oneshot(chat_request(r#"{"query":"hello"}"#))
                .await
                .unwrap();
            body_text(resp.into_body()).await
        })
    });

    for handle in requests.collect::<Vec<_>>() {
        assert_eq!(handle.await.unwrap(), "ok");
    }
    assert_eq!(provisioner.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_health_reports_tool_readiness() {
    let app = make_app(make_service(ScriptedLlm::new(Vec::new()), CountingProvisioner::new(true)));

    let health = |app: Router| async move {
        let resp = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        serde_json::from_str::<Value>(&body_text(resp.into_body()).await).unwrap()
    };

    let before = health(app.clone()).await;
    assert_eq!(before["status"], "ok");
    assert_eq!(before["tools_ready"], false);

    let resp = app
        .clone()
        .oneshot(chat_request(r#"{"query":"hello"}"#))
        .await
        .unwrap();
    body_text(resp.into_body()).await;

    assert_eq!(health(app).await["tools_ready"], true);
}

fn preflight(origin: &str) -> Request<Body> {
    Request::builder()
        .method(Method::OPTIONS)
        .uri("/chat")
        .header(header::ORIGIN, origin)
        .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
        .header(header::ACCESS_CONTROL_REQUEST_HEADERS, "content-type")
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn test_cors_allows_configured_origin() {
    let app = make_app(make_service(ScriptedLlm::new(Vec::new()), CountingProvisioner::new(true)));

    let resp = app.oneshot(preflight(FRONTEND_ORIGIN)).await.unwrap();
    let headers = resp.headers();
    assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], FRONTEND_ORIGIN);
    assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_CREDENTIALS], "true");
    assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_METHODS], "POST");
    assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_HEADERS], "content-type");
}

#[tokio::test]
async fn test_cors_rejects_unlisted_origin() {
    let app = make_app(make_service(ScriptedLlm::new(Vec::new()), CountingProvisioner::new(true)));

    let resp = app.oneshot(preflight("http://evil.example")).await.unwrap();
    assert!(resp
        .headers()
        .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
        .is_none());
}
