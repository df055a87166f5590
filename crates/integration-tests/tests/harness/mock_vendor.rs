//! Mock vendor backend for integration tests
//!
//! Serves a minimal `OpenAI` chat completions API, a minimal Anthropic
//! Messages API and a static media file. Every chat request is recorded so
//! tests can inspect what the gateway actually sent.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router, routing};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

/// 1x1 transparent PNG
pub const PIXEL_PNG: &[u8] = &[
    0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a, 0x00, 0x00, 0x00, 0x0d, 0x49, 0x48, 0x44, 0x52, 0x00, 0x00, 0x00,
    0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1f, 0x15, 0xc4, 0x89, 0x00, 0x00, 0x00, 0x0d, 0x49,
    0x44, 0x41, 0x54, 0x78, 0x9c, 0x63, 0x00, 0x01, 0x00, 0x00, 0x05, 0x00, 0x01, 0x0d, 0x0a, 0x2d, 0xb4, 0x00, 0x00,
    0x00, 0x00, 0x49, 0x45, 0x4e, 0x44, 0xae, 0x42, 0x60, 0x82,
];

/// One chat request as received by the mock
#[derive(Debug, Clone)]
pub struct Recorded {
    pub path: String,
    pub headers: HeaderMap,
    pub body: Value,
}

impl Recorded {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// Mock vendor that returns predictable responses
pub struct MockVendor {
    addr: SocketAddr,
    shutdown: CancellationToken,
    state: Arc<MockState>,
}

struct MockState {
    requests: Mutex<Vec<Recorded>>,
    /// Number of requests to fail with 503 before succeeding
    fail_count: AtomicU32,
    /// Words streamed, or joined for sync responses
    words: Vec<String>,
    /// Abort OpenAI streams with an in-band error after the first word
    abort_stream: bool,
}

impl MockVendor {
    /// Start the mock server, answering "Hello from mock vendor"
    pub async fn start() -> anyhow::Result<Self> {
        Self::start_inner(0, "Hello from mock vendor", false).await
    }

    /// Start a mock server that fails the first `n` requests with 503
    pub async fn start_failing(n: u32) -> anyhow::Result<Self> {
        Self::start_inner(n, "Hello from mock vendor", false).await
    }

    /// Start a mock server answering with `content`
    pub async fn start_with_response(content: &str) -> anyhow::Result<Self> {
        Self::start_inner(0, content, false).await
    }

    /// Start a mock server whose streams send one word and then an error event
    pub async fn start_with_stream_error() -> anyhow::Result<Self> {
        Self::start_inner(0, "Hello from mock vendor", true).await
    }

    async fn start_inner(fail_count: u32, content: &str, abort_stream: bool) -> anyhow::Result<Self> {
        let state = Arc::new(MockState {
            requests: Mutex::new(Vec::new()),
            fail_count: AtomicU32::new(fail_count),
            words: content.split_whitespace().map(ToOwned::to_owned).collect(),
            abort_stream,
        });

        let app = Router::new()
            .route("/v1/chat/completions", routing::post(handle_openai))
            .route("/v1/messages", routing::post(handle_claude))
            .route("/media/pixel.png", routing::get(handle_media))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let shutdown = CancellationToken::new();
        let shutdown_clone = shutdown.clone();

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    shutdown_clone.cancelled().await;
                })
                .await
                .ok();
        });

        Ok(Self { addr, shutdown, state })
    }

    /// Base URL for credential files, including `/v1`
    pub fn base_url(&self) -> String {
        format!("http://{}/v1", self.addr)
    }

    /// URL of the static PNG
    pub fn media_url(&self) -> String {
        format!("http://{}/media/pixel.png", self.addr)
    }

    /// Chat requests received so far
    pub fn requests(&self) -> Vec<Recorded> {
        self.state.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.state.requests.lock().unwrap().len()
    }

    /// Most recent chat request
    pub fn last_request(&self) -> Recorded {
        self.requests().pop().expect("no request received")
    }
}

impl Drop for MockVendor {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl MockState {
    fn record(&self, path: &str, headers: HeaderMap, body: &Value) {
        self.requests.lock().unwrap().push(Recorded {
            path: path.to_owned(),
            headers,
            body: body.clone(),
        });
    }

    /// Consume one scheduled failure, if any are left
    fn should_fail(&self) -> bool {
        self.fail_count
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
            .is_ok()
    }

    fn content(&self) -> String {
        self.words.join(" ")
    }
}

fn failure() -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({
            "error": {
                "message": "mock vendor intentional failure",
                "type": "server_error"
            }
        })),
    )
        .into_response()
}

fn event_stream(body: String) -> Response {
    (StatusCode::OK, [(header::CONTENT_TYPE, "text/event-stream")], body).into_response()
}

fn wants_stream(body: &Value) -> bool {
    body.get("stream").and_then(Value::as_bool).unwrap_or(false)
}

fn has_tools(body: &Value) -> bool {
    body.get("tools")
        .and_then(Value::as_array)
        .is_some_and(|tools| !tools.is_empty())
}

// -- OpenAI --

async fn handle_openai(State(state): State<Arc<MockState>>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    state.record("/v1/chat/completions", headers, &body);

    if state.should_fail() {
        return failure();
    }

    let model = body["model"].as_str().unwrap_or_default().to_owned();

    if wants_stream(&body) {
        return event_stream(openai_stream(&state, &model, has_tools(&body)));
    }

    let message = if has_tools(&body) {
        json!({
            "role": "assistant",
            "content": null,
            "tool_calls": [{
                "id": "call_test_123",
                "type": "function",
                "function": {"name": "get_weather", "arguments": r#"{"location":"San Francisco"}"#}
            }]
        })
    } else {
        json!({"role": "assistant", "content": state.content()})
    };
    let finish_reason = if has_tools(&body) { "tool_calls" } else { "stop" };

    Json(json!({
        "id": "chatcmpl-test-123",
        "object": "chat.completion",
        "created": 1_700_000_000,
        "model": model,
        "choices": [{"index": 0, "message": message, "finish_reason": finish_reason}],
        "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
    }))
    .into_response()
}

fn openai_stream(state: &MockState, model: &str, tools: bool) -> String {
    let chunk = |choices: Value, usage: Value| {
        let chunk = json!({
            "id": "chatcmpl-test-stream",
            "object": "chat.completion.chunk",
            "created": 1_700_000_000,
            "model": model,
            "choices": choices,
            "usage": usage,
        });
        format!("data: {chunk}\n\n")
    };

    let mut body = chunk(
        json!([{"index": 0, "delta": {"role": "assistant", "content": ""}, "finish_reason": null}]),
        Value::Null,
    );

    if tools {
        body.push_str(&chunk(
            json!([{"index": 0, "delta": {"tool_calls": [{
                "index": 0,
                "id": "call_test_stream",
                "type": "function",
                "function": {"name": "get_weather", "arguments": ""}
            }]}, "finish_reason": null}]),
            Value::Null,
        ));
        body.push_str(&chunk(
            json!([{"index": 0, "delta": {"tool_calls": [{
                "index": 0,
                "function": {"arguments": r#"{"location":"San Francisco"}"#}
            }]}, "finish_reason": null}]),
            Value::Null,
        ));
        body.push_str(&chunk(
            json!([{"index": 0, "delta": {}, "finish_reason": "tool_calls"}]),
            Value::Null,
        ));
    } else {
        for word in &state.words {
            body.push_str(&chunk(
                json!([{"index": 0, "delta": {"content": format!("{word} ")}, "finish_reason": null}]),
                Value::Null,
            ));
            if state.abort_stream {
                let error = json!({"error": {"message": "upstream overloaded", "type": "server_error"}});
                body.push_str(&format!("data: {error}\n\n"));
                return body;
            }
        }
        body.push_str(&chunk(
            json!([{"index": 0, "delta": {}, "finish_reason": "stop"}]),
            Value::Null,
        ));
    }

    body.push_str(&chunk(
        json!([]),
        json!({"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}),
    ));
    body.push_str("data: [DONE]\n\n");
    body
}

// -- Anthropic --

async fn handle_claude(State(state): State<Arc<MockState>>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    state.record("/v1/messages", headers, &body);

    if state.should_fail() {
        return failure();
    }

    let model = body["model"].as_str().unwrap_or_default().to_owned();

    if wants_stream(&body) {
        return event_stream(claude_stream(&state));
    }

    Json(json!({
        "id": "msg_test_123",
        "type": "message",
        "role": "assistant",
        "model": model,
        "content": [
            {"type": "thinking", "thinking": "Considering the greeting."},
            {"type": "text", "text": state.content()}
        ],
        "stop_reason": "end_turn",
        "usage": {"input_tokens": 12, "output_tokens": 6}
    }))
    .into_response()
}

fn claude_stream(state: &MockState) -> String {
    let event = |name: &str, data: Value| format!("event: {name}\ndata: {data}\n\n");

    let mut body = event(
        "message_start",
        json!({"type": "message_start", "message": {"id": "msg_test_stream", "usage": {"input_tokens": 12, "output_tokens": 0}}}),
    );
    body.push_str(&event(
        "content_block_start",
        json!({"type": "content_block_start", "index": 0, "content_block": {"type": "text", "text": ""}}),
    ));
    body.push_str(&event("ping", json!({"type": "ping"})));

    for word in &state.words {
        body.push_str(&event(
            "content_block_delta",
            json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": format!("{word} ")}}),
        ));
    }

    body.push_str(&event(
        "content_block_stop",
        json!({"type": "content_block_stop", "index": 0}),
    ));
    body.push_str(&event(
        "message_delta",
        json!({"type": "message_delta", "delta": {"stop_reason": "end_turn"}, "usage": {"output_tokens": 6}}),
    ));
    body.push_str(&event("message_stop", json!({"type": "message_stop"})));
    body
}

async fn handle_media() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "image/png")], PIXEL_PNG)
}
