use std::ops::ControlFlow;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use http_body_util::BodyExt;
use olm_gateway::backend::{
    EmbeddedBackend, MockBackend, MockReply, ModelRuntime, RuntimeError, RuntimeOutcome,
    RuntimeToken,
};
use olm_gateway::config::AppConfig;
use olm_gateway::observability::ExchangeLog;
use olm_gateway::protocol::canonical::{GenerationRequest, Usage};
use olm_gateway::routing::dispatch_request;
use olm_gateway::state::AppState;
use olm_gateway::stream::ReasoningMarkers;
use serde_json::{json, Value};

fn weather_mock() -> MockBackend {
    MockBackend::new(vec!["fallback".to_string()], ReasoningMarkers::default())
        .with_reasoning("checking the forecast")
        .with_entry(
            "weather",
            MockReply::ToolCall {
                name: "get_weather".to_string(),
                arguments: r#"{"city":"Paris","unit":"celsius"}"#.to_string(),
            },
        )
        .with_entry("hi", MockReply::Text("Hello, friend.".to_string()))
}

fn build_state_with(config: AppConfig, backend: Arc<dyn olm_gateway::backend::BackendClient>) -> Arc<AppState> {
    Arc::new(AppState::with_parts(config, backend, ExchangeLog::disabled()))
}

fn build_state() -> Arc<AppState> {
    build_state_with(AppConfig::default(), Arc::new(weather_mock()))
}

async fn send(state: &Arc<AppState>, method: &str, path: &str, body: Body) -> Response {
    let request = Request::builder()
        .method(method)
        .uri(path)
        .header("content-type", "application/json")
        .body(body)
        .expect("build request");
    dispatch_request(Arc::clone(state), Arc::<str>::from(""), request)
        .await
        .expect("dispatch")
}

async fn post_json(state: &Arc<AppState>, body: &Value) -> Response {
    send(
        state,
        "POST",
        "/api/v2/chat",
        Body::from(serde_json::to_vec(body).expect("serialize request")),
    )
    .await
}

async fn body_json(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read response body");
    serde_json::from_slice(&bytes).expect("json body")
}

async fn sse_payloads(response: Response) -> Vec<String> {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read response body");
    let text = String::from_utf8(bytes.to_vec()).expect("utf8 body");
    text.split("\n\n")
        .filter(|frame| !frame.is_empty())
        .map(|frame| frame.strip_prefix("data: ").expect("data frame").to_string())
        .collect()
}

fn weather_request(stream: bool) -> Value {
    json!({
        "model": "mock-model",
        "stream": stream,
        "messages": [{"role": "user", "content": "what's the weather in Paris?"}],
        "tools": [{
            "type": "function",
            "function": {
                "name": "get_weather",
                "description": "Current weather for a city",
                "parameters": {"type": "object", "properties": {"city": {"type": "string"}}}
            }
        }],
        "tool_choice": "auto"
    })
}

#[tokio::test]
async fn test_chat_tool_call_non_streaming() {
    let state = build_state();
    let response = post_json(&state, &weather_request(false)).await;
    assert_eq!(response.status(), StatusCode::OK);

    let payload = body_json(response).await;
    assert_eq!(payload["object"], "chat.completion");
    let choice = &payload["choices"][0];
    assert_eq!(choice["finish_reason"], "tool_calls");
    assert!(choice["message"]["content"].is_null());
    let call = &choice["message"]["tool_calls"][0];
    assert_eq!(call["type"], "function");
    assert!(call["id"].as_str().expect("id").starts_with("call_"));
    assert_eq!(call["function"]["name"], "get_weather");
    assert_eq!(
        call["function"]["arguments"],
        r#"{"city":"Paris","unit":"celsius"}"#
    );
    assert!(payload["usage"]["total_tokens"].as_u64().expect("usage") > 0);
}

#[tokio::test]
async fn test_chat_tool_call_streaming() {
    let state = build_state();
    let response = post_json(&state, &weather_request(true)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let payloads = sse_payloads(response).await;
    assert_eq!(payloads.last().map(String::as_str), Some("[DONE]"));

    let chunks: Vec<Value> = payloads[..payloads.len() - 1]
        .iter()
        .map(|p| serde_json::from_str(p).expect("chunk json"))
        .collect();
    assert_eq!(chunks[0]["choices"][0]["delta"]["role"], "assistant");

    let mut arguments = String::new();
    let mut name = None;
    for chunk in &chunks {
        let delta = &chunk["choices"][0]["delta"];
        assert!(delta.get("content").is_none(), "no content during tool call");
        if let Some(calls) = delta["tool_calls"].as_array() {
            for call in calls {
                if let Some(n) = call["function"]["name"].as_str() {
                    name = Some(n.to_string());
                }
                arguments.push_str(call["function"]["arguments"].as_str().expect("arguments"));
            }
        }
    }
    assert_eq!(name.as_deref(), Some("get_weather"));
    assert_eq!(arguments, r#"{"city":"Paris","unit":"celsius"}"#);

    let last = chunks.last().expect("final chunk");
    assert_eq!(last["choices"][0]["finish_reason"], "tool_calls");
    assert_eq!(last["choices"][0]["delta"], json!({}));
}

#[tokio::test]
async fn test_chat_text_reply_with_tools_offered_streams_one_content_chunk() {
    let state = build_state();
    let mut request = weather_request(true);
    request["messages"] = json!([{"role": "user", "content": "hi"}]);
    let payloads = sse_payloads(post_json(&state, &request).await).await;
    assert_eq!(payloads.last().map(String::as_str), Some("[DONE]"));

    let chunks: Vec<Value> = payloads[..payloads.len() - 1]
        .iter()
        .map(|p| serde_json::from_str(p).expect("chunk json"))
        .collect();
    let content: Vec<&str> = chunks
        .iter()
        .filter_map(|chunk| chunk["choices"][0]["delta"]["content"].as_str())
        .collect();
    assert_eq!(content, vec!["Hello, friend."]);
    let last = chunks.last().expect("final chunk");
    assert_eq!(last["choices"][0]["finish_reason"], "stop");
    assert!(last["choices"][0]["delta"].get("content").is_none());

    request["stream"] = json!(false);
    let payload = body_json(post_json(&state, &request).await).await;
    assert_eq!(payload["choices"][0]["message"]["content"], content[0]);
}

#[tokio::test]
async fn test_chat_text_streaming_with_reasoning() {
    let state = build_state();
    let response = post_json(
        &state,
        &json!({
            "model": "mock-model",
            "stream": true,
            "think": true,
            "messages": [{"role": "user", "content": "hi"}]
        }),
    )
    .await;
    let payloads = sse_payloads(response).await;
    assert_eq!(payloads.last().map(String::as_str), Some("[DONE]"));

    let mut content = String::new();
    let mut reasoning = String::new();
    let mut finish = Value::Null;
    for payload in &payloads[..payloads.len() - 1] {
        let chunk: Value = serde_json::from_str(payload).expect("chunk json");
        assert_eq!(chunk["object"], "chat.completion.chunk");
        let choice = &chunk["choices"][0];
        if let Some(text) = choice["delta"]["content"].as_str() {
            content.push_str(text);
        }
        if let Some(text) = choice["delta"]["reasoning_content"].as_str() {
            reasoning.push_str(text);
        }
        if !choice["finish_reason"].is_null() {
            finish = choice["finish_reason"].clone();
        }
    }
    assert_eq!(content, "Hello, friend.");
    assert_eq!(reasoning, "checking the forecast");
    assert_eq!(finish, "stop");
}

#[tokio::test]
async fn test_chat_validation_errors_are_400() {
    let state = build_state();
    let cases = [
        json!({"model": "m", "messages": []}),
        json!({"messages": [{"role": "user", "content": "hi"}]}),
        json!({"model": "m", "messages": [{"role": "robot", "content": "hi"}]}),
        json!({
            "model": "m",
            "messages": [{"role": "user", "content": "hi"}],
            "tools": [{"type": "function", "function": {"name": "get_weather"}}],
            "tool_choice": {"type": "function", "function": {"name": "get_time"}}
        }),
    ];
    for body in &cases {
        let response = post_json(&state, body).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "body: {body}");
        let payload = body_json(response).await;
        assert_eq!(payload["type"], "validation_error");
    }

    let response = send(&state, "POST", "/api/v2/chat", Body::from("{not json")).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unknown_routes_and_methods() {
    let state = build_state();
    let response = send(&state, "GET", "/api/v2/chat", Body::empty()).await;
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    let response = send(&state, "POST", "/api/v9/chat", Body::empty()).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = send(&state, "GET", "/health", Body::empty()).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "ok");

    let response = send(&state, "GET", "/api/v1/models", Body::empty()).await;
    assert_eq!(body_json(response).await["models"][0]["name"], "mock-model");
}

#[tokio::test]
async fn test_oversized_body_is_rejected() {
    let mut config = AppConfig::default();
    config.server.max_body_bytes = 32;
    let state = build_state_with(config, Arc::new(weather_mock()));
    let response = post_json(&state, &weather_request(false)).await;
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

struct ChunkedRuntime(Vec<&'static str>);

impl ModelRuntime for ChunkedRuntime {
    fn name(&self) -> &str {
        "chunked"
    }

    fn generate(
        &self,
        _request: &GenerationRequest,
        emit: &mut dyn FnMut(RuntimeToken) -> ControlFlow<()>,
    ) -> Result<RuntimeOutcome, RuntimeError> {
        for piece in &self.0 {
            if emit(RuntimeToken::Text((*piece).to_string())).is_break() {
                break;
            }
        }
        Ok(RuntimeOutcome {
            done_reason: Some("stop".to_string()),
            usage: Usage {
                prompt_tokens: Some(4),
                completion_tokens: Some(2),
            },
        })
    }
}

#[tokio::test]
async fn test_marker_split_across_chunks_through_embedded_backend() {
    let backend = EmbeddedBackend::new(
        Arc::new(ChunkedRuntime(vec!["Hello <th", "ink>reasoning</think> world"])),
        ReasoningMarkers::default(),
    );
    let state = build_state_with(AppConfig::default(), Arc::new(backend));
    let response = post_json(
        &state,
        &json!({
            "model": "chunked",
            "think": true,
            "messages": [{"role": "user", "content": "go"}]
        }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let payload = body_json(response).await;
    let message = &payload["choices"][0]["message"];
    assert_eq!(message["content"], "Hello  world");
    assert_eq!(message["reasoning_content"], "reasoning");
    assert_eq!(payload["usage"]["prompt_tokens"], 4);
    assert_eq!(payload["usage"]["completion_tokens"], 2);
}

#[tokio::test]
async fn test_stream_holds_permit_until_body_dropped() {
    let mut config = AppConfig::default();
    config.server.concurrent_request_limit = 1;
    let state = build_state_with(config, Arc::new(weather_mock()));

    let response = post_json(
        &state,
        &json!({
            "model": "mock-model",
            "stream": true,
            "messages": [{"role": "user", "content": "hi"}]
        }),
    )
    .await;
    assert_eq!(state.available_backend_permits(), 1);

    let mut body = response.into_body();
    let first = body
        .frame()
        .await
        .expect("first frame")
        .expect("frame ok")
        .into_data()
        .expect("data frame");
    assert!(String::from_utf8_lossy(&first).contains("\"role\":\"assistant\""));
    assert_eq!(state.available_backend_permits(), 0);

    drop(body);
    assert_eq!(state.available_backend_permits(), 1);
}
