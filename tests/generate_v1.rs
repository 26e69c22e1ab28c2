use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use olm_gateway::api::normalize::legacy_as_chat;
use olm_gateway::backend::{MockBackend, MockReply};
use olm_gateway::config::AppConfig;
use olm_gateway::observability::{ExchangeLog, ExchangeRecord};
use olm_gateway::protocol::legacy::GenerateRequest;
use olm_gateway::routing::dispatch_request;
use olm_gateway::state::AppState;
use olm_gateway::stream::ReasoningMarkers;
use serde_json::{json, Value};
use tokio::sync::mpsc;

fn mock_backend() -> MockBackend {
    MockBackend::new(
        vec!["default zero".to_string(), "default one".to_string()],
        ReasoningMarkers::default(),
    )
    .with_reasoning("pondering deeply")
    .with_entry("hello", MockReply::Text("Hi there!".to_string()))
}

fn build_state(mock: MockBackend) -> (Arc<AppState>, mpsc::Receiver<ExchangeRecord>) {
    let (exchange_log, records) = ExchangeLog::channel(64);
    let state = AppState::with_parts(AppConfig::default(), Arc::new(mock), exchange_log);
    (Arc::new(state), records)
}

async fn post(state: &Arc<AppState>, path: &str, body: &Value) -> Response {
    let request = Request::builder()
        .method("POST")
        .uri(path)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(body).expect("serialize request")))
        .expect("build request");
    dispatch_request(Arc::clone(state), Arc::<str>::from(""), request)
        .await
        .expect("dispatch")
}

async fn body_string(response: Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read response body");
    String::from_utf8(bytes.to_vec()).expect("utf8 body")
}

fn sse_payloads(body: &str) -> Vec<String> {
    body.split("\n\n")
        .filter(|frame| !frame.is_empty())
        .map(|frame| {
            frame
                .strip_prefix("data: ")
                .expect("data frame")
                .to_string()
        })
        .collect()
}

#[tokio::test]
async fn test_generate_non_streaming_splits_reasoning() {
    let (state, mut records) = build_state(mock_backend());
    let response = post(
        &state,
        "/api/v1/generate",
        &json!({"prompt": "hello", "model_name": "mock-model", "think": true}),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let payload: Value = serde_json::from_str(&body_string(response).await).expect("json");
    assert_eq!(payload["think"], "pondering deeply");
    assert_eq!(payload["content"], "Hi there!");
    assert_eq!(payload["response"], "<think>pondering deeply</think>Hi there!");

    let record = records.recv().await.expect("exchange record");
    assert_eq!(record.status, 200);
    assert_eq!(record.path, "/api/v1/generate");
    assert_eq!(record.prompt, "hello");
    assert_eq!(record.generated_response.as_deref(), Some("Hi there!"));
    assert_eq!(record.error_details, None);
}

#[tokio::test]
async fn test_generate_hides_reasoning_unless_requested() {
    let (state, _records) = build_state(mock_backend());
    let response = post(
        &state,
        "/api/v1/generate",
        &json!({"prompt": "hello", "model_name": "mock-model"}),
    )
    .await;
    let payload: Value = serde_json::from_str(&body_string(response).await).expect("json");
    assert_eq!(payload["think"], "");
    assert_eq!(payload["content"], "Hi there!");
    assert_eq!(payload["response"], "Hi there!");
}

#[tokio::test]
async fn test_generate_streaming_events_match_batch() {
    let (state, _records) = build_state(mock_backend());
    let request = json!({"prompt": "hello", "model_name": "mock-model", "think": true});

    let batch: Value = serde_json::from_str(
        &body_string(post(&state, "/api/v1/generate", &request).await).await,
    )
    .expect("json");

    let mut streaming_request = request.clone();
    streaming_request["stream"] = json!(true);
    let response = post(&state, "/api/v1/generate", &streaming_request).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("content-type").expect("content type"),
        "text/event-stream"
    );

    let payloads = sse_payloads(&body_string(response).await);
    assert_eq!(payloads.last().map(String::as_str), Some("{}"));

    let mut think = String::new();
    let mut content = String::new();
    let mut raw = String::new();
    for payload in &payloads[..payloads.len() - 1] {
        let event: Value = serde_json::from_str(payload).expect("event json");
        think.push_str(event["think"].as_str().expect("think"));
        content.push_str(event["content"].as_str().expect("content"));
        raw.push_str(event["response"].as_str().expect("response"));
    }
    assert!(payloads.len() > 3, "expected token-level events");
    assert_eq!(think, batch["think"]);
    assert_eq!(content, batch["content"]);
    assert_eq!(raw, batch["response"]);
}

#[tokio::test]
async fn test_generate_falls_back_to_default_cycle() {
    let (state, _records) = build_state(mock_backend());
    let mut contents = Vec::new();
    for prompt in ["unmatched one", "unmatched two", "unmatched three"] {
        let response = post(
            &state,
            "/api/v1/generate",
            &json!({"prompt": prompt, "model_name": "mock-model"}),
        )
        .await;
        let payload: Value = serde_json::from_str(&body_string(response).await).expect("json");
        contents.push(payload["content"].as_str().expect("content").to_string());
    }
    assert_eq!(contents, vec!["default zero", "default one", "default zero"]);
}

#[tokio::test]
async fn test_generate_missing_prompt_is_400() {
    let (state, mut records) = build_state(mock_backend());
    let response = post(&state, "/api/v1/generate", &json!({"model_name": "mock-model"})).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let payload: Value = serde_json::from_str(&body_string(response).await).expect("json");
    assert_eq!(payload["type"], "validation_error");
    assert!(payload["detail"].as_str().expect("detail").contains("prompt"));

    let record = records.recv().await.expect("exchange record");
    assert_eq!(record.status, 400);
    assert!(record.error_details.is_some());
}

#[tokio::test]
async fn test_generate_missing_model_is_400() {
    let (state, _records) = build_state(mock_backend());
    let response = post(&state, "/api/v1/generate", &json!({"prompt": "hello"})).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_legacy_round_trip_through_chat_path() {
    let (state, _records) = build_state(mock_backend());
    let legacy = GenerateRequest {
        prompt: Some("hello".to_string()),
        model_name: Some("mock-model".to_string()),
        stream: false,
        think: Some(true),
    };

    let direct: Value = serde_json::from_str(
        &body_string(post(&state, "/api/v1/generate", &json!(legacy)).await).await,
    )
    .expect("json");

    let chat = legacy_as_chat(&legacy);
    let chat_body = json!({
        "model": chat.model,
        "messages": [{"role": chat.messages[0].role, "content": "hello"}],
        "stream": chat.stream,
        "think": chat.think,
    });
    let via_chat: Value = serde_json::from_str(
        &body_string(post(&state, "/api/v2/chat", &chat_body).await).await,
    )
    .expect("json");

    assert_eq!(
        via_chat["choices"][0]["message"]["content"],
        direct["content"]
    );
    assert_eq!(
        via_chat["choices"][0]["message"]["reasoning_content"],
        direct["think"]
    );
}
