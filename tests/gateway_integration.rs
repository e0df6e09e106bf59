use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{json, Value};
use std::sync::Arc;
use switchyard::api::app;
use switchyard::config::parse_config;
use switchyard::llm::ImagePayload;
use switchyard::sse::{SseData, SseParser};
use switchyard::Gateway;
use tower::ServiceExt;

const BODY_LIMIT: usize = 1024 * 1024;

fn gateway(backend_url: &str, default_route: &str) -> Arc<Gateway> {
    let yaml = format!(
        r#"
providers:
  - name: mock
    api_base_url: {backend_url}/v1
    api_key: sk-mock
    models: [mock-model]
router:
  default: {default_route}
"#
    );
    let config = parse_config(&yaml).expect("valid test config");
    Arc::new(Gateway::new(&config).expect("gateway"))
}

fn post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn body_bytes(response: axum::response::Response) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

fn messages_body(stream: bool) -> Value {
    json!({
        "model": "claude-sonnet-4",
        "max_tokens": 256,
        "system": "be brief",
        "messages": [{"role": "user", "content": "hello"}],
        "tools": [
            {"name": "lookup", "description": "Look something up", "input_schema": {"type": "object"}},
            {"name": "StickerRequest", "input_schema": {}}
        ],
        "stream": stream
    })
}

#[tokio::test]
async fn test_non_streaming_round_trip() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/v1/chat/completions")
        .match_header("authorization", "Bearer sk-mock")
        .match_body(mockito::Matcher::PartialJsonString(
            r#"{"model":"mock-model","stream":false}"#.to_string(),
        ))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "id": "cmpl-1",
                "model": "mock-model",
                "choices": [{"message": {"content": "hi there"}, "finish_reason": "stop"}],
                "usage": {"prompt_tokens": 9, "completion_tokens": 3}
            })
            .to_string(),
        )
        .create_async()
        .await;

    let app = app(gateway(&server.url(), "mock,mock-model"), BODY_LIMIT);
    let response = app.oneshot(post("/v1/messages", messages_body(false))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body: Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(body["type"], "message");
    assert_eq!(body["role"], "assistant");
    assert_eq!(body["model"], "claude-sonnet-4");
    assert_eq!(body["content"], json!([{"type": "text", "text": "hi there"}]));
    assert_eq!(body["stop_reason"], "end_turn");
    assert_eq!(body["stop_sequence"], Value::Null);
    assert_eq!(body["usage"], json!({"input_tokens": 9, "output_tokens": 3}));

    mock.assert_async().await;
}

#[tokio::test]
async fn test_streaming_round_trip() {
    let mut server = mockito::Server::new_async().await;
    let sse = concat!(
        "data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"id\":\"call_1\",\"function\":{\"name\":\"f\",\"arguments\":\"{\\\"x\\\":1}\"}}]}}]}\n\n",
        "data: [DONE]\n\n",
    );
    let _mock = server
        .mock("POST", "/v1/chat/completions")
        .match_body(mockito::Matcher::PartialJsonString(r#"{"stream":true}"#.to_string()))
        .with_status(200)
        .with_header("content-type", "text/event-stream")
        .with_body(sse)
        .create_async()
        .await;

    let app = app(gateway(&server.url(), "mock,mock-model"), BODY_LIMIT);
    let response = app.oneshot(post("/v1/messages", messages_body(true))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "text/event-stream"
    );

    let mut parser = SseParser::new();
    let events = parser.feed(&body_bytes(response).await);
    let names: Vec<_> = events.iter().map(|e| e.event.clone().unwrap()).collect();
    assert_eq!(
        names,
        vec![
            "message_start",
            "content_block_start",
            "content_block_delta",
            "content_block_stop",
            "content_block_start",
            "content_block_delta",
            "content_block_stop",
            "message_delta",
            "message_stop",
        ]
    );

    let SseData::Json(tool_start) = &events[4].data else {
        panic!("expected JSON data");
    };
    assert_eq!(tool_start["index"], 1);
    assert_eq!(tool_start["content_block"]["type"], "tool_use");
    assert_eq!(tool_start["content_block"]["id"], "call_1");

    let SseData::Json(delta) = &events[7].data else {
        panic!("expected JSON data");
    };
    assert_eq!(delta["delta"]["stop_reason"], "tool_use");
    assert_eq!(delta["delta"]["content"][1]["input"], json!({"x": 1}));
}

#[tokio::test]
async fn test_streaming_backend_failure_is_in_band() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("POST", "/v1/chat/completions")
        .with_status(503)
        .with_body("upstream overloaded")
        .create_async()
        .await;

    let app = app(gateway(&server.url(), "mock,mock-model"), BODY_LIMIT);
    let response = app.oneshot(post("/v1/messages", messages_body(true))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let events = SseParser::new().feed(&body_bytes(response).await);
    let last = events.last().unwrap();
    assert_eq!(last.event.as_deref(), Some("message_stop"));

    let text_delta = events
        .iter()
        .find(|e| e.event.as_deref() == Some("content_block_delta"))
        .unwrap();
    let text = text_delta.data.as_json().unwrap()["delta"]["text"].as_str().unwrap().to_string();
    assert!(text.starts_with("Error: "));
    assert!(text.contains("upstream overloaded"));
}

#[tokio::test]
async fn test_non_streaming_backend_failure_is_bad_gateway() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("POST", "/v1/chat/completions")
        .with_status(500)
        .with_body("boom")
        .create_async()
        .await;

    let app = app(gateway(&server.url(), "mock,mock-model"), BODY_LIMIT);
    let response = app.oneshot(post("/v1/messages", messages_body(false))).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

    let body: Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(body["type"], "error");
    assert_eq!(body["error"]["type"], "api_error");
}

#[tokio::test]
async fn test_unknown_provider_never_reaches_backend() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/v1/chat/completions")
        .expect(0)
        .create_async()
        .await;

    let app = app(gateway(&server.url(), "ghost,some-model"), BODY_LIMIT);
    let response = app.oneshot(post("/v1/messages", messages_body(true))).await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let body: Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert!(body["error"]["message"].as_str().unwrap().contains("ghost"));
    mock.assert_async().await;
}

#[tokio::test]
async fn test_invalid_body_is_rejected() {
    let app = app(gateway("http://127.0.0.1:9", "mock,mock-model"), BODY_LIMIT);
    let response = app
        .oneshot(post("/v1/messages", json!({"messages": "nope"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body: Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(body["error"]["type"], "invalid_request_error");
}

#[tokio::test]
async fn test_health_and_count_tokens() {
    let app = app(gateway("http://127.0.0.1:9", "mock,mock-model"), BODY_LIMIT);

    let response = app.clone().oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["gateway"], "switchyard");

    let response = app
        .oneshot(post("/v1/messages/count_tokens", messages_body(false)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert!(body["input_tokens"].as_u64().unwrap() > 0);
}

#[tokio::test]
async fn test_cached_images_are_served() {
    let gateway = gateway("http://127.0.0.1:9", "mock,mock-model");
    gateway.images().store_image(
        "req_Image#1",
        ImagePayload {
            media_type: "image/png".to_string(),
            data: "AAAA".to_string(),
        },
    );
    let app = app(gateway, BODY_LIMIT);

    let response = app.clone().oneshot(get("/v1/images/req_Image%231")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(body, json!({"media_type": "image/png", "data": "AAAA"}));

    let response = app.oneshot(get("/v1/images/missing")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

/// Records every request and answers with a fixed completion.
#[derive(Default)]
struct RecordingBackend {
    requests: std::sync::Mutex<Vec<switchyard::llm::ChatRequest>>,
}

#[async_trait::async_trait]
impl switchyard::llm::ChatBackend for RecordingBackend {
    async fn complete(
        &self,
        _target: &switchyard::llm::BackendTarget,
        request: switchyard::llm::ChatRequest,
    ) -> Result<switchyard::llm::ChatCompletion, switchyard::llm::LlmError> {
        self.requests.lock().unwrap().push(request);
        Ok(serde_json::from_value(json!({
            "id": "cmpl-img",
            "model": "mock-model",
            "choices": [{"message": {"content": "a cat"}, "finish_reason": "stop"}]
        }))
        .unwrap())
    }

    async fn stream(
        &self,
        _target: &switchyard::llm::BackendTarget,
        _request: switchyard::llm::ChatRequest,
    ) -> Result<switchyard::llm::ChunkStream, switchyard::llm::LlmError> {
        Err(switchyard::llm::LlmError::Stream("not used".to_string()))
    }
}

#[tokio::test]
async fn test_image_placeholder_key_resolves_through_images_endpoint() {
    let config = parse_config(
        r#"
providers:
  - name: mock
    api_base_url: http://127.0.0.1:9/v1
    models: [mock-model]
router:
  default: mock,mock-model
middleware: [image-cache]
"#,
    )
    .unwrap();
    let backend = Arc::new(RecordingBackend::default());
    let gateway = Arc::new(Gateway::with_backend(&config, backend.clone()).unwrap());
    let app = app(gateway, BODY_LIMIT);

    let body = json!({
        "model": "claude-sonnet-4",
        "messages": [{"role": "user", "content": [
            {"type": "text", "text": "what is this?"},
            {"type": "image", "source": {"type": "base64", "media_type": "image/jpeg", "data": "QUJD"}}
        ]}]
    });
    let response = app.clone().oneshot(post("/v1/messages", body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let sent = serde_json::to_string(&backend.requests.lock().unwrap()[0]).unwrap();
    let placeholder = regex::Regex::new(r"\[Image #1: ([^\]]+)\]").unwrap();
    let key = placeholder
        .captures(&sent)
        .expect("placeholder with cache key sent to the backend")[1]
        .to_string();
    assert!(!sent.contains("QUJD"));

    let uri = format!("/v1/images/{}", key.replace('#', "%23"));
    let response = app.oneshot(get(&uri)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let image: Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(image, json!({"media_type": "image/jpeg", "data": "QUJD"}));
}
