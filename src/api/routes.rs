use crate::api::types::MessagesRequest;
use crate::api::{ApiError, CountTokensResponse, HealthResponse};
use crate::core::{EventStream, Gateway, GatewayResponse};
use crate::llm::ImagePayload;
use axum::body::{Body, Bytes};
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::StreamExt;
use std::convert::Infallible;
use std::sync::Arc;

/// Health check handler
pub async fn health() -> (StatusCode, Json<HealthResponse>) {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            gateway: "switchyard".to_string(),
        }),
    )
}

/// `POST /v1/messages`
pub async fn messages(State(gateway): State<Arc<Gateway>>, body: Bytes) -> Result<Response, ApiError> {
    let request: MessagesRequest = serde_json::from_slice(&body)?;

    match gateway.handle(request).await? {
        GatewayResponse::Message(message) => Ok(Json(message).into_response()),
        GatewayResponse::Stream(events) => Ok(sse_response(events)),
    }
}

/// `POST /v1/messages/count_tokens`
pub async fn count_tokens(
    State(gateway): State<Arc<Gateway>>,
    body: Bytes,
) -> Result<Json<CountTokensResponse>, ApiError> {
    let request: MessagesRequest = serde_json::from_slice(&body)?;
    Ok(Json(CountTokensResponse {
        input_tokens: gateway.count_tokens(&request),
    }))
}

/// `GET /v1/images/:key`
pub async fn get_image(
    State(gateway): State<Arc<Gateway>>,
    Path(key): Path<String>,
) -> Result<Json<ImagePayload>, ApiError> {
    gateway
        .images()
        .get_image(&key)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Image not found: {}", key)))
}

/// Encode stream events onto the wire as they arrive.
fn sse_response(events: EventStream) -> Response {
    let body = events.map(|event| Ok::<_, Infallible>(event.to_sse().encode()));

    (
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(body),
    )
        .into_response()
}
