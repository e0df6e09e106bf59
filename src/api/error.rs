use crate::core::GatewayError;
use crate::llm::RoutingError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// API error types
#[derive(Debug)]
pub enum ApiError {
    /// Bad request (400)
    BadRequest(String),

    /// Not found (404)
    NotFound(String),

    /// Backend failed or rejected the call (502)
    BadGateway(String),

    /// Internal server error (500)
    InternalError(String),
}

impl ApiError {
    /// Get HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadGateway(_) => StatusCode::BAD_GATEWAY,
            Self::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Error `type` in the Messages API error body
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "invalid_request_error",
            Self::NotFound(_) => "not_found_error",
            Self::BadGateway(_) | Self::InternalError(_) => "api_error",
        }
    }

    /// Get error message
    pub fn message(&self) -> &str {
        match self {
            Self::BadRequest(msg)
            | Self::NotFound(msg)
            | Self::BadGateway(msg)
            | Self::InternalError(msg) => msg,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "type": "error",
            "error": {
                "type": self.error_kind(),
                "message": self.message(),
            }
        });

        (self.status_code(), axum::Json(body)).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        tracing::error!("Internal error: {:?}", err);
        Self::InternalError("Internal server error".to_string())
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        tracing::warn!("JSON error: {}", err);
        Self::BadRequest(format!("Invalid request body: {}", err))
    }
}

impl From<RoutingError> for ApiError {
    fn from(err: RoutingError) -> Self {
        tracing::error!("Routing failed: {}", err);
        Self::InternalError(err.to_string())
    }
}

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Routing(e) => e.into(),
            GatewayError::Backend(e) => {
                tracing::error!("Backend call failed: {}", e);
                Self::BadGateway(e.to_string())
            }
            GatewayError::Internal(e) => e.into(),
        }
    }
}
