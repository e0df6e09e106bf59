pub mod error;
pub mod response;
pub mod routes;
pub mod types;

use crate::core::Gateway;
use anyhow::{Context, Result};
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router as AxumRouter;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

pub use error::ApiError;
pub use response::*;

/// HTTP front end for the gateway
pub struct GatewayServer {
    gateway: Arc<Gateway>,
    host: String,
    port: u16,
    body_limit: usize,
}

impl GatewayServer {
    pub fn new(gateway: Arc<Gateway>, host: String, port: u16) -> Self {
        Self {
            gateway,
            host,
            port,
            body_limit: 50 * 1024 * 1024,
        }
    }

    /// Set the request body limit in megabytes
    pub fn with_body_limit_mb(mut self, mb: usize) -> Self {
        self.body_limit = mb * 1024 * 1024;
        self
    }

    /// Build Axum router with all endpoints
    pub fn build_routes(&self) -> AxumRouter {
        app(self.gateway.clone(), self.body_limit)
    }

    /// Start the server
    pub async fn start(&self) -> Result<()> {
        let app = self.build_routes();
        let addr = format!("{}:{}", self.host, self.port);

        info!(
            "Starting gateway on {} (Health: /health, Messages: /v1/messages)",
            addr
        );

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .context("Failed to bind server")?;

        axum::serve(listener, app).await.context("Server error")?;

        Ok(())
    }
}

/// Routes of the gateway, without a listener
pub fn app(gateway: Arc<Gateway>, body_limit: usize) -> AxumRouter {
    AxumRouter::new()
        .route("/health", get(routes::health))
        .route("/v1/messages", post(routes::messages))
        .route("/v1/messages/count_tokens", post(routes::count_tokens))
        .route("/v1/images/:key", get(routes::get_image))
        .with_state(gateway)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(axum::middleware::from_fn(logging_middleware))
        .layer(TraceLayer::new_for_http())
}

/// Logging middleware
async fn logging_middleware(
    request: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let method = request.method().clone();
    let uri = request.uri().clone();

    let response = next.run(request).await;

    let status = response.status();
    tracing::info!("{} {} → {}", method, uri, status);

    response
}
