use crate::api::types::MessagesRequest;
use crate::llm::ImageCache;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Per-request data handed to each middleware
#[derive(Clone)]
pub struct RequestContext {
    /// Gateway-assigned request id
    pub request_id: String,

    /// Shared image store
    pub images: Arc<ImageCache>,
}

impl RequestContext {
    pub fn new(request_id: impl Into<String>, images: Arc<ImageCache>) -> Self {
        Self {
            request_id: request_id.into(),
            images,
        }
    }
}

/// A transform over an inbound request, run before normalization
#[async_trait]
pub trait RequestMiddleware: Send + Sync {
    /// Name used in the `middleware` config list
    fn name(&self) -> &str;

    /// Rewrite the request in place
    async fn apply(&self, request: &mut MessagesRequest, ctx: &RequestContext) -> Result<()>;
}
