//! Request middleware.
//!
//! Middleware is registered statically and selected by name from the
//! `middleware` config list, which also fixes the order it runs in.

/// Middleware trait and per-request context
pub mod trait_;

/// Built-in middleware
pub mod builtin;

pub use builtin::{DropEmptyTextMiddleware, ImageCacheMiddleware};
pub use trait_::{RequestContext, RequestMiddleware};

use crate::api::types::MessagesRequest;
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{debug, info};

/// Names accepted in the `middleware` config list
pub const BUILTINS: &[&str] = &["image-cache", "drop-empty-text"];

pub fn is_builtin(name: &str) -> bool {
    BUILTINS.contains(&name)
}

/// Look up a built-in middleware by name
pub fn builtin(name: &str) -> Option<Arc<dyn RequestMiddleware>> {
    match name {
        "image-cache" => Some(Arc::new(ImageCacheMiddleware)),
        "drop-empty-text" => Some(Arc::new(DropEmptyTextMiddleware)),
        _ => None,
    }
}

/// Ordered list of middleware applied to every request
#[derive(Clone, Default)]
pub struct Pipeline {
    stages: Vec<Arc<dyn RequestMiddleware>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from configured names. An unknown name is an error.
    pub fn from_names(names: &[String]) -> Result<Self> {
        let mut pipeline = Self::new();
        for name in names {
            let stage = builtin(name).with_context(|| format!("Unknown middleware: {}", name))?;
            pipeline.push(stage);
        }

        if !pipeline.is_empty() {
            info!("✅ Request middleware: {}", pipeline.names().join(" -> "));
        }
        Ok(pipeline)
    }

    pub fn push(&mut self, stage: Arc<dyn RequestMiddleware>) {
        self.stages.push(stage);
    }

    pub fn names(&self) -> Vec<String> {
        self.stages.iter().map(|s| s.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Run every stage in order. The first failing stage aborts the request.
    pub async fn apply(&self, request: &mut MessagesRequest, ctx: &RequestContext) -> Result<()> {
        for stage in &self.stages {
            debug!("[{}] middleware {}", ctx.request_id, stage.name());
            stage
                .apply(request, ctx)
                .await
                .with_context(|| format!("Middleware {} failed", stage.name()))?;
        }
        Ok(())
    }
}
