pub mod agents;
pub mod api;
pub mod config;
pub mod core;
pub mod llm;
pub mod plugins;
pub mod sse;
pub mod translate;

pub use crate::config::Config;
pub use crate::core::Gateway;

use anyhow::Result;
use std::sync::Arc;

pub async fn run(config: Config) -> Result<()> {
    tracing::info!("Starting Switchyard gateway...");

    for provider in &config.providers {
        tracing::info!(
            "Provider {} at {} ({} models)",
            provider.name,
            provider.api_base_url,
            provider.models.len()
        );
    }

    let gateway = Arc::new(Gateway::new(&config)?);
    if config.agents.enabled {
        tracing::info!("✅ Agent dispatch enabled (max depth {})", config.agents.max_depth);
    }

    let server = api::GatewayServer::new(gateway, config.gateway.host.clone(), config.gateway.port)
        .with_body_limit_mb(config.gateway.body_limit_mb);

    tracing::info!("Switchyard gateway running");
    server.start().await
}
