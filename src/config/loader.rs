use super::Config;
use anyhow::{Context, Result};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_config(&contents).with_context(|| format!("Invalid config file: {}", path.display()))
}

/// Parse, substitute and validate a YAML document.
pub fn parse_config(contents: &str) -> Result<Config> {
    let config: Config = serde_yaml::from_str(contents).context("Failed to parse config")?;

    // Perform environment variable substitution
    let config = substitute_env_vars(config);

    validate_config(&config)?;

    Ok(config)
}

/// `${NAME}` becomes the value of `NAME`, or no key when it is unset.
fn substitute(value: Option<String>) -> Option<String> {
    match value {
        Some(raw) if raw.starts_with("${") && raw.ends_with('}') && raw.len() > 3 => {
            let var_name = &raw[2..raw.len() - 1];
            let resolved = std::env::var(var_name).ok();
            if resolved.is_none() {
                tracing::warn!("Environment variable {} is not set", var_name);
            }
            resolved
        }
        other => other,
    }
}

fn substitute_env_vars(mut config: Config) -> Config {
    for provider in &mut config.providers {
        provider.api_key = substitute(provider.api_key.take());
    }

    let agents = &mut config.agents;
    for role in [&mut agents.classifier, &mut agents.coder, &mut agents.reasoner] {
        if let Some(backend) = role.as_mut() {
            backend.api_key = substitute(backend.api_key.take());
        }
    }

    config
}

fn validate_config(config: &Config) -> Result<()> {
    if config.providers.is_empty() {
        anyhow::bail!("At least one provider must be configured");
    }

    let mut seen = HashSet::new();
    for provider in &config.providers {
        if provider.name.trim().is_empty() {
            anyhow::bail!("Provider name must not be empty");
        }
        if provider.name.contains(',') {
            anyhow::bail!("Provider name must not contain ',': {}", provider.name);
        }
        if !seen.insert(provider.name.as_str()) {
            anyhow::bail!("Duplicate provider: {}", provider.name);
        }
        if provider.api_base_url.trim().is_empty() {
            anyhow::bail!("Provider {} has no api_base_url", provider.name);
        }
    }

    if config.router.default.is_none() {
        tracing::warn!("router.default is not set; requests that match no rule will fail");
    }

    let agents = &config.agents;
    if agents.max_depth == 0 {
        anyhow::bail!("agents.maxDepth must be at least 1");
    }
    if agents.enabled && agents.classifier.is_none() {
        anyhow::bail!("agents are enabled but no classifier backend is configured");
    }

    for name in &config.middleware {
        if !crate::plugins::is_builtin(name) {
            anyhow::bail!("Unknown middleware: {}", name);
        }
    }

    let cache = &config.cache;
    if cache.image_capacity == 0 || cache.usage_capacity == 0 {
        anyhow::bail!("Cache capacities must be greater than zero");
    }

    let valid_formats = ["pretty", "compact", "json"];
    if !valid_formats.contains(&config.logging.format.as_str()) {
        anyhow::bail!("Invalid log format: {}", config.logging.format);
    }

    Ok(())
}
