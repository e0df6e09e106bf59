use crate::api::types::Usage;
use crate::config::{ProviderConfig, RouterConfig};
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Above this estimate a session that was already long stays on the long-context backend
const LONG_SESSION_FLOOR: usize = 20_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RouteReason {
    ExplicitOverride,
    LongContext,
    BackgroundModel,
    ThinkingMode,
    Default,
}

impl fmt::Display for RouteReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RouteReason::ExplicitOverride => "explicit-override",
            RouteReason::LongContext => "long-context",
            RouteReason::BackgroundModel => "background-model",
            RouteReason::ThinkingMode => "thinking-mode",
            RouteReason::Default => "default",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteDecision {
    pub provider: String,
    pub model: String,
    pub reason: RouteReason,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RoutingError {
    #[error("no default route is configured")]
    MissingDefault,

    #[error("route target `{0}` is not a model name or `provider,model` pair")]
    MalformedTarget(String),

    #[error("provider `{0}` is not configured")]
    UnknownProvider(String),
}

/// What the router looks at for one request
#[derive(Debug, Clone, Copy)]
pub struct RouteInput<'a> {
    pub model: &'a str,
    pub token_count: usize,
    pub thinking: bool,
    /// Usage last reported for this request's session, if known
    pub last_usage: Option<Usage>,
}

/// Picks the backend for a request.
///
/// Pure: the same input and configuration always give the same decision.
#[derive(Debug, Clone)]
pub struct ModelRouter {
    routes: RouterConfig,
    providers: Vec<ProviderConfig>,
}

impl ModelRouter {
    pub fn new(routes: &RouterConfig, providers: &[ProviderConfig]) -> Self {
        Self {
            routes: routes.clone(),
            providers: providers.to_vec(),
        }
    }

    /// Route a request. The first matching rule wins; a matched rule with no
    /// usable target falls back to the default route.
    pub fn route(&self, input: &RouteInput<'_>) -> Result<RouteDecision, RoutingError> {
        if input.model.contains(',') {
            match split_pair(input.model) {
                Some((provider, model)) => {
                    return Ok(RouteDecision {
                        provider,
                        model,
                        reason: RouteReason::ExplicitOverride,
                    });
                }
                None => tracing::warn!("Ignoring malformed model override '{}'", input.model),
            }
        }

        let rule = if self.is_long_context(input) {
            Some((RouteReason::LongContext, self.routes.long_context.as_deref()))
        } else if self.is_background_model(input.model) {
            Some((RouteReason::BackgroundModel, self.routes.background.as_deref()))
        } else if input.thinking {
            Some((RouteReason::ThinkingMode, self.routes.think.as_deref()))
        } else {
            None
        };

        if let Some((reason, target)) = rule {
            match target.and_then(|t| self.resolve(t)) {
                Some((provider, model)) => {
                    tracing::debug!("Routing to {},{} ({})", provider, model, reason);
                    return Ok(RouteDecision {
                        provider,
                        model,
                        reason,
                    });
                }
                None => tracing::warn!("No usable route for {}, falling back to default", reason),
            }
        }

        let target = self
            .routes
            .default
            .as_deref()
            .ok_or(RoutingError::MissingDefault)?;
        let (provider, model) = self
            .resolve(target)
            .ok_or_else(|| RoutingError::MalformedTarget(target.to_string()))?;

        tracing::debug!("Routing to default {},{}", provider, model);
        Ok(RouteDecision {
            provider,
            model,
            reason: RouteReason::Default,
        })
    }

    /// Provider configuration for a decision
    pub fn provider(&self, name: &str) -> Result<&ProviderConfig, RoutingError> {
        self.providers
            .iter()
            .find(|p| p.name == name)
            .ok_or_else(|| RoutingError::UnknownProvider(name.to_string()))
    }

    fn is_long_context(&self, input: &RouteInput<'_>) -> bool {
        let threshold = self.routes.long_context_threshold;
        if input.token_count > threshold {
            return true;
        }

        input
            .last_usage
            .map(|usage| usage.input_tokens as usize > threshold && input.token_count > LONG_SESSION_FLOOR)
            .unwrap_or(false)
    }

    fn is_background_model(&self, model: &str) -> bool {
        self.routes
            .background_model_prefixes
            .iter()
            .any(|prefix| !prefix.is_empty() && model.starts_with(prefix.as_str()))
    }

    /// Resolve a configured target to `(provider, model)`.
    ///
    /// A bare model name goes to the first provider that lists it, otherwise
    /// to the first configured provider.
    fn resolve(&self, target: &str) -> Option<(String, String)> {
        let target = target.trim();
        if target.contains(',') {
            return split_pair(target);
        }
        if target.is_empty() {
            return None;
        }

        let provider = self
            .providers
            .iter()
            .find(|p| p.models.iter().any(|m| m == target))
            .or_else(|| self.providers.first())?;

        Some((provider.name.clone(), target.to_string()))
    }
}

fn split_pair(value: &str) -> Option<(String, String)> {
    let (provider, model) = value.split_once(',')?;
    let (provider, model) = (provider.trim(), model.trim());
    if provider.is_empty() || model.is_empty() {
        return None;
    }
    Some((provider.to_string(), model.to_string()))
}
