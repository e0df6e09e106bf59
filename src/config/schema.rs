use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
    #[serde(default)]
    pub router: RouterConfig,
    #[serde(default)]
    pub agents: AgentsConfig,
    /// Request middleware, applied in order
    #[serde(default)]
    pub middleware: Vec<String>,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_body_limit_mb")]
    pub body_limit_mb: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            body_limit_mb: default_body_limit_mb(),
        }
    }
}

/// An OpenAI-compatible chat-completion backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    pub api_base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub models: Vec<String>,
}

/// Routing table. Targets are a bare model name or a `provider,model` pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouterConfig {
    #[serde(default)]
    pub default: Option<String>,
    #[serde(default)]
    pub background: Option<String>,
    #[serde(default)]
    pub think: Option<String>,
    #[serde(default)]
    pub long_context: Option<String>,
    #[serde(default = "default_long_context_threshold")]
    pub long_context_threshold: usize,
    /// Requested models with one of these prefixes take the background route
    #[serde(default = "default_background_prefixes")]
    pub background_model_prefixes: Vec<String>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            default: None,
            background: None,
            think: None,
            long_context: None,
            long_context_threshold: default_long_context_threshold(),
            background_model_prefixes: default_background_prefixes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    #[serde(default)]
    pub classifier: Option<AgentBackendConfig>,
    #[serde(default)]
    pub coder: Option<AgentBackendConfig>,
    #[serde(default)]
    pub reasoner: Option<AgentBackendConfig>,
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_depth: default_max_depth(),
            classifier: None,
            coder: None,
            reasoner: None,
        }
    }
}

/// Credentials for one agent role
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentBackendConfig {
    #[serde(default)]
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_image_capacity")]
    pub image_capacity: usize,
    #[serde(default = "default_image_ttl_secs")]
    pub image_ttl_secs: u64,
    #[serde(default = "default_usage_capacity")]
    pub usage_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            image_capacity: default_image_capacity(),
            image_ttl_secs: default_image_ttl_secs(),
            usage_capacity: default_usage_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

// Default functions
fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3456
}

fn default_body_limit_mb() -> usize {
    50
}

fn default_long_context_threshold() -> usize {
    60_000
}

fn default_background_prefixes() -> Vec<String> {
    vec!["claude-3-5-haiku".to_string()]
}

fn default_max_depth() -> usize {
    5
}

fn default_image_capacity() -> usize {
    100
}

fn default_image_ttl_secs() -> u64 {
    300
}

fn default_usage_capacity() -> usize {
    100
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}
