pub mod validation;

use serde::{Deserialize, Serialize};
use std::fmt;

use self::validation::validate_config;

/// Environment variable overriding the config file location.
pub const CONFIG_PATH_ENV: &str = "OLM_GATEWAY_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";

/// Error type for configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Which backend client implementation serves generation calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Http,
    Mock,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Http => write!(f, "http"),
            BackendKind::Mock => write!(f, "mock"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
    pub timeout: u64,
    pub concurrent_request_limit: usize,
    pub max_body_bytes: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime_worker_threads: Option<usize>,
    pub base_path: String,
}

fn default_port() -> u16 {
    8000
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_timeout() -> u64 {
    180
}
fn default_concurrent_request_limit() -> usize {
    2
}
fn default_max_body_bytes() -> usize {
    16 * 1024 * 1024
}

#[derive(Debug, Deserialize)]
struct ServerConfigWire {
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default = "default_host")]
    host: String,
    #[serde(default = "default_timeout")]
    timeout: u64,
    #[serde(default = "default_concurrent_request_limit")]
    concurrent_request_limit: usize,
    #[serde(default = "default_max_body_bytes")]
    max_body_bytes: usize,
    #[serde(default)]
    runtime_worker_threads: Option<RuntimeThreadsSetting>,
    #[serde(default)]
    base_path: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RuntimeThreadsSetting {
    Fixed(usize),
    Auto(()),
}

impl<'de> Deserialize<'de> for ServerConfig {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let wire = ServerConfigWire::deserialize(deserializer)?;
        Ok(Self {
            port: wire.port,
            host: wire.host,
            timeout: wire.timeout,
            concurrent_request_limit: wire.concurrent_request_limit,
            max_body_bytes: wire.max_body_bytes,
            // missing or explicit null => tokio picks the worker count
            runtime_worker_threads: match wire.runtime_worker_threads {
                Some(RuntimeThreadsSetting::Fixed(threads)) => Some(threads),
                Some(RuntimeThreadsSetting::Auto(())) | None => None,
            },
            base_path: wire.base_path,
        })
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            timeout: default_timeout(),
            concurrent_request_limit: default_concurrent_request_limit(),
            max_body_bytes: default_max_body_bytes(),
            runtime_worker_threads: None,
            base_path: String::new(),
        }
    }
}

/// One scripted mock reply keyed by the request's identifying text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MockEntryConfig {
    #[serde(rename = "match")]
    pub key: String,
    #[serde(default)]
    pub reply: Option<String>,
    #[serde(default)]
    pub tool_call: Option<MockToolCallConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MockToolCallConfig {
    pub name: String,
    #[serde(default = "default_tool_arguments")]
    pub arguments: String,
}

fn default_tool_arguments() -> String {
    "{}".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MockConfig {
    #[serde(default)]
    pub token_delay_ms: u64,
    #[serde(default = "default_mock_responses")]
    pub responses: Vec<String>,
    #[serde(default)]
    pub table: Vec<MockEntryConfig>,
    #[serde(default)]
    pub reasoning: Option<String>,
    #[serde(default = "default_mock_models")]
    pub models: Vec<String>,
}

pub(crate) fn default_mock_responses() -> Vec<String> {
    [
        "Hello! How can I help you today?",
        "That's an interesting question. Could you tell me more about it?",
        "I understand. Is there anything else you'd like to know?",
        "Yes, I think you're absolutely right about that.",
        "I'm sorry, but could you be more specific about what you're looking for?",
    ]
    .iter()
    .map(|s| (*s).to_string())
    .collect()
}

fn default_mock_models() -> Vec<String> {
    vec!["mock-model".to_string()]
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            token_delay_ms: 0,
            responses: default_mock_responses(),
            table: Vec::new(),
            reasoning: None,
            models: default_mock_models(),
        }
    }
}

/// Backend selection and connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default)]
    pub kind: BackendKind,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub mock: MockConfig,
}

fn default_base_url() -> String {
    "http://localhost:11434".to_string()
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: BackendKind::default(),
            base_url: default_base_url(),
            mock: MockConfig::default(),
        }
    }
}

/// Generation defaults applied by the request normalizer and the splitter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    #[serde(default)]
    pub default_model: Option<String>,
    #[serde(default = "default_open_marker")]
    pub reasoning_open_marker: String,
    #[serde(default = "default_close_marker")]
    pub reasoning_close_marker: String,
    #[serde(default = "default_max_image_bytes")]
    pub max_image_bytes: usize,
    /// Model shipped with the deployment; it cannot be deleted through the API.
    #[serde(default)]
    pub built_in_model: Option<String>,
}

fn default_open_marker() -> String {
    "<think>".to_string()
}
fn default_close_marker() -> String {
    "</think>".to_string()
}
fn default_max_image_bytes() -> usize {
    10 * 1024 * 1024
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            default_model: None,
            reasoning_open_marker: default_open_marker(),
            reasoning_close_marker: default_close_marker(),
            max_image_bytes: default_max_image_bytes(),
            built_in_model: None,
        }
    }
}

/// Feature flags and settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeaturesConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_format: LogFormat,
    #[serde(default = "default_true")]
    pub exchange_log: bool,
}

fn default_true() -> bool {
    true
}
fn default_log_level() -> String {
    "INFO".to_string()
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: LogFormat::default(),
            exchange_log: true,
        }
    }
}

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub features: FeaturesConfig,
}

/// Load configuration from a YAML file and validate it.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] when reading the file fails, [`ConfigError::Yaml`]
/// when parsing fails, or [`ConfigError::Validation`] when semantic validation fails.
pub fn load_config(path: &str) -> Result<AppConfig, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    parse_config(&contents)
}

/// Parse and validate configuration from YAML text.
///
/// # Errors
///
/// Same as [`load_config`] minus the IO case.
pub fn parse_config(contents: &str) -> Result<AppConfig, ConfigError> {
    let config: AppConfig = serde_yaml::from_str(contents)?;
    validate_config(&config)?;
    Ok(config)
}

/// Config path from `OLM_GATEWAY_CONFIG`, falling back to `config.yaml`.
#[must_use]
pub fn config_path_from_env() -> String {
    std::env::var(CONFIG_PATH_ENV)
        .ok()
        .filter(|path| !path.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_example_config() {
        let config = load_config("config.example.yaml");
        assert!(
            config.is_ok(),
            "Failed to load example config: {:?}",
            config.err()
        );
        let config = config.unwrap();
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.server.concurrent_request_limit, 2);
        assert_eq!(config.backend.kind, BackendKind::Http);
        assert_eq!(config.backend.base_url, "http://localhost:11434");
        assert_eq!(config.generation.reasoning_open_marker, "<think>");
        assert!(config.features.exchange_log);
    }

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = parse_config("{}").unwrap();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.timeout, 180);
        assert_eq!(config.server.max_body_bytes, 16 * 1024 * 1024);
        assert_eq!(config.generation.max_image_bytes, 10 * 1024 * 1024);
        assert_eq!(config.backend.mock.responses.len(), 5);
        assert_eq!(config.features.log_format, LogFormat::Text);
    }

    #[test]
    fn test_backend_kind_serde() {
        let json = serde_json::to_string(&BackendKind::Mock).unwrap();
        assert_eq!(json, "\"mock\"");
        let kind: BackendKind = serde_json::from_str("\"http\"").unwrap();
        assert_eq!(kind, BackendKind::Http);
    }

    #[test]
    fn test_runtime_worker_threads_null_means_auto() {
        let config = parse_config("server:\n  runtime_worker_threads: null\n").unwrap();
        assert_eq!(config.server.runtime_worker_threads, None);
        let config = parse_config("server:\n  runtime_worker_threads: 4\n").unwrap();
        assert_eq!(config.server.runtime_worker_threads, Some(4));
    }

    #[test]
    fn test_mock_table_entries_parse() {
        let yaml = r#"
backend:
  kind: mock
  mock:
    reasoning: "thinking hard"
    table:
      - match: "weather"
        tool_call:
          name: get_weather
          arguments: '{"city":"Paris"}'
      - match: "hi"
        reply: "hello there"
"#;
        let config = parse_config(yaml).unwrap();
        assert_eq!(config.backend.kind, BackendKind::Mock);
        assert_eq!(config.backend.mock.table.len(), 2);
        assert_eq!(config.backend.mock.table[0].key, "weather");
        assert_eq!(
            config.backend.mock.table[0]
                .tool_call
                .as_ref()
                .map(|call| call.name.as_str()),
            Some("get_weather")
        );
        assert_eq!(config.backend.mock.reasoning.as_deref(), Some("thinking hard"));
    }
}
