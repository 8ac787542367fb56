pub mod validation;

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use self::validation::validate_config;

/// Environment variable holding the upstream provider key.
pub const API_KEY_ENV: &str = "OPENROUTER_API_KEY";
/// Environment variable that overrides the config file location.
pub const CONFIG_PATH_ENV: &str = "LMBRIDGE_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";

pub const LEGACY_MODEL_ALIAS: &str = "deepseek-r1-distill-llama-8b";
pub const CANONICAL_MODEL_ID: &str = "deepseek/deepseek-chat-v3-0324:free";

/// Error type for configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
    #[error("{0} is not set")]
    MissingApiKey(&'static str),
}

/// Output format of the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Local listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Upper bound on how long a single SSE frame may wait for the client.
    #[serde(default = "default_write_timeout_secs")]
    pub write_timeout_secs: u64,
    /// Frames buffered between the relay task and the response body.
    #[serde(default = "default_stream_buffer_frames")]
    pub stream_buffer_frames: usize,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    1234
}
fn default_write_timeout_secs() -> u64 {
    60
}
fn default_stream_buffer_frames() -> usize {
    16
}

impl ServerConfig {
    #[must_use]
    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            write_timeout_secs: default_write_timeout_secs(),
            stream_buffer_frames: default_stream_buffer_frames(),
        }
    }
}

/// Remote provider configuration. The key itself only ever comes from the environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Deadline for a whole streaming call, measured from the moment it is opened.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_base_url() -> String {
    "https://openrouter.ai/api/v1".to_string()
}
fn default_timeout_secs() -> u64 {
    300
}
fn default_connect_timeout_secs() -> u64 {
    10
}

impl UpstreamConfig {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeaturesConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_format: LogFormat,
}

fn default_log_level() -> String {
    "INFO".to_string()
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: LogFormat::default(),
        }
    }
}

fn default_model_aliases() -> BTreeMap<String, String> {
    BTreeMap::from([(
        LEGACY_MODEL_ALIAS.to_string(),
        CANONICAL_MODEL_ID.to_string(),
    )])
}

/// Top-level application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    /// Exact-match model renames applied before dispatch.
    #[serde(default = "default_model_aliases")]
    pub model_aliases: BTreeMap<String, String>,
    #[serde(default)]
    pub features: FeaturesConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            upstream: UpstreamConfig::default(),
            model_aliases: default_model_aliases(),
            features: FeaturesConfig::default(),
        }
    }
}

/// Load configuration from a YAML file and validate it.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] when reading the file fails, [`ConfigError::Yaml`]
/// when parsing fails, or [`ConfigError::Validation`] when semantic validation fails.
pub fn load_config(path: impl AsRef<Path>) -> Result<AppConfig, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    parse_config(&contents)
}

/// Parse and validate configuration from YAML text.
///
/// # Errors
///
/// Same as [`load_config`], minus the I/O case.
pub fn parse_config(contents: &str) -> Result<AppConfig, ConfigError> {
    let config: AppConfig = serde_yaml::from_str(contents)?;
    validate_config(&config)?;
    Ok(config)
}

/// Resolve the config for this process.
///
/// An explicit `LMBRIDGE_CONFIG` path must exist. The default `config.yaml`
/// is optional and built-in defaults apply when it is missing.
///
/// # Errors
///
/// Propagates [`load_config`] failures.
pub fn load_config_from_env() -> Result<AppConfig, ConfigError> {
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        return load_config(path);
    }
    if Path::new(DEFAULT_CONFIG_PATH).exists() {
        return load_config(DEFAULT_CONFIG_PATH);
    }
    Ok(AppConfig::default())
}

/// Read the upstream API key from the environment.
///
/// # Errors
///
/// Returns [`ConfigError::MissingApiKey`] when the variable is unset or blank.
pub fn api_key_from_env() -> Result<String, ConfigError> {
    api_key_from_value(std::env::var(API_KEY_ENV).ok())
}

fn api_key_from_value(value: Option<String>) -> Result<String, ConfigError> {
    match value {
        Some(key) if !key.trim().is_empty() => Ok(key.trim().to_string()),
        _ => Err(ConfigError::MissingApiKey(API_KEY_ENV)),
    }
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
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 1234);
        assert_eq!(config.upstream.base_url, "https://openrouter.ai/api/v1");
        assert_eq!(config.upstream.timeout_secs, 300);
        assert_eq!(
            config.model_aliases.get(LEGACY_MODEL_ALIAS).map(String::as_str),
            Some(CANONICAL_MODEL_ID)
        );
    }

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = parse_config("{}").unwrap();
        assert_eq!(config.server.port, 1234);
        assert_eq!(config.server.write_timeout_secs, 60);
        assert_eq!(config.server.stream_buffer_frames, 16);
        assert_eq!(config.upstream.timeout(), Duration::from_secs(300));
        assert_eq!(config.features.log_format, LogFormat::Text);
        assert_eq!(config.model_aliases.len(), 1);
    }

    #[test]
    fn test_explicit_aliases_replace_default_table() {
        let config = parse_config("model_aliases:\n  local-llama: meta-llama/llama-3-8b\n").unwrap();
        assert_eq!(config.model_aliases.len(), 1);
        assert!(!config.model_aliases.contains_key(LEGACY_MODEL_ALIAS));
    }

    #[test]
    fn test_log_format_serde() {
        let format: LogFormat = serde_yaml::from_str("json").unwrap();
        assert_eq!(format, LogFormat::Json);
    }

    #[test]
    fn test_api_key_required() {
        assert!(matches!(
            api_key_from_value(None),
            Err(ConfigError::MissingApiKey(API_KEY_ENV))
        ));
        assert!(api_key_from_value(Some("   ".into())).is_err());
        assert_eq!(api_key_from_value(Some(" sk-or-1 ".into())).unwrap(), "sk-or-1");
    }
}
