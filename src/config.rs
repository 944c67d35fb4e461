use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;

use crate::error::ConfigError;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub rpc: RpcConfig,
    pub stream: StreamConfig,
    pub notifier: NotifierConfig,
    pub history: HistoryConfig,
    pub api: ApiConfig,
    pub logging: LoggingConfig,
}

/// Upstream chain endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    /// JSON-RPC HTTP endpoint
    pub http_endpoint: String,
    /// JSON-RPC websocket endpoint carrying `newHeads`
    pub ws_endpoint: String,
    /// Request timeout in seconds
    pub timeout_seconds: u64,
}

/// Head stream behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Reconnect after the stream drops instead of stopping
    pub reconnect_enabled: bool,
    /// Reconnect attempts before giving up, 0 for no limit
    pub max_reconnect_attempts: u32,
    pub reconnect_initial_delay_ms: u64,
    pub reconnect_max_delay_ms: u64,
    /// How long to wait for the `eth_subscribe` acknowledgment
    pub subscribe_timeout_seconds: u64,
    /// Missed blocks resolved during catch-up when heads were skipped
    pub max_backfill_blocks: u64,
}

/// Notification delivery
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifierConfig {
    /// Bounded queue between block processing and the notifier
    pub queue_capacity: usize,
    /// POST notifications here instead of logging them
    pub webhook_url: Option<String>,
    pub webhook_timeout_seconds: u64,
}

/// Address history lookups
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Number of most recent blocks searched by `GET /transactions`
    pub block_range: u64,
}

/// API server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    /// Time allowed for in-flight requests after an interrupt
    pub shutdown_grace_seconds: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    pub level: String,
    /// Log format (json, pretty)
    pub format: String,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            http_endpoint: "https://ethereum-rpc.publicnode.com".to_string(),
            ws_endpoint: "wss://ethereum-rpc.publicnode.com".to_string(),
            timeout_seconds: 30,
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            reconnect_enabled: true,
            max_reconnect_attempts: 0,
            reconnect_initial_delay_ms: 1_000,
            reconnect_max_delay_ms: 60_000,
            subscribe_timeout_seconds: 10,
            max_backfill_blocks: 16,
        }
    }
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            webhook_url: None,
            webhook_timeout_seconds: 10,
        }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self { block_range: 5_000 }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            shutdown_grace_seconds: 10,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match env::var(key) {
        Ok(value) => value
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value,
            }),
        Err(_) => Ok(None),
    }
}

impl AppConfig {
    /// Load configuration from file and environment variables.
    /// Environment variables take precedence over file values.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = env::var("CONFIG_FILE").unwrap_or_else(|_| "config.toml".to_string());
        Self::load_from(&config_path)
    }

    /// Same as `load` with an explicit file path
    pub fn load_from(config_path: &str) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(config_path)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults when it does not exist
    pub fn load_from_file(config_path: &str) -> Result<Self, ConfigError> {
        if !Path::new(config_path).exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(config_path)
            .map_err(|_| ConfigError::FileNotFound(config_path.to_string()))?;
        toml::from_str(&content).map_err(|e| ConfigError::Parsing(e.to_string()))
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(endpoint) = env::var("ETH_RPC_URL") {
            self.rpc.http_endpoint = endpoint;
        }
        if let Ok(endpoint) = env::var("ETH_WS_URL") {
            self.rpc.ws_endpoint = endpoint;
        }
        if let Some(timeout) = parse_env("RPC_TIMEOUT_SECONDS")? {
            self.rpc.timeout_seconds = timeout;
        }

        if let Some(enabled) = parse_env("STREAM_RECONNECT_ENABLED")? {
            self.stream.reconnect_enabled = enabled;
        }
        if let Some(blocks) = parse_env("STREAM_MAX_BACKFILL_BLOCKS")? {
            self.stream.max_backfill_blocks = blocks;
        }

        if let Some(capacity) = parse_env("NOTIFIER_QUEUE_CAPACITY")? {
            self.notifier.queue_capacity = capacity;
        }
        if let Ok(url) = env::var("NOTIFIER_WEBHOOK_URL") {
            self.notifier.webhook_url = Some(url);
        }

        if let Some(range) = parse_env("HISTORY_BLOCK_RANGE")? {
            self.history.block_range = range;
        }

        if let Ok(host) = env::var("API_HOST") {
            self.api.host = host;
        }
        if let Some(port) = parse_env("API_PORT")? {
            self.api.port = port;
        }
        if let Some(grace) = parse_env("API_SHUTDOWN_GRACE_SECONDS")? {
            self.api.shutdown_grace_seconds = grace;
        }

        if let Ok(level) = env::var("LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = env::var("LOG_FORMAT") {
            self.logging.format = format;
        }

        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.rpc.http_endpoint.starts_with("http://") && !self.rpc.http_endpoint.starts_with("https://") {
            return Err(ConfigError::InvalidUrl(self.rpc.http_endpoint.clone()));
        }

        if !self.rpc.ws_endpoint.starts_with("ws://") && !self.rpc.ws_endpoint.starts_with("wss://") {
            return Err(ConfigError::InvalidUrl(self.rpc.ws_endpoint.clone()));
        }

        if self.rpc.timeout_seconds == 0 || self.rpc.timeout_seconds > 300 {
            return Err(ConfigError::InvalidValue {
                key: "rpc.timeout_seconds".to_string(),
                value: self.rpc.timeout_seconds.to_string(),
            });
        }

        if self.stream.subscribe_timeout_seconds == 0 {
            return Err(ConfigError::InvalidValue {
                key: "stream.subscribe_timeout_seconds".to_string(),
                value: self.stream.subscribe_timeout_seconds.to_string(),
            });
        }

        if self.stream.reconnect_initial_delay_ms > self.stream.reconnect_max_delay_ms {
            return Err(ConfigError::InvalidValue {
                key: "stream.reconnect_initial_delay_ms".to_string(),
                value: self.stream.reconnect_initial_delay_ms.to_string(),
            });
        }

        if self.notifier.queue_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                key: "notifier.queue_capacity".to_string(),
                value: self.notifier.queue_capacity.to_string(),
            });
        }

        if let Some(url) = &self.notifier.webhook_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(ConfigError::InvalidUrl(url.clone()));
            }
        }

        if self.notifier.webhook_timeout_seconds == 0 || self.notifier.webhook_timeout_seconds > 300 {
            return Err(ConfigError::InvalidValue {
                key: "notifier.webhook_timeout_seconds".to_string(),
                value: self.notifier.webhook_timeout_seconds.to_string(),
            });
        }

        if self.history.block_range == 0 {
            return Err(ConfigError::InvalidValue {
                key: "history.block_range".to_string(),
                value: self.history.block_range.to_string(),
            });
        }

        if self.api.port == 0 {
            return Err(ConfigError::InvalidValue {
                key: "api.port".to_string(),
                value: self.api.port.to_string(),
            });
        }

        let valid_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::InvalidValue {
                key: "logging.level".to_string(),
                value: self.logging.level.clone(),
            });
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            return Err(ConfigError::InvalidValue {
                key: "logging.format".to_string(),
                value: self.logging.format.clone(),
            });
        }

        Ok(())
    }

    /// Generate a sample configuration file
    pub fn generate_sample_config() -> Result<String, ConfigError> {
        toml::to_string_pretty(&Self::default()).map_err(|e| ConfigError::Parsing(e.to_string()))
    }

    /// Save configuration to file
    pub fn save_to_file(&self, path: &str) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self).map_err(|e| ConfigError::Parsing(e.to_string()))?;
        fs::write(path, content).map_err(|_| ConfigError::FileNotFound(path.to_string()))?;
        Ok(())
    }
}
