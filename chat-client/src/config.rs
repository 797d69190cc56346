//! Configuration for the chat client.
//!
//! Configuration is built in code with the `with_*` helpers or loaded from a
//! TOML file. Every field except the service address has a default.

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::logging::LogLevel;

/// Client configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ClientConfig {
    /// Address of the chat service, handed to the transport.
    pub api_url: String,
    /// Application id issued by the service.
    #[serde(default)]
    pub app_id: String,
    /// Device/installation id reported on authentication.
    #[serde(default = "default_client_id")]
    pub client_id: String,
    /// Seconds a connect attempt may take before `ConnectionTimeout` (default: 10).
    #[serde(default = "default_connection_timeout_secs")]
    pub connection_timeout_secs: u64,
    /// Seconds after token expiry before the session fails (default: 30).
    #[serde(default = "default_token_grace_secs")]
    pub token_grace_secs: u64,
    /// How many seconds before expiry a token refresh fires (default: 5).
    #[serde(default = "default_token_refresh_lead_secs")]
    pub token_refresh_lead_secs: u64,
    /// Maximum unconfirmed outgoing messages (default: 256).
    #[serde(default = "default_max_outbox")]
    pub max_outbox: usize,
    /// Submissions per message before it is marked failed (default: 5).
    #[serde(default = "default_max_send_attempts")]
    pub max_send_attempts: u32,
    /// Page size for queries that leave the limit at 0 (default: 30).
    #[serde(default = "default_page_limit")]
    pub default_page_limit: usize,
    /// Acknowledge incoming messages with a `received` marker (default: true).
    #[serde(default = "default_auto_mark_delivered")]
    pub auto_mark_delivered: bool,
    /// Log verbosity for [`crate::logging::init`] (default: info).
    #[serde(default)]
    pub log_level: LogLevel,
}

// Default value functions
fn default_client_id() -> String {
    "chatsync".to_string()
}

fn default_connection_timeout_secs() -> u64 {
    10
}

fn default_token_grace_secs() -> u64 {
    30
}

fn default_token_refresh_lead_secs() -> u64 {
    5
}

fn default_max_outbox() -> usize {
    256
}

fn default_max_send_attempts() -> u32 {
    5
}

fn default_page_limit() -> usize {
    30
}

fn default_auto_mark_delivered() -> bool {
    true
}

impl ClientConfig {
    /// Configuration for a service address with every other field defaulted.
    pub fn new(api_url: &str) -> Self {
        Self {
            api_url: api_url.to_string(),
            app_id: String::new(),
            client_id: default_client_id(),
            connection_timeout_secs: default_connection_timeout_secs(),
            token_grace_secs: default_token_grace_secs(),
            token_refresh_lead_secs: default_token_refresh_lead_secs(),
            max_outbox: default_max_outbox(),
            max_send_attempts: default_max_send_attempts(),
            default_page_limit: default_page_limit(),
            auto_mark_delivered: default_auto_mark_delivered(),
            log_level: LogLevel::default(),
        }
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::ParseError {
            path: PathBuf::from("<inline>"),
            source: e,
        })
    }

    /// Set the application id.
    pub fn with_app_id(mut self, app_id: &str) -> Self {
        self.app_id = app_id.to_string();
        self
    }

    /// Set the client id.
    pub fn with_client_id(mut self, client_id: &str) -> Self {
        self.client_id = client_id.to_string();
        self
    }

    /// Set the connect timeout.
    pub fn with_connection_timeout(mut self, secs: u64) -> Self {
        self.connection_timeout_secs = secs;
        self
    }

    /// Set the token grace window.
    pub fn with_token_grace(mut self, secs: u64) -> Self {
        self.token_grace_secs = secs;
        self
    }

    /// Set the outbox bound.
    pub fn with_max_outbox(mut self, max: usize) -> Self {
        self.max_outbox = max;
        self
    }

    /// Set the submission budget per message.
    pub fn with_max_send_attempts(mut self, attempts: u32) -> Self {
        self.max_send_attempts = attempts;
        self
    }

    /// Set the default page size.
    pub fn with_page_limit(mut self, limit: usize) -> Self {
        self.default_page_limit = limit;
        self
    }

    /// Enable or disable automatic `received` markers.
    pub fn with_auto_mark_delivered(mut self, enabled: bool) -> Self {
        self.auto_mark_delivered = enabled;
        self
    }

    /// Set the log level.
    pub fn with_log_level(mut self, level: LogLevel) -> Self {
        self.log_level = level;
        self
    }

    /// Connect timeout as a duration.
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }

    /// Token grace window as a duration.
    pub fn token_grace(&self) -> Duration {
        Duration::from_secs(self.token_grace_secs)
    }

    /// Token refresh lead as a duration.
    pub fn token_refresh_lead(&self) -> Duration {
        Duration::from_secs(self.token_refresh_lead_secs)
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_config_uses_defaults() {
        let config = ClientConfig::new("wss://chat.example.com");
        assert_eq!(config.connection_timeout_secs, 10);
        assert_eq!(config.token_grace_secs, 30);
        assert_eq!(config.max_outbox, 256);
        assert_eq!(config.default_page_limit, 30);
        assert!(config.auto_mark_delivered);
        assert_eq!(config.log_level, LogLevel::Info);
    }

    #[test]
    fn config_from_toml_string() {
        let toml = r#"
api_url = "wss://chat.example.com"
app_id = "demo"
connection_timeout_secs = 3
max_send_attempts = 2
auto_mark_delivered = false
log_level = "debug"
"#;

        let config = ClientConfig::from_toml_str(toml).unwrap();
        assert_eq!(config.app_id, "demo");
        assert_eq!(config.connection_timeout(), Duration::from_secs(3));
        assert_eq!(config.max_send_attempts, 2);
        assert!(!config.auto_mark_delivered);
        assert_eq!(config.log_level, LogLevel::Debug);
    }

    #[test]
    fn config_missing_fields_use_defaults() {
        let config = ClientConfig::from_toml_str(r#"api_url = "x""#).unwrap();
        assert_eq!(config, ClientConfig::new("x"));
    }

    #[test]
    fn config_without_address_is_rejected() {
        assert!(matches!(
            ClientConfig::from_toml_str("app_id = \"demo\""),
            Err(ConfigError::ParseError { .. })
        ));
    }

    #[test]
    fn missing_file_is_read_error() {
        let result = ClientConfig::from_file(std::path::Path::new("/nonexistent/chatsync.toml"));
        assert!(matches!(result, Err(ConfigError::ReadError { .. })));
    }

    #[test]
    fn builders_override_fields() {
        let config = ClientConfig::new("x")
            .with_app_id("demo")
            .with_max_outbox(4)
            .with_page_limit(50)
            .with_log_level(LogLevel::Silent);
        assert_eq!(config.app_id, "demo");
        assert_eq!(config.max_outbox, 4);
        assert_eq!(config.default_page_limit, 50);
        assert_eq!(config.log_level, LogLevel::Silent);
    }
}
