//! Layered configuration for the console.
//!
//! Settings resolve in order: built-in defaults, then an optional TOML
//! file (default: ~/.config/watchdesk/config.toml), then `WATCHDESK_*`
//! environment variables. CLI flags layer on top in the binary.
//!
//! # Example
//!
//! ```toml
//! [api]
//! base_url = "https://track.example.net"
//! auth_token = "secret"
//!
//! [channel]
//! addr = "track.example.net:4500"
//! ack_timeout_secs = 5
//!
//! [sync]
//! reload_interval_secs = 120
//! desktop_alerts = false
//! ```

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};
use wd_api::ApiConfig;

use crate::channel::ChannelConfig;
use crate::engine::EngineConfig;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

// ============================================================================
// Sections
// ============================================================================

/// REST API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiSection {
    /// Base URL of the tracking backend's REST API.
    pub base_url: String,

    /// Bearer token attached to every request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,

    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for ApiSection {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:4000".to_string(),
            auth_token: None,
            timeout_secs: 15,
        }
    }
}

/// Live event channel settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelSection {
    /// Address of the backend event channel, e.g. `host:port`.
    pub addr: String,

    /// Initial reconnect delay in milliseconds.
    pub retry_initial_ms: u64,

    /// Reconnect delay cap in milliseconds.
    pub retry_max_ms: u64,

    /// Multiplier for exponential backoff.
    pub retry_multiplier: f64,

    /// Acknowledgement deadline for outbound commands, in seconds.
    pub ack_timeout_secs: u64,
}

impl Default for ChannelSection {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:4500".to_string(),
            retry_initial_ms: 1_000,
            retry_max_ms: 30_000,
            retry_multiplier: 2.0,
            ack_timeout_secs: 10,
        }
    }
}

/// Engine and local-state settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSection {
    /// Interval between periodic roster reloads, in seconds.
    pub reload_interval_secs: u64,

    /// Directory for durable state. Unset means the platform data dir.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_dir: Option<PathBuf>,

    /// Whether to raise desktop alerts for new notifications.
    pub desktop_alerts: bool,
}

impl Default for SyncSection {
    fn default() -> Self {
        Self {
            reload_interval_secs: 300,
            state_dir: None,
            desktop_alerts: true,
        }
    }
}

// ============================================================================
// Root Config
// ============================================================================

/// Main console configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub api: ApiSection,
    pub channel: ChannelSection,
    pub sync: SyncSection,
}

impl SyncConfig {
    /// Returns the default config file path:
    /// ~/.config/watchdesk/config.toml
    pub fn default_path() -> PathBuf {
        let mut path = dirs::config_dir().unwrap_or_else(|| PathBuf::from(".config"));
        path.push("watchdesk");
        path.push("config.toml");
        path
    }

    /// Loads the configuration.
    ///
    /// With an explicit `path` the file must exist and parse. Without
    /// one, the default path is used when present and skipped quietly
    /// when not. Environment overrides apply either way, and the
    /// result is validated.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                info!(path = %path.display(), "Loading config file");
                Self::from_file(path)?
            }
            None => {
                let default = Self::default_path();
                if default.exists() {
                    info!(path = %default.display(), "Loading config file");
                    Self::from_file(&default)?
                } else {
                    debug!(path = %default.display(), "No config file, using defaults");
                    Self::default()
                }
            }
        };

        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Parses a TOML config file. Missing sections and fields fall
    /// back to their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Applies `WATCHDESK_*` environment overrides. Values that fail
    /// to parse are logged and skipped rather than clobbering the
    /// layered value.
    pub fn apply_env(&mut self) {
        if let Ok(value) = env::var("WATCHDESK_API_URL") {
            self.api.base_url = value;
        }
        if let Ok(value) = env::var("WATCHDESK_API_TOKEN") {
            self.api.auth_token = Some(value);
        }
        if let Ok(value) = env::var("WATCHDESK_CHANNEL_ADDR") {
            self.channel.addr = value;
        }
        if let Ok(value) = env::var("WATCHDESK_STATE_DIR") {
            self.sync.state_dir = Some(PathBuf::from(value));
        }
        set_u64_from_env("WATCHDESK_API_TIMEOUT_SECS", &mut self.api.timeout_secs);
        set_u64_from_env("WATCHDESK_ACK_TIMEOUT_SECS", &mut self.channel.ack_timeout_secs);
        set_u64_from_env(
            "WATCHDESK_RELOAD_INTERVAL_SECS",
            &mut self.sync.reload_interval_secs,
        );
        set_bool_from_env("WATCHDESK_DESKTOP_ALERTS", &mut self.sync.desktop_alerts);
    }

    /// Validates the resolved configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.api.base_url.starts_with("http://") && !self.api.base_url.starts_with("https://") {
            return Err(ConfigError::Invalid(format!(
                "api.base_url must start with http:// or https://, got: {}",
                self.api.base_url
            )));
        }
        if self.channel.addr.is_empty() {
            return Err(ConfigError::Invalid(
                "channel.addr cannot be empty".to_string(),
            ));
        }
        if self.channel.retry_multiplier < 1.0 {
            return Err(ConfigError::Invalid(format!(
                "channel.retry_multiplier must be at least 1.0, got: {}",
                self.channel.retry_multiplier
            )));
        }
        if self.sync.reload_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "sync.reload_interval_secs cannot be zero".to_string(),
            ));
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Component config builders
    // ------------------------------------------------------------------------

    pub fn api_config(&self) -> ApiConfig {
        ApiConfig {
            base_url: self.api.base_url.clone(),
            auth_token: self.api.auth_token.clone(),
            timeout: Duration::from_secs(self.api.timeout_secs),
        }
    }

    pub fn channel_config(&self) -> ChannelConfig {
        ChannelConfig {
            addr: self.channel.addr.clone(),
            retry_initial_delay: Duration::from_millis(self.channel.retry_initial_ms),
            retry_max_delay: Duration::from_millis(self.channel.retry_max_ms),
            retry_multiplier: self.channel.retry_multiplier,
            ack_timeout: Duration::from_secs(self.channel.ack_timeout_secs),
        }
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            reload_interval: Duration::from_secs(self.sync.reload_interval_secs),
        }
    }
}

fn set_u64_from_env(name: &str, slot: &mut u64) {
    if let Ok(raw) = env::var(name) {
        match raw.parse() {
            Ok(value) => *slot = value,
            Err(_) => {
                warn!(var = name, value = %raw, "Ignoring unparseable environment override")
            }
        }
    }
}

fn set_bool_from_env(name: &str, slot: &mut bool) {
    if let Ok(raw) = env::var(name) {
        match raw.to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => *slot = true,
            "0" | "false" | "no" | "off" => *slot = false,
            _ => warn!(var = name, value = %raw, "Ignoring unparseable environment override"),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SyncConfig::default();

        assert_eq!(config.api.base_url, "http://127.0.0.1:4000");
        assert_eq!(config.api.auth_token, None);
        assert_eq!(config.api.timeout_secs, 15);
        assert_eq!(config.channel.addr, "127.0.0.1:4500");
        assert_eq!(config.channel.retry_initial_ms, 1_000);
        assert_eq!(config.channel.retry_max_ms, 30_000);
        assert!((config.channel.retry_multiplier - 2.0).abs() < f64::EPSILON);
        assert_eq!(config.channel.ack_timeout_secs, 10);
        assert_eq!(config.sync.reload_interval_secs, 300);
        assert_eq!(config.sync.state_dir, None);
        assert!(config.sync.desktop_alerts);
    }

    #[test]
    fn test_default_path_shape() {
        let path = SyncConfig::default_path();
        assert!(path.ends_with("watchdesk/config.toml"));
    }

    #[test]
    fn test_defaults_validate() {
        assert!(SyncConfig::default().validate().is_ok());
    }

    #[test]
    fn test_from_file_partial_sections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[api]
base_url = "https://track.example.net"
auth_token = "secret"

[sync]
reload_interval_secs = 120
"#,
        )
        .unwrap();

        let config = SyncConfig::from_file(&path).unwrap();

        assert_eq!(config.api.base_url, "https://track.example.net");
        assert_eq!(config.api.auth_token.as_deref(), Some("secret"));
        // Untouched fields keep their defaults
        assert_eq!(config.api.timeout_secs, 15);
        assert_eq!(config.channel.addr, "127.0.0.1:4500");
        assert_eq!(config.sync.reload_interval_secs, 120);
        assert!(config.sync.desktop_alerts);
    }

    #[test]
    fn test_from_file_invalid_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "api = not toml {").unwrap();

        let result = SyncConfig::from_file(&path);
        assert!(matches!(result, Err(ConfigError::TomlParse(_))));
    }

    #[test]
    fn test_from_file_missing() {
        let result = SyncConfig::from_file(Path::new("/nonexistent/watchdesk.toml"));
        assert!(matches!(result, Err(ConfigError::FileRead(_))));
    }

    #[test]
    fn test_validate_rejects_bad_base_url() {
        let mut config = SyncConfig::default();
        config.api.base_url = "track.example.net".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_addr() {
        let mut config = SyncConfig::default();
        config.channel.addr = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_shrinking_backoff() {
        let mut config = SyncConfig::default();
        config.channel.retry_multiplier = 0.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_reload_interval() {
        let mut config = SyncConfig::default();
        config.sync.reload_interval_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_overrides() {
        // Single test owns the WATCHDESK_* vars so parallel tests
        // never observe them half-set
        env::set_var("WATCHDESK_API_URL", "https://env.example.net");
        env::set_var("WATCHDESK_CHANNEL_ADDR", "env.example.net:9000");
        env::set_var("WATCHDESK_ACK_TIMEOUT_SECS", "3");
        env::set_var("WATCHDESK_DESKTOP_ALERTS", "off");
        env::set_var("WATCHDESK_RELOAD_INTERVAL_SECS", "not-a-number");

        let mut config = SyncConfig::default();
        config.apply_env();

        env::remove_var("WATCHDESK_API_URL");
        env::remove_var("WATCHDESK_CHANNEL_ADDR");
        env::remove_var("WATCHDESK_ACK_TIMEOUT_SECS");
        env::remove_var("WATCHDESK_DESKTOP_ALERTS");
        env::remove_var("WATCHDESK_RELOAD_INTERVAL_SECS");

        assert_eq!(config.api.base_url, "https://env.example.net");
        assert_eq!(config.channel.addr, "env.example.net:9000");
        assert_eq!(config.channel.ack_timeout_secs, 3);
        assert!(!config.sync.desktop_alerts);
        // Unparseable override is skipped, not applied as zero
        assert_eq!(config.sync.reload_interval_secs, 300);
    }

    #[test]
    fn test_component_config_builders() {
        let mut config = SyncConfig::default();
        config.channel.retry_initial_ms = 500;
        config.channel.ack_timeout_secs = 5;
        config.sync.reload_interval_secs = 60;
        config.api.auth_token = Some("secret".to_string());

        let api = config.api_config();
        assert_eq!(api.base_url, "http://127.0.0.1:4000");
        assert_eq!(api.auth_token.as_deref(), Some("secret"));
        assert_eq!(api.timeout, Duration::from_secs(15));

        let channel = config.channel_config();
        assert_eq!(channel.retry_initial_delay, Duration::from_millis(500));
        assert_eq!(channel.retry_max_delay, Duration::from_secs(30));
        assert_eq!(channel.ack_timeout, Duration::from_secs(5));

        let engine = config.engine_config();
        assert_eq!(engine.reload_interval, Duration::from_secs(60));
    }

    #[test]
    fn test_config_serializes_back_to_toml() {
        let config = SyncConfig::default();
        let serialized = toml::to_string(&config).unwrap();
        assert!(serialized.contains("[api]"));
        assert!(serialized.contains("[channel]"));
        assert!(serialized.contains("[sync]"));
    }
}
