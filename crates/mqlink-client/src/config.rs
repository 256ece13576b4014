//! Session configuration.
//!
//! [`SessionConfig`] can be built in code with its builder methods or loaded
//! as part of [`Settings`] from:
//! - a TOML file, with in-file substitution `${VAR}` / `${VAR:-default}`
//! - environment variables with the `MQLINK__` prefix (double underscore
//!   for nesting), e.g. `MQLINK__BROKER__PORT=1884`,
//!   `MQLINK__SESSION__KEEP_ALIVE=30`
//!
//! ```toml
//! [log]
//! level = "debug"
//!
//! [broker]
//! host = "${MQTT_HOST:-localhost}"
//! port = 1883
//! client_id = "sensor-gw"
//!
//! [session]
//! keep_alive = 30
//! max_inbound_queue = 10000
//! ```

use std::path::Path;
use std::time::Duration;

use config::{Environment, File, FileFormat};
use regex::Regex;
use serde::Deserialize;
use thiserror::Error;

use mqlink_core::{PROTOCOL_V311, PROTOCOL_V5};

/// Default keep alive requested in CONNECT, in seconds.
pub const DEFAULT_KEEP_ALIVE: u16 = 60;
/// Default TCP connect timeout, in seconds.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
/// Default keepalive scheduler cadence, in milliseconds.
pub const DEFAULT_KEEPALIVE_TICK_MS: u64 = 1000;
/// Unanswered pings tolerated before the connection is declared dead.
pub const DEFAULT_MAX_MISSED_PINGS: u32 = 2;
/// Default broker port.
pub const DEFAULT_PORT: u16 = 1883;

/// Per-session settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Keep alive requested from the broker, in seconds (0 = disabled).
    pub keep_alive: u16,
    /// Clean session flag sent in CONNECT.
    pub clean_session: bool,
    /// MQTT protocol level (4 = 3.1.1, 5 = 5.0).
    pub protocol_version: u8,
    /// TCP connect timeout, in seconds.
    pub connect_timeout_secs: u64,
    /// How often the keepalive scheduler wakes, in milliseconds.
    pub keepalive_tick_ms: u64,
    /// Unanswered pings tolerated before the connection is dropped (0 = never).
    pub max_missed_pings: u32,
    /// Inbound message events buffered for the consumer (0 = unbounded).
    pub max_inbound_queue: usize,
    /// Largest inbound frame accepted, in bytes (0 = unlimited).
    pub max_packet_size: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            keep_alive: DEFAULT_KEEP_ALIVE,
            clean_session: true,
            protocol_version: PROTOCOL_V311,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            keepalive_tick_ms: DEFAULT_KEEPALIVE_TICK_MS,
            max_missed_pings: DEFAULT_MAX_MISSED_PINGS,
            max_inbound_queue: 0,
            max_packet_size: 0,
        }
    }
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set keep-alive interval in seconds.
    pub fn keep_alive(mut self, seconds: u16) -> Self {
        self.keep_alive = seconds;
        self
    }

    /// Set clean session flag.
    pub fn clean_session(mut self, clean: bool) -> Self {
        self.clean_session = clean;
        self
    }

    /// Use MQTT 5.0 protocol.
    pub fn mqtt5(mut self) -> Self {
        self.protocol_version = PROTOCOL_V5;
        self
    }

    /// Set connection timeout (whole seconds, minimum 1).
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_secs = timeout.as_secs().max(1);
        self
    }

    /// Set the keepalive scheduler cadence.
    pub fn keepalive_tick(mut self, tick: Duration) -> Self {
        self.keepalive_tick_ms = u64::try_from(tick.as_millis()).unwrap_or(u64::MAX).max(1);
        self
    }

    pub fn max_missed_pings(mut self, pings: u32) -> Self {
        self.max_missed_pings = pings;
        self
    }

    /// Bound the inbound queue; overflow drops the newest message.
    pub fn max_inbound_queue(mut self, events: usize) -> Self {
        self.max_inbound_queue = events;
        self
    }

    pub fn max_packet_size(mut self, bytes: usize) -> Self {
        self.max_packet_size = bytes;
        self
    }

    pub(crate) fn requested_keep_alive(&self) -> Duration {
        Duration::from_secs(u64::from(self.keep_alive))
    }

    pub(crate) fn tick(&self) -> Duration {
        Duration::from_millis(self.keepalive_tick_ms)
    }

    pub(crate) fn connect_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.protocol_version != PROTOCOL_V311 && self.protocol_version != PROTOCOL_V5 {
            return Err(format!(
                "protocol_version must be {} or {}, got {}",
                PROTOCOL_V311, PROTOCOL_V5, self.protocol_version
            ));
        }
        if self.connect_timeout_secs == 0 {
            return Err("connect_timeout_secs must be greater than 0".into());
        }
        if self.keepalive_tick_ms == 0 {
            return Err("keepalive_tick_ms must be greater than 0".into());
        }
        Ok(())
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level: error, warn, info, debug, trace.
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Where and as whom to connect.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_PORT,
            client_id: String::new(),
            username: None,
            password: None,
        }
    }
}

/// Root configuration for an application embedding a session.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub log: LogConfig,
    pub broker: BrokerConfig,
    pub session: SessionConfig,
}

/// Configuration error.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Validation error: {0}")]
    Validation(String),
}

/// Substitute `${VAR}` and `${VAR:-default}` with environment values.
fn substitute_env_vars(content: &str) -> Result<String, ConfigError> {
    let re = Regex::new(r"\$\{([^}:]+)(?::-([^}]*))?\}")
        .map_err(|e| ConfigError::Validation(e.to_string()))?;
    Ok(re
        .replace_all(content, |caps: &regex::Captures| {
            let default = caps.get(2).map(|m| m.as_str()).unwrap_or("");
            std::env::var(&caps[1]).unwrap_or_else(|_| default.to_string())
        })
        .into_owned())
}

impl Settings {
    /// Load settings from a TOML file (skipped when absent) with
    /// `MQLINK__` environment overrides applied on top.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder()
            .set_default("log.level", "info")?
            .set_default("broker.host", "localhost")?
            .set_default("broker.port", i64::from(DEFAULT_PORT))?
            .set_default("session.keep_alive", i64::from(DEFAULT_KEEP_ALIVE))?;

        let path = path.as_ref();
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let substituted = substitute_env_vars(&content)?;
            builder = builder.add_source(File::from_str(&substituted, FileFormat::Toml));
        }

        let cfg = builder
            .add_source(
                Environment::with_prefix("MQLINK")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let settings: Settings = cfg.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Parse settings from a TOML string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let substituted = substitute_env_vars(content)?;
        let settings: Settings = toml::from_str(&substituted)
            .map_err(|e| ConfigError::Validation(format!("TOML parse error: {}", e)))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.broker.host.is_empty() {
            return Err(ConfigError::Validation("broker.host must not be empty".into()));
        }
        self.session.validate().map_err(ConfigError::Validation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(SessionConfig::default().validate().is_ok());
        assert!(Settings::default().validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = SessionConfig::new()
            .keep_alive(30)
            .mqtt5()
            .keepalive_tick(Duration::from_millis(250))
            .max_inbound_queue(64);
        assert_eq!(config.requested_keep_alive(), Duration::from_secs(30));
        assert_eq!(config.protocol_version, PROTOCOL_V5);
        assert_eq!(config.tick(), Duration::from_millis(250));
        assert_eq!(config.max_inbound_queue, 64);
    }

    #[test]
    fn test_keepalive_tick_saturates() {
        let config = SessionConfig::new().keepalive_tick(Duration::MAX);
        assert_eq!(config.keepalive_tick_ms, u64::MAX);

        let config = SessionConfig::new().keepalive_tick(Duration::ZERO);
        assert_eq!(config.keepalive_tick_ms, 1);
    }

    #[test]
    fn test_rejects_unknown_protocol_version() {
        let config = SessionConfig {
            protocol_version: 3,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_toml() {
        let toml = r#"
[log]
level = "debug"

[broker]
host = "broker.local"
port = 1884
client_id = "cid"
username = "u"
password = "p"

[session]
keep_alive = 15
protocol_version = 5
max_missed_pings = 3
"#;
        let settings = Settings::parse(toml).unwrap();
        assert_eq!(settings.log.level, "debug");
        assert_eq!(settings.broker.host, "broker.local");
        assert_eq!(settings.broker.port, 1884);
        assert_eq!(settings.broker.username.as_deref(), Some("u"));
        assert_eq!(settings.session.keep_alive, 15);
        assert_eq!(settings.session.protocol_version, 5);
        assert_eq!(settings.session.max_missed_pings, 3);
        // untouched fields keep their defaults
        assert_eq!(settings.session.keepalive_tick_ms, DEFAULT_KEEPALIVE_TICK_MS);
        assert!(settings.session.clean_session);
    }

    #[test]
    fn test_parse_rejects_invalid_session() {
        let toml = r#"
[session]
keepalive_tick_ms = 0
"#;
        assert!(matches!(
            Settings::parse(toml),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn test_env_var_substitution_with_default() {
        std::env::remove_var("MQLINK_TEST_UNSET_HOST");
        let substituted =
            substitute_env_vars(r#"host = "${MQLINK_TEST_UNSET_HOST:-10.0.0.1}""#).unwrap();
        assert_eq!(substituted, r#"host = "10.0.0.1""#);
    }

    #[test]
    fn test_env_var_substitution() {
        std::env::set_var("MQLINK_TEST_PORT", "1885");
        let substituted = substitute_env_vars("port = ${MQLINK_TEST_PORT}").unwrap();
        assert_eq!(substituted, "port = 1885");
        std::env::remove_var("MQLINK_TEST_PORT");
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let settings = Settings::load("/nonexistent/mqlink.toml").unwrap();
        assert_eq!(settings.broker.port, DEFAULT_PORT);
        assert_eq!(settings.session.keep_alive, DEFAULT_KEEP_ALIVE);
    }
}
