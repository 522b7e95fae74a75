//! Session configuration
//!
//! All timing and throttling constants live in [`SessionConfig`]. Defaults
//! are usable as-is; a TOML file may override any subset of them:
//!
//! ```toml
//! namespace = "wordlink"
//! ack_timeout_ms = 3000
//! max_retries = 3
//! heartbeat_interval_ms = 5000
//! ```

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors loading or validating a configuration file
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Session layer configuration
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Prefix of every rendezvous identifier
    pub namespace: String,
    /// Delay before retrying after a rendezvous id collision
    pub collision_retry_delay: Duration,
    /// Viewer gives up on an attempt that is not authenticated by then
    pub connect_timeout: Duration,

    /// Time to wait for an ack before resending
    pub ack_timeout: Duration,
    /// Resends before a critical message is considered lost
    pub max_retries: u32,

    /// Ping period once authenticated
    pub heartbeat_interval: Duration,
    /// Silence after which the partner is considered gone
    pub heartbeat_timeout: Duration,

    /// First reconnection delay
    pub reconnect_initial_delay: Duration,
    /// Cap on the reconnection delay
    pub reconnect_max_delay: Duration,
    /// Reconnection attempts before giving up
    pub reconnect_max_attempts: u32,

    /// Wrong PINs from one peer before it is blocked
    pub max_failed_auth_attempts: u32,
    /// How long a blocked peer stays blocked
    pub auth_block_duration: Duration,

    /// Join attempts allowed per window
    pub join_rate_limit_max: usize,
    /// Sliding window for join attempts
    pub join_rate_limit_window: Duration,
    /// Lockout once the window is exceeded
    pub join_cooldown: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            namespace: "wordlink".to_string(),
            collision_retry_delay: Duration::from_millis(500),
            connect_timeout: Duration::from_secs(15),
            ack_timeout: Duration::from_secs(3),
            max_retries: 3,
            heartbeat_interval: Duration::from_secs(5),
            heartbeat_timeout: Duration::from_secs(15),
            reconnect_initial_delay: Duration::from_secs(1),
            reconnect_max_delay: Duration::from_secs(30),
            reconnect_max_attempts: 5,
            max_failed_auth_attempts: 5,
            auth_block_duration: Duration::from_secs(5 * 60),
            join_rate_limit_max: 5,
            join_rate_limit_window: Duration::from_secs(60),
            join_cooldown: Duration::from_secs(30),
        }
    }
}

impl SessionConfig {
    /// Load defaults overridden by a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse defaults overridden by TOML text
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = toml::from_str(content)?;
        let config = file.apply(Self::default());
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.namespace.is_empty()
            || !self
                .namespace
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(ConfigError::Invalid(format!(
                "namespace {:?} must be non-empty alphanumeric",
                self.namespace
            )));
        }

        let positive = [
            ("ack_timeout", self.ack_timeout),
            ("heartbeat_interval", self.heartbeat_interval),
            ("heartbeat_timeout", self.heartbeat_timeout),
            ("reconnect_initial_delay", self.reconnect_initial_delay),
            ("connect_timeout", self.connect_timeout),
        ];
        for (name, value) in positive {
            if value.is_zero() {
                return Err(ConfigError::Invalid(format!("{} must be positive", name)));
            }
        }

        if self.heartbeat_timeout <= self.heartbeat_interval {
            return Err(ConfigError::Invalid(
                "heartbeat_timeout must exceed heartbeat_interval".to_string(),
            ));
        }
        if self.reconnect_max_delay < self.reconnect_initial_delay {
            return Err(ConfigError::Invalid(
                "reconnect_max_delay must be at least reconnect_initial_delay".to_string(),
            ));
        }
        if self.max_failed_auth_attempts == 0 || self.join_rate_limit_max == 0 {
            return Err(ConfigError::Invalid(
                "attempt limits must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

/// On-disk representation; every field optional
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    namespace: Option<String>,
    collision_retry_delay_ms: Option<u64>,
    connect_timeout_ms: Option<u64>,
    ack_timeout_ms: Option<u64>,
    max_retries: Option<u32>,
    heartbeat_interval_ms: Option<u64>,
    heartbeat_timeout_ms: Option<u64>,
    reconnect_initial_delay_ms: Option<u64>,
    reconnect_max_delay_ms: Option<u64>,
    reconnect_max_attempts: Option<u32>,
    max_failed_auth_attempts: Option<u32>,
    auth_block_duration_ms: Option<u64>,
    join_rate_limit_max: Option<usize>,
    join_rate_limit_window_ms: Option<u64>,
    join_cooldown_ms: Option<u64>,
}

impl ConfigFile {
    fn apply(self, mut config: SessionConfig) -> SessionConfig {
        let ms = Duration::from_millis;

        if let Some(v) = self.namespace {
            config.namespace = v;
        }
        if let Some(v) = self.collision_retry_delay_ms {
            config.collision_retry_delay = ms(v);
        }
        if let Some(v) = self.connect_timeout_ms {
            config.connect_timeout = ms(v);
        }
        if let Some(v) = self.ack_timeout_ms {
            config.ack_timeout = ms(v);
        }
        if let Some(v) = self.max_retries {
            config.max_retries = v;
        }
        if let Some(v) = self.heartbeat_interval_ms {
            config.heartbeat_interval = ms(v);
        }
        if let Some(v) = self.heartbeat_timeout_ms {
            config.heartbeat_timeout = ms(v);
        }
        if let Some(v) = self.reconnect_initial_delay_ms {
            config.reconnect_initial_delay = ms(v);
        }
        if let Some(v) = self.reconnect_max_delay_ms {
            config.reconnect_max_delay = ms(v);
        }
        if let Some(v) = self.reconnect_max_attempts {
            config.reconnect_max_attempts = v;
        }
        if let Some(v) = self.max_failed_auth_attempts {
            config.max_failed_auth_attempts = v;
        }
        if let Some(v) = self.auth_block_duration_ms {
            config.auth_block_duration = ms(v);
        }
        if let Some(v) = self.join_rate_limit_max {
            config.join_rate_limit_max = v;
        }
        if let Some(v) = self.join_rate_limit_window_ms {
            config.join_rate_limit_window = ms(v);
        }
        if let Some(v) = self.join_cooldown_ms {
            config.join_cooldown = ms(v);
        }

        config
    }
}
