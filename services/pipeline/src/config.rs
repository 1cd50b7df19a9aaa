//! Broker configuration module for the hangar pipeline.
//!
//! This module provides configuration structures for connecting to the
//! message broker and for tuning the delivery channel's retry, reconnect and
//! liveness behaviour.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Which broker implementation backs the delivery channel
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BrokerBackend {
    /// RabbitMQ over AMQP 0-9-1
    #[default]
    Amqp,
    /// In-process broker that only records messages (dry runs)
    Memory,
}

impl BrokerBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            BrokerBackend::Amqp => "amqp",
            BrokerBackend::Memory => "memory",
        }
    }
}

/// Broker connection parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    #[serde(default)]
    pub backend: BrokerBackend,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_username")]
    pub username: String,
    #[serde(default = "default_password")]
    pub password: String,
    #[serde(default = "default_vhost")]
    pub vhost: String,
    /// AMQP heartbeat negotiated with the broker, in seconds
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u16,
    /// TCP connect timeout in milliseconds
    #[serde(default = "default_connection_timeout_ms")]
    pub connection_timeout_ms: u64,
    /// How long a publish may wait for the broker while the connection is blocked
    #[serde(default = "default_blocked_connection_timeout_secs")]
    pub blocked_connection_timeout_secs: u64,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    5672
}

fn default_username() -> String {
    "guest".to_string()
}

fn default_password() -> String {
    "guest".to_string()
}

fn default_vhost() -> String {
    "/".to_string()
}

fn default_heartbeat_secs() -> u16 {
    60
}

fn default_connection_timeout_ms() -> u64 {
    10000
}

fn default_blocked_connection_timeout_secs() -> u64 {
    300
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            backend: BrokerBackend::default(),
            host: default_host(),
            port: default_port(),
            username: default_username(),
            password: default_password(),
            vhost: default_vhost(),
            heartbeat_secs: default_heartbeat_secs(),
            connection_timeout_ms: default_connection_timeout_ms(),
            blocked_connection_timeout_secs: default_blocked_connection_timeout_secs(),
        }
    }
}

impl BrokerConfig {
    /// Human-readable endpoint without credentials
    pub fn endpoint(&self) -> String {
        format!("{}:{}{}", self.host, self.port, self.vhost)
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    pub fn blocked_connection_timeout(&self) -> Duration {
        Duration::from_secs(self.blocked_connection_timeout_secs)
    }
}

/// Retry and reconnect policy of the delivery channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Publish attempts in total, including the first one
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Fixed pause between publish attempts in milliseconds
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,
    /// Pause after a failed connection attempt in milliseconds
    #[serde(default = "default_reconnect_backoff_ms")]
    pub reconnect_backoff_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_interval_ms() -> u64 {
    1000
}

fn default_reconnect_backoff_ms() -> u64 {
    5000
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retry_interval_ms: default_retry_interval_ms(),
            reconnect_backoff_ms: default_reconnect_backoff_ms(),
        }
    }
}

impl DeliveryConfig {
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_ms)
    }
}

/// Queue names used by the hangar pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Queue receiving every derived event
    #[serde(default = "default_events_queue")]
    pub events: String,
    /// Queue receiving liveness messages
    #[serde(default = "default_liveness_queue")]
    pub liveness: String,
}

fn default_events_queue() -> String {
    "predicate".to_string()
}

fn default_liveness_queue() -> String {
    "heartbeat".to_string()
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            events: default_events_queue(),
            liveness: default_liveness_queue(),
        }
    }
}

/// Liveness probe settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LivenessConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_liveness_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_liveness_payload")]
    pub payload: String,
}

fn default_true() -> bool {
    true
}

fn default_liveness_interval_secs() -> u64 {
    500
}

fn default_liveness_payload() -> String {
    "Heartbeat message".to_string()
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_liveness_interval_secs(),
            payload: default_liveness_payload(),
        }
    }
}

impl LivenessConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Main configuration for the hangar pipeline
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PipelineConfig {
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub queues: QueueConfig,
    #[serde(default)]
    pub liveness: LivenessConfig,
}

impl PipelineConfig {
    /// Load broker settings from environment variables, keeping defaults for
    /// everything else
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Override broker settings with `AMQP_*` environment variables
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        let config = self;

        if let Ok(host) = std::env::var("AMQP_HOST") {
            config.broker.host = host;
        }

        if let Ok(port) = std::env::var("AMQP_PORT") {
            config.broker.port = port.parse().map_err(|_| ConfigError::InvalidValue {
                key: "AMQP_PORT".to_string(),
                message: format!("'{}' is not a port number", port),
            })?;
        }

        if let Ok(username) = std::env::var("AMQP_USERNAME") {
            config.broker.username = username;
        }
        if let Ok(password) = std::env::var("AMQP_PASSWORD") {
            config.broker.password = password;
        }
        if let Ok(vhost) = std::env::var("AMQP_VHOST") {
            config.broker.vhost = vhost;
        }

        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.broker.backend == BrokerBackend::Amqp && self.broker.host.is_empty() {
            return Err(ConfigError::MissingRequired("broker.host".to_string()));
        }

        if self.broker.port == 0 {
            return Err(ConfigError::InvalidValue {
                key: "broker.port".to_string(),
                message: "Port must be greater than 0".to_string(),
            });
        }

        if self.delivery.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                key: "delivery.max_attempts".to_string(),
                message: "At least one attempt is required".to_string(),
            });
        }

        if self.queues.events.is_empty() {
            return Err(ConfigError::MissingRequired("queues.events".to_string()));
        }

        if self.liveness.enabled {
            if self.queues.liveness.is_empty() {
                return Err(ConfigError::MissingRequired("queues.liveness".to_string()));
            }
            if self.liveness.interval_secs == 0 {
                return Err(ConfigError::InvalidValue {
                    key: "liveness.interval_secs".to_string(),
                    message: "Interval must be greater than 0".to_string(),
                });
            }
        }

        Ok(())
    }
}
