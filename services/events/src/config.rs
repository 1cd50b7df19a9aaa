//! Configuration management for the hangar event service.
//!
//! This module handles loading and validating configuration from
//! configuration files and environment variables.

use crate::message::MessageKind;
use crate::state::EventThresholds;
use config::{Config, ConfigError, Environment, File};
use hangar_pipeline::PipelineConfig;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::PathBuf;

/// Profile used when `RUN_MODE` is unset. It ships no override file, so
/// `config/default.toml` applies as is.
pub const DEFAULT_RUN_MODE: &str = "production";

/// Main configuration for the event service.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ServiceConfig {
    /// Broker, delivery and liveness settings
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Event state machine thresholds
    #[serde(default)]
    pub detection: EventThresholds,

    /// Cameras processed by this instance
    #[serde(default)]
    pub cameras: Vec<CameraConfig>,

    /// Detector label vocabulary
    #[serde(default)]
    pub labels: LabelsConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// One camera stream.
#[derive(Debug, Clone, Deserialize)]
pub struct CameraConfig {
    /// Camera identifier carried in every message
    pub camera_id: String,

    /// Message variant reported for this camera
    #[serde(default)]
    pub kind: MessageKind,

    /// Detection replay file, one JSON array of detections per line
    pub source: PathBuf,

    /// Capacity of the frame queue feeding the session
    #[serde(default = "default_frame_buffer")]
    pub frame_buffer: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LabelsConfig {
    #[serde(default = "default_labels_path")]
    pub path: PathBuf,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format (json, pretty)
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_frame_buffer() -> usize {
    64
}
fn default_labels_path() -> PathBuf {
    PathBuf::from("label.json")
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "json".to_string()
}

impl Default for LabelsConfig {
    fn default() -> Self {
        Self {
            path: default_labels_path(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl ServiceConfig {
    /// Load configuration from file and environment variables.
    ///
    /// Configuration is loaded in the following order (later sources override earlier):
    /// 1. Default config file (config/default.toml)
    /// 2. Environment-specific config (config/{RUN_MODE}.toml, `production`
    ///    when unset)
    /// 3. Environment variables (prefixed with HANGAR_)
    pub fn load() -> Result<Self, ConfigError> {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| DEFAULT_RUN_MODE.into());

        let config = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // e.g. HANGAR_PIPELINE__BROKER__HOST
            .add_source(
                Environment::with_prefix("HANGAR")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Create configuration from environment variables only.
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(
                Environment::with_prefix("HANGAR")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut service: Self = config.try_deserialize()?;
        service
            .pipeline
            .apply_env()
            .map_err(|e| ConfigError::Message(e.to_string()))?;
        Ok(service)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        self.pipeline
            .validate()
            .map_err(|e| ConfigValidationError::InvalidValue {
                field: "pipeline".to_string(),
                message: e.to_string(),
            })?;

        if self.detection.movement_threshold_px < 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "detection.movement_threshold_px".to_string(),
                message: "Threshold must not be negative".to_string(),
            });
        }

        let mut seen = HashSet::new();
        for camera in &self.cameras {
            if camera.camera_id.is_empty() {
                return Err(ConfigValidationError::MissingField(
                    "cameras.camera_id".to_string(),
                ));
            }
            if !seen.insert(camera.camera_id.as_str()) {
                return Err(ConfigValidationError::InvalidValue {
                    field: "cameras.camera_id".to_string(),
                    message: format!("Duplicate camera id '{}'", camera.camera_id),
                });
            }
            if camera.frame_buffer == 0 {
                return Err(ConfigValidationError::InvalidValue {
                    field: format!("cameras.{}.frame_buffer", camera.camera_id),
                    message: "Buffer must hold at least one frame".to_string(),
                });
            }
        }

        Ok(())
    }
}

/// Configuration validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}
