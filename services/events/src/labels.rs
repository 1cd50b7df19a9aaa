//! Detector label vocabulary.
//!
//! [`Label`] is the closed set of classes the event state machine reacts
//! to. [`LabelVocabulary`] is the detector's own class list, loaded once at
//! startup from a `{"labels": [...]}` file.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum LabelError {
    #[error("Unknown label: {0}")]
    Unknown(String),

    #[error("Label file {path} was not found")]
    NotFound { path: String },

    #[error("Label file {path} is not valid JSON: {message}")]
    InvalidJson { path: String, message: String },

    #[error("Label file {path} has no 'labels' key")]
    MissingKey { path: String },

    #[error("Failed to read label file {path}: {message}")]
    Io { path: String, message: String },
}

/// Classes the event state machine reacts to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Label {
    /// Canopy open
    CabinCoverOn,
    /// Canopy closed
    CabinCoverOff,
    /// Ground crew member
    AirCrew,
    /// Red skin panel installed
    RedOn,
    /// Red skin panel removed
    RedOff,
    /// Pilot
    Aviator,
}

impl Label {
    pub const ALL: [Label; 6] = [
        Label::CabinCoverOn,
        Label::CabinCoverOff,
        Label::AirCrew,
        Label::RedOn,
        Label::RedOff,
        Label::Aviator,
    ];

    /// Labels whose presence means an aircraft is in view
    pub const PLANE_PARTS: [Label; 4] = [
        Label::CabinCoverOn,
        Label::CabinCoverOff,
        Label::RedOff,
        Label::RedOn,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Label::CabinCoverOn => "cabin_cover_on",
            Label::CabinCoverOff => "cabin_cover_off",
            Label::AirCrew => "air_crew",
            Label::RedOn => "red_on",
            Label::RedOff => "red_off",
            Label::Aviator => "aviator",
        }
    }

    pub fn is_plane_part(&self) -> bool {
        Self::PLANE_PARTS.contains(self)
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Label {
    type Err = LabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Label::ALL
            .into_iter()
            .find(|label| label.as_str() == s)
            .ok_or_else(|| LabelError::Unknown(s.to_string()))
    }
}

#[derive(Deserialize)]
struct LabelFile {
    labels: Option<Vec<String>>,
}

/// Class names the detector can emit
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelVocabulary {
    labels: Vec<String>,
}

impl LabelVocabulary {
    pub fn new(labels: Vec<String>) -> Self {
        Self { labels }
    }

    /// Parse a vocabulary file
    pub fn try_load(path: impl AsRef<Path>) -> Result<Self, LabelError> {
        let path = path.as_ref();
        let display = path.display().to_string();

        let contents = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => LabelError::NotFound {
                path: display.clone(),
            },
            _ => LabelError::Io {
                path: display.clone(),
                message: e.to_string(),
            },
        })?;

        let file: LabelFile =
            serde_json::from_str(&contents).map_err(|e| LabelError::InvalidJson {
                path: display.clone(),
                message: e.to_string(),
            })?;

        let labels = file
            .labels
            .ok_or(LabelError::MissingKey { path: display })?;

        Ok(Self { labels })
    }

    /// Load a vocabulary file, logging the problem and falling back to an
    /// empty vocabulary when it cannot be read
    pub fn load(path: impl AsRef<Path>) -> Self {
        match Self::try_load(path) {
            Ok(vocabulary) => {
                info!(count = vocabulary.len(), "Loaded label vocabulary");
                vocabulary
            }
            Err(e) => {
                warn!(error = %e, "Using empty label vocabulary");
                Self::default()
            }
        }
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn contains(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }

    /// Known labels the detector never emits
    pub fn missing_known_labels(&self) -> Vec<Label> {
        Label::ALL
            .into_iter()
            .filter(|label| !self.contains(label.as_str()))
            .collect()
    }
}
