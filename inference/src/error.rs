//! Error types for the tracking and threat assessment pipeline

use thiserror::Error;

/// Result type alias for the pipeline
pub type Result<T> = std::result::Result<T, TrackingError>;

/// Errors that can occur while ingesting, tracking or scoring
#[derive(Error, Debug)]
pub enum TrackingError {
    #[error("Detector failed: {0}")]
    InferenceError(String),

    #[error("Tracker update failed: {0}")]
    TrackerError(String),

    #[error("Frame source error: {0}")]
    SourceError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Worker tasks did not stop within {timeout_ms} ms: {tasks:?}")]
    ShutdownTimeout { tasks: Vec<String>, timeout_ms: u64 },

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Image decode error: {0}")]
    ImageError(#[from] image::ImageError),

    #[error("Malformed JSON: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl TrackingError {
    pub fn inference<S: Into<String>>(msg: S) -> Self {
        Self::InferenceError(msg.into())
    }

    pub fn tracker<S: Into<String>>(msg: S) -> Self {
        Self::TrackerError(msg.into())
    }

    pub fn frame_source<S: Into<String>>(msg: S) -> Self {
        Self::SourceError(msg.into())
    }

    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::ConfigError(msg.into())
    }
}
