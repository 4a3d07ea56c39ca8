//! Error types for the exam proctor core
//!
//! Each concern owns a focused error enum (`MediaError`, `StoreError`,
//! `SubmitError`). `ProctorError` is the umbrella type surfaced by the
//! session controller.

use thiserror::Error;

use crate::media::MediaError;
use crate::session::SessionState;
use crate::store::StoreError;
use crate::submission::SubmitError;

/// Main error type for session operations
#[derive(Error, Debug)]
pub enum ProctorError {
    /// Device acquisition failed; fatal to starting a session
    #[error("Media acquisition failed: {0}")]
    Media(#[from] MediaError),

    /// Durable key-value store failure
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// The submission request failed; the attempt may be submitted again
    #[error("Network submit failure: {0}")]
    NetworkSubmitFailure(#[from] SubmitError),

    /// A sampled frame had an inconsistent raster
    #[error("Invalid frame: {0}")]
    Frame(#[from] FrameError),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The requested operation is not allowed in the current state
    #[error("Operation '{operation}' not allowed in state {state}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },

    /// The session runner has stopped and no longer accepts commands
    #[error("Session is no longer running")]
    SessionClosed,
}

impl ProctorError {
    /// Check whether the caller may retry the failed operation
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProctorError::NetworkSubmitFailure(_))
    }

    /// Check whether this error aborts the session before monitoring starts
    pub fn is_fatal_to_start(&self) -> bool {
        matches!(self, ProctorError::Media(_))
    }
}

/// Raster validation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("Frame dimensions must be non-zero (got {width}x{height})")]
    EmptyDimensions { width: u32, height: u32 },

    #[error("Expected {expected} RGBA bytes for the frame, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },
}

/// Configuration loading and validation errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Unsupported config format: {0}")]
    UnsupportedFormat(String),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        ConfigError::Parse(format!("TOML error: {}", err))
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        ConfigError::Parse(format!("YAML error: {}", err))
    }
}

/// Result type alias for session operations
pub type Result<T> = std::result::Result<T, ProctorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ProctorError::Media(MediaError::PermissionDenied);
        assert_eq!(
            err.to_string(),
            "Media acquisition failed: Camera and microphone permission denied"
        );

        let err = FrameError::LengthMismatch {
            expected: 16,
            actual: 12,
        };
        assert!(err.to_string().contains("16"));
    }

    #[test]
    fn test_retryable_classification() {
        let err = ProctorError::NetworkSubmitFailure(SubmitError::Network("reset".into()));
        assert!(err.is_retryable());
        assert!(!err.is_fatal_to_start());

        let err = ProctorError::Media(MediaError::DeviceBusy);
        assert!(!err.is_retryable());
        assert!(err.is_fatal_to_start());
    }
}
