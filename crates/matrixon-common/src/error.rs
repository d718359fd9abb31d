//! Error types for Matrixon
//!
//! This module defines the error types used throughout the Matrixon state
//! resolution engine. Authorization failures are NOT errors: a rejected event
//! is a normal outcome and is reported through `AuthOutcome` instead.
//!
//! Errors are `Clone` so that a single failed resolution can be handed to
//! every caller waiting on it.

use thiserror::Error;

/// Matrixon error types
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MatrixonError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Deserialization error
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// The event store could not supply a referenced event.
    #[error("Failed to fetch event {event_id}: {reason}")]
    Fetch { event_id: String, reason: String },

    /// A cycle or an unbounded chain was found while walking `auth_events`.
    #[error("Event graph corruption: {0}")]
    GraphCorruption(String),

    /// An event is structurally unusable (wrong room, malformed content).
    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    /// Room version without a supported rule set
    #[error("Unsupported room version: {0}")]
    UnsupportedRoomVersion(String),

    /// Resource not found
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for Matrixon operations
pub type Result<T> = std::result::Result<T, MatrixonError>;

impl MatrixonError {
    /// Creates a fetch error for the given event id
    pub fn fetch(event_id: impl ToString, reason: impl Into<String>) -> Self {
        MatrixonError::Fetch {
            event_id: event_id.to_string(),
            reason: reason.into(),
        }
    }

    /// Whether the caller may retry the operation later.
    ///
    /// Only store faults are retryable; corruption and bad input stay bad.
    pub fn is_retryable(&self) -> bool {
        matches!(self, MatrixonError::Fetch { .. })
    }
}

impl From<serde_json::Error> for MatrixonError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_data() || err.is_syntax() || err.is_eof() {
            MatrixonError::Deserialization(err.to_string())
        } else {
            MatrixonError::Serialization(err.to_string())
        }
    }
}

impl From<String> for MatrixonError {
    fn from(err: String) -> Self {
        MatrixonError::Internal(err)
    }
}
