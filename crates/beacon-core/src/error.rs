//! Error types for event construction and schema decoding.

use thiserror::Error;

/// Result type alias using `CoreError`.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core error type for event records and their serialized forms.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Event names must contain at least one character.
    #[error("invalid event name: name must not be empty")]
    InvalidEventName,

    /// Session time must be a finite, non-negative number of seconds.
    #[error("invalid session time: {0}")]
    InvalidSessionTime(f64),

    /// JSON encoding or decoding failed.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
