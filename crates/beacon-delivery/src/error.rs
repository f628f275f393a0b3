//! Error types for event delivery and queue persistence.
//!
//! Every failure here is recovered inside the pipeline: delivery errors
//! keep the record queued for a later retry, persistence errors are logged
//! while the in-memory queue stays authoritative. Errors carry enough
//! context for logging and for the retry policy.

use std::fmt;

use beacon_core::CoreError;
use thiserror::Error;

/// Result type alias for delivery operations.
pub type Result<T> = std::result::Result<T, DeliveryError>;

/// Error conditions raised while delivering or persisting events.
#[derive(Debug, Clone, Error)]
pub enum DeliveryError {
    /// Connectivity check reported the collector unreachable.
    #[error("network unreachable")]
    ConnectivityUnavailable,

    /// Transport-level failure, no response was received.
    #[error("transport failed: {message}")]
    Transport {
        /// Error message from the transport
        message: String,
    },

    /// Transport gave up waiting for a response.
    #[error("request timeout after {timeout_seconds}s")]
    Timeout {
        /// Timeout that elapsed
        timeout_seconds: u64,
    },

    /// Collector answered with a status outside 200..300.
    #[error("collector rejected event: HTTP {status_code}")]
    UnexpectedStatus {
        /// HTTP status code returned
        status_code: u16,
    },

    /// Event could not be encoded for the wire.
    #[error("failed to encode event: {message}")]
    Encoding {
        /// Encoding error message
        message: String,
    },

    /// Writing the queue snapshot failed.
    #[error("failed to persist queue to {path}: {message}")]
    PersistenceWrite {
        /// Target path of the snapshot
        path: String,
        /// Underlying I/O error message
        message: String,
    },

    /// Reading the queue snapshot failed.
    #[error("failed to read queue from {path}: {message}")]
    PersistenceRead {
        /// Path of the snapshot
        path: String,
        /// Underlying I/O error message
        message: String,
    },

    /// Queue snapshot exists but cannot be decoded.
    #[error("corrupt queue snapshot at {path}: {message}")]
    Corrupt {
        /// Path of the snapshot
        path: String,
        /// Decoding error message
        message: String,
    },

    /// Invalid tracker configuration.
    #[error("invalid configuration: {message}")]
    Configuration {
        /// Configuration error message
        message: String,
    },
}

impl DeliveryError {
    /// Creates a transport error from a message.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport { message: message.into() }
    }

    /// Creates a timeout error.
    pub fn timeout(timeout_seconds: u64) -> Self {
        Self::Timeout { timeout_seconds }
    }

    /// Creates an error for a non-success HTTP status.
    pub fn unexpected_status(status_code: u16) -> Self {
        Self::UnexpectedStatus { status_code }
    }

    /// Creates a persistence write error.
    pub fn persistence_write(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::PersistenceWrite { path: path.into(), message: message.into() }
    }

    /// Creates a persistence read error.
    pub fn persistence_read(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::PersistenceRead { path: path.into(), message: message.into() }
    }

    /// Creates a corrupt snapshot error.
    pub fn corrupt(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Corrupt { path: path.into(), message: message.into() }
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }

    /// Whether the failed delivery should be attempted again later.
    ///
    /// Connectivity, transport and any non-2xx status are retried: the
    /// collector contract defines no "reject and do not retry" signal.
    /// Encoding and configuration errors cannot improve by waiting.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ConnectivityUnavailable
            | Self::Transport { .. }
            | Self::Timeout { .. }
            | Self::UnexpectedStatus { .. } => true,

            Self::Encoding { .. }
            | Self::PersistenceWrite { .. }
            | Self::PersistenceRead { .. }
            | Self::Corrupt { .. }
            | Self::Configuration { .. } => false,
        }
    }
}

impl From<CoreError> for DeliveryError {
    fn from(err: CoreError) -> Self {
        Self::Encoding { message: err.to_string() }
    }
}

/// Category of failure for logging and stats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Collector unreachable, no request issued.
    Connectivity,
    /// Transport error or non-2xx response.
    Transport,
    /// Queue snapshot could not be written.
    PersistenceWrite,
    /// Queue snapshot could not be read or decoded.
    PersistenceRead,
    /// Encoding or configuration problem.
    Internal,
}

impl From<&DeliveryError> for ErrorCategory {
    fn from(error: &DeliveryError) -> Self {
        match error {
            DeliveryError::ConnectivityUnavailable => Self::Connectivity,
            DeliveryError::Transport { .. }
            | DeliveryError::Timeout { .. }
            | DeliveryError::UnexpectedStatus { .. } => Self::Transport,
            DeliveryError::PersistenceWrite { .. } => Self::PersistenceWrite,
            DeliveryError::PersistenceRead { .. } | DeliveryError::Corrupt { .. } => {
                Self::PersistenceRead
            },
            DeliveryError::Encoding { .. } | DeliveryError::Configuration { .. } => {
                Self::Internal
            },
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connectivity => write!(f, "connectivity"),
            Self::Transport => write!(f, "transport"),
            Self::PersistenceWrite => write!(f, "persistence_write"),
            Self::PersistenceRead => write!(f, "persistence_read"),
            Self::Internal => write!(f, "internal"),
        }
    }
}
