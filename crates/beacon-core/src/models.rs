//! Event records and their serialized shapes.
//!
//! `EventRecord` is the in-memory unit of telemetry. It never appears on the
//! wire directly: delivery bodies use [`WireEvent`] and the persisted queue
//! file uses [`QueueSnapshot`], so the JSON contract stays fixed even if the
//! in-memory representation changes.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Name of the synthetic event recorded when a session shuts down.
pub const SESSION_END_EVENT: &str = "session end";

/// Non-empty, opaque event identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventName(String);

impl EventName {
    /// Creates an event name, rejecting the empty string.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidEventName` if `name` is empty.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(CoreError::InvalidEventName);
        }
        Ok(Self(name))
    }

    /// Returns the name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single tracked occurrence, stamped with elapsed session time.
///
/// Records are immutable once built; the pipeline clones them into the
/// pending queue and drops them only after a confirmed delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct EventRecord {
    name: EventName,
    session_time_seconds: f64,
}

impl EventRecord {
    /// Creates a record for `name` at `session_time_seconds` into the session.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidSessionTime` for negative, NaN or infinite
    /// times.
    pub fn new(name: EventName, session_time_seconds: f64) -> Result<Self> {
        if !session_time_seconds.is_finite() || session_time_seconds < 0.0 {
            return Err(CoreError::InvalidSessionTime(session_time_seconds));
        }
        Ok(Self { name, session_time_seconds })
    }

    /// Builds the synthetic record written on shutdown.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidSessionTime` for an invalid session time.
    pub fn session_end(session_time_seconds: f64) -> Result<Self> {
        Self::new(EventName(SESSION_END_EVENT.to_string()), session_time_seconds)
    }

    /// Event identifier.
    pub fn name(&self) -> &EventName {
        &self.name
    }

    /// Seconds elapsed since session start when the record was created.
    pub fn session_time_seconds(&self) -> f64 {
        self.session_time_seconds
    }

    /// Encodes the record as a delivery body: `{"event": .., "session_time": ..}`.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Serialization` if JSON encoding fails.
    pub fn to_wire_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&WireEvent::from(self))?)
    }
}

/// Wire and storage shape of one event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireEvent {
    /// Event name.
    pub event: String,
    /// Elapsed session seconds.
    pub session_time: f64,
}

impl From<&EventRecord> for WireEvent {
    fn from(record: &EventRecord) -> Self {
        Self {
            event: record.name.as_str().to_string(),
            session_time: record.session_time_seconds,
        }
    }
}

impl TryFrom<WireEvent> for EventRecord {
    type Error = CoreError;

    fn try_from(wire: WireEvent) -> Result<Self> {
        Self::new(EventName::new(wire.event)?, wire.session_time)
    }
}

/// Persisted form of the pending queue: `{"events": [..]}` in FIFO order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    /// Queued events, head first.
    #[serde(default)]
    pub events: Vec<WireEvent>,
}

impl QueueSnapshot {
    /// Captures the given records in order.
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a EventRecord>) -> Self {
        Self { events: records.into_iter().map(WireEvent::from).collect() }
    }

    /// Encodes the snapshot as JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Serialization` if JSON encoding fails.
    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decodes a snapshot from JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Serialization` for malformed input.
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
