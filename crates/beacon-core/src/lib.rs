//! Core domain types for beacon telemetry.
//!
//! Provides the event record that flows through the delivery pipeline, the
//! versioned JSON shapes it takes on the wire and on disk, and the clock
//! abstraction used for session timing and retry backoff. Every other crate
//! depends on these foundational types.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod models;
pub mod time;

pub use error::{CoreError, Result};
pub use models::{EventName, EventRecord, QueueSnapshot, WireEvent, SESSION_END_EVENT};
pub use time::{Clock, RealClock, TestClock};
