//! Reliable delivery of telemetry events.
//!
//! This crate records application events, posts each one to a remote
//! collector, and guarantees eventual delivery across offline periods and
//! process restarts by persisting undelivered events and retrying them.
//!
//! # Architecture
//!
//! Every tracked event gets one immediate delivery attempt. Events that fail
//! go to a FIFO pending queue owned by the [`RetryDriver`], which rewrites
//! the queue snapshot on disk after every mutation and runs a single retry
//! loop until the queue drains:
//!
//! 1. **Track** - `TrackingSession` stamps the event with session time
//! 2. **Attempt** - `DeliveryAttempt` posts it and classifies the outcome
//! 3. **Queue** - failures are appended and persisted
//! 4. **Retry** - the loop retries the head, dequeuing only on success
//!
//! Delivery is at-least-once: a crash between a successful send and the next
//! snapshot write can redeliver an event, but never loses one.
//!
//! # Example
//!
//! ```no_run
//! use beacon_delivery::{TrackerConfig, TrackingSession, DeliveryError};
//!
//! # async fn example() -> std::result::Result<(), DeliveryError> {
//! let config = TrackerConfig::load(None)?;
//! let session = TrackingSession::from_config(&config)?;
//!
//! session.start().await;
//! session.track("level complete");
//! session.shutdown().await;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod attempt;
pub mod client;
pub mod config;
pub mod connectivity;
pub mod driver;
pub mod error;
pub mod retry;
pub mod session;
pub mod storage;

pub use attempt::{DeliveryAttempt, DeliveryOutcome};
pub use config::TrackerConfig;
pub use driver::{DriverState, DriverStats, RetryDriver};
pub use error::{DeliveryError, Result};
pub use session::TrackingSession;
pub use storage::PersistentQueueStore;

/// Collector endpoint used when none is configured.
pub const DEFAULT_COLLECTOR_URL: &str = "https://exampleapi.rollic.gs/event";

/// File name of the persisted queue inside the data directory.
pub const QUEUE_FILE_NAME: &str = "eventQueue.json";

/// Default wait between retries, in milliseconds.
pub const DEFAULT_RETRY_INTERVAL_MS: u64 = 5_000;

/// Default HTTP request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 30;
