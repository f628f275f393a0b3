//! Public tracking façade.
//!
//! `TrackingSession` is what a host application talks to: `start` once at
//! launch, `track` for every event, `shutdown` on exit. It owns session
//! timing and decides between the immediate send and the retry queue; the
//! queue itself belongs to the [`RetryDriver`].
//!
//! None of the three calls fails observably. Invalid input and lifecycle
//! misuse are logged and ignored.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, OnceLock,
    },
    time::Instant,
};

use beacon_core::{Clock, EventName, EventRecord, RealClock};
use tokio::{runtime::Handle, sync::Mutex, task::JoinHandle};
use tracing::{debug, error, info, warn};

use crate::{
    attempt::DeliveryAttempt,
    client::{HttpTransport, ReqwestTransport},
    config::TrackerConfig,
    connectivity::{AlwaysReachable, Connectivity},
    driver::RetryDriver,
    error::Result,
    storage::{ByteStorage, FileStorage, PersistentQueueStore},
};

/// Host-facing telemetry session.
#[derive(Debug)]
pub struct TrackingSession {
    attempt: DeliveryAttempt,
    driver: RetryDriver,
    clock: Arc<dyn Clock>,
    started_at: OnceLock<Instant>,
    start_lock: Mutex<()>,
    shut_down: AtomicBool,
}

impl TrackingSession {
    /// Creates a session with explicit collaborators.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Configuration` if `config` is invalid.
    pub fn new(
        config: &TrackerConfig,
        transport: Arc<dyn HttpTransport>,
        connectivity: Arc<dyn Connectivity>,
        storage: Arc<dyn ByteStorage>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;

        let attempt = DeliveryAttempt::new(config.collector_url.clone(), transport, connectivity);
        let store = PersistentQueueStore::new(storage, config.queue_path());
        let driver =
            RetryDriver::new(store, attempt.clone(), config.to_retry_policy(), clock.clone());

        Ok(Self {
            attempt,
            driver,
            clock,
            started_at: OnceLock::new(),
            start_lock: Mutex::new(()),
            shut_down: AtomicBool::new(false),
        })
    }

    /// Creates a session with the production collaborators: `reqwest`
    /// transport, file storage under `config.data_dir`, no reachability
    /// signal and the system clock.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Configuration` if `config` is invalid or the
    /// HTTP client cannot be built.
    pub fn from_config(config: &TrackerConfig) -> Result<Self> {
        let transport = ReqwestTransport::new(config.to_client_config())?;
        Self::new(
            config,
            Arc::new(transport),
            Arc::new(AlwaysReachable),
            Arc::new(FileStorage::new()),
            Arc::new(RealClock::new()),
        )
    }

    /// Starts the session clock and resumes any queue left on disk.
    ///
    /// Idempotent: later calls neither reset the clock nor reload the queue.
    pub async fn start(&self) {
        let _guard = self.start_lock.lock().await;
        if self.started_at.get().is_some() {
            debug!("tracking session already started");
            return;
        }

        let _ = self.started_at.set(self.clock.now());
        let resumed = self.driver.resume().await;
        info!(resumed, "tracking session started");
    }

    /// Seconds since `start`, or `None` before the session has started.
    pub fn session_time(&self) -> Option<f64> {
        self.started_at
            .get()
            .map(|started_at| self.clock.now().saturating_duration_since(*started_at).as_secs_f64())
    }

    /// Records `name` and sends it in the background.
    ///
    /// Returns immediately with the handle of the delivery task. The record
    /// is registered with the driver while the attempt runs, so a shutdown
    /// in the meantime still persists it. A failed immediate delivery hands
    /// the record to the retry queue. Returns `None` when the event is
    /// rejected: empty name, session not started or already shut down, or no
    /// tokio runtime to run on.
    pub fn track(&self, name: impl Into<String>) -> Option<JoinHandle<()>> {
        if self.shut_down.load(Ordering::Acquire) {
            warn!("event tracked after shutdown, ignoring");
            return None;
        }

        let Some(session_time) = self.session_time() else {
            warn!("event tracked before session start, ignoring");
            return None;
        };

        let record =
            match EventName::new(name).and_then(|name| EventRecord::new(name, session_time)) {
                Ok(record) => record,
                Err(e) => {
                    warn!(error = %e, "rejecting tracked event");
                    return None;
                },
            };

        let runtime = match Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                warn!(error = %e, "no async runtime available for event delivery");
                return None;
            },
        };

        let attempt = self.attempt.clone();
        let driver = self.driver.clone();
        let id = driver.begin_attempt(record.clone());
        Some(runtime.spawn(async move {
            let delivered = attempt.deliver(&record).await.is_delivered();
            driver.complete_attempt(id, delivered).await;
        }))
    }

    /// Appends a `"session end"` event and persists the queue.
    ///
    /// Events whose immediate attempt has not finished are persisted ahead
    /// of it. No network round trip is attempted; the events are delivered
    /// by the next run. Returns once the snapshot write has completed.
    /// Idempotent.
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            debug!("tracking session already shut down");
            return;
        }

        let Some(session_time) = self.session_time() else {
            warn!("shutdown before session start, nothing to flush");
            return;
        };

        let record = match EventRecord::session_end(session_time) {
            Ok(record) => record,
            Err(e) => {
                error!(error = %e, "failed to build session end event");
                return;
            },
        };

        if let Err(e) = self.driver.flush_with(record).await {
            error!(error = %e, "session end event kept in memory only");
        }
        info!(session_time, "tracking session shut down");
    }

    /// The retry driver owning the pending queue.
    pub fn driver(&self) -> &RetryDriver {
        &self.driver
    }
}
