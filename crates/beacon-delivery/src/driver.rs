//! Pending queue owner and single-flight retry loop.
//!
//! The driver holds every event that failed its first delivery. One
//! `tokio::sync::Mutex` guards the queue, the draining flag and every
//! snapshot write, so mutations and their persisted snapshots happen in the
//! same order. At most one retry loop runs at a time.
//!
//! # Loop
//!
//! ```text
//!            enqueue_failed / resume
//!   ┌──────┐ ───────────────────────▶ ┌──────────┐
//!   │ Idle │                          │ Draining │ ◀─┐ failure: wait, retry head
//!   └──────┘ ◀─────────────────────── └──────────┘ ──┘ success: dequeue, persist
//!                 queue empty
//! ```
//!
//! The head is never skipped: a record that keeps failing blocks everything
//! behind it unless the retry policy sets `max_attempts`.

use std::{
    collections::{BTreeMap, VecDeque},
    sync::{Arc, PoisonError},
    time::Duration,
};

use beacon_core::{Clock, EventRecord};
use tokio::sync::{Mutex, Notify, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    attempt::{DeliveryAttempt, DeliveryOutcome},
    error::Result,
    retry::{RetryDecision, RetryPolicy},
    storage::PersistentQueueStore,
};

/// Whether a retry loop is currently running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    /// No loop running.
    Idle,
    /// A loop is working through the queue.
    Draining,
}

/// Counters for monitoring the driver.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DriverStats {
    /// Retry loops spawned since creation.
    pub loops_started: u64,
    /// Queued records delivered by the loop.
    pub delivered: u64,
    /// Failed delivery attempts made by the loop.
    pub failed_attempts: u64,
    /// Backoff waits caused by missing connectivity.
    pub connectivity_waits: u64,
    /// Records dropped after exhausting `max_attempts`.
    pub dropped: u64,
    /// Snapshot writes that failed.
    pub persist_failures: u64,
}

/// Handle for a record whose immediate delivery attempt is still running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InFlightId(u64);

#[derive(Debug, Default)]
struct PendingQueue {
    records: VecDeque<EventRecord>,
    draining: bool,
    /// Previous run's snapshot has been merged into `records`.
    loaded: bool,
    /// Records restored by that merge, reported by the first `resume`.
    restored: usize,
    resumed: bool,
    /// In-flight records a flush moved into `records`.
    flushed_in_flight: BTreeMap<InFlightId, EventRecord>,
}

#[derive(Debug, Default)]
struct InFlight {
    next_id: u64,
    records: BTreeMap<InFlightId, EventRecord>,
}

#[derive(Debug)]
struct DriverInner {
    queue: Mutex<PendingQueue>,
    // Lock order: `queue` before `in_flight`. Never held across an await.
    in_flight: std::sync::Mutex<InFlight>,
    store: PersistentQueueStore,
    attempt: DeliveryAttempt,
    policy: RetryPolicy,
    clock: Arc<dyn Clock>,
    stats: RwLock<DriverStats>,
    cancellation_token: CancellationToken,
    idle: Notify,
}

/// Handle to the pending queue and its retry loop.
///
/// Cloning is cheap; all clones drive the same queue.
#[derive(Debug, Clone)]
pub struct RetryDriver {
    inner: Arc<DriverInner>,
}

impl RetryDriver {
    /// Creates an idle driver with an empty in-memory queue.
    pub fn new(
        store: PersistentQueueStore,
        attempt: DeliveryAttempt,
        policy: RetryPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Arc::new(DriverInner {
                queue: Mutex::new(PendingQueue::default()),
                in_flight: std::sync::Mutex::new(InFlight::default()),
                store,
                attempt,
                policy,
                clock,
                stats: RwLock::new(DriverStats::default()),
                cancellation_token: CancellationToken::new(),
                idle: Notify::new(),
            }),
        }
    }

    /// Loads the queue left by a previous run and starts retrying it.
    ///
    /// Loaded records are older than anything enqueued in this process and
    /// go to the front. Returns the number of restored records on the first
    /// call and 0 afterwards.
    pub async fn resume(&self) -> usize {
        let mut queue = self.inner.queue.lock().await;
        if queue.resumed {
            debug!("event queue already resumed");
            return 0;
        }
        queue.resumed = true;

        self.inner.load_persisted(&mut queue).await;
        let restored = queue.restored;
        if restored > 0 {
            info!(restored, "resuming persisted event queue");
        }

        self.ensure_draining(&mut queue).await;
        restored
    }

    /// Queues a record whose immediate delivery failed.
    ///
    /// Appends, persists, and starts the retry loop if none is running.
    pub async fn enqueue_failed(&self, record: EventRecord) {
        let mut queue = self.inner.queue.lock().await;
        self.push_and_persist(&mut queue, record).await;
    }

    /// Registers a record whose immediate delivery is about to start.
    ///
    /// Until [`RetryDriver::complete_attempt`] is called, a flush persists
    /// the record ahead of the flushed one.
    pub fn begin_attempt(&self, record: EventRecord) -> InFlightId {
        let mut in_flight = self.inner.lock_in_flight();
        let id = InFlightId(in_flight.next_id);
        in_flight.next_id += 1;
        in_flight.records.insert(id, record);
        id
    }

    /// Settles an attempt registered with [`RetryDriver::begin_attempt`].
    ///
    /// A failed record is queued for retry. If a flush already persisted the
    /// record, a success removes it from the queue again.
    pub async fn complete_attempt(&self, id: InFlightId, delivered: bool) {
        let mut queue = self.inner.queue.lock().await;
        let registered = self.inner.lock_in_flight().records.remove(&id);

        match (registered, delivered) {
            (Some(_), true) => {},
            (Some(record), false) => self.push_and_persist(&mut queue, record).await,
            (None, true) => {
                let flushed = queue.flushed_in_flight.remove(&id);
                if let Some(record) = flushed {
                    if let Some(position) = queue.records.iter().position(|r| *r == record) {
                        let _ = queue.records.remove(position);
                        let _ = self.inner.persist(&queue).await;
                    }
                }
            },
            (None, false) => {
                let _ = queue.flushed_in_flight.remove(&id);
            },
        }
    }

    /// Number of immediate attempts still running.
    pub fn in_flight(&self) -> usize {
        self.inner.lock_in_flight().records.len()
    }

    /// Appends `record` and persists the queue for a clean shutdown.
    ///
    /// Records with an attempt still in flight are queued ahead of `record`.
    /// Stops the retry loop; no new loop is started afterwards.
    ///
    /// # Errors
    ///
    /// Returns the persistence error if the final snapshot could not be
    /// written. The records are still held in memory.
    pub async fn flush_with(&self, record: EventRecord) -> Result<()> {
        let mut queue = self.inner.queue.lock().await;
        self.inner.load_persisted(&mut queue).await;

        let in_flight = std::mem::take(&mut self.inner.lock_in_flight().records);
        for (id, pending) in in_flight {
            queue.records.push_back(pending.clone());
            queue.flushed_in_flight.insert(id, pending);
        }
        queue.records.push_back(record);
        self.inner.cancellation_token.cancel();

        let result = self.inner.persist(&queue).await;
        info!(queued = queue.records.len(), "event queue flushed");
        result
    }

    /// Snapshot of the pending queue, head first.
    pub async fn pending(&self) -> Vec<EventRecord> {
        self.inner.queue.lock().await.records.iter().cloned().collect()
    }

    /// Current loop state.
    pub async fn state(&self) -> DriverState {
        if self.inner.queue.lock().await.draining {
            DriverState::Draining
        } else {
            DriverState::Idle
        }
    }

    /// Returns current driver statistics.
    pub async fn stats(&self) -> DriverStats {
        self.inner.stats.read().await.clone()
    }

    /// Resolves once no retry loop is running.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            if !self.inner.queue.lock().await.draining {
                return;
            }
            notified.await;
        }
    }

    async fn push_and_persist(&self, queue: &mut PendingQueue, record: EventRecord) {
        self.inner.load_persisted(queue).await;
        queue.records.push_back(record);
        debug!(queued = queue.records.len(), "event queued for retry");

        let _ = self.inner.persist(queue).await;
        self.ensure_draining(queue).await;
    }

    /// Spawns the retry loop unless one is running, the queue is empty, or
    /// the driver has been flushed. Caller holds the queue lock.
    async fn ensure_draining(&self, queue: &mut PendingQueue) {
        if queue.draining
            || queue.records.is_empty()
            || self.inner.cancellation_token.is_cancelled()
        {
            return;
        }

        queue.draining = true;
        self.inner.stats.write().await.loops_started += 1;
        info!(queued = queue.records.len(), "starting retry loop");

        tokio::spawn(run_retry_loop(self.inner.clone()));
    }
}

impl DriverInner {
    /// Merges the previous run's snapshot into the front of the queue, once.
    ///
    /// Runs before the first snapshot write so that write cannot clobber
    /// records a previous run left behind.
    async fn load_persisted(&self, queue: &mut PendingQueue) {
        if queue.loaded {
            return;
        }
        queue.loaded = true;

        let loaded = self.store.load().await;
        queue.restored = loaded.len();
        for record in loaded.into_iter().rev() {
            queue.records.push_front(record);
        }
    }

    fn lock_in_flight(&self) -> std::sync::MutexGuard<'_, InFlight> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Writes the queue snapshot. Failures are logged and counted; the
    /// in-memory queue stays authoritative.
    async fn persist(&self, queue: &PendingQueue) -> Result<()> {
        let result = self.store.save(queue.records.iter()).await;
        if let Err(error) = &result {
            error!(error = %error, queued = queue.records.len(), "error saving event queue");
            self.stats.write().await.persist_failures += 1;
        }
        result
    }

    /// Waits for `delay`; returns `false` if the driver was flushed meanwhile.
    async fn pause(&self, delay: Duration) -> bool {
        tokio::select! {
            () = self.clock.sleep(delay) => true,
            () = self.cancellation_token.cancelled() => false,
        }
    }

    /// Removes `head` from the queue and persists.
    async fn remove_head(&self, head: &EventRecord) {
        let mut queue = self.queue.lock().await;
        if let Some(position) = queue.records.iter().position(|record| record == head) {
            let _ = queue.records.remove(position);
        }
        let _ = self.persist(&queue).await;
    }

    async fn mark_idle(&self) {
        self.queue.lock().await.draining = false;
        self.idle.notify_waiters();
    }
}

async fn run_retry_loop(inner: Arc<DriverInner>) {
    let mut consecutive_failures: u32 = 0;

    loop {
        if inner.cancellation_token.is_cancelled() {
            debug!("retry loop stopped by flush");
            break;
        }

        let head = {
            let mut queue = inner.queue.lock().await;
            match queue.records.front() {
                Some(record) => record.clone(),
                None => {
                    queue.draining = false;
                    drop(queue);
                    inner.idle.notify_waiters();
                    info!("event queue drained");
                    return;
                },
            }
        };

        if !inner.attempt.is_reachable() {
            inner.stats.write().await.connectivity_waits += 1;
            let backoff_ms = inner.policy.backoff_interval.as_millis();
            debug!(backoff_ms, "waiting for connectivity");
            if !inner.pause(inner.policy.backoff_interval).await {
                break;
            }
            continue;
        }

        match inner.attempt.deliver(&head).await {
            DeliveryOutcome::Delivered { .. } => {
                consecutive_failures = 0;
                inner.stats.write().await.delivered += 1;
                inner.remove_head(&head).await;
            },
            DeliveryOutcome::TransientFailure(failure) => {
                consecutive_failures = consecutive_failures.saturating_add(1);
                inner.stats.write().await.failed_attempts += 1;

                match inner.policy.decide(consecutive_failures, &failure) {
                    RetryDecision::Retry { delay } => {
                        debug!(
                            attempt = consecutive_failures,
                            delay_ms = delay.as_millis(),
                            "retrying queued event later"
                        );
                        if !inner.pause(delay).await {
                            break;
                        }
                    },
                    RetryDecision::GiveUp { reason } => {
                        warn!(event = %head.name(), reason = %reason, "dropping queued event");
                        consecutive_failures = 0;
                        inner.stats.write().await.dropped += 1;
                        inner.remove_head(&head).await;
                    },
                }
            },
        }
    }

    inner.mark_idle().await;
}

#[cfg(test)]
mod tests {
    use beacon_core::{EventName, TestClock};

    use super::*;
    use crate::{
        client::mock::{ScriptedResponse, ScriptedTransport},
        connectivity::AlwaysReachable,
        storage::mock::MemoryStorage,
    };

    fn record(name: &str) -> EventRecord {
        EventRecord::new(EventName::new(name).unwrap(), 1.0).unwrap()
    }

    fn driver(transport: Arc<ScriptedTransport>, storage: Arc<MemoryStorage>) -> RetryDriver {
        let connectivity = Arc::new(AlwaysReachable);
        let attempt = DeliveryAttempt::new("http://collector.test/event", transport, connectivity);
        RetryDriver::new(
            PersistentQueueStore::new(storage, "q.json"),
            attempt,
            RetryPolicy::default(),
            Arc::new(TestClock::new()),
        )
    }

    #[tokio::test]
    async fn empty_resume_stays_idle() {
        let driver =
            driver(Arc::new(ScriptedTransport::accepting()), Arc::new(MemoryStorage::new()));

        assert_eq!(driver.resume().await, 0);
        assert_eq!(driver.state().await, DriverState::Idle);
        assert_eq!(driver.stats().await.loops_started, 0);
    }

    #[tokio::test]
    async fn second_resume_does_not_reload() {
        let storage = Arc::new(MemoryStorage::new());
        let snapshot = br#"{"events":[{"event":"a","session_time":1.0}]}"#;
        storage.insert("q.json", snapshot.to_vec()).await;
        let transport = Arc::new(ScriptedTransport::new(ScriptedResponse::Status(503)));
        let driver = driver(transport, storage);

        assert_eq!(driver.resume().await, 1);
        assert_eq!(driver.resume().await, 0);
        assert_eq!(driver.pending().await, vec![record("a")]);
    }

    #[tokio::test]
    async fn flush_stops_loop_and_blocks_restart() {
        let transport = Arc::new(ScriptedTransport::failing());
        let storage = Arc::new(MemoryStorage::new());
        let driver = driver(transport, storage);

        driver.enqueue_failed(record("a")).await;
        driver.flush_with(record("end")).await.unwrap();
        driver.wait_idle().await;

        driver.enqueue_failed(record("late")).await;
        assert_eq!(driver.state().await, DriverState::Idle);
        assert_eq!(driver.stats().await.loops_started, 1);
    }
}
