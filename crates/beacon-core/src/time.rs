//! Time abstractions for session timing and retry backoff.
//!
//! Provides a clock abstraction so session times and backoff waits can be
//! driven deterministically in tests while production code uses the
//! monotonic system clock and tokio timers.

use std::{
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

/// Clock abstraction for time operations.
///
/// Production code uses `RealClock`; tests inject `TestClock` to make
/// backoff waits instant and session times exact.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Returns the current monotonic instant.
    fn now(&self) -> Instant;

    /// Sleeps for the specified duration.
    ///
    /// In production this maps to `tokio::time::sleep`, in tests this
    /// advances virtual time immediately.
    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}

/// Monotonic system clock backed by tokio timers.
#[derive(Debug, Clone, Copy, Default)]
pub struct RealClock;

impl RealClock {
    /// Creates a new real clock instance.
    pub fn new() -> Self {
        Self
    }
}

impl Clock for RealClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Test clock for deterministic time control.
///
/// Monotonic time only moves when `advance` or `sleep` is called. Clones
/// share the same virtual time.
#[derive(Debug, Clone)]
pub struct TestClock {
    /// Virtual nanoseconds elapsed since creation
    elapsed_ns: Arc<AtomicU64>,
    /// Anchor for the instants handed out by `now`
    base_instant: Instant,
}

impl TestClock {
    /// Creates a test clock at virtual time zero.
    pub fn new() -> Self {
        Self { elapsed_ns: Arc::new(AtomicU64::new(0)), base_instant: Instant::now() }
    }

    /// Advances the clock by the specified duration.
    pub fn advance(&self, duration: Duration) {
        let duration_ns = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
        self.elapsed_ns.fetch_add(duration_ns, Ordering::AcqRel);
    }

    /// Returns total virtual time since clock creation.
    pub fn elapsed(&self) -> Duration {
        Duration::from_nanos(self.elapsed_ns.load(Ordering::Acquire))
    }
}

impl Default for TestClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TestClock {
    fn now(&self) -> Instant {
        self.base_instant + self.elapsed()
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        // Virtual sleep: move time forward, then let other tasks run
        self.advance(duration);
        Box::pin(tokio::task::yield_now())
    }
}
