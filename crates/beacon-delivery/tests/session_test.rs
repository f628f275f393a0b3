//! Integration tests for the host-facing tracking session.

use std::{future::Future, sync::Arc, time::Duration};

use beacon_core::{EventName, EventRecord, TestClock, SESSION_END_EVENT};
use beacon_delivery::{
    client::mock::{ScriptedResponse, ScriptedTransport},
    connectivity::AlwaysReachable,
    storage::mock::MemoryStorage,
    PersistentQueueStore, TrackerConfig, TrackingSession,
};

const TEST_TIMEOUT: Duration = Duration::from_secs(10);

struct Harness {
    config: TrackerConfig,
    storage: Arc<MemoryStorage>,
    clock: TestClock,
}

impl Harness {
    fn new() -> Self {
        Self {
            config: TrackerConfig::default(),
            storage: Arc::new(MemoryStorage::new()),
            clock: TestClock::new(),
        }
    }

    fn session(&self, transport: Arc<ScriptedTransport>) -> TrackingSession {
        TrackingSession::new(
            &self.config,
            transport,
            Arc::new(AlwaysReachable),
            self.storage.clone(),
            Arc::new(self.clock.clone()),
        )
        .unwrap()
    }

    async fn persisted(&self) -> Vec<EventRecord> {
        PersistentQueueStore::new(self.storage.clone(), self.config.queue_path()).load().await
    }
}

fn record(name: &str, time: f64) -> EventRecord {
    EventRecord::new(EventName::new(name).unwrap(), time).unwrap()
}

async fn within<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(TEST_TIMEOUT, future).await.expect("test step timed out")
}

#[tokio::test]
async fn track_before_start_is_rejected() {
    let harness = Harness::new();
    let transport = Arc::new(ScriptedTransport::accepting());
    let session = harness.session(transport.clone());

    assert!(session.session_time().is_none());
    assert!(session.track("too early").is_none());
    assert_eq!(transport.request_count().await, 0);
}

#[tokio::test]
async fn empty_event_name_is_rejected() {
    let harness = Harness::new();
    let transport = Arc::new(ScriptedTransport::accepting());
    let session = harness.session(transport.clone());
    session.start().await;

    assert!(session.track("").is_none());
    assert_eq!(transport.request_count().await, 0);
}

#[tokio::test]
async fn delivered_event_never_touches_the_queue() {
    let harness = Harness::new();
    let transport = Arc::new(ScriptedTransport::accepting());
    let session = harness.session(transport.clone());
    session.start().await;
    harness.clock.advance(Duration::from_millis(1500));

    session.track("level start").unwrap().await.unwrap();

    let requests = transport.requests().await;
    assert_eq!(requests.len(), 1);
    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(body, serde_json::json!({"event": "level start", "session_time": 1.5}));

    assert!(session.driver().pending().await.is_empty());
    assert_eq!(harness.storage.write_count(), 0);
}

#[tokio::test]
async fn failed_event_is_queued_with_its_session_time() {
    let harness = Harness::new();
    let transport = Arc::new(ScriptedTransport::failing());
    let session = harness.session(transport.clone());
    session.start().await;
    harness.clock.advance(Duration::from_secs(3));

    session.track("purchase").unwrap().await.unwrap();

    assert_eq!(harness.persisted().await, vec![record("purchase", 3.0)]);
    assert_eq!(session.driver().pending().await, vec![record("purchase", 3.0)]);
}

#[tokio::test]
async fn start_is_idempotent() {
    let harness = Harness::new();
    let session = harness.session(Arc::new(ScriptedTransport::accepting()));

    session.start().await;
    harness.clock.advance(Duration::from_secs(5));
    session.start().await;

    assert_eq!(session.session_time(), Some(5.0));
}

#[tokio::test]
async fn shutdown_persists_session_end_without_sending_it() {
    let harness = Harness::new();
    let transport = Arc::new(ScriptedTransport::accepting());
    let session = harness.session(transport.clone());
    session.start().await;
    harness.clock.advance(Duration::from_secs(12));

    session.shutdown().await;

    assert_eq!(harness.persisted().await, vec![EventRecord::session_end(12.0).unwrap()]);
    assert_eq!(transport.request_count().await, 0);
}

#[tokio::test]
async fn shutdown_keeps_earlier_failures_ahead_of_session_end() {
    let harness = Harness::new();
    let transport = Arc::new(ScriptedTransport::new(ScriptedResponse::Status(503)));
    let session = harness.session(transport);
    session.start().await;

    session.track("a").unwrap().await.unwrap();
    session.track("b").unwrap().await.unwrap();
    session.shutdown().await;
    within(session.driver().wait_idle()).await;

    let names: Vec<String> =
        harness.persisted().await.iter().map(|record| record.name().to_string()).collect();
    assert_eq!(names, vec!["a", "b", SESSION_END_EVENT]);
}

#[tokio::test]
async fn shutdown_is_idempotent_and_blocks_later_tracking() {
    let harness = Harness::new();
    let transport = Arc::new(ScriptedTransport::accepting());
    let session = harness.session(transport.clone());
    session.start().await;

    session.shutdown().await;
    session.shutdown().await;

    assert!(session.track("after exit").is_none());
    assert_eq!(harness.persisted().await.len(), 1);
    assert_eq!(transport.request_count().await, 0);
}

#[tokio::test]
async fn next_run_delivers_previous_session_end() {
    let harness = Harness::new();

    let first = harness.session(Arc::new(ScriptedTransport::accepting()));
    first.start().await;
    harness.clock.advance(Duration::from_secs(30));
    first.shutdown().await;
    drop(first);

    let transport = Arc::new(ScriptedTransport::accepting());
    let second = harness.session(transport.clone());
    second.start().await;
    within(second.driver().wait_idle()).await;

    assert_eq!(transport.delivered_names().await, vec![SESSION_END_EVENT]);
    assert!(harness.persisted().await.is_empty());
}

/// Dropping the runtime after shutdown aborts the attempt, like a process exit.
#[test]
fn event_in_flight_at_shutdown_survives_restart() {
    let harness = Harness::new();

    {
        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        runtime.block_on(async {
            let transport = Arc::new(ScriptedTransport::new(ScriptedResponse::Status(503)));
            transport.set_delay(Duration::from_secs(60)).await;
            let session = harness.session(transport);
            session.start().await;

            let _attempt = session.track("purchase").unwrap();
            session.shutdown().await;

            let names: Vec<String> =
                harness.persisted().await.iter().map(|record| record.name().to_string()).collect();
            assert_eq!(names, vec!["purchase", SESSION_END_EVENT]);
        });
    }

    let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
    runtime.block_on(async {
        let transport = Arc::new(ScriptedTransport::accepting());
        let session = harness.session(transport.clone());
        session.start().await;
        within(session.driver().wait_idle()).await;

        assert_eq!(transport.delivered_names().await, vec!["purchase", SESSION_END_EVENT]);
        assert!(harness.persisted().await.is_empty());
    });
}

#[tokio::test]
async fn in_flight_success_after_shutdown_leaves_only_session_end() {
    let harness = Harness::new();
    let transport = Arc::new(ScriptedTransport::accepting());
    transport.set_delay(Duration::from_millis(50)).await;
    let session = harness.session(transport);
    session.start().await;

    let attempt = session.track("purchase").unwrap();
    session.shutdown().await;
    assert_eq!(harness.persisted().await.len(), 2);

    within(attempt).await.unwrap();

    assert_eq!(harness.persisted().await, vec![EventRecord::session_end(0.0).unwrap()]);
    assert_eq!(session.driver().in_flight(), 0);
}

#[tokio::test]
async fn in_flight_failure_after_shutdown_is_queued_once() {
    let harness = Harness::new();
    let transport = Arc::new(ScriptedTransport::new(ScriptedResponse::Status(503)));
    transport.set_delay(Duration::from_millis(50)).await;
    let session = harness.session(transport);
    session.start().await;

    let attempt = session.track("purchase").unwrap();
    session.shutdown().await;
    within(attempt).await.unwrap();

    let names: Vec<String> =
        harness.persisted().await.iter().map(|record| record.name().to_string()).collect();
    assert_eq!(names, vec!["purchase", SESSION_END_EVENT]);
    assert_eq!(session.driver().in_flight(), 0);
}
