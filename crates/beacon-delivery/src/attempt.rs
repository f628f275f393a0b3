//! One delivery of one event, with outcome classification.
//!
//! `DeliveryAttempt` never touches the pending queue. The immediate-send
//! path and the retry loop both go through it, so success means the same
//! thing everywhere: a response in `200..300`.

use std::sync::Arc;

use beacon_core::EventRecord;
use bytes::Bytes;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::{
    client::{HttpTransport, TransportRequest},
    connectivity::Connectivity,
    error::{DeliveryError, ErrorCategory},
};

/// Result of a single delivery.
#[derive(Debug, Clone)]
pub enum DeliveryOutcome {
    /// Collector acknowledged the event with a success status.
    Delivered {
        /// HTTP status returned by the collector
        status_code: u16,
    },
    /// Delivery did not happen; the record should be retried later.
    TransientFailure(DeliveryError),
}

impl DeliveryOutcome {
    /// Returns `true` for `Delivered`.
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered { .. })
    }
}

/// Returns `true` for statuses in `200..300`.
pub fn is_success_status(status_code: u16) -> bool {
    (200..300).contains(&status_code)
}

/// Performs single deliveries against one collector.
#[derive(Debug, Clone)]
pub struct DeliveryAttempt {
    collector_url: String,
    transport: Arc<dyn HttpTransport>,
    connectivity: Arc<dyn Connectivity>,
}

impl DeliveryAttempt {
    /// Creates an attempt runner for `collector_url`.
    pub fn new(
        collector_url: impl Into<String>,
        transport: Arc<dyn HttpTransport>,
        connectivity: Arc<dyn Connectivity>,
    ) -> Self {
        Self { collector_url: collector_url.into(), transport, connectivity }
    }

    /// Whether the connectivity capability currently reports a network.
    pub fn is_reachable(&self) -> bool {
        self.connectivity.is_reachable()
    }

    /// Delivers `record` once and classifies the result.
    ///
    /// Short-circuits to `TransientFailure(ConnectivityUnavailable)` without
    /// a network call when the collector is unreachable.
    pub async fn deliver(&self, record: &EventRecord) -> DeliveryOutcome {
        let span = info_span!(
            "event_delivery",
            event = %record.name(),
            session_time = record.session_time_seconds(),
        );

        async move {
            if !self.connectivity.is_reachable() {
                warn!("failed to send event: network unreachable");
                return DeliveryOutcome::TransientFailure(DeliveryError::ConnectivityUnavailable);
            }

            let body = match record.to_wire_json() {
                Ok(body) => Bytes::from(body),
                Err(e) => return DeliveryOutcome::TransientFailure(DeliveryError::from(e)),
            };

            debug!(url = %self.collector_url, "starting event delivery");

            let request = TransportRequest {
                url: self.collector_url.clone(),
                headers: vec![("content-type".to_string(), "application/json".to_string())],
                body,
            };

            let outcome = match self.transport.post(request).await {
                Ok(response) if is_success_status(response.status_code) => {
                    DeliveryOutcome::Delivered { status_code: response.status_code }
                },
                Ok(response) => DeliveryOutcome::TransientFailure(
                    DeliveryError::unexpected_status(response.status_code),
                ),
                Err(error) => DeliveryOutcome::TransientFailure(error),
            };

            match &outcome {
                DeliveryOutcome::Delivered { status_code } => {
                    info!(status = status_code, "event delivered");
                },
                DeliveryOutcome::TransientFailure(error) => {
                    warn!(
                        error = %error,
                        category = %ErrorCategory::from(error),
                        "failed to send event"
                    );
                },
            }

            outcome
        }
        .instrument(span)
        .await
    }
}
