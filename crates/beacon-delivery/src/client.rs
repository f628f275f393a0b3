//! HTTP transport capability for event delivery.
//!
//! The delivery layer only needs `POST(url, headers, body) -> status`, so the
//! transport is a trait. `ReqwestTransport` is the production implementation;
//! `mock::ScriptedTransport` replays canned responses in tests.

use std::{future::Future, pin::Pin, time::Duration};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{DeliveryError, Result};

/// A single outgoing POST.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    /// Collector URL.
    pub url: String,
    /// Request headers as name/value pairs.
    pub headers: Vec<(String, String)>,
    /// Request body.
    pub body: Bytes,
}

/// Response metadata returned by a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportResponse {
    /// HTTP status code.
    pub status_code: u16,
    /// Round-trip duration.
    pub duration: Duration,
}

/// Opaque HTTP POST capability.
///
/// `Err` means no response was obtained (connection refused, DNS failure,
/// timeout). Any received response, whatever its status, is `Ok`.
pub trait HttpTransport: Send + Sync + std::fmt::Debug {
    /// Issues the POST and waits for the response status.
    fn post(
        &self,
        request: TransportRequest,
    ) -> Pin<Box<dyn Future<Output = Result<TransportResponse>> + Send + '_>>;
}

/// Configuration for the production HTTP transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Request timeout applied by the HTTP client.
    pub timeout: Duration,
    /// User agent string for requests.
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(crate::DEFAULT_TIMEOUT_SECONDS),
            user_agent: "Beacon-Telemetry/0.1".to_string(),
        }
    }
}

/// `reqwest`-backed transport with connection pooling.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    config: ClientConfig,
}

impl ReqwestTransport {
    /// Creates a transport with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Configuration` if the HTTP client cannot be
    /// built.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| {
                DeliveryError::configuration(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self { client, config })
    }

    /// Creates a transport with default configuration.
    pub fn with_defaults() -> Result<Self> {
        Self::new(ClientConfig::default())
    }
}

impl HttpTransport for ReqwestTransport {
    fn post(
        &self,
        request: TransportRequest,
    ) -> Pin<Box<dyn Future<Output = Result<TransportResponse>> + Send + '_>> {
        Box::pin(async move {
            let start_time = std::time::Instant::now();

            let mut http_request = self.client.post(&request.url).body(request.body);
            for (name, value) in &request.headers {
                http_request = http_request.header(name, value);
            }

            match http_request.send().await {
                Ok(response) => Ok(TransportResponse {
                    status_code: response.status().as_u16(),
                    duration: start_time.elapsed(),
                }),
                Err(e) => {
                    let duration = start_time.elapsed();
                    warn!(duration_ms = duration.as_millis(), "request failed: {}", e);

                    if e.is_timeout() {
                        return Err(DeliveryError::timeout(self.config.timeout.as_secs()));
                    }
                    if e.is_connect() {
                        return Err(DeliveryError::transport(format!("connection failed: {e}")));
                    }
                    Err(DeliveryError::transport(e.to_string()))
                },
            }
        })
    }
}

pub mod mock {
    //! Scripted transport for testing delivery logic without a network.
    //!
    //! Responses are consumed in order from a script; once it runs dry the
    //! fallback response is used. Every request is recorded.

    use std::{collections::VecDeque, future::Future, pin::Pin, time::Duration};

    use tokio::sync::{Mutex, Notify};

    use super::{HttpTransport, TransportRequest, TransportResponse};
    use crate::error::{DeliveryError, Result};

    /// Canned outcome for one request.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum ScriptedResponse {
        /// Respond with this HTTP status.
        Status(u16),
        /// Fail at the transport level with this message.
        TransportError(String),
    }

    /// In-memory transport replaying scripted responses.
    #[derive(Debug)]
    pub struct ScriptedTransport {
        script: Mutex<VecDeque<ScriptedResponse>>,
        fallback: Mutex<ScriptedResponse>,
        delay: Mutex<Duration>,
        requests: Mutex<Vec<TransportRequest>>,
        request_seen: Notify,
    }

    impl ScriptedTransport {
        /// Creates a transport that answers every request with `fallback`.
        pub fn new(fallback: ScriptedResponse) -> Self {
            Self {
                script: Mutex::new(VecDeque::new()),
                fallback: Mutex::new(fallback),
                delay: Mutex::new(Duration::ZERO),
                requests: Mutex::new(Vec::new()),
                request_seen: Notify::new(),
            }
        }

        /// Transport that accepts everything with HTTP 200.
        pub fn accepting() -> Self {
            Self::new(ScriptedResponse::Status(200))
        }

        /// Transport that fails every request at the transport level.
        pub fn failing() -> Self {
            Self::new(ScriptedResponse::TransportError("connection refused".to_string()))
        }

        /// Queues responses to use before the fallback.
        pub async fn push_responses(&self, responses: impl IntoIterator<Item = ScriptedResponse>) {
            self.script.lock().await.extend(responses);
        }

        /// Replaces the fallback response.
        pub async fn set_fallback(&self, response: ScriptedResponse) {
            *self.fallback.lock().await = response;
        }

        /// Holds every response for `delay` after the request is recorded.
        pub async fn set_delay(&self, delay: Duration) {
            *self.delay.lock().await = delay;
        }

        /// Returns all recorded requests.
        pub async fn requests(&self) -> Vec<TransportRequest> {
            self.requests.lock().await.clone()
        }

        /// Returns the `event` field of every recorded request body.
        pub async fn delivered_names(&self) -> Vec<String> {
            self.requests
                .lock()
                .await
                .iter()
                .filter_map(|request| {
                    serde_json::from_slice::<serde_json::Value>(&request.body)
                        .ok()
                        .and_then(|body| body.get("event")?.as_str().map(str::to_string))
                })
                .collect()
        }

        /// Number of requests seen so far.
        pub async fn request_count(&self) -> usize {
            self.requests.lock().await.len()
        }

        /// Resolves once at least `count` requests have been recorded.
        pub async fn wait_for_requests(&self, count: usize) {
            loop {
                let notified = self.request_seen.notified();
                if self.requests.lock().await.len() >= count {
                    return;
                }
                notified.await;
            }
        }
    }

    impl HttpTransport for ScriptedTransport {
        fn post(
            &self,
            request: TransportRequest,
        ) -> Pin<Box<dyn Future<Output = Result<TransportResponse>> + Send + '_>> {
            Box::pin(async move {
                self.requests.lock().await.push(request);
                self.request_seen.notify_waiters();

                let delay = *self.delay.lock().await;
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }

                let next = self.script.lock().await.pop_front();
                let response = match next {
                    Some(response) => response,
                    None => self.fallback.lock().await.clone(),
                };

                match response {
                    ScriptedResponse::Status(status_code) => {
                        Ok(TransportResponse { status_code, duration: Duration::ZERO })
                    },
                    ScriptedResponse::TransportError(message) => {
                        Err(DeliveryError::transport(message))
                    },
                }
            })
        }
    }
}
