//! Tracker configuration.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use figment::{
    providers::{Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::{
    client::ClientConfig,
    error::{DeliveryError, Result},
    retry::{BackoffStrategy, RetryPolicy},
};

/// Complete tracker configuration with defaults and optional file overrides.
///
/// Configuration is layered in priority order:
/// 1. Any providers the host merges on top of [`TrackerConfig::figment`]
/// 2. Configuration file (TOML), if given and present
/// 3. Built-in defaults (lowest priority)
///
/// The defaults reproduce the stock SDK behaviour: one collector URL, a
/// five second retry interval and retry-forever.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Collector endpoint receiving one POST per event.
    #[serde(default = "default_collector_url")]
    pub collector_url: String,
    /// Directory holding the persisted event queue.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    // Retry
    /// Base wait between retries, and while offline, in milliseconds.
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,
    /// How the wait grows across consecutive failures.
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff: BackoffStrategy,
    /// Upper bound on the retry wait in milliseconds.
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
    /// Jitter factor for retry timing (0.0 to 1.0).
    #[serde(default)]
    pub retry_jitter_factor: f64,
    /// Consecutive failures before the head event is dropped. Unset retries
    /// forever.
    #[serde(default)]
    pub max_attempts: Option<u32>,

    // Client
    /// HTTP request timeout in seconds.
    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,
    /// User agent sent with every delivery.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl TrackerConfig {
    /// Layered configuration source: defaults, then the TOML file at `path`.
    ///
    /// A missing file is ignored. Hosts may merge further providers before
    /// calling [`TrackerConfig::from_figment`].
    pub fn figment(path: Option<&Path>) -> Figment {
        let figment = Figment::new().merge(Serialized::defaults(Self::default()));
        match path {
            Some(path) => figment.merge(Toml::file(path)),
            None => figment,
        }
    }

    /// Extracts and validates a configuration.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Configuration` for unparsable sources or
    /// invalid values.
    pub fn from_figment(figment: &Figment) -> Result<Self> {
        let config: Self = figment
            .extract()
            .map_err(|e| {
                DeliveryError::configuration(format!("failed to load configuration: {e}"))
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Loads defaults overlaid with the TOML file at `path`.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Configuration` for unparsable files or
    /// invalid values.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::from_figment(&Self::figment(path))
    }

    /// Full path of the persisted queue file.
    pub fn queue_path(&self) -> PathBuf {
        self.data_dir.join(crate::QUEUE_FILE_NAME)
    }

    /// Convert to retry policy.
    pub fn to_retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            backoff_interval: Duration::from_millis(self.retry_interval_ms),
            backoff_strategy: self.retry_backoff,
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
            jitter_factor: self.retry_jitter_factor,
            max_attempts: self.max_attempts,
        }
    }

    /// Convert to HTTP client configuration.
    pub fn to_client_config(&self) -> ClientConfig {
        ClientConfig {
            timeout: Duration::from_secs(self.request_timeout_seconds),
            user_agent: self.user_agent.clone(),
        }
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Configuration` describing the first invalid
    /// value.
    pub fn validate(&self) -> Result<()> {
        let url = reqwest::Url::parse(&self.collector_url).map_err(|e| {
            let collector_url = &self.collector_url;
            DeliveryError::configuration(format!("invalid collector_url {collector_url:?}: {e}"))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(DeliveryError::configuration("collector_url must use http or https"));
        }

        if self.retry_interval_ms == 0 {
            return Err(DeliveryError::configuration("retry_interval_ms must be greater than 0"));
        }

        if self.retry_max_delay_ms < self.retry_interval_ms {
            return Err(DeliveryError::configuration(
                "retry_max_delay_ms cannot be less than retry_interval_ms",
            ));
        }

        if !(0.0..=1.0).contains(&self.retry_jitter_factor) {
            return Err(DeliveryError::configuration(
                "retry_jitter_factor must be between 0.0 and 1.0",
            ));
        }

        if self.max_attempts == Some(0) {
            return Err(DeliveryError::configuration("max_attempts must be greater than 0"));
        }

        if self.request_timeout_seconds == 0 {
            return Err(DeliveryError::configuration(
                "request_timeout_seconds must be greater than 0",
            ));
        }

        Ok(())
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            collector_url: default_collector_url(),
            data_dir: default_data_dir(),
            retry_interval_ms: default_retry_interval_ms(),
            retry_backoff: default_retry_backoff(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            retry_jitter_factor: 0.0,
            max_attempts: None,
            request_timeout_seconds: default_request_timeout_seconds(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_collector_url() -> String {
    crate::DEFAULT_COLLECTOR_URL.to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(".beacon")
}

fn default_retry_interval_ms() -> u64 {
    crate::DEFAULT_RETRY_INTERVAL_MS
}

fn default_retry_backoff() -> BackoffStrategy {
    BackoffStrategy::Fixed
}

fn default_retry_max_delay_ms() -> u64 {
    300_000
}

fn default_request_timeout_seconds() -> u64 {
    crate::DEFAULT_TIMEOUT_SECONDS
}

fn default_user_agent() -> String {
    ClientConfig::default().user_agent
}
