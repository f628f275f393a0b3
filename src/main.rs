//! Beacon telemetry demo host.
//!
//! Starts a tracking session, tracks one event per line read from stdin and
//! flushes the queue on EOF or a shutdown signal. Undelivered events are
//! retried by the next run.
//!
//! Configuration comes from `beacon.toml` (or the file named by
//! `BEACON_CONFIG`), overridden by `BEACON_*` environment variables.

use std::path::PathBuf;

use anyhow::{Context, Result};
use beacon_delivery::{TrackerConfig, TrackingSession};
use figment::providers::Env;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing()?;

    let config_path = std::env::var("BEACON_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("beacon.toml"));

    let figment = TrackerConfig::figment(Some(&config_path))
        .merge(Env::prefixed("BEACON_").ignore(&["config"]));
    let config = TrackerConfig::from_figment(&figment).context("Failed to load configuration")?;
    info!(
        collector_url = %config.collector_url,
        queue_path = %config.queue_path().display(),
        retry_interval_ms = config.retry_interval_ms,
        "Configuration loaded"
    );

    let session =
        TrackingSession::from_config(&config).context("Failed to create tracking session")?;
    session.start().await;

    info!("Reading event names from stdin, one per line");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    let name = line.trim();
                    if !name.is_empty() {
                        let _ = session.track(name);
                    }
                },
                Ok(None) => {
                    info!("End of input");
                    break;
                },
                Err(e) => {
                    error!(error = %e, "Failed to read stdin");
                    break;
                },
            },
            () = &mut shutdown => break,
        }
    }

    session.shutdown().await;

    let stats = session.driver().stats().await;
    let pending = session.driver().pending().await.len();
    info!(
        pending,
        delivered = stats.delivered,
        failed_attempts = stats.failed_attempts,
        persist_failures = stats.persist_failures,
        "Beacon shutdown complete"
    );
    Ok(())
}

/// Initializes tracing with environment-based configuration.
fn init_tracing() -> Result<()> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info,beacon=debug,beacon_delivery=debug"))
        .context("Invalid RUST_LOG environment variable")?;

    let fmt_layer = fmt::layer().with_target(true).with_writer(std::io::stderr);

    tracing_subscriber::registry().with(filter).with(fmt_layer).init();
    Ok(())
}

/// Waits for shutdown signal (CTRL+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received CTRL+C signal");
        },
        () = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}
