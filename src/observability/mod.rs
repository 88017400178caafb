//! Logging setup.
//!
//! The library only emits `tracing` events and `metrics` samples. Binaries
//! embedding the store decide whether to install a subscriber; this module
//! provides the one kvtree tools use.

use crate::config::{LogFormat, LoggingSettings};
use crate::{Error, Result};
use std::sync::OnceLock;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Filter variable checked before `RUST_LOG`.
pub const LOG_ENV: &str = "KVTREE_LOG";

static LOGGING_INIT: OnceLock<()> = OnceLock::new();

/// Installs the global `tracing` subscriber.
///
/// The filter comes from `KVTREE_LOG`, then `RUST_LOG`, then
/// `settings.level`. Output goes to stderr.
///
/// # Errors
///
/// Returns [`Error::OperationFailed`] with operation `observability_init` if
/// a global subscriber is already installed.
pub fn init_logging(settings: &LoggingSettings) -> Result<()> {
    if LOGGING_INIT.get().is_some() {
        return Err(Error::OperationFailed {
            operation: "observability_init".to_string(),
            cause: "logging already initialized".to_string(),
        });
    }

    let filter = build_filter(settings, |key| std::env::var(key).ok());

    match settings.format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(std::io::stderr)
                        .with_current_span(true)
                        .with_span_list(true)
                        .with_target(true)
                        .with_thread_ids(true),
                )
                .with(filter)
                .try_init()
                .map_err(init_error)?;
        },
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(
                    tracing_subscriber::fmt::layer()
                        .pretty()
                        .with_writer(std::io::stderr)
                        .with_target(true)
                        .with_thread_ids(true),
                )
                .with(filter)
                .try_init()
                .map_err(init_error)?;
        },
    }

    LOGGING_INIT.set(()).map_err(|()| Error::OperationFailed {
        operation: "observability_init".to_string(),
        cause: "failed to mark logging initialized".to_string(),
    })?;

    tracing::debug!(level = %settings.level, format = ?settings.format, "Logging initialized");
    Ok(())
}

fn build_filter(settings: &LoggingSettings, lookup: impl Fn(&str) -> Option<String>) -> EnvFilter {
    let directive = lookup(LOG_ENV)
        .or_else(|| lookup("RUST_LOG"))
        .filter(|d| !d.trim().is_empty())
        .unwrap_or_else(|| settings.level.clone());

    EnvFilter::try_new(&directive).unwrap_or_else(|e| {
        tracing::warn!(directive = %directive, error = %e, "Invalid log filter, using 'info'");
        EnvFilter::new("info")
    })
}

fn init_error(e: tracing_subscriber::util::TryInitError) -> Error {
    Error::OperationFailed {
        operation: "observability_init".to_string(),
        cause: e.to_string(),
    }
}
