//! Tracing subscriber setup.
//!
//! The engine only emits `tracing` events; installing a subscriber is left
//! to the embedding application through these helpers.

use micropipe_shared::{PipelineError, PipelineResult};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// File name prefix for rolling log files.
pub const LOG_FILE_PREFIX: &str = "micropipe.log";

/// Build a filter from `RUST_LOG`, falling back to `default_directive`.
fn env_filter(default_directive: &str) -> PipelineResult<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(default_directive).map_err(|e| {
        PipelineError::Config(format!(
            "invalid log filter '{}': {}",
            default_directive, e
        ))
    })
}

/// Install a stderr subscriber.
///
/// Calling this more than once is harmless; only the first call installs.
pub fn init_logging(default_directive: &str) -> PipelineResult<()> {
    let filter = env_filter(default_directive)?;

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true),
        )
        .try_init();

    if installed.is_err() {
        tracing::debug!("Global subscriber already installed, keeping it");
    }
    Ok(())
}

/// Install a subscriber writing to a daily rolling file under `dir`.
///
/// The returned guard flushes buffered lines on drop and must be held for
/// as long as logging is needed.
pub fn init_file_logging(dir: &Path, default_directive: &str) -> PipelineResult<WorkerGuard> {
    std::fs::create_dir_all(dir)?;
    let filter = env_filter(default_directive)?;

    let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true),
        )
        .try_init();

    if installed.is_err() {
        tracing::debug!(dir = %dir.display(), "Global subscriber already installed, file logging skipped");
    }
    Ok(guard)
}
