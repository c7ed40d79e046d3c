//! Logging setup and helpers
//!
//! [`init_logging`] installs the global `tracing` subscriber from a
//! [`LoggingConfig`]; `RUST_LOG` takes precedence over the configured level.

use crate::config::LoggingConfig;
use crate::error::{Result, WorkflowError};
use std::time::Instant;
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Install the global subscriber
///
/// Fails if a subscriber is already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| WorkflowError::Config(format!("invalid log level {}: {}", config.level, e)))?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(config.colored)
        .with_target(false);

    let installed = match (config.format.as_str(), config.timestamps) {
        ("json", true) => builder.json().try_init(),
        ("json", false) => builder.json().without_time().try_init(),
        ("pretty", true) => builder.pretty().try_init(),
        ("pretty", false) => builder.pretty().without_time().try_init(),
        (_, true) => builder.compact().try_init(),
        (_, false) => builder.compact().without_time().try_init(),
    };
    installed.map_err(|e| WorkflowError::Config(format!("cannot install logger: {}", e)))
}

/// Log execution time of a future
///
/// # Example
///
/// ```rust,ignore
/// use yambo_workflow::logging::timed;
///
/// let nodes = timed("await nscf", host.await_all(&ids)).await?;
/// ```
pub async fn timed<F, T>(name: &str, future: F) -> T
where
    F: std::future::Future<Output = T>,
{
    let start = Instant::now();
    debug!("Starting: {}", name);

    let result = future.await;

    debug!(elapsed_ms = start.elapsed().as_millis() as u64, "Completed: {}", name);
    result
}
