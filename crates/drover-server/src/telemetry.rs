//! Logging setup for the Drover process.
//!
//! Lifecycle events from the pool are emitted through `tracing`; this module
//! installs the global subscriber that renders them.
//!
//! # Configuration
//!
//! - `RUST_LOG`: Log filter (default: `info,drover_pool=debug`)
//! - `--log-format` / `DROVER_LOG_FORMAT`: `pretty` for local development,
//!   `json` for log shippers

use clap::ValueEnum;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "info,drover_pool=debug,drover_server=debug";

/// Output format of the fmt layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable multi-line output.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

/// Install the global subscriber.
///
/// Fails if a subscriber is already installed.
pub fn init(format: LogFormat) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    match format {
        LogFormat::Pretty => {
            let fmt_layer = tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_thread_names(true)
                .pretty();
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt_layer)
                .try_init()?;
        }
        LogFormat::Json => {
            let fmt_layer = tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_thread_names(true)
                .json();
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt_layer)
                .try_init()?;
        }
    }

    tracing::debug!(format = ?format, "Telemetry initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_fails() {
        // Only one global subscriber per process: whichever call comes
        // second must report an error instead of panicking.
        let first = init(LogFormat::Json);
        let second = init(LogFormat::Pretty);
        assert!(first.is_err() || second.is_err());
    }
}
