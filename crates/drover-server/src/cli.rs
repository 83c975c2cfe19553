//! Command line flags.
//!
//! Flags take precedence over the configuration file and `DROVER_*`
//! environment variables; see [`crate::settings`].

use std::path::PathBuf;

use clap::Parser;

use crate::telemetry::LogFormat;

/// Drover - serve an HTTP application on a supervised pool of workers
#[derive(Debug, Clone, Default, Parser)]
#[command(name = "drover")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Application to serve (`info` or `echo`)
    #[arg(long)]
    pub app: Option<String>,

    /// TOML configuration file, re-read on SIGHUP
    #[arg(short, long, env = "DROVER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Number of worker units
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Address to listen on (e.g. 0.0.0.0:8000)
    #[arg(short, long)]
    pub bind: Option<String>,

    /// Seconds a draining worker may keep serving in-flight requests
    #[arg(long, value_name = "SECS")]
    pub graceful_timeout: Option<f64>,

    /// Restarts allowed per worker slot inside the restart window
    #[arg(long)]
    pub max_restarts: Option<u32>,

    /// Sliding restart window in seconds
    #[arg(long, value_name = "SECS")]
    pub restart_window: Option<f64>,

    /// Per-request handler deadline in seconds
    #[arg(long, value_name = "SECS")]
    pub request_timeout: Option<f64>,

    /// Seconds between worker heartbeats
    #[arg(long, value_name = "SECS")]
    pub heartbeat_interval: Option<f64>,

    /// Heartbeats a worker may miss before it is recycled
    #[arg(long)]
    pub missed_heartbeats: Option<u32>,

    /// Connections queued while no worker is ready
    #[arg(long)]
    pub backlog: Option<usize>,

    /// Log output format
    #[arg(long, value_enum, env = "DROVER_LOG_FORMAT", default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,
}
