//! Layered process settings.
//!
//! Sources, lowest precedence first:
//!
//! 1. Built-in defaults
//! 2. The TOML file named by `--config` / `DROVER_CONFIG`
//! 3. `DROVER_*` environment variables (`DROVER_WORKERS=8`)
//! 4. Command line flags
//!
//! Durations are given in seconds and may be fractional. The graceful
//! timeout and the restart budget have no defaults; a missing value is a
//! configuration error.
//!
//! ```toml
//! app = "info"
//! workers = 4
//! bind = "0.0.0.0:8000"
//! graceful_timeout = 30
//! max_restarts = 5
//! restart_window = 60
//! ```

use std::net::SocketAddr;
use std::time::Duration;

use config::{Config, Environment, File, FileFormat};
use drover_pool::PoolConfig;
use serde::Deserialize;
use thiserror::Error;
use tracing::info;

use crate::cli::Cli;

/// Prefix of the environment variables read as settings.
pub const ENV_PREFIX: &str = "DROVER";

/// Settings could not be loaded or do not form a valid pool configuration.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to load settings: {0}")]
    Load(#[from] config::ConfigError),

    #[error(transparent)]
    Pool(#[from] drover_pool::ConfigError),
}

/// Every setting the process understands.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Name of the built-in application to serve.
    pub app: String,
    /// Worker units; the available parallelism when unset.
    pub workers: Option<usize>,
    pub bind: String,
    pub graceful_timeout: Option<f64>,
    pub max_restarts: Option<u32>,
    pub restart_window: Option<f64>,
    pub request_timeout: f64,
    pub heartbeat_interval: f64,
    pub missed_heartbeats: u32,
    pub backlog: usize,
    pub listen_backlog: u32,
    pub keep_alive: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            app: "info".to_string(),
            workers: None,
            bind: drover_pool::DEFAULT_BIND.to_string(),
            graceful_timeout: None,
            max_restarts: None,
            restart_window: None,
            request_timeout: drover_pool::DEFAULT_REQUEST_TIMEOUT.as_secs_f64(),
            heartbeat_interval: drover_pool::DEFAULT_HEARTBEAT_INTERVAL.as_secs_f64(),
            missed_heartbeats: drover_pool::DEFAULT_MISSED_HEARTBEATS,
            backlog: drover_pool::DEFAULT_BACKLOG,
            listen_backlog: drover_pool::DEFAULT_LISTEN_BACKLOG,
            keep_alive: true,
        }
    }
}

impl Settings {
    /// Load settings from every source, reading the process environment.
    pub fn load(cli: &Cli) -> Result<Self, SettingsError> {
        Self::load_with(cli, Environment::with_prefix(ENV_PREFIX))
    }

    /// Load settings with an explicit environment source.
    pub fn load_with(cli: &Cli, environment: Environment) -> Result<Self, SettingsError> {
        let mut builder = Config::builder();
        if let Some(path) = &cli.config {
            builder = builder.add_source(File::from(path.as_path()).format(FileFormat::Toml));
        }

        let settings: Settings = builder
            .add_source(environment.try_parsing(true))
            .set_override_option("app", cli.app.clone())?
            .set_override_option("workers", cli.workers.map(|n| n as u64))?
            .set_override_option("bind", cli.bind.clone())?
            .set_override_option("graceful_timeout", cli.graceful_timeout)?
            .set_override_option("max_restarts", cli.max_restarts.map(u64::from))?
            .set_override_option("restart_window", cli.restart_window)?
            .set_override_option("request_timeout", cli.request_timeout)?
            .set_override_option("heartbeat_interval", cli.heartbeat_interval)?
            .set_override_option("missed_heartbeats", cli.missed_heartbeats.map(u64::from))?
            .set_override_option("backlog", cli.backlog.map(|n| n as u64))?
            .build()?
            .try_deserialize()?;

        Ok(settings)
    }

    /// Validate and convert into a pool configuration snapshot.
    pub fn to_pool_config(&self) -> Result<PoolConfig, SettingsError> {
        let bind: SocketAddr = self.bind.parse().map_err(|_| drover_pool::ConfigError::Invalid {
            field: "bind",
            reason: format!("{:?} is not a socket address", self.bind),
        })?;

        let mut builder = PoolConfig::builder()
            .bind(bind)
            .request_timeout(seconds("request_timeout", self.request_timeout)?)
            .heartbeat(
                seconds("heartbeat_interval", self.heartbeat_interval)?,
                self.missed_heartbeats,
            )
            .backlog(self.backlog)
            .listen_backlog(self.listen_backlog)
            .keep_alive(self.keep_alive);

        if let Some(workers) = self.workers {
            builder = builder.workers(workers);
        }
        if let Some(timeout) = self.graceful_timeout {
            builder = builder.graceful_timeout(seconds("graceful_timeout", timeout)?);
        }
        match (self.max_restarts, self.restart_window) {
            (Some(max_restarts), Some(window)) => {
                builder = builder.restart_budget(max_restarts, seconds("restart_window", window)?);
            }
            (None, _) => return Err(drover_pool::ConfigError::Missing("max_restarts").into()),
            (_, None) => return Err(drover_pool::ConfigError::Missing("restart_window").into()),
        }

        Ok(builder.build()?)
    }

    pub fn log_config(&self) {
        info!(
            app = %self.app,
            workers = ?self.workers,
            bind = %self.bind,
            graceful_timeout = ?self.graceful_timeout,
            max_restarts = ?self.max_restarts,
            restart_window = ?self.restart_window,
            request_timeout = self.request_timeout,
            "Settings loaded"
        );
    }
}

fn seconds(field: &'static str, value: f64) -> Result<Duration, drover_pool::ConfigError> {
    Duration::try_from_secs_f64(value).map_err(|_| drover_pool::ConfigError::Invalid {
        field,
        reason: format!("{value} is not a non-negative number of seconds"),
    })
}
