//! Pool configuration snapshot.
//!
//! A [`PoolConfig`] is built once, validated, and then shared read-only as an
//! `Arc<PoolConfig>` by the acceptor, the supervisor and every worker of a
//! generation. A reload builds a fresh snapshot and swaps it in; nothing ever
//! mutates a snapshot in place.
//!
//! The graceful timeout and the restart budget have no defaults. They must be
//! supplied explicitly, because any built-in number would be a guess about
//! the application's behaviour.

use std::net::SocketAddr;
use std::time::Duration;

use crate::backoff::BackoffPolicy;
use crate::error::ConfigError;

/// Default bind address (all interfaces, port 8000).
pub const DEFAULT_BIND: &str = "0.0.0.0:8000";
/// Default per-request handler deadline.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Default interval between worker heartbeats (and monitor polls).
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);
/// Default number of missed heartbeats before a worker is unresponsive.
pub const DEFAULT_MISSED_HEARTBEATS: u32 = 3;
/// Default number of accepted connections queued while no worker is ready.
pub const DEFAULT_BACKLOG: usize = 1024;
/// Default kernel listen backlog.
pub const DEFAULT_LISTEN_BACKLOG: u32 = 2048;
/// Default number of attempts to launch one worker.
pub const DEFAULT_SPAWN_ATTEMPTS: u32 = 5;

/// Immutable configuration of a worker pool.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolConfig {
    /// Number of worker units per generation.
    pub workers: usize,
    /// Address the acceptor binds.
    pub bind: SocketAddr,
    /// How long a draining worker may keep serving in-flight requests.
    pub graceful_timeout: Duration,
    /// Restarts allowed per slot inside `restart_window` before the slot is
    /// declared crash-looping.
    pub max_restarts: u32,
    /// Sliding window for `max_restarts`.
    pub restart_window: Duration,
    /// Deadline for a single handler invocation.
    pub request_timeout: Duration,
    /// Interval between worker heartbeats and monitor polls.
    pub heartbeat_interval: Duration,
    /// Heartbeats a worker may miss before it is recycled.
    pub missed_heartbeats: u32,
    /// Connections queued while no worker is ready.
    pub backlog: usize,
    /// Kernel listen backlog for the socket.
    pub listen_backlog: u32,
    /// Launch attempts per worker before giving up.
    pub spawn_attempts: u32,
    /// Delay between launch attempts.
    pub spawn_backoff: BackoffPolicy,
    /// Whether connections are kept alive between requests.
    pub keep_alive: bool,
}

impl PoolConfig {
    pub fn builder() -> PoolConfigBuilder {
        PoolConfigBuilder::default()
    }

    /// Silence after which the monitor considers a worker unresponsive.
    pub fn unresponsive_after(&self) -> Duration {
        self.heartbeat_interval
            .saturating_mul(self.missed_heartbeats.max(1))
    }

    /// A builder pre-filled with this snapshot, for deriving a reload config.
    pub fn to_builder(&self) -> PoolConfigBuilder {
        PoolConfigBuilder {
            workers: Some(self.workers),
            bind: Some(self.bind),
            graceful_timeout: Some(self.graceful_timeout),
            max_restarts: Some(self.max_restarts),
            restart_window: Some(self.restart_window),
            request_timeout: Some(self.request_timeout),
            heartbeat_interval: Some(self.heartbeat_interval),
            missed_heartbeats: Some(self.missed_heartbeats),
            backlog: Some(self.backlog),
            listen_backlog: Some(self.listen_backlog),
            spawn_attempts: Some(self.spawn_attempts),
            spawn_backoff: Some(self.spawn_backoff),
            keep_alive: Some(self.keep_alive),
        }
    }
}

/// Builder for [`PoolConfig`].
#[derive(Debug, Clone, Default)]
pub struct PoolConfigBuilder {
    workers: Option<usize>,
    bind: Option<SocketAddr>,
    graceful_timeout: Option<Duration>,
    max_restarts: Option<u32>,
    restart_window: Option<Duration>,
    request_timeout: Option<Duration>,
    heartbeat_interval: Option<Duration>,
    missed_heartbeats: Option<u32>,
    backlog: Option<usize>,
    listen_backlog: Option<u32>,
    spawn_attempts: Option<u32>,
    spawn_backoff: Option<BackoffPolicy>,
    keep_alive: Option<bool>,
}

impl PoolConfigBuilder {
    /// Number of workers. Defaults to the available parallelism.
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    pub fn bind(mut self, bind: SocketAddr) -> Self {
        self.bind = Some(bind);
        self
    }

    /// Required.
    pub fn graceful_timeout(mut self, timeout: Duration) -> Self {
        self.graceful_timeout = Some(timeout);
        self
    }

    /// Required: at most `max_restarts` restarts per slot within `window`.
    pub fn restart_budget(mut self, max_restarts: u32, window: Duration) -> Self {
        self.max_restarts = Some(max_restarts);
        self.restart_window = Some(window);
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn heartbeat(mut self, interval: Duration, missed: u32) -> Self {
        self.heartbeat_interval = Some(interval);
        self.missed_heartbeats = Some(missed);
        self
    }

    pub fn backlog(mut self, backlog: usize) -> Self {
        self.backlog = Some(backlog);
        self
    }

    pub fn listen_backlog(mut self, backlog: u32) -> Self {
        self.listen_backlog = Some(backlog);
        self
    }

    pub fn spawn_retry(mut self, attempts: u32, backoff: BackoffPolicy) -> Self {
        self.spawn_attempts = Some(attempts);
        self.spawn_backoff = Some(backoff);
        self
    }

    pub fn keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = Some(keep_alive);
        self
    }

    /// Validate and freeze the configuration.
    pub fn build(self) -> Result<PoolConfig, ConfigError> {
        let graceful_timeout = self
            .graceful_timeout
            .ok_or(ConfigError::Missing("graceful_timeout"))?;
        let max_restarts = self
            .max_restarts
            .ok_or(ConfigError::Missing("max_restarts"))?;
        let restart_window = self
            .restart_window
            .ok_or(ConfigError::Missing("restart_window"))?;

        let workers = match self.workers {
            Some(workers) => workers,
            None => std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
        };
        if workers == 0 {
            return Err(ConfigError::invalid("workers", "must be at least 1"));
        }
        if restart_window.is_zero() {
            return Err(ConfigError::invalid("restart_window", "must be non-zero"));
        }

        let bind = match self.bind {
            Some(bind) => bind,
            None => DEFAULT_BIND
                .parse()
                .map_err(|_| ConfigError::invalid("bind", DEFAULT_BIND))?,
        };

        let request_timeout = self.request_timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT);
        if request_timeout.is_zero() {
            return Err(ConfigError::invalid("request_timeout", "must be non-zero"));
        }

        let heartbeat_interval = self
            .heartbeat_interval
            .unwrap_or(DEFAULT_HEARTBEAT_INTERVAL);
        if heartbeat_interval.is_zero() {
            return Err(ConfigError::invalid(
                "heartbeat_interval",
                "must be non-zero",
            ));
        }

        let missed_heartbeats = self.missed_heartbeats.unwrap_or(DEFAULT_MISSED_HEARTBEATS);
        if missed_heartbeats == 0 {
            return Err(ConfigError::invalid("missed_heartbeats", "must be at least 1"));
        }

        let spawn_attempts = self.spawn_attempts.unwrap_or(DEFAULT_SPAWN_ATTEMPTS);
        if spawn_attempts == 0 {
            return Err(ConfigError::invalid("spawn_attempts", "must be at least 1"));
        }

        Ok(PoolConfig {
            workers,
            bind,
            graceful_timeout,
            max_restarts,
            restart_window,
            request_timeout,
            heartbeat_interval,
            missed_heartbeats,
            backlog: self.backlog.unwrap_or(DEFAULT_BACKLOG),
            listen_backlog: self.listen_backlog.unwrap_or(DEFAULT_LISTEN_BACKLOG),
            spawn_attempts,
            spawn_backoff: self.spawn_backoff.unwrap_or_default(),
            keep_alive: self.keep_alive.unwrap_or(true),
        })
    }
}
