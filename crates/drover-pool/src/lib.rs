//! Drover worker pool.
//!
//! A supervisor that owns a listening socket, runs a fixed number of worker
//! units and spreads inbound HTTP connections across them. Each worker unit
//! is an OS thread with its own single-threaded tokio runtime, so a handler
//! never shares mutable state with another worker.
//!
//! # Components
//!
//! - **Acceptor** ([`Acceptor`]): owns the socket and turns connections into
//!   [`ConnectionTicket`]s, distributed round-robin over Ready workers with a
//!   bounded backlog.
//! - **Worker unit**: serves tickets with hyper's HTTP/1.1 connection driver,
//!   runs the application [`Handler`] under a per-request deadline and beats
//!   a heartbeat.
//! - **Supervisor**: spawns workers, restarts crashed ones within a restart
//!   budget, runs rolling reloads and drives shutdown.
//! - **Monitor** ([`Monitor`]): flags workers whose heartbeat went silent.
//! - **Shutdown coordinator** ([`ShutdownCoordinator`]): collects shutdown
//!   requests and publishes the [`ShutdownReport`].
//!
//! Lifecycle changes are published as [`Event`]s and logged with `tracing`.

mod acceptor;
mod backoff;
mod balancer;
mod config;
mod error;
mod events;
pub mod handler;
mod monitor;
mod pool;
mod shutdown;
mod supervisor;
mod worker;

pub use acceptor::{Acceptor, AcceptorStats, ConnectionTicket, ListenerConfig};
pub use backoff::BackoffPolicy;
pub use config::{
    PoolConfig, PoolConfigBuilder, DEFAULT_BACKLOG, DEFAULT_BIND, DEFAULT_HEARTBEAT_INTERVAL,
    DEFAULT_LISTEN_BACKLOG, DEFAULT_MISSED_HEARTBEATS, DEFAULT_REQUEST_TIMEOUT,
    DEFAULT_SPAWN_ATTEMPTS,
};
pub use error::{AcceptError, BindError, ConfigError, PoolError, ReloadError, SpawnError};
pub use events::{Event, EventBus, LifecycleEvent};
pub use handler::{from_service, BoxError, Handler, HandlerFactory, Request, Response, ServiceHandler};
pub use monitor::{Health, Monitor};
pub use pool::{Pool, PoolHandle, RunningPool};
pub use shutdown::{ShutdownCoordinator, ShutdownReport};
pub use supervisor::{WorkerRecord, WorkerView};
pub use worker::{
    Launcher, RequestOutcome, ThreadLauncher, WorkerExit, WorkerId, WorkerState, WorkerStats,
};
