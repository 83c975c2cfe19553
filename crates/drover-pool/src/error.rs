//! Error types for the worker pool.
//!
//! Request-scoped failures (handler errors, timeouts) never surface here: they
//! are recovered inside the worker and reported as a
//! [`RequestOutcome`](crate::RequestOutcome). The types below cover pool-scoped
//! failures and the operations that can fail at the pool boundary.

use std::net::SocketAddr;

use thiserror::Error;

use crate::worker::WorkerId;

/// Failure to bind or adopt the listening socket. Fatal at startup.
#[derive(Debug, Error)]
pub enum BindError {
    /// Another socket already listens on the address.
    #[error("address {addr} is already in use")]
    InUse {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// The address cannot be bound (not local, permission denied, ...).
    #[error("cannot bind {addr}: {source}")]
    Invalid {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// An inherited listener could not be registered with the runtime.
    #[error("inherited listener is unusable: {0}")]
    Inherited(#[source] std::io::Error),
}

impl BindError {
    pub(crate) fn from_io(addr: SocketAddr, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::AddrInUse {
            Self::InUse { addr, source }
        } else {
            Self::Invalid { addr, source }
        }
    }
}

/// Failure while accepting or distributing a connection.
#[derive(Debug, Error)]
pub enum AcceptError {
    /// The acceptor was stopped.
    #[error("listener closed")]
    Closed,

    /// No worker is available and the pending backlog is full.
    #[error("no worker available and backlog of {backlog} connections is full")]
    Overloaded { backlog: usize },

    /// Transient accept failure (e.g. file descriptor exhaustion).
    #[error("accept failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure to launch a worker execution context.
#[derive(Debug, Error)]
pub enum SpawnError {
    /// Every launch attempt for the slot failed.
    #[error("failed to launch worker for slot {slot} after {attempts} attempts: {source}")]
    Exhausted {
        slot: usize,
        attempts: u32,
        #[source]
        source: std::io::Error,
    },

    /// Shutdown was requested while the slot was waiting to be launched.
    #[error("launch of worker for slot {slot} cancelled by shutdown")]
    Cancelled { slot: usize },
}

/// Invalid or incomplete pool configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A required setting has no value. These settings have no defaults.
    #[error("missing required setting `{0}`")]
    Missing(&'static str),

    /// A setting is out of range.
    #[error("invalid setting `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// A rolling reload that did not cut over. The previous generation keeps
/// serving unchanged.
#[derive(Debug, Error)]
pub enum ReloadError {
    /// The new generation could not be launched.
    #[error(transparent)]
    Spawn(#[from] SpawnError),

    /// A worker of the new generation died before the cutover.
    #[error("worker {id} of generation {generation} failed before cutover: {reason}")]
    WorkerFailed {
        id: WorkerId,
        generation: u64,
        reason: String,
    },

    /// The listener stays bound across reloads, so the address is fixed.
    #[error("bind address cannot change on reload (current {current}, requested {requested})")]
    BindChanged {
        current: SocketAddr,
        requested: SocketAddr,
    },

    /// Shutdown began before the reload finished.
    #[error("pool is shutting down")]
    ShuttingDown,
}

/// Pool-scoped failures surfaced to the process exit path.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Bind(#[from] BindError),

    #[error(transparent)]
    Spawn(#[from] SpawnError),

    /// The application handler failed to load while starting the pool.
    #[error("worker {id} failed to load the application handler: {reason}")]
    HandlerLoad { id: WorkerId, reason: String },

    /// A worker slot exhausted its restart budget.
    #[error("worker slot {slot} is crash-looping after {restarts} restarts")]
    CrashLoop { slot: usize, restarts: u32 },

    /// The supervisor task itself failed.
    #[error("supervisor task ended unexpectedly: {0}")]
    Supervisor(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_error_classification() {
        let addr: SocketAddr = "127.0.0.1:8000".parse().unwrap();

        let in_use = BindError::from_io(addr, std::io::ErrorKind::AddrInUse.into());
        assert!(matches!(in_use, BindError::InUse { .. }));

        let denied = BindError::from_io(addr, std::io::ErrorKind::PermissionDenied.into());
        assert!(matches!(denied, BindError::Invalid { .. }));
    }

    #[test]
    fn test_error_display() {
        let err = PoolError::CrashLoop {
            slot: 2,
            restarts: 5,
        };
        assert_eq!(
            err.to_string(),
            "worker slot 2 is crash-looping after 5 restarts"
        );

        let err = ConfigError::Missing("graceful_timeout");
        assert_eq!(
            err.to_string(),
            "missing required setting `graceful_timeout`"
        );
    }
}
