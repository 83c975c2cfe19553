//! Per-worker statistics.
//!
//! Written only by the owning worker thread, read by anyone holding the
//! `Arc`. These counters are the only state shared across the isolation
//! boundary.

use std::sync::atomic::{AtomicU64, Ordering};

use drover_ecdysis::{DrainTracker, InFlight};

/// How a request (or the last request of a connection) ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestOutcome {
    Completed,
    /// Protocol error or client reset.
    ClientError,
    /// The handler returned an error or panicked. Answered with `500`.
    HandlerError,
    /// The handler exceeded the request timeout and was cancelled. Answered
    /// with `503`.
    Timeout,
}

#[derive(Debug, Default)]
pub struct WorkerStats {
    in_flight: DrainTracker,
    connections: AtomicU64,
    completed: AtomicU64,
    client_errors: AtomicU64,
    handler_errors: AtomicU64,
    timeouts: AtomicU64,
    aborted: AtomicU64,
}

impl WorkerStats {
    pub(crate) fn begin(&self) -> InFlight {
        self.in_flight.guard()
    }

    pub(crate) fn connection(&self) {
        self.connections.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record(&self, outcome: RequestOutcome) {
        let counter = match outcome {
            RequestOutcome::Completed => &self.completed,
            RequestOutcome::ClientError => &self.client_errors,
            RequestOutcome::HandlerError => &self.handler_errors,
            RequestOutcome::Timeout => &self.timeouts,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_aborted(&self, count: u64) {
        self.aborted.fetch_add(count, Ordering::Relaxed);
    }

    /// Requests currently inside the handler.
    pub fn in_flight(&self) -> usize {
        self.in_flight.active()
    }

    pub fn connections(&self) -> u64 {
        self.connections.load(Ordering::Relaxed)
    }

    pub fn count(&self, outcome: RequestOutcome) -> u64 {
        let counter = match outcome {
            RequestOutcome::Completed => &self.completed,
            RequestOutcome::ClientError => &self.client_errors,
            RequestOutcome::HandlerError => &self.handler_errors,
            RequestOutcome::Timeout => &self.timeouts,
        };
        counter.load(Ordering::Relaxed)
    }

    /// Requests that produced a response, whatever its status.
    pub fn served(&self) -> u64 {
        self.count(RequestOutcome::Completed)
            + self.count(RequestOutcome::HandlerError)
            + self.count(RequestOutcome::Timeout)
    }

    /// Requests aborted by a drain deadline or a kill.
    pub fn aborted(&self) -> u64 {
        self.aborted.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_counters() {
        let stats = WorkerStats::default();
        stats.record(RequestOutcome::Completed);
        stats.record(RequestOutcome::Completed);
        stats.record(RequestOutcome::Timeout);
        stats.record(RequestOutcome::ClientError);

        assert_eq!(stats.count(RequestOutcome::Completed), 2);
        assert_eq!(stats.count(RequestOutcome::Timeout), 1);
        assert_eq!(stats.served(), 3);
    }

    #[test]
    fn test_in_flight_follows_guards() {
        let stats = WorkerStats::default();
        let guard = stats.begin();
        assert_eq!(stats.in_flight(), 1);
        drop(guard);
        assert_eq!(stats.in_flight(), 0);
    }
}
