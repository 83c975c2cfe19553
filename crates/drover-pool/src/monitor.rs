//! Worker liveness checks.
//!
//! The monitor is a pure function of a worker record and the current time;
//! the supervisor polls it on every heartbeat tick and decides what to do
//! with an unresponsive worker.

use std::time::{Duration, Instant};

use crate::config::PoolConfig;
use crate::supervisor::WorkerRecord;
use crate::worker::WorkerState;

/// Verdict for one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Health {
    Healthy,
    Unresponsive { silent_for: Duration },
}

#[derive(Debug, Clone, Copy)]
pub struct Monitor {
    interval: Duration,
    threshold: Duration,
}

impl Monitor {
    pub fn new(config: &PoolConfig) -> Self {
        Self {
            interval: config.heartbeat_interval,
            threshold: config.unresponsive_after(),
        }
    }

    /// How often the supervisor should poll.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn check(&self, record: &WorkerRecord) -> Health {
        self.check_at(record, Instant::now())
    }

    /// Starting workers have not begun beating yet and Dead ones are gone,
    /// so only Ready and Draining workers can be unresponsive.
    pub fn check_at(&self, record: &WorkerRecord, now: Instant) -> Health {
        match record.state {
            WorkerState::Ready | WorkerState::Draining => {
                let silent_for = record.handle.heartbeat.silent_for(now);
                if silent_for > self.threshold {
                    Health::Unresponsive { silent_for }
                } else {
                    Health::Healthy
                }
            }
            WorkerState::Starting | WorkerState::Dead => Health::Healthy,
        }
    }
}
