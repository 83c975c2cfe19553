//! Lifecycle events.
//!
//! Every state change the supervisor or acceptor makes is published as an
//! [`Event`] on the [`EventBus`] and logged through `tracing` at the same time.
//! Subscribers (the process entrypoint, tests, external sinks) receive them
//! through a `tokio::sync::broadcast` receiver. A slow subscriber lags and
//! loses the oldest events; the pool never blocks on it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::worker::{WorkerExit, WorkerId};

/// Capacity of the broadcast channel.
pub const EVENT_CAPACITY: usize = 1024;

/// What happened.
#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleEvent {
    WorkerSpawned {
        id: WorkerId,
        slot: usize,
        generation: u64,
    },
    WorkerReady {
        id: WorkerId,
        slot: usize,
        generation: u64,
    },
    /// A worker reached `Dead`. `planned` is false for crashes, kills and
    /// unresponsive workers.
    WorkerDied {
        id: WorkerId,
        slot: usize,
        generation: u64,
        exit: WorkerExit,
        planned: bool,
    },
    WorkerRestarted {
        slot: usize,
        previous: WorkerId,
        replacement: WorkerId,
        restarts: u32,
    },
    WorkerUnresponsive {
        id: WorkerId,
        slot: usize,
        silent_for: Duration,
    },
    SpawnFailed {
        slot: usize,
        attempt: u32,
        error: String,
    },
    /// Emitted once per slot; the slot is halted afterwards.
    CrashLoop { slot: usize, restarts: u32 },
    Overloaded { backlog: usize },
    ReloadStarted { generation: u64, workers: usize },
    ReloadCompleted { generation: u64, retired: usize },
    ReloadFailed { generation: u64, reason: String },
    ShutdownStarted { deadline: Duration },
    ShutdownForced { workers: usize },
    ShutdownCompleted {
        drained: usize,
        forced: usize,
        aborted_requests: u64,
    },
}

/// A published lifecycle event.
#[derive(Debug, Clone)]
pub struct Event {
    /// Monotonically increasing per bus.
    pub seq: u64,
    pub at: SystemTime,
    pub kind: LifecycleEvent,
}

/// Broadcast bus for [`Event`]s.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
    seq: Arc<AtomicU64>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(EVENT_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self {
            tx,
            seq: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Log and publish an event. Publishing without subscribers is not an error.
    pub fn emit(&self, kind: LifecycleEvent) {
        log(&kind);
        let event = Event {
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
            at: SystemTime::now(),
            kind,
        };
        let _ = self.tx.send(event);
    }
}

fn log(kind: &LifecycleEvent) {
    match kind {
        LifecycleEvent::WorkerSpawned {
            id,
            slot,
            generation,
        } => info!(worker = %id, slot, generation, "Worker spawned"),
        LifecycleEvent::WorkerReady {
            id,
            slot,
            generation,
        } => info!(worker = %id, slot, generation, "Worker ready"),
        LifecycleEvent::WorkerDied {
            id,
            slot,
            generation,
            exit,
            planned: true,
        } => info!(worker = %id, slot, generation, exit = ?exit, "Worker retired"),
        LifecycleEvent::WorkerDied {
            id,
            slot,
            generation,
            exit,
            planned: false,
        } => warn!(worker = %id, slot, generation, exit = ?exit, "Worker died"),
        LifecycleEvent::WorkerRestarted {
            slot,
            previous,
            replacement,
            restarts,
        } => info!(
            slot,
            previous = %previous,
            replacement = %replacement,
            restarts,
            "Worker restarted"
        ),
        LifecycleEvent::WorkerUnresponsive {
            id,
            slot,
            silent_for,
        } => warn!(
            worker = %id,
            slot,
            silent_ms = silent_for.as_millis() as u64,
            "Worker unresponsive, recycling"
        ),
        LifecycleEvent::SpawnFailed {
            slot,
            attempt,
            error,
        } => warn!(slot, attempt, error = %error, "Failed to launch worker"),
        LifecycleEvent::CrashLoop { slot, restarts } => {
            error!(slot, restarts, "Worker slot is crash-looping, halting slot")
        }
        LifecycleEvent::Overloaded { backlog } => {
            warn!(backlog, "No worker available and backlog full, rejecting connection")
        }
        LifecycleEvent::ReloadStarted {
            generation,
            workers,
        } => info!(generation, workers, "Reload started"),
        LifecycleEvent::ReloadCompleted {
            generation,
            retired,
        } => info!(generation, retired, "Reload completed"),
        LifecycleEvent::ReloadFailed { generation, reason } => {
            error!(generation, reason = %reason, "Reload failed, keeping current workers")
        }
        LifecycleEvent::ShutdownStarted { deadline } => info!(
            deadline_ms = deadline.as_millis() as u64,
            "Shutdown started"
        ),
        LifecycleEvent::ShutdownForced { workers } => {
            warn!(workers, "Shutdown deadline passed, force-terminating workers")
        }
        LifecycleEvent::ShutdownCompleted {
            drained,
            forced,
            aborted_requests,
        } => info!(drained, forced, aborted_requests, "Shutdown completed"),
    }
}
