//! Worker units.
//!
//! A worker unit is one OS thread running its own `current_thread` tokio
//! runtime and `LocalSet`. It loads its own handler, receives connection
//! tickets over a FIFO channel and serves them concurrently on its local
//! scheduler. Nothing mutable is shared with other units: the supervisor
//! talks to a worker through its [`WorkerHandle`] (tickets in, cancellation
//! tokens for drain and kill) and observes it through the heartbeat and the
//! atomic [`WorkerStats`].
//!
//! Lifecycle: `Starting → Ready → Draining → Dead`. The worker reports
//! `Ready` once its handler has loaded, and always reports its exit, even
//! when its thread panics.

mod heartbeat;
mod launcher;
mod stats;
mod unit;

use std::fmt;
use std::sync::Arc;
use std::thread;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::acceptor::ConnectionTicket;
use crate::config::PoolConfig;
use crate::handler::HandlerFactory;

pub use heartbeat::Heartbeat;
pub use launcher::{Launcher, ThreadLauncher};
pub use stats::{RequestOutcome, WorkerStats};

/// Unique, never reused worker identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WorkerId(pub(crate) u64);

impl WorkerId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "w{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerState {
    Starting,
    Ready,
    Draining,
    Dead,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkerState::Starting => "starting",
            WorkerState::Ready => "ready",
            WorkerState::Draining => "draining",
            WorkerState::Dead => "dead",
        };
        f.write_str(s)
    }
}

/// Why a worker reached `Dead`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerExit {
    /// Finished draining. `aborted` requests outlived the graceful timeout.
    Drained { aborted: u64 },
    /// Force-terminated with `aborted` requests in flight.
    Killed { aborted: u64 },
    /// The handler factory failed.
    LoadFailed(String),
    /// The worker's runtime could not be built.
    StartFailed(String),
    /// The worker thread panicked or vanished.
    Crashed(String),
    /// Recycled after missing heartbeats.
    Unresponsive,
}

impl WorkerExit {
    /// Requests that were cut short.
    pub fn aborted(&self) -> u64 {
        match self {
            WorkerExit::Drained { aborted } | WorkerExit::Killed { aborted } => *aborted,
            _ => 0,
        }
    }
}

impl fmt::Display for WorkerExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerExit::Drained { aborted } => write!(f, "drained ({aborted} aborted)"),
            WorkerExit::Killed { aborted } => write!(f, "killed ({aborted} aborted)"),
            WorkerExit::LoadFailed(reason) => write!(f, "handler failed to load: {reason}"),
            WorkerExit::StartFailed(reason) => write!(f, "failed to start: {reason}"),
            WorkerExit::Crashed(reason) => write!(f, "crashed: {reason}"),
            WorkerExit::Unresponsive => f.write_str("unresponsive"),
        }
    }
}

/// Messages from worker threads to the supervisor.
#[derive(Debug)]
pub(crate) enum WorkerEvent {
    Ready { id: WorkerId },
    Exited { id: WorkerId, exit: WorkerExit },
}

/// Supervisor-side handle to a running worker.
#[derive(Debug, Clone)]
pub(crate) struct WorkerHandle {
    pub tickets: mpsc::UnboundedSender<ConnectionTicket>,
    pub drain: CancellationToken,
    pub kill: CancellationToken,
    pub heartbeat: Arc<Heartbeat>,
    pub stats: Arc<WorkerStats>,
}

/// Everything a worker thread takes with it.
pub(crate) struct Boot {
    pub id: WorkerId,
    pub config: Arc<PoolConfig>,
    pub tickets: mpsc::UnboundedReceiver<ConnectionTicket>,
    pub drain: CancellationToken,
    pub kill: CancellationToken,
    pub heartbeat: Arc<Heartbeat>,
    pub stats: Arc<WorkerStats>,
    pub events: mpsc::UnboundedSender<WorkerEvent>,
}

impl Boot {
    /// Fresh channels and tokens for worker `id`.
    pub fn new(
        id: WorkerId,
        config: Arc<PoolConfig>,
        events: mpsc::UnboundedSender<WorkerEvent>,
    ) -> (Self, WorkerHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = WorkerHandle {
            tickets: tx,
            drain: CancellationToken::new(),
            kill: CancellationToken::new(),
            heartbeat: Arc::new(Heartbeat::new()),
            stats: Arc::new(WorkerStats::default()),
        };
        let boot = Self {
            id,
            config,
            tickets: rx,
            drain: handle.drain.clone(),
            kill: handle.kill.clone(),
            heartbeat: Arc::clone(&handle.heartbeat),
            stats: Arc::clone(&handle.stats),
            events,
        };
        (boot, handle)
    }
}

/// Type-erased worker entry point: turns a [`Boot`] into a thread body.
pub(crate) type Entry = Arc<dyn Fn(Boot) -> Box<dyn FnOnce() + Send> + Send + Sync>;

pub(crate) fn entry<F: HandlerFactory>(factory: Arc<F>) -> Entry {
    Arc::new(move |boot: Boot| {
        let factory = Arc::clone(&factory);
        Box::new(move || run_thread(boot, factory))
    })
}

/// Thread body of a worker unit.
fn run_thread<F: HandlerFactory>(boot: Boot, factory: Arc<F>) {
    let mut notifier = ExitNotifier {
        id: boot.id,
        events: boot.events.clone(),
        exit: None,
    };

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            notifier.exit = Some(WorkerExit::StartFailed(e.to_string()));
            return;
        }
    };

    let local = tokio::task::LocalSet::new();
    let exit = local.block_on(&runtime, unit::run(boot, factory));

    // Tear down every connection task before reporting.
    drop(local);
    drop(runtime);
    notifier.exit = Some(exit);
}

/// Reports the worker's exit when dropped, including on panic.
struct ExitNotifier {
    id: WorkerId,
    events: mpsc::UnboundedSender<WorkerEvent>,
    exit: Option<WorkerExit>,
}

impl Drop for ExitNotifier {
    fn drop(&mut self) {
        let exit = self.exit.take().unwrap_or_else(|| {
            if thread::panicking() {
                WorkerExit::Crashed("worker thread panicked".to_string())
            } else {
                WorkerExit::Crashed("worker exited without reporting".to_string())
            }
        });
        let _ = self.events.send(WorkerEvent::Exited { id: self.id, exit });
    }
}
