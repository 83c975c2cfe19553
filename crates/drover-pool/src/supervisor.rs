//! Worker pool supervisor.
//!
//! The supervisor is the only owner of [`WorkerRecord`]s. It runs as a single
//! task that reacts to worker reports (ready, exited), monitor ticks and
//! commands from [`PoolHandle`](crate::PoolHandle)s, and it never touches
//! request data.
//!
//! Slots give workers a stable position across restarts. The restart budget
//! is tracked per slot over a sliding window; a slot that exceeds it is
//! halted, a single `CrashLoop` event is emitted and the pool shuts down.
//!
//! A reload runs a full new generation next to the current one. Traffic moves
//! over only once every new worker is Ready, so the number of Ready workers
//! never drops below the configured count.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::balancer::Balancer;
use crate::config::PoolConfig;
use crate::error::{PoolError, ReloadError, SpawnError};
use crate::events::{EventBus, LifecycleEvent};
use crate::monitor::{Health, Monitor};
use crate::shutdown::{deadline_after, ShutdownCoordinator, ShutdownReport};
use crate::worker::{
    Boot, Entry, Launcher, WorkerEvent, WorkerExit, WorkerHandle, WorkerId, WorkerState,
    WorkerStats,
};

/// How long a force-terminated worker gets to report before it is written
/// off.
const KILL_GRACE: Duration = Duration::from_secs(1);

/// Supervisor-owned state of one worker.
#[derive(Debug)]
pub struct WorkerRecord {
    pub id: WorkerId,
    pub slot: usize,
    pub generation: u64,
    pub state: WorkerState,
    /// Restarts of the slot at the time this worker was launched.
    pub restarts: u32,
    pub spawned_at: Instant,
    pub(crate) handle: WorkerHandle,
    /// Retirement was requested by the supervisor. A planned death is never
    /// restarted.
    pub(crate) planned: bool,
}

impl WorkerRecord {
    pub(crate) fn new(id: WorkerId, slot: usize, generation: u64, handle: WorkerHandle) -> Self {
        Self {
            id,
            slot,
            generation,
            state: WorkerState::Starting,
            restarts: 0,
            spawned_at: Instant::now(),
            handle,
            planned: false,
        }
    }

    pub fn last_heartbeat(&self) -> std::time::Instant {
        self.handle.heartbeat.last()
    }

    pub fn stats(&self) -> &WorkerStats {
        &self.handle.stats
    }
}

/// Read-only snapshot of a worker, published after every change.
#[derive(Debug, Clone)]
pub struct WorkerView {
    pub id: WorkerId,
    pub slot: usize,
    pub generation: u64,
    pub state: WorkerState,
    pub restarts: u32,
    pub stats: Arc<WorkerStats>,
}

impl From<&WorkerRecord> for WorkerView {
    fn from(record: &WorkerRecord) -> Self {
        Self {
            id: record.id,
            slot: record.slot,
            generation: record.generation,
            state: record.state,
            restarts: record.restarts,
            stats: Arc::clone(&record.handle.stats),
        }
    }
}

#[derive(Debug, Default)]
struct Slot {
    worker: Option<WorkerId>,
    restarts: u32,
    /// Restart times inside the current window.
    window: VecDeque<Instant>,
    halted: bool,
}

impl Slot {
    fn holding(id: WorkerId) -> Self {
        Self {
            worker: Some(id),
            ..Self::default()
        }
    }
}

/// Requests from pool handles.
pub(crate) enum Command {
    Reload {
        config: Option<PoolConfig>,
        reply: oneshot::Sender<Result<(), ReloadError>>,
    },
    Kill {
        id: WorkerId,
        reply: oneshot::Sender<bool>,
    },
}

/// What a [`Supervisor::reap`] wait is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reap {
    /// Old generation after a reload. Monitor ticks keep running and a
    /// shutdown request ends the wait.
    Retire,
    /// Pool shutdown. The deadline follows the coordinator's.
    Shutdown,
    /// Grace period after a kill.
    Kill,
}

/// Why a generation never became fully Ready.
enum GenerationFailure {
    Exited { id: WorkerId, exit: WorkerExit },
    ShuttingDown,
}

pub(crate) struct Supervisor {
    config: Arc<PoolConfig>,
    config_tx: watch::Sender<Arc<PoolConfig>>,
    view_tx: watch::Sender<Vec<WorkerView>>,
    entry: Entry,
    launcher: Arc<dyn Launcher>,
    balancer: Balancer,
    bus: EventBus,
    shutdown: ShutdownCoordinator,
    monitor: Monitor,
    ticker: Interval,
    records: BTreeMap<WorkerId, WorkerRecord>,
    slots: Vec<Slot>,
    generation: u64,
    next_id: u64,
    events_tx: mpsc::UnboundedSender<WorkerEvent>,
    events_rx: mpsc::UnboundedReceiver<WorkerEvent>,
    acceptor: Option<(CancellationToken, JoinHandle<()>)>,
    crash_loop: Option<(usize, u32)>,
}

impl Supervisor {
    pub fn new(
        config: Arc<PoolConfig>,
        entry: Entry,
        launcher: Arc<dyn Launcher>,
        balancer: Balancer,
        bus: EventBus,
        shutdown: ShutdownCoordinator,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (config_tx, _) = watch::channel(Arc::clone(&config));
        let (view_tx, _) = watch::channel(Vec::new());
        let monitor = Monitor::new(&config);
        Self {
            ticker: ticker(monitor.interval()),
            monitor,
            config,
            config_tx,
            view_tx,
            entry,
            launcher,
            balancer,
            bus,
            shutdown,
            records: BTreeMap::new(),
            slots: Vec::new(),
            generation: 1,
            next_id: 1,
            events_tx,
            events_rx,
            acceptor: None,
            crash_loop: None,
        }
    }

    pub fn config_watch(&self) -> watch::Receiver<Arc<PoolConfig>> {
        self.config_tx.subscribe()
    }

    pub fn view_watch(&self) -> watch::Receiver<Vec<WorkerView>> {
        self.view_tx.subscribe()
    }

    /// Hand over the accept loop so shutdown can stop it and wait for the
    /// socket to be released.
    pub fn attach_acceptor(&mut self, stop: CancellationToken, task: JoinHandle<()>) {
        self.acceptor = Some((stop, task));
    }

    fn publish(&self) {
        let view = self.records.values().map(WorkerView::from).collect();
        self.view_tx.send_replace(view);
    }

    /// Launch one worker for `slot`, retrying with backoff.
    async fn launch(
        &mut self,
        slot: usize,
        generation: u64,
        config: Arc<PoolConfig>,
    ) -> Result<WorkerId, SpawnError> {
        let attempts = config.spawn_attempts;
        let mut attempt = 0;

        loop {
            if self.shutdown.is_requested() {
                return Err(SpawnError::Cancelled { slot });
            }
            let id = WorkerId(self.next_id);
            self.next_id += 1;

            let (boot, handle) = Boot::new(id, Arc::clone(&config), self.events_tx.clone());
            let body = (self.entry)(boot);

            match self.launcher.launch(format!("drover-worker-{}", id.get()), body) {
                Ok(()) => {
                    let mut record = WorkerRecord::new(id, slot, generation, handle);
                    if generation == self.generation {
                        if let Some(slot) = self.slots.get(slot) {
                            record.restarts = slot.restarts;
                        }
                    }
                    self.records.insert(id, record);
                    self.bus.emit(LifecycleEvent::WorkerSpawned {
                        id,
                        slot,
                        generation,
                    });
                    self.publish();
                    return Ok(id);
                }
                Err(source) => {
                    attempt += 1;
                    self.bus.emit(LifecycleEvent::SpawnFailed {
                        slot,
                        attempt,
                        error: source.to_string(),
                    });
                    if attempt >= attempts {
                        return Err(SpawnError::Exhausted {
                            slot,
                            attempts,
                            source,
                        });
                    }
                    tokio::select! {
                        _ = self.shutdown.requested() => return Err(SpawnError::Cancelled { slot }),
                        _ = tokio::time::sleep(config.spawn_backoff.next(attempt - 1)) => {}
                    }
                }
            }
        }
    }

    /// Start the first generation of `n` workers and wait for all of them to
    /// be Ready.
    pub async fn spawn(&mut self, n: usize) -> Result<(), PoolError> {
        self.slots = (0..n).map(|_| Slot::default()).collect();

        let mut members = Vec::with_capacity(n);
        for slot in 0..n {
            match self.launch(slot, self.generation, Arc::clone(&self.config)).await {
                Ok(id) => {
                    self.slots[slot].worker = Some(id);
                    members.push(id);
                }
                Err(e) => {
                    self.abandon(&members);
                    return Err(e.into());
                }
            }
        }

        match self.await_generation(&members).await {
            Ok(()) => {
                info!(workers = n, generation = self.generation, "Worker pool ready");
                Ok(())
            }
            Err(failure) => {
                self.abandon(&members);
                Err(match failure {
                    GenerationFailure::Exited {
                        id,
                        exit: WorkerExit::LoadFailed(reason),
                    } => PoolError::HandlerLoad { id, reason },
                    GenerationFailure::Exited { id, exit } => {
                        PoolError::Supervisor(format!("worker {id} exited during startup: {exit}"))
                    }
                    GenerationFailure::ShuttingDown => {
                        PoolError::Supervisor("shutdown requested during startup".to_string())
                    }
                })
            }
        }
    }

    /// Wait until every member is Ready. Any member exiting first fails the
    /// whole generation.
    async fn await_generation(&mut self, members: &[WorkerId]) -> Result<(), GenerationFailure> {
        loop {
            let starting = members.iter().any(|id| {
                self.records
                    .get(id)
                    .map_or(false, |record| record.state == WorkerState::Starting)
            });
            if !starting {
                return Ok(());
            }

            tokio::select! {
                biased;

                _ = self.shutdown.requested() => return Err(GenerationFailure::ShuttingDown),

                Some(event) = self.events_rx.recv() => match event {
                    WorkerEvent::Ready { id } => self.on_ready(id),
                    WorkerEvent::Exited { id, exit } => {
                        if members.contains(&id) {
                            // The generation is abandoned, so its slots are not recovered.
                            self.bury(id, exit.clone());
                            return Err(GenerationFailure::Exited { id, exit });
                        }
                        self.on_exit(id, exit).await;
                    }
                },

                _ = self.ticker.tick() => self.on_tick().await,
            }
        }
    }

    /// Drain workers that will never serve (a failed generation).
    fn abandon(&mut self, members: &[WorkerId]) {
        for id in members {
            self.begin_drain(*id);
        }
        self.publish();
    }

    fn begin_drain(&mut self, id: WorkerId) {
        if let Some(record) = self.records.get_mut(&id) {
            self.balancer.remove(id);
            record.planned = true;
            if record.state != WorkerState::Dead {
                record.state = WorkerState::Draining;
            }
            record.handle.drain.cancel();
        }
    }

    fn on_ready(&mut self, id: WorkerId) {
        let Some(record) = self.records.get_mut(&id) else {
            return;
        };
        if record.state != WorkerState::Starting {
            return;
        }
        record.state = WorkerState::Ready;
        record.handle.heartbeat.beat();
        self.bus.emit(LifecycleEvent::WorkerReady {
            id,
            slot: record.slot,
            generation: record.generation,
        });
        // A new generation only receives traffic at cutover.
        if record.generation == self.generation {
            self.balancer.add(id, record.handle.tickets.clone());
        }
        self.publish();
    }

    /// Retire a dead worker's record and restart its slot if the death was
    /// unplanned.
    async fn on_exit(&mut self, id: WorkerId, exit: WorkerExit) {
        let Some(record) = self.bury(id, exit) else {
            return;
        };
        let current = record.generation == self.generation;
        if !record.planned && current && !self.shutdown.is_requested() {
            self.recover(record.slot, id).await;
        }
    }

    /// Remove a dead worker from routing and the slot table.
    fn bury(&mut self, id: WorkerId, exit: WorkerExit) -> Option<WorkerRecord> {
        let Some(mut record) = self.records.remove(&id) else {
            debug!(worker = %id, exit = %exit, "Exit reported by retired worker");
            return None;
        };
        self.balancer.remove(id);
        record.state = WorkerState::Dead;

        let current = record.generation == self.generation;
        if current {
            if let Some(slot) = self.slots.get_mut(record.slot) {
                if slot.worker == Some(id) {
                    slot.worker = None;
                }
            }
        }

        self.bus.emit(LifecycleEvent::WorkerDied {
            id,
            slot: record.slot,
            generation: record.generation,
            exit,
            planned: record.planned,
        });
        self.publish();
        Some(record)
    }

    /// Replace the worker of `slot` unless the slot is out of restarts.
    async fn recover(&mut self, slot: usize, previous: WorkerId) {
        let now = Instant::now();
        let window = self.config.restart_window;
        let max_restarts = self.config.max_restarts;

        let Some(state) = self.slots.get_mut(slot) else {
            return;
        };
        if state.halted {
            return;
        }
        while state
            .window
            .front()
            .map_or(false, |at| now.duration_since(*at) > window)
        {
            state.window.pop_front();
        }
        if state.window.len() as u32 >= max_restarts {
            state.halted = true;
            let restarts = state.restarts;
            self.bus.emit(LifecycleEvent::CrashLoop { slot, restarts });
            if self.crash_loop.is_none() {
                self.crash_loop = Some((slot, restarts));
                self.shutdown.request(self.config.graceful_timeout);
            }
            return;
        }
        state.window.push_back(now);
        state.restarts += 1;
        let restarts = state.restarts;

        match self
            .launch(slot, self.generation, Arc::clone(&self.config))
            .await
        {
            Ok(replacement) => {
                self.slots[slot].worker = Some(replacement);
                self.bus.emit(LifecycleEvent::WorkerRestarted {
                    slot,
                    previous,
                    replacement,
                    restarts,
                });
            }
            Err(e) => {
                error!(slot, error = %e, "Failed to replace worker, retrying on next tick");
            }
        }
    }

    async fn on_tick(&mut self) {
        let now = std::time::Instant::now();
        let unresponsive: Vec<_> = self
            .records
            .values()
            .filter_map(|record| match self.monitor.check_at(record, now) {
                Health::Unresponsive { silent_for } => Some((record.id, record.slot, silent_for)),
                Health::Healthy => None,
            })
            .collect();

        for (id, slot, silent_for) in unresponsive {
            self.bus.emit(LifecycleEvent::WorkerUnresponsive {
                id,
                slot,
                silent_for,
            });
            if let Some(record) = self.records.get(&id) {
                // A thread blocked in synchronous code cannot be preempted.
                // It is detached and exits once it polls its kill token.
                record.handle.kill.cancel();
            }
            self.on_exit(id, WorkerExit::Unresponsive).await;
        }

        self.refill().await;
    }

    /// Launch workers for vacant slots whose replacement failed earlier.
    async fn refill(&mut self) {
        if self.shutdown.is_requested() {
            return;
        }
        for slot in 0..self.slots.len() {
            if self.slots[slot].worker.is_some() || self.slots[slot].halted {
                continue;
            }
            match self
                .launch(slot, self.generation, Arc::clone(&self.config))
                .await
            {
                Ok(id) => self.slots[slot].worker = Some(id),
                Err(e) => warn!(slot, error = %e, "Slot still vacant"),
            }
        }
    }

    /// Rolling replacement of the current generation.
    async fn reload(&mut self, config: Option<PoolConfig>) -> Result<(), ReloadError> {
        if self.shutdown.is_requested() {
            return Err(ReloadError::ShuttingDown);
        }
        let config = Arc::new(config.unwrap_or_else(|| (*self.config).clone()));
        if config.bind != self.config.bind {
            return Err(ReloadError::BindChanged {
                current: self.config.bind,
                requested: config.bind,
            });
        }

        let generation = self.generation + 1;
        self.bus.emit(LifecycleEvent::ReloadStarted {
            generation,
            workers: config.workers,
        });

        let mut members = Vec::with_capacity(config.workers);
        for slot in 0..config.workers {
            match self.launch(slot, generation, Arc::clone(&config)).await {
                Ok(id) => members.push(id),
                Err(SpawnError::Cancelled { .. }) => {
                    self.abandon(&members);
                    self.bus.emit(LifecycleEvent::ReloadFailed {
                        generation,
                        reason: ReloadError::ShuttingDown.to_string(),
                    });
                    return Err(ReloadError::ShuttingDown);
                }
                Err(e) => {
                    self.abandon(&members);
                    self.bus.emit(LifecycleEvent::ReloadFailed {
                        generation,
                        reason: e.to_string(),
                    });
                    return Err(e.into());
                }
            }
        }

        if let Err(failure) = self.await_generation(&members).await {
            self.abandon(&members);
            let err = match failure {
                GenerationFailure::Exited { id, exit } => ReloadError::WorkerFailed {
                    id,
                    generation,
                    reason: exit.to_string(),
                },
                GenerationFailure::ShuttingDown => ReloadError::ShuttingDown,
            };
            self.bus.emit(LifecycleEvent::ReloadFailed {
                generation,
                reason: err.to_string(),
            });
            return Err(err);
        }

        // Cutover.
        let retiring: Vec<WorkerId> = self
            .records
            .values()
            .filter(|record| record.generation != generation && !record.planned)
            .map(|record| record.id)
            .collect();

        self.generation = generation;
        self.set_config(config);
        self.slots = members.iter().copied().map(Slot::holding).collect();
        for id in &members {
            if let Some(record) = self.records.get(id) {
                self.balancer.add(*id, record.handle.tickets.clone());
            }
        }
        for id in &retiring {
            self.begin_drain(*id);
        }
        self.publish();

        let deadline = deadline_after(self.config.graceful_timeout.saturating_add(KILL_GRACE));
        self.reap(&retiring, deadline, Reap::Retire).await;
        if !self.shutdown.is_requested() {
            self.force(&retiring).await;
        }

        self.bus.emit(LifecycleEvent::ReloadCompleted {
            generation,
            retired: retiring.len(),
        });
        Ok(())
    }

    fn set_config(&mut self, config: Arc<PoolConfig>) {
        let interval = config.heartbeat_interval;
        self.monitor = Monitor::new(&config);
        if interval != self.config.heartbeat_interval {
            self.ticker = ticker(interval);
        }
        self.balancer.set_capacity(config.backlog);
        self.config = Arc::clone(&config);
        self.config_tx.send_replace(config);
    }

    /// Process worker reports until none of `ids` is alive or `deadline`
    /// passes. Returns the exits of the watched workers.
    async fn reap(&mut self, ids: &[WorkerId], deadline: Instant, mode: Reap) -> Vec<WorkerExit> {
        let mut exits = Vec::new();
        let mut deadline_rx = self.shutdown.deadline();
        let sleep = tokio::time::sleep_until(deadline);
        tokio::pin!(sleep);

        let tighten = mode == Reap::Shutdown;
        if tighten {
            if let Some(at) = *deadline_rx.borrow_and_update() {
                if at < sleep.deadline() {
                    sleep.as_mut().reset(at);
                }
            }
        }
        let interruptible = mode == Reap::Retire;

        while ids.iter().any(|id| self.records.contains_key(id)) {
            tokio::select! {
                biased;

                Some(event) = self.events_rx.recv() => match event {
                    WorkerEvent::Ready { id } => self.on_ready(id),
                    WorkerEvent::Exited { id, exit } => {
                        if ids.contains(&id) && self.records.contains_key(&id) {
                            exits.push(exit.clone());
                        }
                        self.on_exit(id, exit).await;
                    }
                },

                _ = &mut sleep => break,

                Ok(()) = deadline_rx.changed(), if tighten => {
                    if let Some(at) = *deadline_rx.borrow_and_update() {
                        if at < sleep.deadline() {
                            sleep.as_mut().reset(at);
                        }
                    }
                }

                _ = self.shutdown.requested(), if interruptible => break,

                _ = self.ticker.tick(), if interruptible => self.on_tick().await,
            }
        }

        exits
    }

    /// Kill whatever is left of `ids`, give it [`KILL_GRACE`] to report and
    /// write off the rest. Returns the exits, including written-off workers.
    async fn force(&mut self, ids: &[WorkerId]) -> Vec<WorkerExit> {
        let remaining: Vec<WorkerId> = ids
            .iter()
            .copied()
            .filter(|id| self.records.contains_key(id))
            .collect();
        if remaining.is_empty() {
            return Vec::new();
        }

        for id in &remaining {
            if let Some(record) = self.records.get(id) {
                record.handle.kill.cancel();
            }
        }

        let mut exits = self
            .reap(&remaining, Instant::now() + KILL_GRACE, Reap::Kill)
            .await;

        for id in remaining {
            let Some(record) = self.records.get(&id) else {
                continue;
            };
            let aborted = record.handle.stats.in_flight() as u64;
            warn!(worker = %id, aborted, "Worker did not exit after kill, detaching");
            let exit = WorkerExit::Killed { aborted };
            exits.push(exit.clone());
            self.on_exit(id, exit).await;
        }

        exits
    }

    fn on_command(&mut self, command: Command) -> Option<PendingReload> {
        match command {
            Command::Kill { id, reply } => {
                let found = match self.records.get(&id) {
                    Some(record) => {
                        warn!(worker = %id, "Killing worker on request");
                        record.handle.kill.cancel();
                        true
                    }
                    None => false,
                };
                let _ = reply.send(found);
                None
            }
            Command::Reload { config, reply } => Some(PendingReload { config, reply }),
        }
    }

    /// Drive the pool until shutdown. Returns the shutdown report, or the
    /// crash loop that forced the shutdown.
    pub async fn run(mut self, mut commands: mpsc::Receiver<Command>) -> Result<ShutdownReport, PoolError> {
        let mut commands_open = true;

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.requested() => break,

                Some(event) = self.events_rx.recv() => match event {
                    WorkerEvent::Ready { id } => self.on_ready(id),
                    WorkerEvent::Exited { id, exit } => self.on_exit(id, exit).await,
                },

                command = commands.recv(), if commands_open => match command {
                    Some(command) => {
                        if let Some(PendingReload { config, reply }) = self.on_command(command) {
                            let result = self.reload(config).await;
                            let _ = reply.send(result);
                        }
                    }
                    None => commands_open = false,
                },

                _ = self.ticker.tick() => self.on_tick().await,
            }
        }

        commands.close();
        while let Ok(command) = commands.try_recv() {
            if let Command::Reload { reply, .. } = command {
                let _ = reply.send(Err(ReloadError::ShuttingDown));
            }
        }

        let report = self.shutdown_workers().await;
        match self.crash_loop {
            Some((slot, restarts)) => Err(PoolError::CrashLoop { slot, restarts }),
            None => Ok(report),
        }
    }

    /// Stop accepting, drain every worker within the coordinator's deadline
    /// and force-terminate the rest.
    async fn shutdown_workers(&mut self) -> ShutdownReport {
        let now = Instant::now();
        let deadline = self.shutdown.deadline().borrow().unwrap_or(now);
        self.bus.emit(LifecycleEvent::ShutdownStarted {
            deadline: deadline.saturating_duration_since(now),
        });

        if let Some((stop, task)) = self.acceptor.take() {
            stop.cancel();
            if let Err(e) = task.await {
                error!(error = %e, "Acceptor task failed");
            }
        }
        let dropped = self.balancer.close();
        if dropped > 0 {
            info!(dropped, "Closed queued connections");
        }

        let ids: Vec<WorkerId> = self.records.keys().copied().collect();
        for id in &ids {
            self.begin_drain(*id);
        }
        self.publish();

        let mut report = ShutdownReport::default();
        for exit in self.reap(&ids, deadline, Reap::Shutdown).await {
            report.aborted_requests += exit.aborted();
            match exit {
                WorkerExit::Killed { .. } | WorkerExit::Unresponsive => report.forced += 1,
                _ => report.drained += 1,
            }
        }

        let remaining = ids
            .iter()
            .filter(|id| self.records.contains_key(id))
            .count();
        if remaining > 0 {
            self.bus.emit(LifecycleEvent::ShutdownForced { workers: remaining });
            for exit in self.force(&ids).await {
                report.aborted_requests += exit.aborted();
                report.forced += 1;
            }
        }

        self.bus.emit(LifecycleEvent::ShutdownCompleted {
            drained: report.drained,
            forced: report.forced,
            aborted_requests: report.aborted_requests,
        });
        self.shutdown.complete(report);
        report
    }
}

struct PendingReload {
    config: Option<PoolConfig>,
    reply: oneshot::Sender<Result<(), ReloadError>>,
}

fn ticker(period: Duration) -> Interval {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}
