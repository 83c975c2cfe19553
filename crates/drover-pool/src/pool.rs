//! Public entry point: building, starting and controlling a pool.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::acceptor::{self, Acceptor, AcceptorStats, ListenerConfig};
use crate::balancer::Balancer;
use crate::config::PoolConfig;
use crate::error::{PoolError, ReloadError};
use crate::events::{Event, EventBus};
use crate::handler::HandlerFactory;
use crate::shutdown::{ShutdownCoordinator, ShutdownReport};
use crate::supervisor::{Command, Supervisor, WorkerView};
use crate::worker::{self, Launcher, ThreadLauncher, WorkerId, WorkerState};

/// A pool that has not been started yet.
///
/// ```no_run
/// use std::time::Duration;
/// use drover_pool::{handler, BoxError, Pool, PoolConfig, Request};
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let config = PoolConfig::builder()
///     .workers(4)
///     .bind("127.0.0.1:8000".parse()?)
///     .graceful_timeout(Duration::from_secs(30))
///     .restart_budget(5, Duration::from_secs(60))
///     .build()?;
///
/// let factory = || -> Result<_, BoxError> {
///     Ok(|_req: Request| async { Ok::<_, BoxError>(handler::text("hello")) })
/// };
///
/// let pool = Pool::new(config, factory).start().await?;
/// let report = pool.handle().shutdown(Duration::from_secs(10)).await;
/// println!("drained {} workers", report.drained);
/// # Ok(())
/// # }
/// ```
pub struct Pool<F> {
    config: PoolConfig,
    factory: Arc<F>,
    launcher: Arc<dyn Launcher>,
    inherited: Option<std::net::TcpListener>,
    bus: EventBus,
}

impl<F: HandlerFactory> Pool<F> {
    pub fn new(config: PoolConfig, factory: F) -> Self {
        Self {
            config,
            factory: Arc::new(factory),
            launcher: Arc::new(ThreadLauncher::new()),
            inherited: None,
            bus: EventBus::default(),
        }
    }

    /// Replace the thread launcher.
    pub fn launcher(mut self, launcher: impl Launcher) -> Self {
        self.launcher = Arc::new(launcher);
        self
    }

    /// Serve on an already-bound listener instead of binding `config.bind`.
    pub fn inherit_listener(mut self, listener: std::net::TcpListener) -> Self {
        self.inherited = Some(listener);
        self
    }

    /// Subscribe before `start` to observe startup events.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.bus.subscribe()
    }

    /// Bind, launch every worker and wait until all are Ready, then start
    /// accepting.
    pub async fn start(self) -> Result<RunningPool, PoolError> {
        let config = Arc::new(self.config);
        let mut acceptor = Acceptor::start(ListenerConfig {
            addr: config.bind,
            listen_backlog: config.listen_backlog,
            inherited: self.inherited,
        })?;
        let local_addr = acceptor.local_addr();
        let acceptor_stats = acceptor.stats();

        let balancer = Balancer::new(config.backlog);
        let shutdown = ShutdownCoordinator::new();
        let mut supervisor = Supervisor::new(
            Arc::clone(&config),
            worker::entry(self.factory),
            self.launcher,
            balancer.clone(),
            self.bus.clone(),
            shutdown.clone(),
        );

        // On failure the acceptor drops here and the socket is released.
        supervisor.spawn(config.workers).await?;

        // Accepting ends the moment shutdown is requested, even while the
        // supervisor is busy elsewhere.
        acceptor.stop_on(shutdown.token());
        let stop = acceptor.stop_token();
        let accept_task = tokio::spawn(acceptor::serve(acceptor, balancer, self.bus.clone()));
        supervisor.attach_acceptor(stop, accept_task);

        let (commands, rx) = mpsc::channel(16);
        let handle = PoolHandle {
            inner: Arc::new(HandleInner {
                commands,
                shutdown,
                workers: supervisor.view_watch(),
                config: supervisor.config_watch(),
                local_addr,
                acceptor_stats,
                bus: self.bus,
            }),
        };
        let task = tokio::spawn(supervisor.run(rx));

        Ok(RunningPool { handle, task })
    }
}

/// A started pool.
pub struct RunningPool {
    handle: PoolHandle,
    task: JoinHandle<Result<ShutdownReport, PoolError>>,
}

impl RunningPool {
    pub fn handle(&self) -> PoolHandle {
        self.handle.clone()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.handle.local_addr()
    }

    /// Wait for the pool to shut down. A crash loop is reported as an error
    /// after the pool has shut down.
    pub async fn wait(self) -> Result<ShutdownReport, PoolError> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(PoolError::Supervisor(e.to_string())),
        }
    }
}

struct HandleInner {
    commands: mpsc::Sender<Command>,
    shutdown: ShutdownCoordinator,
    workers: watch::Receiver<Vec<WorkerView>>,
    config: watch::Receiver<Arc<PoolConfig>>,
    local_addr: SocketAddr,
    acceptor_stats: Arc<AcceptorStats>,
    bus: EventBus,
}

/// Cheap, cloneable control handle for a running pool.
#[derive(Clone)]
pub struct PoolHandle {
    inner: Arc<HandleInner>,
}

impl PoolHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr
    }

    /// The configuration currently in effect.
    pub fn config(&self) -> Arc<PoolConfig> {
        Arc::clone(&self.inner.config.borrow())
    }

    /// Snapshot of every live worker.
    pub fn workers(&self) -> Vec<WorkerView> {
        self.inner.workers.borrow().clone()
    }

    /// Receiver that changes whenever a worker record changes.
    pub fn watch_workers(&self) -> watch::Receiver<Vec<WorkerView>> {
        self.inner.workers.clone()
    }

    pub fn ready_count(&self) -> usize {
        self.inner
            .workers
            .borrow()
            .iter()
            .filter(|worker| worker.state == WorkerState::Ready)
            .count()
    }

    pub fn acceptor_stats(&self) -> Arc<AcceptorStats> {
        Arc::clone(&self.inner.acceptor_stats)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.inner.bus.subscribe()
    }

    /// Replace every worker with a fresh generation using the current
    /// configuration.
    pub async fn reload(&self) -> Result<(), ReloadError> {
        self.send_reload(None).await
    }

    /// Replace every worker with a generation running `config`.
    pub async fn reload_with(&self, config: PoolConfig) -> Result<(), ReloadError> {
        self.send_reload(Some(config)).await
    }

    async fn send_reload(&self, config: Option<PoolConfig>) -> Result<(), ReloadError> {
        let (reply, rx) = oneshot::channel();
        self.inner
            .commands
            .send(Command::Reload { config, reply })
            .await
            .map_err(|_| ReloadError::ShuttingDown)?;
        rx.await.unwrap_or(Err(ReloadError::ShuttingDown))
    }

    /// Force-terminate a worker. It is treated as a crash and replaced.
    /// Returns `false` if no such worker is alive.
    pub async fn kill(&self, id: WorkerId) -> bool {
        let (reply, rx) = oneshot::channel();
        if self
            .inner
            .commands
            .send(Command::Kill { id, reply })
            .await
            .is_err()
        {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    /// Shut down within `deadline` and wait for the report. Concurrent and
    /// repeated calls can only shorten the deadline and all return the same
    /// report.
    pub async fn shutdown(&self, deadline: Duration) -> ShutdownReport {
        self.inner.shutdown.request(deadline);
        self.inner.shutdown.wait().await
    }

    /// Start shutting down without waiting. Returns `true` for the request
    /// that started the shutdown.
    pub fn request_shutdown(&self, deadline: Duration) -> bool {
        self.inner.shutdown.request(deadline)
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutdown.is_requested()
    }
}
