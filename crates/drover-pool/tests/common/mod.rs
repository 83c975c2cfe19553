//! Test utilities for pool integration tests.
//!
//! Provides a small routing handler with misbehaving endpoints, config
//! presets tuned for fast tests, launchers that fail on purpose and helpers
//! for waiting on pool state and events.

#![allow(dead_code)]

use std::future::Future;
use std::io;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use drover_pool::{
    handler, BackoffPolicy, BoxError, Event, HandlerFactory, LifecycleEvent, Launcher,
    PoolConfig, PoolConfigBuilder, PoolHandle, Request, Response, ThreadLauncher,
};
use hyper::StatusCode;
use tokio::sync::broadcast;

/// Default timeout for test operations.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Initialize tracing for tests (only once).
pub fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("drover_pool=debug")
            .with_test_writer()
            .try_init();
    });
}

/// Loopback config with fast heartbeats and a roomy restart budget.
pub fn config(workers: usize) -> PoolConfigBuilder {
    PoolConfig::builder()
        .workers(workers)
        .bind("127.0.0.1:0".parse().unwrap())
        .graceful_timeout(Duration::from_secs(5))
        .restart_budget(5, Duration::from_secs(60))
        .heartbeat(Duration::from_millis(50), 4)
        .spawn_retry(
            3,
            BackoffPolicy {
                first: Duration::from_millis(10),
                max: Duration::from_millis(50),
                factor: 2.0,
            },
        )
}

/// HTTP client that opens a fresh connection for every request.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .timeout(Duration::from_secs(30))
        .build()
        .unwrap()
}

fn query_ms(req: &Request) -> u64 {
    req.uri()
        .query()
        .and_then(|query| query.strip_prefix("ms="))
        .and_then(|ms| ms.parse().ok())
        .unwrap_or(0)
}

/// Test application.
///
/// - `/` answers `ok`
/// - `/sleep?ms=N` awaits N milliseconds
/// - `/block?ms=N` blocks the worker thread for N milliseconds
/// - `/error` returns a handler error
/// - `/panic` panics
pub async fn route(req: Request) -> Result<Response, BoxError> {
    match req.uri().path() {
        "/" => Ok(handler::text("ok")),
        "/sleep" => {
            tokio::time::sleep(Duration::from_millis(query_ms(&req))).await;
            Ok(handler::text("slept"))
        }
        "/block" => {
            std::thread::sleep(Duration::from_millis(query_ms(&req)));
            Ok(handler::text("blocked"))
        }
        "/error" => Err("backend unavailable".into()),
        "/panic" => panic!("handler bug"),
        _ => Ok(handler::error_response(StatusCode::NOT_FOUND, "Not Found")),
    }
}

pub fn app() -> impl HandlerFactory {
    || -> Result<_, BoxError> { Ok(route) }
}

/// Factory whose first `healthy` loads succeed and every later one fails.
pub fn app_failing_after(healthy: usize) -> impl HandlerFactory {
    let loads = Arc::new(AtomicUsize::new(0));
    move || -> Result<_, BoxError> {
        if loads.fetch_add(1, Ordering::SeqCst) < healthy {
            Ok(route)
        } else {
            Err("application failed to import".into())
        }
    }
}

/// Launcher that lets its first `healthy` launches through, then fails the
/// next `failures` ones.
pub struct FlakyLauncher {
    healthy: AtomicU32,
    failures: AtomicU32,
    inner: ThreadLauncher,
}

impl FlakyLauncher {
    /// Fails the first `failures` launches.
    pub fn new(failures: u32) -> Self {
        Self {
            healthy: AtomicU32::new(0),
            failures: AtomicU32::new(failures),
            inner: ThreadLauncher::new(),
        }
    }

    /// Succeeds `healthy` times, then fails every launch.
    pub fn failing_after(healthy: u32) -> Self {
        Self {
            healthy: AtomicU32::new(healthy),
            ..Self::new(u32::MAX)
        }
    }
}

impl Launcher for FlakyLauncher {
    fn launch(&self, name: String, body: Box<dyn FnOnce() + Send>) -> io::Result<()> {
        let healthy = self.healthy.load(Ordering::SeqCst);
        if healthy > 0 {
            self.healthy.store(healthy - 1, Ordering::SeqCst);
            return self.inner.launch(name, body);
        }
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(io::Error::new(
                io::ErrorKind::WouldBlock,
                "thread limit reached",
            ));
        }
        self.inner.launch(name, body)
    }
}

/// Poll `condition` until it holds or [`DEFAULT_TIMEOUT`] passes.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    let poll = async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    };
    tokio::time::timeout(DEFAULT_TIMEOUT, poll)
        .await
        .expect("condition not reached in time");
}

/// Wait for the first event matching `matches`.
pub async fn next_event(
    rx: &mut broadcast::Receiver<Event>,
    mut matches: impl FnMut(&LifecycleEvent) -> bool,
) -> LifecycleEvent {
    let find = async {
        loop {
            match rx.recv().await {
                Ok(event) if matches(&event.kind) => return event.kind,
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event bus closed"),
            }
        }
    };
    tokio::time::timeout(DEFAULT_TIMEOUT, find)
        .await
        .expect("event not received in time")
}

/// Everything already published on `rx`.
pub fn drain_events(rx: &mut broadcast::Receiver<Event>) -> Vec<LifecycleEvent> {
    let mut events = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(event) => events.push(event.kind),
            Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
            Err(_) => return events,
        }
    }
}

/// Total requests inside handlers across the pool.
pub fn in_flight(handle: &PoolHandle) -> usize {
    handle
        .workers()
        .iter()
        .map(|worker| worker.stats.in_flight())
        .sum()
}

/// Run `future` with [`DEFAULT_TIMEOUT`].
pub async fn within<T>(future: impl Future<Output = T>) -> T {
    tokio::time::timeout(DEFAULT_TIMEOUT, future)
        .await
        .expect("operation timed out")
}
