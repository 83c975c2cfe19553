//! The worker event loop and per-connection serving.

use std::cell::Cell;
use std::convert::Infallible;
use std::panic::AssertUnwindSafe;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::StatusCode;
use hyper_util::rt::{TokioIo, TokioTimer};
use tokio::net::TcpStream;
use tokio::sync::Notify;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{Boot, WorkerEvent, WorkerExit, WorkerId, WorkerStats};
use crate::acceptor::ConnectionTicket;
use crate::config::PoolConfig;
use crate::handler::{error_response, Handler, HandlerFactory, Request, Response};
use crate::worker::RequestOutcome;

/// How long a draining worker waits for the first request on a connection
/// that was accepted just before the drain.
const FIRST_REQUEST_GRACE: Duration = Duration::from_millis(250);

/// Shared by every connection task of one worker.
pub(crate) struct Context<H> {
    pub id: WorkerId,
    pub handler: H,
    pub config: Arc<PoolConfig>,
    pub stats: Arc<WorkerStats>,
    pub drain: CancellationToken,
}

pub(super) async fn run<F: HandlerFactory>(boot: Boot, factory: Arc<F>) -> WorkerExit {
    let Boot {
        id,
        config,
        mut tickets,
        drain,
        kill,
        heartbeat,
        stats,
        events,
    } = boot;

    let handler = match factory.load() {
        Ok(handler) => handler,
        Err(e) => {
            error!(worker = %id, error = %e, "Failed to load application handler");
            return WorkerExit::LoadFailed(e.to_string());
        }
    };

    let ctx = Rc::new(Context {
        id,
        handler,
        config: Arc::clone(&config),
        stats,
        drain: drain.clone(),
    });

    let mut ticker = tokio::time::interval(config.heartbeat_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    heartbeat.beat();
    let _ = events.send(WorkerEvent::Ready { id });
    debug!(worker = %id, "Worker accepting connections");

    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            biased;

            _ = kill.cancelled() => return killed(&ctx, &mut connections),

            _ = drain.cancelled() => break,

            _ = ticker.tick() => heartbeat.beat(),

            Some(_) = connections.join_next(), if !connections.is_empty() => {}

            ticket = tickets.recv() => match ticket {
                Some(ticket) => {
                    connections.spawn_local(handle(Rc::clone(&ctx), ticket));
                }
                None => break,
            },
        }
    }

    // Tickets already handed to this worker are still served.
    tickets.close();
    while let Ok(ticket) = tickets.try_recv() {
        connections.spawn_local(handle(Rc::clone(&ctx), ticket));
    }

    info!(
        worker = %id,
        connections = connections.len(),
        in_flight = ctx.stats.in_flight(),
        "Worker draining"
    );

    let deadline = tokio::time::sleep(config.graceful_timeout);
    tokio::pin!(deadline);

    while !connections.is_empty() {
        tokio::select! {
            biased;

            _ = kill.cancelled() => return killed(&ctx, &mut connections),

            _ = &mut deadline => {
                let aborted = ctx.stats.in_flight() as u64;
                warn!(worker = %id, aborted, "Graceful timeout reached, aborting requests");
                ctx.stats.record_aborted(aborted);
                connections.abort_all();
                return WorkerExit::Drained { aborted };
            }

            _ = ticker.tick() => heartbeat.beat(),

            _ = connections.join_next() => {}
        }
    }

    WorkerExit::Drained { aborted: 0 }
}

fn killed<H>(ctx: &Context<H>, connections: &mut JoinSet<RequestOutcome>) -> WorkerExit {
    let aborted = ctx.stats.in_flight() as u64;
    warn!(worker = %ctx.id, aborted, "Worker killed");
    ctx.stats.record_aborted(aborted);
    connections.abort_all();
    WorkerExit::Killed { aborted }
}

/// Serve one connection until it closes. Returns the outcome of its last
/// request.
pub(crate) async fn handle<H: Handler>(
    ctx: Rc<Context<H>>,
    ticket: ConnectionTicket,
) -> RequestOutcome {
    ctx.stats.connection();

    let ConnectionTicket {
        seq, stream, peer, ..
    } = ticket;
    let stream = match TcpStream::from_std(stream) {
        Ok(stream) => stream,
        Err(e) => {
            debug!(worker = %ctx.id, seq, error = %e, "Failed to register connection");
            ctx.stats.record(RequestOutcome::ClientError);
            return RequestOutcome::ClientError;
        }
    };

    let last = Rc::new(Cell::new(None));
    let requests = Rc::new(Cell::new(0u64));
    let started = Rc::new(Notify::new());
    let service = {
        let ctx = Rc::clone(&ctx);
        let last = Rc::clone(&last);
        let requests = Rc::clone(&requests);
        let started = Rc::clone(&started);
        service_fn(move |req| {
            let ctx = Rc::clone(&ctx);
            let last = Rc::clone(&last);
            requests.set(requests.get() + 1);
            started.notify_one();
            async move {
                let (response, outcome) = dispatch(&ctx, req).await;
                last.set(Some(outcome));
                Ok::<_, Infallible>(response)
            }
        })
    };

    let draining = ctx.drain.is_cancelled();
    let mut builder = http1::Builder::new();
    builder
        .timer(TokioTimer::new())
        .keep_alive(ctx.config.keep_alive && !draining);

    let conn = builder.serve_connection(TokioIo::new(stream), service);
    tokio::pin!(conn);

    // A connection that starts after the drain began is served once with
    // keep-alive off; hyper would close it unread on graceful_shutdown.
    let result = if draining {
        conn.as_mut().await
    } else {
        tokio::select! {
            result = conn.as_mut() => result,
            _ = ctx.drain.cancelled() => {
                // hyper closes a connection that has not sent its first
                // request yet, so give that request a moment to arrive.
                let finished = if requests.get() == 0 {
                    tokio::select! {
                        result = conn.as_mut() => Some(result),
                        _ = started.notified() => None,
                        _ = tokio::time::sleep(FIRST_REQUEST_GRACE) => None,
                    }
                } else {
                    None
                };
                match finished {
                    Some(result) => result,
                    None => {
                        // Finish the current request, then close instead of idling.
                        conn.as_mut().graceful_shutdown();
                        conn.as_mut().await
                    }
                }
            }
        }
    };

    match result {
        Ok(()) => last.get().unwrap_or(RequestOutcome::Completed),
        Err(e) => {
            debug!(worker = %ctx.id, seq, peer = %peer, error = %e, "Connection error");
            ctx.stats.record(RequestOutcome::ClientError);
            RequestOutcome::ClientError
        }
    }
}

/// Run the handler for one request under the request timeout.
async fn dispatch<H: Handler>(ctx: &Context<H>, req: Request) -> (Response, RequestOutcome) {
    let _in_flight = ctx.stats.begin();
    let method = req.method().clone();
    let path = req.uri().path().to_owned();

    let call = AssertUnwindSafe(async { ctx.handler.call(req).await }).catch_unwind();

    let (response, outcome) = match tokio::time::timeout(ctx.config.request_timeout, call).await
    {
        Ok(Ok(Ok(response))) => (response, RequestOutcome::Completed),
        Ok(Ok(Err(e))) => {
            warn!(worker = %ctx.id, %method, %path, error = %e, "Handler returned an error");
            (
                error_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error"),
                RequestOutcome::HandlerError,
            )
        }
        Ok(Err(panic)) => {
            error!(
                worker = %ctx.id,
                %method,
                %path,
                panic = panic_message(panic.as_ref()),
                "Handler panicked"
            );
            (
                error_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error"),
                RequestOutcome::HandlerError,
            )
        }
        Err(_) => {
            warn!(
                worker = %ctx.id,
                %method,
                %path,
                timeout_ms = ctx.config.request_timeout.as_millis() as u64,
                "Handler exceeded request timeout"
            );
            (
                error_response(StatusCode::SERVICE_UNAVAILABLE, "Request timed out"),
                RequestOutcome::Timeout,
            )
        }
    };

    ctx.stats.record(outcome);
    (response, outcome)
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{text, BoxError};
    use std::time::Instant;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn config(request_timeout: Duration) -> Arc<PoolConfig> {
        Arc::new(
            PoolConfig::builder()
                .workers(1)
                .graceful_timeout(Duration::from_secs(1))
                .restart_budget(3, Duration::from_secs(10))
                .request_timeout(request_timeout)
                .keep_alive(false)
                .build()
                .unwrap(),
        )
    }

    fn context<H: Handler>(handler: H, request_timeout: Duration) -> Rc<Context<H>> {
        Rc::new(Context {
            id: WorkerId(1),
            handler,
            config: config(request_timeout),
            stats: Arc::new(WorkerStats::default()),
            drain: CancellationToken::new(),
        })
    }

    /// A connected client socket and the matching server-side ticket.
    async fn ticket() -> (TcpStream, ConnectionTicket) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap())
            .await
            .unwrap();
        let (server, peer) = listener.accept().await.unwrap();
        let ticket = ConnectionTicket {
            seq: 0,
            stream: server.into_std().unwrap(),
            peer,
            accepted_at: Instant::now(),
        };
        (client, ticket)
    }

    async fn exchange(mut client: TcpStream, request: &[u8]) -> String {
        client.write_all(request).await.unwrap();
        let mut buf = Vec::new();
        client.read_to_end(&mut buf).await.unwrap();
        String::from_utf8_lossy(&buf).into_owned()
    }

    const GET: &[u8] = b"GET /x HTTP/1.1\r\nhost: test\r\nconnection: close\r\n\r\n";

    #[tokio::test]
    async fn test_handle_completed() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let ctx = context(
                    |_req: Request| async { Ok::<_, BoxError>(text("hello")) },
                    Duration::from_secs(5),
                );
                let (client, ticket) = ticket().await;
                let served = tokio::task::spawn_local(handle(Rc::clone(&ctx), ticket));

                let response = exchange(client, GET).await;
                assert!(response.starts_with("HTTP/1.1 200"));
                assert!(response.ends_with("hello"));
                assert_eq!(served.await.unwrap(), RequestOutcome::Completed);
                assert_eq!(ctx.stats.count(RequestOutcome::Completed), 1);
            })
            .await;
    }

    #[tokio::test]
    async fn test_handle_handler_error_is_500() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let ctx = context(
                    |_req: Request| async { Err::<Response, BoxError>("database down".into()) },
                    Duration::from_secs(5),
                );
                let (client, ticket) = ticket().await;
                let served = tokio::task::spawn_local(handle(Rc::clone(&ctx), ticket));

                let response = exchange(client, GET).await;
                assert!(response.starts_with("HTTP/1.1 500"));
                assert!(response.contains(r#"{"detail":"Internal server error"}"#));
                assert_eq!(served.await.unwrap(), RequestOutcome::HandlerError);
            })
            .await;
    }

    #[tokio::test]
    async fn test_handle_panic_is_500() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let ctx = context(
                    |_req: Request| async {
                        if true {
                            panic!("handler bug");
                        }
                        Ok::<_, BoxError>(text("unreachable"))
                    },
                    Duration::from_secs(5),
                );
                let (client, ticket) = ticket().await;
                let served = tokio::task::spawn_local(handle(Rc::clone(&ctx), ticket));

                let response = exchange(client, GET).await;
                assert!(response.starts_with("HTTP/1.1 500"));
                assert_eq!(served.await.unwrap(), RequestOutcome::HandlerError);
            })
            .await;
    }

    #[tokio::test]
    async fn test_handle_timeout_is_503_and_cancels() {
        struct Scoped(Rc<Cell<bool>>);
        impl Drop for Scoped {
            fn drop(&mut self) {
                self.0.set(true);
            }
        }

        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let released = Rc::new(Cell::new(false));
                let flag = Rc::clone(&released);
                let ctx = context(
                    move |_req: Request| {
                        let scoped = Scoped(Rc::clone(&flag));
                        async move {
                            let _scoped = scoped;
                            tokio::time::sleep(Duration::from_secs(60)).await;
                            Ok::<_, BoxError>(text("late"))
                        }
                    },
                    Duration::from_millis(50),
                );
                let (client, ticket) = ticket().await;
                let served = tokio::task::spawn_local(handle(Rc::clone(&ctx), ticket));

                let response = exchange(client, GET).await;
                assert!(response.starts_with("HTTP/1.1 503"));
                assert!(response.contains(r#"{"detail":"Request timed out"}"#));
                assert_eq!(served.await.unwrap(), RequestOutcome::Timeout);
                assert!(released.get());
                assert_eq!(ctx.stats.in_flight(), 0);
            })
            .await;
    }

    #[tokio::test]
    async fn test_handle_garbage_is_client_error() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let ctx = context(
                    |_req: Request| async { Ok::<_, BoxError>(text("hello")) },
                    Duration::from_secs(5),
                );
                let (client, ticket) = ticket().await;
                let served = tokio::task::spawn_local(handle(Rc::clone(&ctx), ticket));

                let mut client = client;
                client.write_all(b"\x00\x01not http at all\r\n\r\n").await.unwrap();
                client.shutdown().await.unwrap();

                assert_eq!(served.await.unwrap(), RequestOutcome::ClientError);
                assert_eq!(ctx.stats.count(RequestOutcome::ClientError), 1);
            })
            .await;
    }
}
