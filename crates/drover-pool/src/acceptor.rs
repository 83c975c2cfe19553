//! Connection acceptor.
//!
//! The acceptor is the only owner of the listening socket. Each accepted
//! connection becomes a [`ConnectionTicket`] that is handed to a worker
//! through the balancer; workers never see the listener itself. Tickets carry
//! a plain `std::net::TcpStream` so they can cross from the supervisor's
//! runtime into a worker's runtime.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::net::{TcpListener, TcpSocket};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::balancer::{Balancer, Dispatch};
use crate::error::{AcceptError, BindError};
use crate::events::{EventBus, LifecycleEvent};

/// Pause after a transient accept error (e.g. file descriptor exhaustion).
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(50);

/// An accepted connection that has not been assigned to a worker yet.
#[derive(Debug)]
pub struct ConnectionTicket {
    /// Acceptance order, starting at 1.
    pub seq: u64,
    pub stream: std::net::TcpStream,
    pub peer: SocketAddr,
    pub accepted_at: Instant,
}

/// How to obtain the listening socket.
#[derive(Debug)]
pub struct ListenerConfig {
    pub addr: SocketAddr,
    /// Kernel listen backlog.
    pub listen_backlog: u32,
    /// An already-bound listener (socket activation). Used instead of binding
    /// `addr` when present.
    pub inherited: Option<std::net::TcpListener>,
}

/// Acceptor counters.
#[derive(Debug, Default)]
pub struct AcceptorStats {
    accepted: AtomicU64,
    dispatched: AtomicU64,
    queued: AtomicU64,
    rejected: AtomicU64,
}

impl AcceptorStats {
    pub fn accepted(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    /// Connections handed straight to a worker.
    pub fn dispatched(&self) -> u64 {
        self.dispatched.load(Ordering::Relaxed)
    }

    /// Connections that had to wait in the backlog.
    pub fn queued(&self) -> u64 {
        self.queued.load(Ordering::Relaxed)
    }

    /// Connections closed because the backlog was full.
    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }
}

/// Owner of the listening socket.
pub struct Acceptor {
    listener: TcpListener,
    local_addr: SocketAddr,
    stop: CancellationToken,
    seq: u64,
    stats: Arc<AcceptorStats>,
}

impl Acceptor {
    /// Bind the configured address, or adopt the inherited listener.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(config: ListenerConfig) -> Result<Self, BindError> {
        let listener = match config.inherited {
            Some(listener) => {
                listener.set_nonblocking(true).map_err(BindError::Inherited)?;
                TcpListener::from_std(listener).map_err(BindError::Inherited)?
            }
            None => bind(config.addr, config.listen_backlog)?,
        };
        let local_addr = listener
            .local_addr()
            .map_err(|e| BindError::from_io(config.addr, e))?;

        info!(addr = %local_addr, "Listening");

        Ok(Self {
            listener,
            local_addr,
            stop: CancellationToken::new(),
            seq: 0,
            stats: Arc::new(AcceptorStats::default()),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn stats(&self) -> Arc<AcceptorStats> {
        Arc::clone(&self.stats)
    }

    /// Token that stops the acceptor when cancelled.
    pub fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }

    /// Also stop as soon as `parent` is cancelled. Tokens returned by
    /// [`stop_token`](Self::stop_token) before this call no longer apply.
    pub fn stop_on(&mut self, parent: &CancellationToken) {
        self.stop = parent.child_token();
    }

    /// Stop accepting. Pending and future `accept` calls fail with
    /// [`AcceptError::Closed`]; the socket is released when the acceptor is
    /// dropped.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    /// Wait for the next connection.
    pub async fn accept(&mut self) -> Result<ConnectionTicket, AcceptError> {
        let (stream, peer) = tokio::select! {
            biased;
            _ = self.stop.cancelled() => return Err(AcceptError::Closed),
            accepted = self.listener.accept() => accepted?,
        };

        // Ownership moves to a worker's runtime.
        let stream = stream.into_std()?;
        self.seq += 1;
        self.stats.accepted.fetch_add(1, Ordering::Relaxed);

        Ok(ConnectionTicket {
            seq: self.seq,
            stream,
            peer,
            accepted_at: Instant::now(),
        })
    }
}

fn bind(addr: SocketAddr, listen_backlog: u32) -> Result<TcpListener, BindError> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()
    } else {
        TcpSocket::new_v6()
    }
    .map_err(|e| BindError::from_io(addr, e))?;

    socket
        .set_reuseaddr(true)
        .map_err(|e| BindError::from_io(addr, e))?;
    socket.bind(addr).map_err(|e| BindError::from_io(addr, e))?;
    socket
        .listen(listen_backlog)
        .map_err(|e| BindError::from_io(addr, e))
}

/// Accept loop. Runs until the acceptor is stopped, then releases the socket.
pub(crate) async fn serve(mut acceptor: Acceptor, balancer: Balancer, events: EventBus) {
    let stats = acceptor.stats();
    let addr = acceptor.local_addr();

    async move {
        loop {
            let ticket = match acceptor.accept().await {
                Ok(ticket) => ticket,
                Err(AcceptError::Closed) => break,
                Err(e) => {
                    warn!(error = %e, "Accept failed, retrying");
                    tokio::select! {
                        _ = acceptor.stop.cancelled() => break,
                        _ = tokio::time::sleep(ACCEPT_RETRY_DELAY) => continue,
                    }
                }
            };

            let seq = ticket.seq;
            let peer = ticket.peer;
            match balancer.dispatch(ticket) {
                Ok(Dispatch::Assigned(worker)) => {
                    stats.dispatched.fetch_add(1, Ordering::Relaxed);
                    debug!(seq, peer = %peer, worker = %worker, "Connection dispatched");
                }
                Ok(Dispatch::Queued(depth)) => {
                    stats.queued.fetch_add(1, Ordering::Relaxed);
                    debug!(seq, peer = %peer, depth, "No ready worker, connection queued");
                }
                Err(AcceptError::Overloaded { backlog }) => {
                    stats.rejected.fetch_add(1, Ordering::Relaxed);
                    events.emit(LifecycleEvent::Overloaded { backlog });
                }
                Err(AcceptError::Closed) => break,
                Err(e) => warn!(seq, peer = %peer, error = %e, "Failed to dispatch connection"),
            }
        }

        drop(acceptor);
        info!("Acceptor stopped, listening socket released");
    }
    .instrument(info_span!("acceptor", addr = %addr))
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loopback() -> ListenerConfig {
        ListenerConfig {
            addr: "127.0.0.1:0".parse().unwrap(),
            listen_backlog: 128,
            inherited: None,
        }
    }

    #[tokio::test]
    async fn test_accept_assigns_sequence() {
        let mut acceptor = Acceptor::start(loopback()).unwrap();
        let addr = acceptor.local_addr();

        let _a = tokio::net::TcpStream::connect(addr).await.unwrap();
        let first = acceptor.accept().await.unwrap();
        let _b = tokio::net::TcpStream::connect(addr).await.unwrap();
        let second = acceptor.accept().await.unwrap();

        assert_eq!(first.seq, 1);
        assert_eq!(second.seq, 2);
        assert_eq!(acceptor.stats().accepted(), 2);
    }

    #[tokio::test]
    async fn test_stop_closes_accept() {
        let mut acceptor = Acceptor::start(loopback()).unwrap();
        acceptor.stop();
        assert!(matches!(acceptor.accept().await, Err(AcceptError::Closed)));
    }

    #[tokio::test]
    async fn test_address_in_use() {
        let first = Acceptor::start(loopback()).unwrap();
        let err = Acceptor::start(ListenerConfig {
            addr: first.local_addr(),
            listen_backlog: 128,
            inherited: None,
        })
        .err()
        .unwrap();
        assert!(matches!(err, BindError::InUse { .. }));
    }

    #[tokio::test]
    async fn test_adopts_inherited_listener() {
        let std_listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = std_listener.local_addr().unwrap();

        let acceptor = Acceptor::start(ListenerConfig {
            addr: "0.0.0.0:1".parse().unwrap(),
            listen_backlog: 128,
            inherited: Some(std_listener),
        })
        .unwrap();
        assert_eq!(acceptor.local_addr(), addr);
    }

    #[tokio::test]
    async fn test_parent_cancel_stops_accepting() {
        let parent = CancellationToken::new();
        let mut acceptor = Acceptor::start(loopback()).unwrap();
        acceptor.stop_on(&parent);
        let addr = acceptor.local_addr();
        let stats = acceptor.stats();

        let task = tokio::spawn(serve(acceptor, Balancer::new(4), EventBus::new(16)));
        parent.cancel();
        task.await.unwrap();

        assert!(tokio::net::TcpStream::connect(addr).await.is_err());
        assert_eq!(stats.accepted(), 0);
    }

    #[tokio::test]
    async fn test_serve_rejects_when_backlog_full() {
        let acceptor = Acceptor::start(loopback()).unwrap();
        let addr = acceptor.local_addr();
        let stats = acceptor.stats();
        let stop = acceptor.stop_token();
        let events = EventBus::new(16);
        let mut rx = events.subscribe();

        let task = tokio::spawn(serve(acceptor, Balancer::new(1), events));

        let _queued = tokio::net::TcpStream::connect(addr).await.unwrap();
        let _rejected = tokio::net::TcpStream::connect(addr).await.unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.kind, LifecycleEvent::Overloaded { backlog: 1 });
        assert_eq!(stats.queued(), 1);
        assert_eq!(stats.rejected(), 1);

        stop.cancel();
        task.await.unwrap();
        assert!(tokio::net::TcpStream::connect(addr).await.is_err());
    }
}
