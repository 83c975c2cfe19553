//! Round-robin distribution of connection tickets over ready workers.
//!
//! Only Ready workers hold a route. The supervisor adds a route when a worker
//! reports Ready and removes it before telling the worker to drain, so a
//! Draining or Dead worker is never picked. A route whose worker has already
//! gone (closed ticket channel) is dropped on the spot and the ticket moves on
//! to the next route.
//!
//! With no route available tickets wait in a bounded backlog that is flushed
//! into the next route to appear.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;

use crate::acceptor::ConnectionTicket;
use crate::error::AcceptError;
use crate::worker::WorkerId;

/// Where a dispatched ticket went.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Assigned(WorkerId),
    /// Queued in the backlog at the given depth.
    Queued(usize),
}

struct Route {
    id: WorkerId,
    tx: mpsc::UnboundedSender<ConnectionTicket>,
}

struct Inner {
    routes: Vec<Route>,
    cursor: usize,
    backlog: VecDeque<ConnectionTicket>,
    capacity: usize,
    closed: bool,
}

impl Inner {
    /// Hand `ticket` to the next live route, dropping dead ones on the way.
    fn assign(&mut self, mut ticket: ConnectionTicket) -> Result<WorkerId, ConnectionTicket> {
        while !self.routes.is_empty() {
            let index = self.cursor % self.routes.len();
            match self.routes[index].tx.send(ticket) {
                Ok(()) => {
                    self.cursor = index + 1;
                    return Ok(self.routes[index].id);
                }
                Err(mpsc::error::SendError(returned)) => {
                    self.routes.remove(index);
                    self.cursor = index;
                    ticket = returned;
                }
            }
        }
        Err(ticket)
    }

    fn enqueue(&mut self, ticket: ConnectionTicket) -> Result<Dispatch, AcceptError> {
        if self.backlog.len() >= self.capacity {
            // Dropping the ticket closes the connection.
            drop(ticket);
            return Err(AcceptError::Overloaded {
                backlog: self.capacity,
            });
        }
        self.backlog.push_back(ticket);
        Ok(Dispatch::Queued(self.backlog.len()))
    }

    fn flush(&mut self) {
        while let Some(ticket) = self.backlog.pop_front() {
            if let Err(ticket) = self.assign(ticket) {
                self.backlog.push_front(ticket);
                break;
            }
        }
    }
}

/// Shared dispatcher between the acceptor and the supervisor.
#[derive(Clone)]
pub(crate) struct Balancer {
    inner: Arc<Mutex<Inner>>,
}

impl Balancer {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                routes: Vec::new(),
                cursor: 0,
                backlog: VecDeque::new(),
                capacity,
                closed: false,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn dispatch(&self, ticket: ConnectionTicket) -> Result<Dispatch, AcceptError> {
        let mut inner = self.lock();
        if inner.closed {
            return Err(AcceptError::Closed);
        }
        // Nothing bypasses waiting tickets.
        inner.flush();
        if !inner.backlog.is_empty() {
            return inner.enqueue(ticket);
        }
        match inner.assign(ticket) {
            Ok(id) => Ok(Dispatch::Assigned(id)),
            Err(returned) => inner.enqueue(returned),
        }
    }

    /// Make a Ready worker eligible and flush the backlog into the pool.
    pub fn add(&self, id: WorkerId, tx: mpsc::UnboundedSender<ConnectionTicket>) {
        let mut inner = self.lock();
        if inner.closed || inner.routes.iter().any(|route| route.id == id) {
            return;
        }
        inner.routes.push(Route { id, tx });
        inner.flush();
    }

    /// Stop routing to `id`. Returns whether it had a route.
    pub fn remove(&self, id: WorkerId) -> bool {
        let mut inner = self.lock();
        let before = inner.routes.len();
        inner.routes.retain(|route| route.id != id);
        before != inner.routes.len()
    }

    pub fn set_capacity(&self, capacity: usize) {
        self.lock().capacity = capacity;
    }

    /// Refuse further tickets and drop queued ones. Returns how many were
    /// dropped.
    pub fn close(&self) -> usize {
        let mut inner = self.lock();
        inner.closed = true;
        inner.routes.clear();
        let dropped = inner.backlog.len();
        inner.backlog.clear();
        dropped
    }

    #[cfg(test)]
    pub fn routes(&self) -> usize {
        self.lock().routes.len()
    }

    #[cfg(test)]
    pub fn queued(&self) -> usize {
        self.lock().backlog.len()
    }
}
