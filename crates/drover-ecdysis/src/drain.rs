//! In-flight work tracking.
//!
//! A [`DrainTracker`] hands out [`InFlight`] guards. The counter goes up when a
//! guard is created and down when it drops, so work cancelled by dropping its
//! future is released from the count as well.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Guard for one unit of in-flight work.
#[derive(Debug)]
pub struct InFlight {
    active: Arc<AtomicUsize>,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Counter of in-flight work.
///
/// Cloning is cheap; clones observe the same counter.
#[derive(Debug, Clone, Default)]
pub struct DrainTracker {
    active: Arc<AtomicUsize>,
}

impl DrainTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one unit of work. It stays counted until the guard drops.
    pub fn guard(&self) -> InFlight {
        self.active.fetch_add(1, Ordering::SeqCst);
        InFlight {
            active: Arc::clone(&self.active),
        }
    }

    /// Current number of live guards.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}
