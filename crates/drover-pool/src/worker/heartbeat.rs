use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Last sign of life from a worker's event loop.
///
/// Stored as milliseconds since `origin` so it fits in an atomic.
#[derive(Debug)]
pub struct Heartbeat {
    origin: Instant,
    last: AtomicU64,
}

impl Heartbeat {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            last: AtomicU64::new(0),
        }
    }

    pub fn beat(&self) {
        let millis = self.origin.elapsed().as_millis() as u64;
        self.last.store(millis, Ordering::Release);
    }

    pub fn last(&self) -> Instant {
        self.origin + Duration::from_millis(self.last.load(Ordering::Acquire))
    }

    pub fn silent_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last())
    }
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self::new()
    }
}
