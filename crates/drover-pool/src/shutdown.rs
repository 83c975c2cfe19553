//! Shutdown coordination.
//!
//! [`ShutdownCoordinator`] is the single place a shutdown is requested and
//! its result published. The first request starts the shutdown; later
//! requests can only move the deadline closer. Every caller observes the same
//! [`ShutdownReport`].

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Result of a pool shutdown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Workers that finished draining before the deadline.
    pub drained: usize,
    /// Workers force-terminated at the deadline.
    pub forced: usize,
    /// Requests cut short by draining timeouts or force-termination.
    pub aborted_requests: u64,
}

struct Shared {
    requested: CancellationToken,
    deadline: watch::Sender<Option<Instant>>,
    report: watch::Sender<Option<ShutdownReport>>,
}

#[derive(Clone)]
pub struct ShutdownCoordinator {
    shared: Arc<Shared>,
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        let (deadline, _) = watch::channel(None);
        let (report, _) = watch::channel(None);
        Self {
            shared: Arc::new(Shared {
                requested: CancellationToken::new(),
                deadline,
                report,
            }),
        }
    }

    /// Request shutdown within `deadline`. Returns `true` for the request
    /// that started the shutdown.
    pub fn request(&self, deadline: Duration) -> bool {
        let at = deadline_after(deadline);
        let mut first = false;
        self.shared.deadline.send_modify(|current| {
            first = current.is_none();
            if current.map_or(true, |existing| at < existing) {
                *current = Some(at);
            }
        });
        self.shared.requested.cancel();
        first
    }

    pub fn is_requested(&self) -> bool {
        self.shared.requested.is_cancelled()
    }

    pub async fn requested(&self) {
        self.shared.requested.cancelled().await
    }

    /// Token cancelled when shutdown is requested.
    pub(crate) fn token(&self) -> &CancellationToken {
        &self.shared.requested
    }

    /// Current deadline, tightened by later requests.
    pub fn deadline(&self) -> watch::Receiver<Option<Instant>> {
        self.shared.deadline.subscribe()
    }

    pub(crate) fn complete(&self, report: ShutdownReport) {
        self.shared.report.send_replace(Some(report));
    }

    /// Wait until shutdown finished and return its report.
    pub async fn wait(&self) -> ShutdownReport {
        let mut rx = self.shared.report.subscribe();
        // The sender lives in `shared`, so the channel cannot close here.
        let report = match rx.wait_for(Option::is_some).await {
            Ok(report) => (*report).unwrap_or_default(),
            Err(_) => ShutdownReport::default(),
        };
        report
    }

    /// Report if shutdown already finished.
    pub fn report(&self) -> Option<ShutdownReport> {
        *self.shared.report.borrow()
    }
}

/// `Instant::now() + after`, saturating to a far-future instant.
pub(crate) fn deadline_after(after: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(after).unwrap_or_else(|| now + FAR_FUTURE)
}

// About thirty years.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_first_request_wins() {
        let coordinator = ShutdownCoordinator::new();
        assert!(!coordinator.is_requested());
        assert!(coordinator.request(Duration::from_secs(10)));
        assert!(!coordinator.request(Duration::from_secs(20)));
        assert!(coordinator.is_requested());
    }

    #[tokio::test]
    async fn test_later_request_only_tightens() {
        let coordinator = ShutdownCoordinator::new();
        let deadline = coordinator.deadline();

        coordinator.request(Duration::from_secs(10));
        let first = deadline.borrow().unwrap();

        coordinator.request(Duration::from_secs(30));
        assert_eq!(deadline.borrow().unwrap(), first);

        coordinator.request(Duration::ZERO);
        assert!(deadline.borrow().unwrap() < first);
    }

    #[tokio::test]
    async fn test_huge_deadline_saturates() {
        let coordinator = ShutdownCoordinator::new();
        assert!(coordinator.request(Duration::MAX));
        let far = coordinator.deadline().borrow().unwrap();
        assert!(far > Instant::now() + Duration::from_secs(86_400 * 365));

        coordinator.request(Duration::from_secs(1));
        assert!(coordinator.deadline().borrow().unwrap() < far);
        assert!(deadline_after(Duration::MAX) > Instant::now());
    }

    #[tokio::test]
    async fn test_all_waiters_see_same_report() {
        let coordinator = ShutdownCoordinator::new();
        let waiter = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.wait().await })
        };

        let report = ShutdownReport {
            drained: 2,
            forced: 1,
            aborted_requests: 3,
        };
        coordinator.complete(report);

        assert_eq!(waiter.await.unwrap(), report);
        assert_eq!(coordinator.wait().await, report);
        assert_eq!(coordinator.report(), Some(report));
    }
}
