//! Unix signal handling for the supervisor process.
//!
//! - `SIGTERM` → graceful shutdown
//! - `SIGINT` / `SIGQUIT` → quick shutdown
//! - `SIGHUP` → rolling reload

use tokio::signal::unix::{signal, Signal as UnixSignal, SignalKind};
use tracing::info;

/// Supervisor intent derived from a received signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// SIGTERM: stop accepting, drain within the graceful timeout, exit.
    Terminate,
    /// SIGINT or SIGQUIT: stop accepting and abort in-flight requests.
    Quit,
    /// SIGHUP: replace the worker generation without dropping capacity.
    Reload,
}

/// Registered signal streams.
///
/// Register once at startup and call [`Signals::recv`] in a loop; every
/// delivery of a signal yields one [`Signal`].
pub struct Signals {
    sigterm: UnixSignal,
    sigint: UnixSignal,
    sigquit: UnixSignal,
    sighup: UnixSignal,
}

impl Signals {
    /// Install handlers for SIGTERM, SIGINT, SIGQUIT and SIGHUP.
    pub fn new() -> std::io::Result<Self> {
        Ok(Self {
            sigterm: signal(SignalKind::terminate())?,
            sigint: signal(SignalKind::interrupt())?,
            sigquit: signal(SignalKind::quit())?,
            sighup: signal(SignalKind::hangup())?,
        })
    }

    /// Wait for the next signal.
    pub async fn recv(&mut self) -> Signal {
        tokio::select! {
            _ = self.sigterm.recv() => {
                info!("Received SIGTERM, initiating graceful shutdown");
                Signal::Terminate
            }
            _ = self.sigint.recv() => {
                info!("Received SIGINT, initiating quick shutdown");
                Signal::Quit
            }
            _ = self.sigquit.recv() => {
                info!("Received SIGQUIT, initiating quick shutdown");
                Signal::Quit
            }
            _ = self.sighup.recv() => {
                info!("Received SIGHUP, reloading workers");
                Signal::Reload
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_sighup_maps_to_reload() {
        let mut signals = Signals::new().unwrap();

        unsafe { libc::raise(libc::SIGHUP) };

        let received = tokio::time::timeout(Duration::from_secs(5), signals.recv())
            .await
            .expect("signal not delivered");
        assert_eq!(received, Signal::Reload);
    }
}
