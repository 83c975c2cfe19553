//! Adopting listening sockets handed over by a service manager.
//!
//! Follows the systemd socket activation protocol: `LISTEN_FDS` counts the
//! sockets starting at fd 3 and `LISTEN_FD_NAMES` names them. A
//! half-inherited state is an error, never a fallback to a fresh bind.

use std::os::unix::io::FromRawFd;

use thiserror::Error;
use tracing::info;

/// First file descriptor handed over by the parent (after stdin/stdout/stderr).
const LISTEN_FDS_START: i32 = 3;

/// Failure to adopt the sockets described by the environment.
#[derive(Debug, Error)]
pub enum InheritError {
    /// `LISTEN_FDS` is not a number.
    #[error("LISTEN_FDS is not a valid count: {0:?}")]
    InvalidCount(String),

    /// `LISTEN_FDS` is set without `LISTEN_FD_NAMES`.
    #[error("LISTEN_FDS is set but LISTEN_FD_NAMES is missing")]
    MissingNames,

    /// The names list and the fd count disagree.
    #[error("LISTEN_FD_NAMES has {names} entries but LISTEN_FDS says {fds}")]
    CountMismatch { names: usize, fds: usize },

    /// An inherited fd is closed or is not a socket.
    #[error("inherited fd {fd} (name: {name}) is not a valid socket")]
    NotASocket { fd: i32, name: String },

    /// A listener the caller expected was not passed.
    #[error("expected inherited listener '{expected}' but only have {available:?}")]
    Missing {
        expected: String,
        available: Vec<String>,
    },

    /// Inherited listeners were left unclaimed.
    #[error("unconsumed inherited listeners: {0:?}")]
    Unconsumed(Vec<String>),

    /// Switching the socket to non-blocking mode failed.
    #[error("failed to prepare inherited fd {fd}: {source}")]
    Io {
        fd: i32,
        #[source]
        source: std::io::Error,
    },
}

/// Named listening sockets passed in at startup.
///
/// Listeners are returned as `std` sockets already switched to non-blocking
/// mode, so they can be registered with whichever runtime ends up owning them.
#[derive(Debug)]
pub struct ListenerSet {
    listeners: Vec<(String, std::net::TcpListener)>,
}

impl ListenerSet {
    /// Adopt every socket described by the environment.
    ///
    /// The variables are removed so child processes do not see them.
    /// Returns `Ok(None)` if `LISTEN_FDS` is absent or "0" (cold start).
    pub fn from_env() -> Result<Option<Self>, InheritError> {
        let listen_fds = match std::env::var("LISTEN_FDS") {
            Ok(raw) => raw
                .trim()
                .parse::<usize>()
                .map_err(|_| InheritError::InvalidCount(raw.clone()))?,
            Err(_) => 0,
        };

        if listen_fds == 0 {
            return Ok(None);
        }

        let names_raw = std::env::var("LISTEN_FD_NAMES").map_err(|_| InheritError::MissingNames)?;
        let names: Vec<&str> = names_raw.split(':').collect();
        if names.len() != listen_fds {
            return Err(InheritError::CountMismatch {
                names: names.len(),
                fds: listen_fds,
            });
        }

        let mut listeners = Vec::with_capacity(listen_fds);
        for (i, name) in names.iter().enumerate() {
            let fd = LISTEN_FDS_START + i as i32;
            if !validate_fd(fd) {
                return Err(InheritError::NotASocket {
                    fd,
                    name: name.to_string(),
                });
            }

            // SAFETY: fstat confirmed the fd is an open socket, and the parent
            // handed its ownership to this process.
            let listener = unsafe { std::net::TcpListener::from_raw_fd(fd) };
            listener
                .set_nonblocking(true)
                .map_err(|source| InheritError::Io { fd, source })?;

            let addr = listener.local_addr().ok();
            info!(fd, name, addr = ?addr, "Inherited listener from parent process");
            listeners.push((name.to_string(), listener));
        }

        // Clear the env vars so worker threads or children don't re-inherit stale values
        std::env::remove_var("LISTEN_FDS");
        std::env::remove_var("LISTEN_FD_NAMES");

        Ok(Some(Self { listeners }))
    }

    /// Names of the listeners still held by the set.
    pub fn names(&self) -> Vec<String> {
        self.listeners.iter().map(|(n, _)| n.clone()).collect()
    }

    /// Claim the listener called `name`.
    pub fn take(&mut self, name: &str) -> Result<std::net::TcpListener, InheritError> {
        match self.listeners.iter().position(|(n, _)| n == name) {
            Some(pos) => Ok(self.listeners.remove(pos).1),
            None => Err(InheritError::Missing {
                expected: name.to_string(),
                available: self.names(),
            }),
        }
    }

    /// Check that every inherited listener has been claimed.
    ///
    /// Catches mismatches between what the parent passed and what this
    /// process expects to serve.
    pub fn ensure_empty(self) -> Result<(), InheritError> {
        if self.listeners.is_empty() {
            Ok(())
        } else {
            Err(InheritError::Unconsumed(self.names()))
        }
    }
}

/// Whether `fd` is an open socket.
fn validate_fd(fd: i32) -> bool {
    let mut stat: libc::stat = unsafe { std::mem::zeroed() };
    let result = unsafe { libc::fstat(fd, &mut stat) };
    if result != 0 {
        return false;
    }
    (stat.st_mode & libc::S_IFMT) == libc::S_IFSOCK
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::io::AsRawFd;

    fn bound_listener() -> std::net::TcpListener {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.set_nonblocking(true).unwrap();
        listener
    }

    /// Nothing inherited without `LISTEN_FDS`.
    #[test]
    fn test_cold_start_returns_none() {
        std::env::remove_var("LISTEN_FDS");
        std::env::remove_var("LISTEN_FD_NAMES");
        assert!(ListenerSet::from_env().unwrap().is_none());
    }

    /// dup'd socket fd is recognised and serves connections after adoption.
    #[tokio::test]
    async fn test_dup_fd_adoption() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let new_fd = unsafe { libc::dup(listener.as_raw_fd()) };
        assert!(new_fd >= 0, "dup failed");
        assert!(validate_fd(new_fd));

        let adopted = unsafe { std::net::TcpListener::from_raw_fd(new_fd) };
        adopted.set_nonblocking(true).unwrap();
        let adopted = tokio::net::TcpListener::from_std(adopted).unwrap();
        assert_eq!(adopted.local_addr().unwrap(), addr);

        let stream = tokio::net::TcpStream::connect(addr).await;
        assert!(stream.is_ok());
    }

    #[test]
    fn test_invalid_fd_detection() {
        assert!(!validate_fd(9999));
        assert!(!validate_fd(-1));
    }

    #[test]
    fn test_take_by_name() {
        let mut set = ListenerSet {
            listeners: vec![
                ("http".to_string(), bound_listener()),
                ("admin".to_string(), bound_listener()),
            ],
        };

        assert!(set.take("http").is_ok());
        assert_eq!(set.names(), vec!["admin".to_string()]);
    }

    #[test]
    fn test_take_missing_reports_available() {
        let mut set = ListenerSet {
            listeners: vec![("http".to_string(), bound_listener())],
        };

        match set.take("missing") {
            Err(InheritError::Missing {
                expected,
                available,
            }) => {
                assert_eq!(expected, "missing");
                assert_eq!(available, vec!["http".to_string()]);
            }
            other => panic!("expected Missing error, got {other:?}"),
        }
    }

    #[test]
    fn test_ensure_empty_with_leftovers() {
        let set = ListenerSet {
            listeners: vec![("http".to_string(), bound_listener())],
        };
        assert!(matches!(
            set.ensure_empty(),
            Err(InheritError::Unconsumed(names)) if names == vec!["http".to_string()]
        ));
    }
}
