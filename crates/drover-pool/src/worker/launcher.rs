//! Execution context launchers.
//!
//! The supervisor never creates threads directly; it asks a [`Launcher`] to
//! run a worker body in a fresh execution context. Tests substitute
//! launchers that fail on purpose.

use std::io;

/// Starts a worker body in its own execution context.
pub trait Launcher: Send + Sync + 'static {
    /// Run `body` in a new context named `name`. Returns once the context
    /// exists, not when the body finishes.
    fn launch(&self, name: String, body: Box<dyn FnOnce() + Send>) -> io::Result<()>;
}

/// Launches each worker on a dedicated OS thread.
#[derive(Debug, Clone, Default)]
pub struct ThreadLauncher {
    stack_size: Option<usize>,
}

impl ThreadLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = Some(bytes);
        self
    }
}

impl Launcher for ThreadLauncher {
    fn launch(&self, name: String, body: Box<dyn FnOnce() + Send>) -> io::Result<()> {
        let mut builder = std::thread::Builder::new().name(name);
        if let Some(bytes) = self.stack_size {
            builder = builder.stack_size(bytes);
        }
        // Detached: the worker reports its own exit.
        builder.spawn(body).map(drop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn test_thread_launcher_names_thread() {
        let (tx, rx) = mpsc::channel();
        ThreadLauncher::new()
            .launch(
                "drover-worker-test".to_string(),
                Box::new(move || {
                    let name = std::thread::current().name().map(str::to_owned);
                    tx.send(name).unwrap();
                }),
            )
            .unwrap();

        let name = rx.recv().unwrap();
        assert_eq!(name.as_deref(), Some("drover-worker-test"));
    }
}
