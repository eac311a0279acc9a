//! Where listener tasks run.

use tokio::runtime::Handle;
use tracing::trace;

use crate::error::RemoteExecError;
use crate::Result;

/// A unit of blocking work, typically one stream listener.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Runs listener tasks off the calling thread.
///
/// Tasks block on stream reads, so implementations must hand them to
/// threads that are allowed to block.
pub trait Scheduler: Send + Sync {
    /// Start `task` in the background. `name` identifies the listener.
    fn spawn(&self, name: &str, task: Task) -> Result<()>;
}

/// Default scheduler: one named OS thread per task.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadScheduler;

impl Scheduler for ThreadScheduler {
    fn spawn(&self, name: &str, task: Task) -> Result<()> {
        std::thread::Builder::new()
            .name(name.to_string())
            .spawn(task)
            .map(|_| ())
            .map_err(|e| RemoteExecError::Schedule(e.to_string()))
    }
}

/// Runs tasks on a tokio runtime's blocking pool.
#[derive(Debug, Clone)]
pub struct TokioScheduler {
    handle: Handle,
}

impl TokioScheduler {
    /// Use the runtime behind `handle`.
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Use the runtime the caller is currently running on.
    pub fn current() -> Result<Self> {
        Handle::try_current()
            .map(Self::new)
            .map_err(|e| RemoteExecError::Schedule(e.to_string()))
    }
}

impl Scheduler for TokioScheduler {
    fn spawn(&self, name: &str, task: Task) -> Result<()> {
        let name = name.to_string();
        self.handle.spawn_blocking(move || {
            trace!(listener = %name, "blocking listener started");
            task();
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn test_thread_scheduler_names_thread() {
        let (tx, rx) = mpsc::channel();
        ThreadScheduler
            .spawn(
                "remote-exec-test",
                Box::new(move || {
                    let name = std::thread::current().name().map(str::to_string);
                    tx.send(name).unwrap();
                }),
            )
            .unwrap();

        let name = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(name.as_deref(), Some("remote-exec-test"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_tokio_scheduler_runs_task() {
        let scheduler = TokioScheduler::current().unwrap();
        let (tx, rx) = tokio::sync::oneshot::channel();
        scheduler
            .spawn("listener", Box::new(move || tx.send(42).unwrap()))
            .unwrap();
        assert_eq!(rx.await.unwrap(), 42);
    }

    #[test]
    fn test_tokio_scheduler_requires_runtime() {
        assert!(TokioScheduler::current().is_err());
    }
}
