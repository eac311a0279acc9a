//! Binding executors to hosts.
//!
//! [`Runner`] is the entry point for callers that do not want to wire
//! channels by hand: it asks a [`SessionFactory`] for a fresh channel per
//! executor and applies the configured timeout, wait condition, pty type
//! and charset.

mod factory;
mod host;
mod output;

pub use factory::{LocalSessionFactory, SessionFactory};
pub use host::{Auth, HostConfig, DEFAULT_PORT};
pub use output::CommandOutput;

use std::sync::{mpsc, Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::channel::WaitCondition;
use crate::config::Config;
use crate::error::RemoteExecError;
use crate::executor::{
    CommandExecutor, Scheduler, ShellExecutor, DEFAULT_PTY_TYPE, DEFAULT_TIMEOUT,
};
use crate::handler;
use crate::Result;

/// Creates executors for one host.
///
/// Cheap to clone; clones share the factory and scheduler.
#[derive(Clone)]
pub struct Runner {
    factory: Arc<dyn SessionFactory>,
    host: HostConfig,
    timeout: Duration,
    wait: WaitCondition,
    pty_type: String,
    charset: Option<String>,
    scheduler: Option<Arc<dyn Scheduler>>,
}

impl Runner {
    /// Bind `host` through `factory` with default executor settings.
    pub fn new(factory: Arc<dyn SessionFactory>, host: HostConfig) -> Self {
        Self {
            factory,
            host,
            timeout: DEFAULT_TIMEOUT,
            wait: WaitCondition::default(),
            pty_type: DEFAULT_PTY_TYPE.to_string(),
            charset: None,
            scheduler: None,
        }
    }

    /// A runner for this machine.
    pub fn local() -> Self {
        Self::new(Arc::new(LocalSessionFactory::new()), HostConfig::local())
    }

    /// Build a runner from loaded configuration, using the local factory.
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::from_config_with(config, Arc::new(LocalSessionFactory::new()))
    }

    /// Build a runner from loaded configuration and a custom factory.
    pub fn from_config_with(config: &Config, factory: Arc<dyn SessionFactory>) -> Result<Self> {
        let wait = config.wait_condition()?;
        Ok(Self {
            factory,
            host: config.host_config(),
            timeout: config.timeout(),
            wait,
            pty_type: config.executor.pty_type.clone(),
            charset: config.executor.charset.clone(),
            scheduler: None,
        })
    }

    /// Run listeners of every executor on `scheduler`.
    pub fn with_scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Change the command timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The bound host.
    pub fn host(&self) -> &HostConfig {
        &self.host
    }

    /// A command executor on a fresh channel. Register a handler before
    /// calling `exec()`.
    pub fn command(&self, command: impl Into<String>) -> Result<CommandExecutor> {
        let channel = self.factory.connect(&self.host)?;
        let mut exec = CommandExecutor::new(channel, command).wait_for(self.wait, self.timeout);
        if let Some(charset) = &self.charset {
            exec = exec.encoding(charset.clone());
        }
        if let Some(scheduler) = &self.scheduler {
            exec = exec.scheduler(Arc::clone(scheduler));
        }
        Ok(exec)
    }

    /// A shell executor on a fresh channel.
    pub fn shell(&self) -> Result<ShellExecutor> {
        let channel = self.factory.connect(&self.host)?;
        let mut shell = ShellExecutor::new(channel).pty_type(self.pty_type.clone());
        if let Some(scheduler) = &self.scheduler {
            shell = shell.scheduler(Arc::clone(scheduler));
        }
        Ok(shell)
    }

    /// Run `command` to completion and collect its output.
    ///
    /// Unlike a bare `exec()`, this also waits for every listener to drain
    /// its stream, bounded by the same timeout.
    pub fn run(&self, command: &str) -> Result<CommandOutput> {
        let started = Instant::now();
        let stdout = Arc::new(Mutex::new(Vec::new()));
        let stderr = Arc::new(Mutex::new(Vec::new()));
        let (done_tx, done_rx) = mpsc::channel();

        let exec = self
            .command(command)?
            .handler(handler::collect(Arc::clone(&stdout)))
            .error_handler(handler::collect(Arc::clone(&stderr)))
            .on_complete(move |completion| {
                let _ = done_tx.send(completion.error.as_ref().map(|e| e.to_string()));
            });

        let result = exec.exec().and_then(|()| {
            let remaining = self.timeout.saturating_sub(started.elapsed());
            match done_rx.recv_timeout(remaining) {
                Ok(None) => Ok(()),
                Ok(Some(message)) => Err(RemoteExecError::Stream(std::io::Error::other(message))),
                Err(mpsc::RecvTimeoutError::Timeout) => Err(RemoteExecError::Timeout(self.timeout)),
                Err(mpsc::RecvTimeoutError::Disconnected) => Ok(()),
            }
        });
        let exit_code = exec.exit_code();
        exec.close();
        result?;

        let output = CommandOutput {
            stdout: take(&stdout)?,
            stderr: take(&stderr)?,
            exit_code,
            duration: started.elapsed(),
        };
        info!(
            host = %self.host,
            command,
            exit_code = ?output.exit_code,
            duration_ms = output.duration.as_millis() as u64,
            "command finished"
        );
        Ok(output)
    }

    /// Run `command` on the tokio blocking pool.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn spawn(&self, command: impl Into<String>) -> tokio::task::JoinHandle<Result<CommandOutput>> {
        let runner = self.clone();
        let command = command.into();
        debug!(host = %self.host, command = %command, "spawning command");
        tokio::task::spawn_blocking(move || runner.run(&command))
    }
}

impl std::fmt::Debug for Runner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runner")
            .field("host", &self.host)
            .field("timeout", &self.timeout)
            .field("wait", &self.wait)
            .field("pty_type", &self.pty_type)
            .field("charset", &self.charset)
            .finish_non_exhaustive()
    }
}

fn take(buffer: &Mutex<Vec<u8>>) -> Result<Vec<u8>> {
    buffer
        .lock()
        .map(|mut b| std::mem::take(&mut *b))
        .map_err(|_| RemoteExecError::LockPoisoned)
}
