//! One-shot command execution.

use std::io::{self, Read};
use std::ops::Deref;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::base::{BaseExecutor, Completion, ExecMode, InputSlot, Listener};
use super::scheduler::Scheduler;
use crate::channel::{ChannelStreams, RemoteChannel, WaitCondition};
use crate::error::RemoteExecError;
use crate::handler::{CloseFlag, StreamHandler};
use crate::Result;

/// Default execution timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Exit status conventionally reported for success.
pub const SUCCESS_EXIT_CODE: i32 = 0;

/// What `exec()` waits for, and for how long.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitSpec {
    /// Events that end the wait.
    pub condition: WaitCondition,
    /// Upper bound on how long `exec()` blocks, open included.
    pub timeout: Duration,
}

impl Default for WaitSpec {
    fn default() -> Self {
        Self {
            condition: WaitCondition::default(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Runs exactly one command on a [`RemoteChannel`].
///
/// ```no_run
/// use remote_exec::{handler, CommandExecutor, LocalChannel};
/// use std::time::Duration;
///
/// let exec = CommandExecutor::new(Box::new(LocalChannel::new()), "uname -a")
///     .handler(handler::lines(|line| println!("{}", line)))
///     .timeout(Duration::from_secs(5));
/// exec.exec()?;
/// println!("exit code: {:?}", exec.exit_code());
/// exec.close();
/// # Ok::<(), remote_exec::RemoteExecError>(())
/// ```
///
/// # Stream ordering
///
/// With [`inherit`](Self::inherit), stdout and stderr are concatenated:
/// every stderr byte is delivered after stdout has reached EOF. Output is
/// not interleaved by arrival time. If the remote process writes a lot to
/// stderr before closing stdout, a flow-controlled transport may stall
/// until stdout ends.
///
/// # Completion
///
/// `exec()` returns as soon as the wait condition holds. With the default
/// condition that can be the exit status alone, so listeners may still be
/// draining output when `exec()` returns. Use [`on_complete`](Self::on_complete)
/// or [`is_done`](BaseExecutor::is_done) to know when all output has been
/// handled.
pub struct CommandExecutor {
    base: BaseExecutor,
    command: String,
    encoding: Option<String>,
    inherit: bool,
    error_handler: std::sync::Mutex<Option<StreamHandler>>,
    wait: WaitSpec,
}

impl CommandExecutor {
    /// Bind `command` to `channel`. The executor owns the channel.
    pub fn new(channel: Box<dyn RemoteChannel>, command: impl Into<String>) -> Self {
        Self {
            base: BaseExecutor::new(ExecMode::Command, channel),
            command: command.into(),
            encoding: None,
            inherit: false,
            error_handler: std::sync::Mutex::new(None),
            wait: WaitSpec::default(),
        }
    }

    /// Register the stdout handler (stdout + stderr when inherited).
    pub fn handler<F>(mut self, handler: F) -> Self
    where
        F: FnOnce(&mut dyn Read, &CloseFlag) -> io::Result<()> + Send + 'static,
    {
        self.base.set_handler(Box::new(handler));
        self
    }

    /// Register a separate stderr handler. Ignored when inherited.
    ///
    /// Without one, stderr is still read and discarded in the background so
    /// a chatty command cannot stall on a full pipe. The drain does not
    /// count towards completion.
    pub fn error_handler<F>(mut self, handler: F) -> Self
    where
        F: FnOnce(&mut dyn Read, &CloseFlag) -> io::Result<()> + Send + 'static,
    {
        *self
            .error_handler
            .get_mut()
            .unwrap_or_else(|p| p.into_inner()) = Some(Box::new(handler));
        self
    }

    /// Deliver stderr after stdout on the primary handler.
    pub fn inherit(mut self) -> Self {
        self.inherit = true;
        self
    }

    /// Encoding of the command text, passed through to the channel.
    pub fn encoding(mut self, encoding: impl Into<String>) -> Self {
        self.encoding = Some(encoding.into());
        self
    }

    /// Block in `exec()` until `condition` holds, for at most `timeout`.
    pub fn wait_for(mut self, condition: WaitCondition, timeout: Duration) -> Self {
        self.wait = WaitSpec { condition, timeout };
        self
    }

    /// Keep the wait condition, change the timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.wait.timeout = timeout;
        self
    }

    /// Called once, after every listener has finished.
    pub fn on_complete<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(&Completion) + Send + 'static,
    {
        self.base.set_on_complete(Box::new(callback));
        self
    }

    /// Run listeners on `scheduler` instead of dedicated threads.
    pub fn scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.base.set_scheduler(scheduler);
        self
    }

    /// The command text.
    pub fn command(&self) -> &str {
        &self.command
    }

    /// The configured wait.
    pub fn wait_spec(&self) -> WaitSpec {
        self.wait
    }

    /// Whether stdout and stderr are merged.
    pub fn is_inherited(&self) -> bool {
        self.inherit
    }

    /// Open the command, start the listeners and wait.
    ///
    /// The timeout covers the whole call: an open that alone exceeds it
    /// fails with [`RemoteExecError::Timeout`] before any listener starts.
    /// The timeout bounds only how long the caller blocks; it does not
    /// stop the remote command. Use [`close`](BaseExecutor::close) or
    /// [`interrupt`](BaseExecutor::interrupt) for that.
    pub fn exec(&self) -> Result<()> {
        let handler = self.base.begin()?;
        let started = Instant::now();
        debug!(command = %self.command, inherit = self.inherit, "opening command channel");

        let ChannelStreams {
            stdin,
            stdout,
            stderr,
        } = self
            .base
            .open(|channel| channel.open_command(&self.command, self.encoding.as_deref()))?;

        let error_handler = self
            .error_handler
            .lock()
            .map_err(|_| RemoteExecError::LockPoisoned)?
            .take();

        let mut slots = Vec::with_capacity(2);
        let mut listeners = Vec::with_capacity(2);
        let mut unhandled = None;
        if self.inherit {
            if error_handler.is_some() {
                debug!("stderr is inherited; error handler will not run");
            }
            let merged: Box<dyn Read + Send> = match stderr {
                Some(stderr) => Box::new(stdout.chain(stderr)),
                None => stdout,
            };
            let slot = InputSlot::new("merged", merged);
            slots.push(Arc::clone(&slot));
            listeners.push(Listener {
                name: "merged",
                slot,
                handler,
            });
        } else {
            let out = InputSlot::new("stdout", stdout);
            slots.push(Arc::clone(&out));
            listeners.push(Listener {
                name: "stdout",
                slot: out,
                handler,
            });
            if let Some(stderr) = stderr {
                let err = InputSlot::new("stderr", stderr);
                slots.push(Arc::clone(&err));
                match error_handler {
                    Some(handler) => listeners.push(Listener {
                        name: "stderr",
                        slot: err,
                        handler,
                    }),
                    None => unhandled = Some(err),
                }
            }
        }
        self.base.wire(stdin, slots)?;

        if started.elapsed() >= self.wait.timeout {
            warn!(command = %self.command, elapsed = ?started.elapsed(), "channel open exceeded timeout");
            self.base.fail();
            return Err(RemoteExecError::Timeout(self.wait.timeout));
        }

        self.base.mark_running()?;
        self.base.listen(listeners)?;
        if let Some(stderr) = unhandled {
            if let Err(e) = self.base.drain(stderr) {
                warn!(command = %self.command, error = %e, "failed to start stderr drain");
            }
        }

        let remaining = self.wait.timeout.saturating_sub(started.elapsed());
        match self.base.channel().wait_for(self.wait.condition, remaining) {
            Ok(observed) => {
                debug!(command = %self.command, ?observed, exit_code = ?self.exit_code(), "command wait satisfied");
                self.base.succeed();
                Ok(())
            }
            Err(RemoteExecError::Timeout(_)) => {
                warn!(command = %self.command, timeout = ?self.wait.timeout, "command wait timed out");
                self.base.fail();
                Err(RemoteExecError::Timeout(self.wait.timeout))
            }
            Err(e) => {
                self.base.fail();
                Err(e)
            }
        }
    }

    /// True if the channel reported exit status 0.
    pub fn is_success_exit(&self) -> bool {
        self.exit_code() == Some(SUCCESS_EXIT_CODE)
    }
}

impl Deref for CommandExecutor {
    type Target = BaseExecutor;

    fn deref(&self) -> &BaseExecutor {
        &self.base
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::mock::MockChannel;
    use crate::executor::ExecutorState;
    use crate::handler;

    #[test]
    fn test_defaults() {
        let exec = CommandExecutor::new(Box::new(MockChannel::new()), "ls");
        assert_eq!(exec.command(), "ls");
        assert_eq!(exec.wait_spec().timeout, DEFAULT_TIMEOUT);
        assert_eq!(exec.wait_spec().condition, WaitCondition::default());
        assert!(!exec.is_inherited());
        assert_eq!(exec.mode(), ExecMode::Command);
        assert_eq!(exec.state(), ExecutorState::NotStarted);
    }

    #[test]
    fn test_builder_chain() {
        let exec = CommandExecutor::new(Box::new(MockChannel::new()), "make")
            .inherit()
            .encoding("UTF-8")
            .wait_for(WaitCondition::EXIT_STATUS, Duration::from_secs(3))
            .timeout(Duration::from_secs(5));
        assert!(exec.is_inherited());
        assert_eq!(exec.wait_spec().condition, WaitCondition::EXIT_STATUS);
        assert_eq!(exec.wait_spec().timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_exec_without_handler() {
        let exec = CommandExecutor::new(Box::new(MockChannel::new()), "ls");
        assert!(exec.exec().unwrap_err().is_configuration());
        assert_eq!(exec.state(), ExecutorState::NotStarted);
    }

    #[test]
    fn test_encoding_reaches_channel() {
        let mock = MockChannel::new().exits_with(0);
        let exec = CommandExecutor::new(Box::new(mock.clone()), "echo hi")
            .encoding("UTF-8")
            .handler(handler::discard());
        exec.exec().unwrap();
        assert_eq!(mock.opened_with().as_deref(), Some("echo hi"));
        assert_eq!(mock.encoding().as_deref(), Some("UTF-8"));
    }

    #[test]
    fn test_open_failure_sets_failed() {
        let mock = MockChannel::new().fail_open("auth rejected");
        let exec = CommandExecutor::new(Box::new(mock), "ls").handler(handler::discard());
        let err = exec.exec().unwrap_err();
        assert!(matches!(err, RemoteExecError::ChannelOpen(_)));
        assert_eq!(exec.state(), ExecutorState::Failed);
    }

    #[test]
    fn test_wait_timeout_sets_failed() {
        let mock = MockChannel::new().silent_stdout();
        let exec = CommandExecutor::new(Box::new(mock), "sleep 60")
            .handler(handler::discard())
            .wait_for(WaitCondition::EXIT_STATUS, Duration::from_millis(20));
        let err = exec.exec().unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(exec.state(), ExecutorState::Failed);
        exec.close();
    }

    #[test]
    fn test_unhandled_stderr_does_not_delay_completion() {
        let mock = MockChannel::new()
            .stdout("ok\n")
            .stderr_chunks(vec![(Duration::from_millis(300), b"late warning\n".to_vec())])
            .exits_with(0);
        let (tx, rx) = std::sync::mpsc::channel();
        let exec = CommandExecutor::new(Box::new(mock), "build")
            .handler(handler::discard())
            .on_complete(move |c| {
                let _ = tx.send(c.state);
            });
        exec.exec().unwrap();

        // Only the stdout listener counts; the stderr drain is still waiting.
        let state = rx.recv_timeout(Duration::from_millis(200)).unwrap();
        assert_eq!(state, ExecutorState::Done);
        assert!(exec.is_done());
    }

    #[test]
    fn test_non_zero_exit() {
        let mock = MockChannel::new().stdout("").exits_with(2);
        let exec = CommandExecutor::new(Box::new(mock), "false").handler(handler::discard());
        exec.exec().unwrap();
        assert_eq!(exec.exit_code(), Some(2));
        assert!(!exec.is_success_exit());
    }
}
