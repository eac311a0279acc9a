//! Interactive pseudo-terminal sessions.

use std::io::{self, Read};
use std::ops::Deref;
use std::sync::Arc;

use tracing::debug;

use super::base::{BaseExecutor, Completion, ExecMode, InputSlot, Listener};
use super::scheduler::Scheduler;
use crate::channel::{ChannelStreams, RemoteChannel};
use crate::handler::CloseFlag;
use crate::Result;

/// Terminal type requested when none is configured.
pub const DEFAULT_PTY_TYPE: &str = "vt100";

/// Drives an interactive shell through repeated writes.
///
/// `exec()` returns as soon as the shell is running. The session ends when
/// the remote side closes its output, usually after [`exit`](BaseExecutor::exit),
/// or when the executor is closed. Pseudo-terminals merge stdout and stderr
/// and echo input back, so the handler sees both.
///
/// ```no_run
/// use remote_exec::{handler, LocalChannel, ShellExecutor};
///
/// let shell = ShellExecutor::new(Box::new(LocalChannel::new()))
///     .handler(handler::sanitized_lines(|line| println!("{}", line)));
/// shell.exec()?;
/// shell.write_line("ls")?;
/// shell.exit()?;
/// # Ok::<(), remote_exec::RemoteExecError>(())
/// ```
pub struct ShellExecutor {
    base: BaseExecutor,
    pty_type: String,
}

impl ShellExecutor {
    /// Bind a new shell session to `channel`. The executor owns the channel.
    pub fn new(channel: Box<dyn RemoteChannel>) -> Self {
        Self {
            base: BaseExecutor::new(ExecMode::Shell, channel),
            pty_type: DEFAULT_PTY_TYPE.to_string(),
        }
    }

    /// Register the output handler.
    pub fn handler<F>(mut self, handler: F) -> Self
    where
        F: FnOnce(&mut dyn Read, &CloseFlag) -> io::Result<()> + Send + 'static,
    {
        self.base.set_handler(Box::new(handler));
        self
    }

    /// Terminal type to request, e.g. `xterm` or `vt100`.
    pub fn pty_type(mut self, pty_type: impl Into<String>) -> Self {
        self.pty_type = pty_type.into();
        self
    }

    /// Called once, after the output listener has finished.
    pub fn on_complete<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(&Completion) + Send + 'static,
    {
        self.base.set_on_complete(Box::new(callback));
        self
    }

    /// Run the listener on `scheduler` instead of a dedicated thread.
    pub fn scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.base.set_scheduler(scheduler);
        self
    }

    /// The requested terminal type.
    pub fn requested_pty_type(&self) -> &str {
        &self.pty_type
    }

    /// Allocate the pseudo-terminal, start the shell and its listener.
    ///
    /// Does not wait for the shell to finish.
    pub fn exec(&self) -> Result<()> {
        let handler = self.base.begin()?;
        debug!(pty_type = %self.pty_type, "opening shell channel");

        let ChannelStreams {
            stdin,
            stdout,
            stderr,
        } = self
            .base
            .open(|channel| channel.open_shell(&self.pty_type))?;

        let out = InputSlot::new("stdout", stdout);
        let mut slots = vec![Arc::clone(&out)];
        if let Some(stderr) = stderr {
            // A pty has no separate stderr; keep it only so close() releases it.
            slots.push(InputSlot::new("stderr", stderr));
        }
        self.base.wire(stdin, slots)?;
        self.base.mark_running()?;
        self.base.listen(vec![Listener {
            name: "shell",
            slot: out,
            handler,
        }])
    }
}

impl Deref for ShellExecutor {
    type Target = BaseExecutor;

    fn deref(&self) -> &BaseExecutor {
        &self.base
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::mock::MockChannel;
    use crate::error::RemoteExecError;
    use crate::executor::ExecutorState;
    use crate::handler;

    #[test]
    fn test_default_pty_type() {
        let shell = ShellExecutor::new(Box::new(MockChannel::new()));
        assert_eq!(shell.requested_pty_type(), "vt100");
        assert_eq!(shell.mode(), ExecMode::Shell);
    }

    #[test]
    fn test_pty_type_reaches_channel() {
        let mock = MockChannel::new().echo_shell();
        let shell = ShellExecutor::new(Box::new(mock.clone()))
            .pty_type("xterm-256color")
            .handler(handler::discard());
        shell.exec().unwrap();
        assert_eq!(mock.opened_with().as_deref(), Some("xterm-256color"));
        assert_eq!(shell.state(), ExecutorState::Running);
        shell.close();
    }

    #[test]
    fn test_pty_failure_is_synchronous() {
        let mock = MockChannel::new().fail_open("pty request denied");
        let shell = ShellExecutor::new(Box::new(mock)).handler(handler::discard());
        let err = shell.exec().unwrap_err();
        assert!(matches!(err, RemoteExecError::ChannelOpen(_)));
        assert_eq!(shell.state(), ExecutorState::Failed);
        assert!(!shell.is_done());
    }

    #[test]
    fn test_exec_does_not_block() {
        let mock = MockChannel::new().silent_stdout();
        let shell = ShellExecutor::new(Box::new(mock)).handler(handler::discard());
        shell.exec().unwrap();
        assert!(shell.is_running());
        assert!(!shell.is_done());
        shell.close();
    }
}
