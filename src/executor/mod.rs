//! Command and shell executors.
//!
//! Both executors share one lifecycle ([`BaseExecutor`]):
//! - `exec()` opens the remote context on the calling thread
//! - background listeners drain output through caller-supplied handlers
//! - the completion callback fires once, after every listener has finished
//! - `close()` tears everything down and may be called from any thread
//!
//! Errors inside listeners are not returned to the caller of `exec()`.
//! They are reported through [`Completion::error`] and leave the executor
//! in [`ExecutorState::Failed`].
//!
//! When a command has separate stdout and stderr listeners, both are joined
//! before the completion callback runs, so it fires exactly once.

mod base;
mod command;
mod scheduler;
mod shell;
mod state;

pub use base::{BaseExecutor, Completion, ExecMode, CTRL_C, CTRL_Z, EXIT_COMMAND};
pub use command::{CommandExecutor, WaitSpec, DEFAULT_TIMEOUT, SUCCESS_EXIT_CODE};
pub use scheduler::{Scheduler, Task, ThreadScheduler, TokioScheduler};
pub use shell::{ShellExecutor, DEFAULT_PTY_TYPE};
pub use state::ExecutorState;
