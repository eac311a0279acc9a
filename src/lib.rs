//! # remote-exec
//!
//! Run commands and interactive shells over a remote channel, and stream
//! their output to caller-supplied handlers.
//!
//! The crate is transport-agnostic: anything implementing
//! [`RemoteChannel`] can back an executor. [`LocalChannel`] runs on this
//! machine (plain pipes for commands, a native pseudo-terminal for shells),
//! and [`channel::mock::MockChannel`] scripts a channel for tests.
//!
//! ## Features
//!
//! - **Command execution**: one command, separate or merged stdout/stderr,
//!   bounded by a wait condition and timeout
//! - **Interactive shells**: pty allocation, line writes, Ctrl-C / Ctrl-Z
//! - **Background listeners**: output handlers run off the caller's thread,
//!   on std threads or the tokio blocking pool
//! - **Thread-safe close**: `close()` from any thread unblocks listeners
//!
//! ## Quick Start
//!
//! ```no_run
//! use remote_exec::{handler, CommandExecutor, LocalChannel};
//!
//! fn main() -> remote_exec::Result<()> {
//!     // Initialize logging
//!     remote_exec::logging::try_init().ok();
//!
//!     let exec = CommandExecutor::new(Box::new(LocalChannel::new()), "echo done")
//!         .handler(handler::lines(|line| println!("{}", line)));
//!     exec.exec()?;
//!
//!     println!("exit code: {:?}", exec.exit_code());
//!     exec.close();
//!     Ok(())
//! }
//! ```

pub mod channel;
pub mod config;
pub mod error;
pub mod executor;
pub mod handler;
pub mod logging;
pub mod runner;

// Re-export commonly used types
pub use channel::{ChannelStreams, LocalChannel, RemoteChannel, WaitCondition};
pub use config::{Config, ConfigError};
pub use error::{RemoteExecError, Result};
pub use executor::{
    BaseExecutor, CommandExecutor, Completion, ExecMode, ExecutorState, Scheduler,
    ShellExecutor, ThreadScheduler, TokioScheduler,
};
pub use handler::{CloseFlag, StreamHandler};
pub use runner::{Auth, CommandOutput, HostConfig, LocalSessionFactory, Runner, SessionFactory};
