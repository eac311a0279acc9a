//! Error types for remote-exec.

use std::time::Duration;

use thiserror::Error;

use crate::config::ConfigError;

/// Main error type for remote-exec operations.
#[derive(Error, Debug)]
pub enum RemoteExecError {
    /// The executor was misused: missing handler, second `exec()`,
    /// or a write before the streams were opened.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The command or shell channel could not be established.
    #[error("failed to open channel: {0}")]
    ChannelOpen(String),

    /// A bounded wait ran past its deadline.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// I/O failure on one of the channel streams.
    #[error("stream error: {0}")]
    Stream(#[from] std::io::Error),

    /// PTY-related error.
    #[error("PTY error: {0}")]
    Pty(String),

    /// A listener task could not be handed to its scheduler.
    #[error("scheduler error: {0}")]
    Schedule(String),

    /// Internal lock was poisoned.
    #[error("internal lock poisoned")]
    LockPoisoned,

    /// Configuration file or environment could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl RemoteExecError {
    pub(crate) fn closed() -> Self {
        Self::Stream(std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            "executor is closed",
        ))
    }

    /// Whether this error came from a bounded wait.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    /// Whether this error reports executor misuse.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }

    /// Whether this error is a stream I/O failure.
    pub fn is_stream(&self) -> bool {
        matches!(self, Self::Stream(_))
    }
}

/// Convenience Result type for remote-exec operations.
pub type Result<T> = std::result::Result<T, RemoteExecError>;
