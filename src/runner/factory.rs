//! Binding hosts to channels.

use tracing::debug;

use super::host::HostConfig;
use crate::channel::{LocalChannel, RemoteChannel};
use crate::error::RemoteExecError;
use crate::Result;

/// Opens a fresh [`RemoteChannel`] to a host.
///
/// Each call yields an independent channel; executors own theirs and close
/// it when they are closed.
pub trait SessionFactory: Send + Sync {
    /// Connect and authenticate against `host`.
    fn connect(&self, host: &HostConfig) -> Result<Box<dyn RemoteChannel>>;
}

/// Runs everything on this machine through [`LocalChannel`].
#[derive(Debug, Clone, Default)]
pub struct LocalSessionFactory {
    shell: Option<String>,
}

impl LocalSessionFactory {
    /// Create a factory that uses the platform default shell.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `shell` for interactive sessions.
    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = Some(shell.into());
        self
    }
}

impl SessionFactory for LocalSessionFactory {
    fn connect(&self, host: &HostConfig) -> Result<Box<dyn RemoteChannel>> {
        if !host.is_local() {
            return Err(RemoteExecError::ChannelOpen(format!(
                "{} is not a local host",
                host
            )));
        }
        debug!(%host, "opening local channel");
        let channel = match &self.shell {
            Some(shell) => LocalChannel::new().with_shell(shell.clone()),
            None => LocalChannel::new(),
        };
        Ok(Box::new(channel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_remote_host() {
        let factory = LocalSessionFactory::new();
        let err = factory
            .connect(&HostConfig::new("10.1.2.3", "deploy"))
            .err()
            .unwrap();
        assert!(matches!(err, RemoteExecError::ChannelOpen(msg) if msg.contains("10.1.2.3")));
    }

    #[test]
    fn test_accepts_localhost() {
        let factory = LocalSessionFactory::new().with_shell("/bin/sh");
        let channel = factory.connect(&HostConfig::local()).unwrap();
        assert_eq!(channel.exit_status(), None);
    }
}
