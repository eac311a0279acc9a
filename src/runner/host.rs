//! Target host binding.

use std::fmt;
use std::path::PathBuf;

use secrecy::SecretString;

/// Default port of a remote shell service.
pub const DEFAULT_PORT: u16 = 22;

/// Host names that resolve to this machine without a transport.
const LOCAL_HOSTS: &[&str] = &["localhost", "127.0.0.1", "::1", "local"];

/// Credentials used to open a session.
#[derive(Debug, Clone, Default)]
pub enum Auth {
    /// Password authentication.
    Password(SecretString),
    /// Private key file, optionally encrypted.
    Key {
        /// Key file location.
        path: PathBuf,
        /// Passphrase for an encrypted key.
        passphrase: Option<SecretString>,
    },
    /// No credentials (local or agent-based).
    #[default]
    None,
}

/// Where to run commands, and as whom.
#[derive(Debug, Clone)]
pub struct HostConfig {
    /// Host name or address.
    pub host: String,
    /// Service port.
    pub port: u16,
    /// Login user.
    pub username: String,
    /// Credentials.
    pub auth: Auth,
}

impl HostConfig {
    /// Bind `username` on `host` with the default port and no credentials.
    pub fn new(host: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_PORT,
            username: username.into(),
            auth: Auth::None,
        }
    }

    /// The local machine as the current user.
    pub fn local() -> Self {
        Self::new("localhost", std::env::var("USER").unwrap_or_default())
    }

    /// Set the port.
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the credentials.
    pub fn auth(mut self, auth: Auth) -> Self {
        self.auth = auth;
        self
    }

    /// True if the host names this machine.
    pub fn is_local(&self) -> bool {
        let host = self.host.trim();
        host.is_empty() || LOCAL_HOSTS.iter().any(|h| host.eq_ignore_ascii_case(h))
    }
}

impl fmt::Display for HostConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.username.is_empty() {
            write!(f, "{}:{}", self.host, self.port)
        } else {
            write!(f, "{}@{}:{}", self.username, self.host, self.port)
        }
    }
}
