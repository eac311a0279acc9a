//! Configuration management for remote-exec.
//!
//! Configuration is loaded with the following priority (highest to lowest):
//! 1. Environment variables
//! 2. Configuration file (JSON)
//! 3. Default values

use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::channel::WaitCondition;
use crate::executor::DEFAULT_PTY_TYPE;
use crate::runner::{Auth, HostConfig};

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Executor defaults.
    pub executor: ExecutorSection,
    /// Target host.
    pub host: HostSection,
    /// Logging configuration.
    pub logging: LoggingSection,
}

/// Executor defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorSection {
    /// How long a command's `exec()` may block, in milliseconds.
    pub timeout_ms: u64,
    /// Terminal type requested for shells.
    pub pty_type: String,
    /// Encoding of command text, passed to the channel.
    pub charset: Option<String>,
    /// Events that end a command wait: `closed`, `eof`, `exit_status`.
    pub wait_condition: Vec<String>,
}

impl Default for ExecutorSection {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            pty_type: DEFAULT_PTY_TYPE.to_string(),
            charset: None,
            wait_condition: vec!["closed".into(), "eof".into(), "exit_status".into()],
        }
    }
}

/// Target host section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostSection {
    /// Host name or address.
    pub host: String,
    /// Port of the remote service.
    pub port: u16,
    /// Login user.
    pub username: String,
    /// Password, if password authentication is used.
    #[serde(skip_serializing)]
    pub password: Option<SecretString>,
    /// Private key file, if key authentication is used.
    pub key_path: Option<PathBuf>,
    /// Passphrase for `key_path`.
    #[serde(skip_serializing)]
    pub passphrase: Option<SecretString>,
}

impl Default for HostSection {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 22,
            username: std::env::var("USER").unwrap_or_default(),
            password: None,
            key_path: None,
            passphrase: None,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Filter directive, e.g. `info` or `remote_exec=debug`.
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Apply environment variable overrides.
    pub fn apply_env(&mut self) {
        self.apply_vars(|key| std::env::var(key).ok());
    }

    /// Apply overrides from any `REMOTE_EXEC_*` lookup.
    pub fn apply_vars<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(timeout) = lookup("REMOTE_EXEC_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            self.executor.timeout_ms = timeout;
        }

        if let Some(pty) = lookup("REMOTE_EXEC_PTY_TYPE") {
            self.executor.pty_type = pty;
        }

        if let Some(charset) = lookup("REMOTE_EXEC_CHARSET") {
            self.executor.charset = Some(charset).filter(|c| !c.is_empty());
        }

        if let Some(host) = lookup("REMOTE_EXEC_HOST") {
            self.host.host = host;
        }

        if let Some(port) = lookup("REMOTE_EXEC_PORT").and_then(|v| v.parse().ok()) {
            self.host.port = port;
        }

        if let Some(user) = lookup("REMOTE_EXEC_USER") {
            self.host.username = user;
        }

        if let Some(password) = lookup("REMOTE_EXEC_PASSWORD") {
            if !password.is_empty() {
                self.host.password = Some(SecretString::new(password));
            }
        }

        if let Some(level) = lookup("REMOTE_EXEC_LOG_LEVEL").or_else(|| lookup("RUST_LOG")) {
            self.logging.level = level;
        }
    }

    /// Load configuration with full priority chain.
    ///
    /// Priority: env vars > config file > defaults
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Config::from_file(path)?,
            None => Config::default(),
        };
        config.apply_env();
        Ok(config)
    }

    /// Command timeout as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.executor.timeout_ms)
    }

    /// Parse the configured wait condition names.
    pub fn wait_condition(&self) -> Result<WaitCondition, ConfigError> {
        let mut condition = WaitCondition::NONE;
        for name in &self.executor.wait_condition {
            condition |= WaitCondition::from_name(name)
                .ok_or_else(|| ConfigError::InvalidWaitCondition(name.clone()))?;
        }
        if condition.is_empty() {
            return Err(ConfigError::InvalidWaitCondition(String::new()));
        }
        Ok(condition)
    }

    /// Build the host binding for the runner.
    ///
    /// A key file takes precedence over a password.
    pub fn host_config(&self) -> HostConfig {
        let auth = match (&self.host.key_path, &self.host.password) {
            (Some(path), _) => Auth::Key {
                path: path.clone(),
                passphrase: self.host.passphrase.clone(),
            },
            (None, Some(password)) => Auth::Password(password.clone()),
            (None, None) => Auth::None,
        };
        HostConfig::new(&self.host.host, &self.host.username)
            .port(self.host.port)
            .auth(auth)
    }

    /// Get the log level filter string.
    pub fn log_filter(&self) -> &str {
        &self.logging.level
    }
}

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// IO error reading config file.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    /// JSON parsing error.
    #[error("failed to parse config file: {0}")]
    Json(#[from] serde_json::Error),
    /// Unknown or empty wait condition.
    #[error("invalid wait condition: {0:?}")]
    InvalidWaitCondition(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.executor.timeout_ms, 30_000);
        assert_eq!(config.executor.pty_type, "vt100");
        assert_eq!(config.host.port, 22);
        assert_eq!(config.wait_condition().unwrap(), WaitCondition::default());
        assert_eq!(config.timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_config_from_json() {
        let json = r#"{
            "executor": {
                "timeout_ms": 1500,
                "pty_type": "xterm",
                "wait_condition": ["exit_status"]
            },
            "host": {
                "host": "build-01",
                "port": 2222,
                "username": "deploy",
                "password": "hunter2"
            }
        }"#;

        let mut file = NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.timeout(), Duration::from_millis(1500));
        assert_eq!(config.executor.pty_type, "xterm");
        assert_eq!(config.wait_condition().unwrap(), WaitCondition::EXIT_STATUS);
        assert_eq!(config.host.host, "build-01");
        assert_eq!(config.host.port, 2222);
        assert_eq!(
            config.host.password.as_ref().unwrap().expose_secret(),
            "hunter2"
        );
    }

    #[test]
    fn test_config_partial_json() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(br#"{ "host": { "port": 2200 } }"#).unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.host.host, "localhost"); // Default
        assert_eq!(config.host.port, 2200);
        assert_eq!(config.executor.timeout_ms, 30_000);
    }

    #[test]
    fn test_invalid_json() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"{ not json").unwrap();
        assert!(matches!(
            Config::from_file(file.path()),
            Err(ConfigError::Json(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        let result = Config::from_file(Path::new("/nonexistent/remote-exec.json"));
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }

    #[test]
    fn test_apply_vars() {
        let vars: HashMap<&str, &str> = [
            ("REMOTE_EXEC_TIMEOUT_MS", "250"),
            ("REMOTE_EXEC_PTY_TYPE", "xterm-256color"),
            ("REMOTE_EXEC_HOST", "10.0.0.5"),
            ("REMOTE_EXEC_PORT", "not-a-port"),
            ("REMOTE_EXEC_PASSWORD", "s3cret"),
            ("RUST_LOG", "remote_exec=debug"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_vars(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.executor.timeout_ms, 250);
        assert_eq!(config.executor.pty_type, "xterm-256color");
        assert_eq!(config.host.host, "10.0.0.5");
        assert_eq!(config.host.port, 22); // unparsable value ignored
        assert!(config.host.password.is_some());
        assert_eq!(config.log_filter(), "remote_exec=debug");
    }

    #[test]
    fn test_invalid_wait_condition() {
        let mut config = Config::default();
        config.executor.wait_condition = vec!["eof".into(), "finished".into()];
        assert!(matches!(
            config.wait_condition(),
            Err(ConfigError::InvalidWaitCondition(name)) if name == "finished"
        ));

        config.executor.wait_condition.clear();
        assert!(config.wait_condition().is_err());
    }

    #[test]
    fn test_host_config_prefers_key() {
        let mut config = Config::default();
        config.host.password = Some(SecretString::new("pw".into()));
        config.host.key_path = Some(PathBuf::from("/home/deploy/.ssh/id_ed25519"));

        let host = config.host_config();
        assert!(matches!(host.auth, Auth::Key { .. }));
    }

    #[test]
    fn test_serialization_omits_secrets() {
        let mut config = Config::default();
        config.host.password = Some(SecretString::new("do-not-print".into()));
        let json = serde_json::to_string_pretty(&config).unwrap();
        assert!(json.contains("\"timeout_ms\""));
        assert!(!json.contains("do-not-print"));
        assert!(!json.contains("password"));
    }
}
