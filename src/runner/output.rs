//! Collected command output.

use std::time::Duration;

/// Result of [`Runner::run`](super::Runner::run).
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    /// Raw standard output.
    pub stdout: Vec<u8>,
    /// Raw standard error. Empty when the channel has no separate stderr.
    pub stderr: Vec<u8>,
    /// Exit code (if the channel reported one).
    pub exit_code: Option<i32>,
    /// Time from `exec()` until every listener finished.
    pub duration: Duration,
}

impl CommandOutput {
    /// Check if command succeeded (exit code 0).
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Check if command failed (non-zero exit code).
    pub fn failed(&self) -> bool {
        matches!(self.exit_code, Some(c) if c != 0)
    }

    /// Stdout decoded lossily.
    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    /// Stderr decoded lossily.
    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }

    /// Get stdout lines.
    pub fn stdout_lines(&self) -> Vec<String> {
        self.stdout_text().lines().map(str::to_owned).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_and_failed() {
        let ok = CommandOutput {
            exit_code: Some(0),
            ..Default::default()
        };
        assert!(ok.success());
        assert!(!ok.failed());

        let bad = CommandOutput {
            exit_code: Some(127),
            ..Default::default()
        };
        assert!(!bad.success());
        assert!(bad.failed());

        let unknown = CommandOutput::default();
        assert!(!unknown.success());
        assert!(!unknown.failed());
    }

    #[test]
    fn test_text_helpers() {
        let output = CommandOutput {
            stdout: b"one\ntwo\r\n".to_vec(),
            stderr: b"warn\xff".to_vec(),
            ..Default::default()
        };
        assert_eq!(output.stdout_lines(), vec!["one", "two"]);
        assert_eq!(output.stderr_text(), "warn\u{fffd}");
    }
}
