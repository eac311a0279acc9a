//! Remote channel abstraction.
//!
//! A [`RemoteChannel`] is one execution context on an already-authenticated
//! transport session: it can start a command or an interactive shell, hands
//! back the raw byte streams, and reports the remote exit status once it is
//! known. Authentication, host verification and framing all live behind this
//! trait; executors only see streams.

mod local;
pub mod mock;

pub use local::{default_shell, LocalChannel};

use std::fmt;
use std::io::{Read, Write};
use std::ops::{BitAnd, BitOr, BitOrAssign};
use std::time::Duration;

use crate::Result;

/// Set of events that satisfy a blocking [`RemoteChannel::wait_for`] call.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct WaitCondition(u8);

impl WaitCondition {
    /// Nothing; a wait on this never succeeds before the timeout.
    pub const NONE: Self = Self(0);
    /// The channel has been closed (locally or by the remote side).
    pub const CLOSED: Self = Self(1);
    /// The remote end signalled end of output.
    pub const EOF: Self = Self(1 << 1);
    /// An exit status has been reported.
    pub const EXIT_STATUS: Self = Self(1 << 2);

    const NAMES: [(Self, &'static str); 3] = [
        (Self::CLOSED, "closed"),
        (Self::EOF, "eof"),
        (Self::EXIT_STATUS, "exit_status"),
    ];

    /// Raw bit representation.
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// True if no event is set.
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// True if every event in `other` is also set in `self`.
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// True if `self` and `other` share at least one event.
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    /// Parse a single event name (`closed`, `eof`, `exit_status`).
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim().to_ascii_lowercase();
        Self::NAMES
            .iter()
            .find(|(_, n)| *n == name)
            .map(|(flag, _)| *flag)
    }
}

impl Default for WaitCondition {
    /// Channel closed, stream EOF or exit status, whichever comes first.
    fn default() -> Self {
        Self::CLOSED | Self::EOF | Self::EXIT_STATUS
    }
}

impl BitOr for WaitCondition {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for WaitCondition {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for WaitCondition {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl fmt::Debug for WaitCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("NONE");
        }
        let names: Vec<&str> = Self::NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        f.write_str(&names.join(" | "))
    }
}

/// Streams handed back by a successful channel open.
pub struct ChannelStreams {
    /// Writes become the remote process' stdin.
    pub stdin: Box<dyn Write + Send>,
    /// Remote stdout (or the pty output for shells).
    pub stdout: Box<dyn Read + Send>,
    /// Remote stderr; shells have none.
    pub stderr: Option<Box<dyn Read + Send>>,
}

impl fmt::Debug for ChannelStreams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelStreams")
            .field("stderr", &self.stderr.is_some())
            .finish_non_exhaustive()
    }
}

/// A live, bidirectional execution context on a remote host.
///
/// A channel is owned by exactly one executor. All methods take `&self` so
/// that `close()` and `exit_status()` stay callable from any thread while
/// another thread is blocked in `wait_for()`.
pub trait RemoteChannel: Send + Sync {
    /// Start `command`, optionally encoding the command text with `encoding`.
    fn open_command(&self, command: &str, encoding: Option<&str>) -> Result<ChannelStreams>;

    /// Allocate a pseudo-terminal of type `pty_type` and start a shell in it.
    fn open_shell(&self, pty_type: &str) -> Result<ChannelStreams>;

    /// Block until one of the events in `condition` holds or `timeout`
    /// elapses. Returns the events that were observed.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteExecError::Timeout`](crate::RemoteExecError::Timeout)
    /// when the deadline passes first.
    fn wait_for(&self, condition: WaitCondition, timeout: Duration) -> Result<WaitCondition>;

    /// Exit status of the remote process, if it has been reported.
    fn exit_status(&self) -> Option<i32>;

    /// Tear the channel down. Must be safe to call more than once.
    fn close(&self) -> Result<()>;
}
