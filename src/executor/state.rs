//! Executor state machine.

use std::sync::atomic::{AtomicU8, Ordering};

use crate::error::RemoteExecError;

/// Lifecycle state of an executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutorState {
    /// `exec()` has not opened a channel yet.
    #[default]
    NotStarted,
    /// Streams are wired and listeners are draining output.
    Running,
    /// Output ended normally or the wait condition was satisfied.
    Done,
    /// Open failed, the wait timed out, or a listener hit an I/O error.
    Failed,
}

impl ExecutorState {
    /// Check if transition to target state is valid.
    ///
    /// Valid transitions:
    /// - NotStarted -> Running
    /// - NotStarted -> Failed
    /// - Running -> Done
    /// - Running -> Failed
    pub fn can_transition_to(&self, target: ExecutorState) -> bool {
        use ExecutorState::*;
        matches!(
            (*self, target),
            (NotStarted, Running) | (NotStarted, Failed) | (Running, Done) | (Running, Failed)
        )
    }

    /// Check if this is a terminal state (no further transitions possible).
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecutorState::Done | ExecutorState::Failed)
    }

    fn as_u8(self) -> u8 {
        match self {
            ExecutorState::NotStarted => 0,
            ExecutorState::Running => 1,
            ExecutorState::Done => 2,
            ExecutorState::Failed => 3,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => ExecutorState::Running,
            2 => ExecutorState::Done,
            3 => ExecutorState::Failed,
            _ => ExecutorState::NotStarted,
        }
    }
}

/// [`ExecutorState`] shared between the calling thread and listeners.
#[derive(Debug, Default)]
pub(crate) struct AtomicState(AtomicU8);

impl AtomicState {
    pub(crate) fn load(&self) -> ExecutorState {
        ExecutorState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Move forward to `target` if that is a valid transition from the
    /// current state.
    pub(crate) fn advance(&self, target: ExecutorState) -> crate::Result<ExecutorState> {
        let mut current = self.load();
        loop {
            if !current.can_transition_to(target) {
                return Err(RemoteExecError::Configuration(format!(
                    "invalid state transition from {:?} to {:?}",
                    current, target
                )));
            }
            match self.0.compare_exchange(
                current.as_u8(),
                target.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(current),
                Err(actual) => current = ExecutorState::from_u8(actual),
            }
        }
    }
}
