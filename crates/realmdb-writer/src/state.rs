//! Coordinator lifecycle states

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle state of a [`crate::WriteCoordinator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum CoordinatorState {
    /// No worker thread
    Stopped = 0,
    /// Worker thread spawned, not yet parked
    Starting = 1,
    /// Worker alive and parked
    Idle = 2,
    /// Worker draining the queue
    Running = 3,
    /// Draining what is left, then stopping
    Stopping = 4,
    /// Stopping after the current item, abandoning the rest
    Terminating = 5,
    /// Terminal; no more work is accepted
    Done = 6,
}

impl CoordinatorState {
    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Stopped,
            1 => Self::Starting,
            2 => Self::Idle,
            3 => Self::Running,
            4 => Self::Stopping,
            5 => Self::Terminating,
            _ => Self::Done,
        }
    }

    /// State the worker moves to on its own from this one.
    pub const fn next(self) -> Self {
        match self {
            Self::Stopped => Self::Stopped,
            Self::Starting => Self::Idle,
            Self::Idle => Self::Running,
            Self::Running => Self::Idle,
            Self::Stopping => Self::Stopped,
            Self::Terminating | Self::Done => Self::Done,
        }
    }

    /// Whether the state persists with no worker activity.
    pub const fn is_stable(self) -> bool {
        matches!(self, Self::Stopped | Self::Done)
    }

    /// Whether a worker thread is alive in this state.
    pub const fn has_worker(self) -> bool {
        matches!(
            self,
            Self::Starting | Self::Idle | Self::Running | Self::Stopping | Self::Terminating
        )
    }

    /// Whether new work is refused.
    pub const fn is_terminated(self) -> bool {
        matches!(self, Self::Terminating | Self::Done)
    }
}

impl fmt::Display for CoordinatorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Terminating => "terminating",
            Self::Done => "done",
        };
        f.write_str(name)
    }
}

/// Atomically updated [`CoordinatorState`].
#[derive(Debug)]
pub(crate) struct AtomicState(AtomicU8);

impl AtomicState {
    pub(crate) const fn new(state: CoordinatorState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub(crate) fn load(&self) -> CoordinatorState {
        CoordinatorState::from_u8(self.0.load(Ordering::SeqCst))
    }

    /// Move from `from` to `to`; false if the state was not `from`.
    pub(crate) fn transition(&self, from: CoordinatorState, to: CoordinatorState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_transitions() {
        use CoordinatorState::*;
        assert_eq!(Starting.next(), Idle);
        assert_eq!(Idle.next(), Running);
        assert_eq!(Running.next(), Idle);
        assert_eq!(Stopping.next(), Stopped);
        assert_eq!(Terminating.next(), Done);

        for state in [Stopped, Done] {
            assert!(state.is_stable());
            assert_eq!(state.next(), state);
        }
        assert!(!Idle.is_stable());
        assert!(Terminating.is_terminated() && Done.is_terminated());
        assert!(!Stopping.is_terminated());
        assert!(Stopping.has_worker() && !Stopped.has_worker());
    }

    #[test]
    fn test_atomic_transition() {
        let state = AtomicState::new(CoordinatorState::Stopped);
        assert!(state.transition(CoordinatorState::Stopped, CoordinatorState::Starting));
        assert!(!state.transition(CoordinatorState::Stopped, CoordinatorState::Starting));
        assert_eq!(state.load(), CoordinatorState::Starting);
    }

    #[test]
    fn test_display() {
        assert_eq!(CoordinatorState::Terminating.to_string(), "terminating");
    }
}
