//! Completion events, observers and failure reporting

use std::error::Error;
use std::fmt;
use std::sync::Arc;
use tracing::error;

/// Published by the notifier thread after the worker acts on the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteEvent {
    /// An item ran. `succeeded` is false if it returned an error or panicked.
    Completed {
        /// Identifier the item was queued under
        identifier: String,
        /// Whether the item finished without error
        succeeded: bool,
    },
    /// A pending item was removed by `cancel` before it ran.
    Cancelled {
        /// Identifier the item was queued under
        identifier: String,
    },
    /// The queue became empty.
    QueueDrained,
}

impl WriteEvent {
    /// Identifier carried by the event, if any
    pub fn identifier(&self) -> Option<&str> {
        match self {
            Self::Completed { identifier, .. } | Self::Cancelled { identifier } => {
                Some(identifier)
            }
            Self::QueueDrained => None,
        }
    }
}

/// Receives [`WriteEvent`]s on the notifier thread.
///
/// Observers run one at a time in registration order. A panicking observer
/// is logged and skipped; the others still see the event.
pub trait WriteObserver: Send + Sync {
    /// Handle one event.
    fn on_event(&self, event: &WriteEvent);
}

impl<F> WriteObserver for F
where
    F: Fn(&WriteEvent) + Send + Sync,
{
    fn on_event(&self, event: &WriteEvent) {
        self(event);
    }
}

/// Handle returned by `add_observer`, used to remove it again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(pub(crate) u64);

/// Why a queued item failed.
#[derive(Debug)]
pub enum FailureCause {
    /// The item returned an error
    Error(Box<dyn Error + Send + Sync>),
    /// The item panicked; holds the panic message
    Panic(String),
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error(e) => write!(f, "{e}"),
            Self::Panic(message) => write!(f, "panicked: {message}"),
        }
    }
}

/// A queued item that did not complete cleanly.
#[derive(Debug)]
pub struct WorkFailure {
    /// Identifier the item was queued under
    pub identifier: String,
    /// What went wrong
    pub cause: FailureCause,
}

impl fmt::Display for WorkFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "queued work {} failed: {}", self.identifier, self.cause)
    }
}

pub(crate) type FailureHandler = Arc<dyn Fn(&WorkFailure) + Send + Sync>;

pub(crate) fn log_failure(failure: &WorkFailure) {
    error!(
        identifier = %failure.identifier,
        "Queued index write failed: {}",
        failure.cause
    );
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_event_identifier() {
        let done = WriteEvent::Completed {
            identifier: "ns/acre".to_string(),
            succeeded: true,
        };
        assert_eq!(done.identifier(), Some("ns/acre"));
        assert_eq!(WriteEvent::QueueDrained.identifier(), None);
    }

    #[test]
    fn test_closure_is_observer() {
        let seen = parking_lot::Mutex::new(Vec::new());
        let observer = |event: &WriteEvent| seen.lock().push(event.clone());
        observer.on_event(&WriteEvent::QueueDrained);
        assert_eq!(seen.lock().as_slice(), &[WriteEvent::QueueDrained]);
    }

    #[test]
    fn test_failure_display() {
        let failure = WorkFailure {
            identifier: "zone".to_string(),
            cause: FailureCause::Panic("disk on fire".to_string()),
        };
        assert_eq!(
            failure.to_string(),
            "queued work zone failed: panicked: disk on fire"
        );
    }

    #[test]
    fn test_panic_message() {
        let payload = std::panic::catch_unwind(|| panic!("plain")).expect_err("panics");
        assert_eq!(panic_message(payload.as_ref()), "plain");

        let code = 7;
        let payload =
            std::panic::catch_unwind(|| panic!("formatted {code}")).expect_err("panics");
        assert_eq!(panic_message(payload.as_ref()), "formatted 7");
    }
}
