//! Writer thread configuration

use crate::{Result, WriterError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default time the worker parks while idle.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_millis(2500);

/// Default backlog size above which an idle worker is woken early.
pub const DEFAULT_WAKE_THRESHOLD: usize = 25;

/// Default name of the executor thread.
pub const DEFAULT_THREAD_NAME: &str = "index-writer";

/// Configuration for a [`crate::WriteCoordinator`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriterConfig {
    /// Milliseconds the worker parks when the queue is empty
    pub idle_timeout_ms: u64,

    /// Wake an idle worker once more than this many items are pending
    pub wake_threshold: usize,

    /// Executor thread name; the notifier gets a `-notifier` suffix
    pub thread_name: String,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            idle_timeout_ms: DEFAULT_IDLE_TIMEOUT.as_millis() as u64,
            wake_threshold: DEFAULT_WAKE_THRESHOLD,
            thread_name: DEFAULT_THREAD_NAME.to_string(),
        }
    }
}

impl WriterConfig {
    /// Create a configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the idle park timeout
    #[must_use]
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the early-wake threshold
    #[must_use]
    pub const fn with_wake_threshold(mut self, threshold: usize) -> Self {
        self.wake_threshold = threshold;
        self
    }

    /// Set the executor thread name
    #[must_use]
    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    /// Idle park timeout
    pub const fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    /// Name of the notifier thread
    pub fn notifier_thread_name(&self) -> String {
        format!("{}-notifier", self.thread_name)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        if self.idle_timeout_ms == 0 {
            return Err(WriterError::InvalidArgument(
                "idle_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.thread_name.is_empty() {
            return Err(WriterError::InvalidArgument(
                "thread_name must not be empty".to_string(),
            ));
        }
        if self.thread_name.contains('\0') {
            return Err(WriterError::InvalidArgument(
                "thread_name must not contain NUL".to_string(),
            ));
        }
        Ok(())
    }
}
