//! Background commit coordinator for realmdb indexes.
//!
//! Work is queued under a string identifier. Queuing an identifier that is
//! already pending replaces the older item and moves it to the tail, so a
//! burst of commits against one index collapses into a single write of the
//! latest state. One dedicated thread executes items one at a time; a second
//! thread republishes completion events to observers.
//!
//! # Lifecycle
//!
//! ```text
//! Stopped ──queue──▶ Starting ──▶ Idle ◀──▶ Running
//!    ▲                              │          │
//!    └──────── Stopping ◀──stop─────┴──────────┤
//!                                              │
//!               Done ◀── Terminating ◀──stop(true)
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use realmdb_writer::{WriteCoordinator, WriterFactory};
//!
//! let factory = WriterFactory::new(WriteCoordinator::global().clone());
//! let writer = factory.build_writer();
//! writer.queue_commit("acre", index.clone())?;
//! ```

#![warn(missing_docs)]

use thiserror::Error;

// Writer thread configuration
pub mod config;

// Lifecycle states
pub mod state;

// Completion events, observers and failure reporting
pub mod observer;

// Queue, worker and notifier threads
pub mod coordinator;

// Namespaced writer handles
pub mod factory;

pub use config::WriterConfig;
pub use coordinator::{Work, WorkResult, WriteCoordinator};
pub use factory::{WriterFactory, WriterHandle};
pub use observer::{FailureCause, ObserverId, WorkFailure, WriteEvent, WriteObserver};
pub use state::CoordinatorState;

/// Result type for coordinator operations.
pub type Result<T> = std::result::Result<T, WriterError>;

/// Errors returned when submitting work.
#[derive(Debug, Error)]
pub enum WriterError {
    /// An identifier or configuration value was rejected.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The coordinator has been terminated and accepts no more work.
    #[error("Write coordinator has been terminated")]
    Terminated,

    /// A background thread could not be started.
    #[error("Failed to spawn thread {name}: {source}")]
    Spawn {
        /// Thread name
        name: String,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },
}
