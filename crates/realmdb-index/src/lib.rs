//! Sparse on-disk index mapping integer keys to `(offset, length)` locators.
//!
//! An index file is a short ASCII banner, a sentinel byte, and a run of
//! fixed-size records sorted by key. Two views exist over the same file:
//!
//! - **[`ReadOnlyIndex`]**: memory-maps the file and binary-searches the
//!   records in place. Safe for any number of concurrent readers.
//! - **[`ReadWriteIndex`]**: holds the authoritative sorted mirror in memory,
//!   stages mutations, and rewrites the whole file on [`ReadWriteIndex::commit`].
//!
//! [`Index`] wraps both for callers that pick the access mode at runtime.
//!
//! # File Layout
//!
//! ```text
//! [banner, ASCII]      variable length
//! [0x1A]               sentinel
//! [key i32 LE][offset i64 LE][length i32 LE]   16 bytes, repeated
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use realmdb_index::{IndexOptions, ReadOnlyIndex, ReadWriteIndex};
//!
//! # fn example() -> realmdb_index::Result<()> {
//! let options = IndexOptions::new("db/world", "Acre");
//! let index = ReadWriteIndex::open(&options)?;
//! index.add(42, 4096, 512)?;
//! index.commit()?;
//!
//! let reader = ReadOnlyIndex::open(options.path(), options.banner())?;
//! assert_eq!(reader.get(42)?.map(|l| l.offset()), Some(4096));
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![allow(clippy::must_use_candidate)]

use std::path::PathBuf;
use thiserror::Error;

// Key/offset/length triple
pub mod locator;

// Banner, sentinel and record codec
pub mod format;

// Index options (file naming, banner, commit strategy)
pub mod config;

// Memory-mapped reader
pub mod read_only;

// In-memory mirror with full-file commit
pub mod read_write;

// Capability traits and the runtime-selected sum type
mod index;

pub use config::{CommitMode, IndexOptions};
pub use index::{AccessMode, Index, IndexRead, IndexWrite};
pub use locator::Locator;
pub use read_only::{ReadOnlyIndex, Records};
pub use read_write::ReadWriteIndex;

/// Result type for index operations.
pub type Result<T> = std::result::Result<T, IndexError>;

/// Errors that can occur during index operations.
#[derive(Debug, Error)]
pub enum IndexError {
    /// `add` was called with a key that is already present.
    #[error("Duplicate key: {0}")]
    DuplicateKey(i32),

    /// `update` was called for a key that is not present.
    #[error("Key not found: {0}")]
    KeyNotFound(i32),

    /// A mutation was attempted on a read-only index.
    #[error("Index is not writable: {0}")]
    NotWritable(&'static str),

    /// A record position outside `[0, len)` was requested.
    #[error("Record {index} out of bounds (record count {len})")]
    OutOfBounds {
        /// Requested record position
        index: usize,
        /// Number of records in the index
        len: usize,
    },

    /// I/O error while opening or reading an index file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The file does not carry the expected header or record layout.
    #[error("Invalid index format in {path}: {reason}")]
    InvalidFormat {
        /// File being read
        path: PathBuf,
        /// What was wrong with it
        reason: String,
    },

    /// A record could not be decoded.
    #[error("Failed to decode record {index}: {reason}")]
    Decode {
        /// Record position
        index: usize,
        /// Decoder message
        reason: String,
    },

    /// Writing or truncating the file during commit failed.
    ///
    /// The in-memory mirror is untouched and still marked dirty, so the
    /// commit can be retried.
    #[error("Commit to {path} failed: {source}")]
    CommitFailed {
        /// File being written
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// A required argument was missing or malformed.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

/// Version information for the index crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
