//! Configuration for index files

use crate::format;
use crate::{IndexError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default directory for index files.
pub const DEFAULT_DIRECTORY: &str = "db";

/// Extension used for index files.
pub const INDEX_EXTENSION: &str = "index";

/// How [`crate::ReadWriteIndex::commit`] puts bytes on disk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitMode {
    /// Overwrite the file from the start, then truncate to the new length.
    ///
    /// A crash mid-commit can leave a partially written file. Readers that
    /// hold a mapping while the file shrinks can fault.
    #[default]
    InPlace,
    /// Write a sibling temp file, fsync it, then rename it over the index.
    ///
    /// Existing readers keep their mapping of the old file.
    AtomicReplace,
}

/// Naming, banner and commit strategy for one index file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexOptions {
    /// Directory holding the index file
    pub directory: PathBuf,

    /// Logical name; the file is `{name}.index`
    pub name: String,

    /// ASCII banner written at the start of the file
    pub banner: String,

    /// Commit strategy
    #[serde(default)]
    pub commit_mode: CommitMode,
}

impl IndexOptions {
    /// Options for `name` in `directory`, with the banner `"All {name}s"`.
    pub fn new(directory: impl AsRef<Path>, name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            directory: directory.as_ref().to_path_buf(),
            banner: format!("All {name}s"),
            name,
            commit_mode: CommitMode::default(),
        }
    }

    /// Options for `name` under [`DEFAULT_DIRECTORY`].
    pub fn named(name: impl Into<String>) -> Self {
        Self::new(DEFAULT_DIRECTORY, name)
    }

    /// Override the banner
    #[must_use]
    pub fn with_banner(mut self, banner: impl Into<String>) -> Self {
        self.banner = banner.into();
        self
    }

    /// Override the directory
    #[must_use]
    pub fn with_directory(mut self, directory: impl AsRef<Path>) -> Self {
        self.directory = directory.as_ref().to_path_buf();
        self
    }

    /// Set the commit strategy
    #[must_use]
    pub const fn with_commit_mode(mut self, mode: CommitMode) -> Self {
        self.commit_mode = mode;
        self
    }

    /// Banner text
    pub fn banner(&self) -> &str {
        &self.banner
    }

    /// Full path of the index file.
    pub fn path(&self) -> PathBuf {
        self.directory.join(format!("{}.{INDEX_EXTENSION}", self.name))
    }

    /// Reject names and banners that cannot round-trip through a file.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(IndexError::InvalidArgument(
                "index name must not be empty".to_string(),
            ));
        }
        if self.name.contains(['/', '\\']) {
            return Err(IndexError::InvalidArgument(format!(
                "index name must not contain path separators: {}",
                self.name
            )));
        }
        format::validate_banner(&self.banner)
    }
}
