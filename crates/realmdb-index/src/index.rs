//! Capability traits and the runtime-selected index type

use crate::config::IndexOptions;
use crate::read_only::ReadOnlyIndex;
use crate::read_write::ReadWriteIndex;
use crate::{IndexError, Locator, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Lookup operations shared by every index variant.
pub trait IndexRead {
    /// Locator for `key`, or `None` when absent.
    fn get(&self, key: i32) -> Result<Option<Locator>>;

    /// Whether `key` is present.
    fn contains(&self, key: i32) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Number of records.
    fn len(&self) -> usize;

    /// Whether there are no records.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All locators in ascending key order.
    fn locators(&self) -> Box<dyn Iterator<Item = Result<Locator>> + '_>;

    /// Whether there are mutations not yet on disk.
    fn has_uncommitted_changes(&self) -> bool;

    /// Path of the backing file.
    fn path(&self) -> &Path;
}

/// Mutations available on a writable index.
pub trait IndexWrite: IndexRead {
    /// Insert a new key; fails with [`IndexError::DuplicateKey`] if present.
    fn add(&self, key: i32, offset: i64, length: i32) -> Result<Locator>;

    /// Relocate an existing key; fails with [`IndexError::KeyNotFound`] if absent.
    fn update(&self, locator: &Locator, offset: i64, length: i32) -> Result<Locator>;

    /// Remove every entry.
    fn clear(&self) -> Result<()>;

    /// Persist all entries.
    fn commit(&self) -> Result<()>;
}

impl IndexRead for ReadOnlyIndex {
    fn get(&self, key: i32) -> Result<Option<Locator>> {
        Self::get(self, key)
    }

    fn len(&self) -> usize {
        Self::len(self)
    }

    fn locators(&self) -> Box<dyn Iterator<Item = Result<Locator>> + '_> {
        Box::new(self.iter())
    }

    fn has_uncommitted_changes(&self) -> bool {
        false
    }

    fn path(&self) -> &Path {
        Self::path(self)
    }
}

impl IndexRead for ReadWriteIndex {
    fn get(&self, key: i32) -> Result<Option<Locator>> {
        Ok(Self::get(self, key))
    }

    fn contains(&self, key: i32) -> Result<bool> {
        Ok(Self::contains(self, key))
    }

    fn len(&self) -> usize {
        Self::len(self)
    }

    fn locators(&self) -> Box<dyn Iterator<Item = Result<Locator>> + '_> {
        Box::new(self.iter().map(Ok))
    }

    fn has_uncommitted_changes(&self) -> bool {
        Self::has_uncommitted_changes(self)
    }

    fn path(&self) -> &Path {
        Self::path(self)
    }
}

impl IndexWrite for ReadWriteIndex {
    fn add(&self, key: i32, offset: i64, length: i32) -> Result<Locator> {
        Self::add(self, key, offset, length)
    }

    fn update(&self, locator: &Locator, offset: i64, length: i32) -> Result<Locator> {
        Self::update(self, locator, offset, length)
    }

    fn clear(&self) -> Result<()> {
        Self::clear(self);
        Ok(())
    }

    fn commit(&self) -> Result<()> {
        Self::commit(self)
    }
}

/// How an [`Index`] should be opened.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessMode {
    /// Memory-mapped, lookups only
    #[default]
    ReadOnly,
    /// In-memory mirror with commit
    ReadWrite,
}

/// An index opened in either access mode.
///
/// Every operation is available on both variants. On the read-only variant
/// mutations fail with [`IndexError::NotWritable`] and `commit` does nothing.
#[derive(Debug)]
pub enum Index {
    /// Memory-mapped view
    ReadOnly(ReadOnlyIndex),
    /// Writable mirror
    ReadWrite(ReadWriteIndex),
}

impl Index {
    /// Open the index described by `options` in the given mode.
    pub fn open(options: &IndexOptions, mode: AccessMode) -> Result<Self> {
        match mode {
            AccessMode::ReadOnly => {
                options.validate()?;
                ReadOnlyIndex::open(options.path(), options.banner()).map(Self::ReadOnly)
            }
            AccessMode::ReadWrite => ReadWriteIndex::open(options).map(Self::ReadWrite),
        }
    }

    /// Whether this is the read-only variant
    pub const fn is_read_only(&self) -> bool {
        matches!(self, Self::ReadOnly(_))
    }

    /// Access mode this index was opened with
    pub const fn mode(&self) -> AccessMode {
        match self {
            Self::ReadOnly(_) => AccessMode::ReadOnly,
            Self::ReadWrite(_) => AccessMode::ReadWrite,
        }
    }

    /// The writable variant, if this is one
    pub const fn as_writer(&self) -> Option<&ReadWriteIndex> {
        match self {
            Self::ReadWrite(index) => Some(index),
            Self::ReadOnly(_) => None,
        }
    }
}

impl IndexRead for Index {
    fn get(&self, key: i32) -> Result<Option<Locator>> {
        match self {
            Self::ReadOnly(index) => IndexRead::get(index, key),
            Self::ReadWrite(index) => IndexRead::get(index, key),
        }
    }

    fn contains(&self, key: i32) -> Result<bool> {
        match self {
            Self::ReadOnly(index) => IndexRead::contains(index, key),
            Self::ReadWrite(index) => IndexRead::contains(index, key),
        }
    }

    fn len(&self) -> usize {
        match self {
            Self::ReadOnly(index) => index.len(),
            Self::ReadWrite(index) => index.len(),
        }
    }

    fn locators(&self) -> Box<dyn Iterator<Item = Result<Locator>> + '_> {
        match self {
            Self::ReadOnly(index) => index.locators(),
            Self::ReadWrite(index) => index.locators(),
        }
    }

    fn has_uncommitted_changes(&self) -> bool {
        match self {
            Self::ReadOnly(_) => false,
            Self::ReadWrite(index) => index.has_uncommitted_changes(),
        }
    }

    fn path(&self) -> &Path {
        match self {
            Self::ReadOnly(index) => index.path(),
            Self::ReadWrite(index) => index.path(),
        }
    }
}

impl IndexWrite for Index {
    fn add(&self, key: i32, offset: i64, length: i32) -> Result<Locator> {
        match self {
            Self::ReadOnly(_) => Err(IndexError::NotWritable("add")),
            Self::ReadWrite(index) => index.add(key, offset, length),
        }
    }

    fn update(&self, locator: &Locator, offset: i64, length: i32) -> Result<Locator> {
        match self {
            Self::ReadOnly(_) => Err(IndexError::NotWritable("update")),
            Self::ReadWrite(index) => index.update(locator, offset, length),
        }
    }

    fn clear(&self) -> Result<()> {
        match self {
            Self::ReadOnly(_) => Err(IndexError::NotWritable("clear")),
            Self::ReadWrite(index) => {
                index.clear();
                Ok(())
            }
        }
    }

    fn commit(&self) -> Result<()> {
        match self {
            Self::ReadOnly(_) => Ok(()),
            Self::ReadWrite(index) => index.commit(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_read_only_variant_rejects_mutation() {
        let dir = TempDir::new().expect("temp dir");
        let options = IndexOptions::new(dir.path(), "Zone");
        {
            let writer = Index::open(&options, AccessMode::ReadWrite).expect("open rw");
            writer.add(1, 10, 1).expect("add");
            writer.commit().expect("commit");
        }

        let reader = Index::open(&options, AccessMode::ReadOnly).expect("open ro");
        assert!(reader.is_read_only());
        assert!(reader.as_writer().is_none());
        assert!(matches!(reader.add(2, 0, 0), Err(IndexError::NotWritable("add"))));
        assert!(matches!(
            reader.update(&Locator::new(1, 0, 0), 0, 0),
            Err(IndexError::NotWritable("update"))
        ));
        assert!(matches!(reader.clear(), Err(IndexError::NotWritable("clear"))));
        reader.commit().expect("commit is a no-op");

        assert_eq!(reader.len(), 1);
        assert!(reader.contains(1).expect("lookup"));
        assert!(!reader.has_uncommitted_changes());
    }

    #[test]
    fn test_variants_agree_on_contents() {
        let dir = TempDir::new().expect("temp dir");
        let options = IndexOptions::new(dir.path(), "Sector");
        let writer = Index::open(&options, AccessMode::ReadWrite).expect("open rw");
        assert_eq!(writer.mode(), AccessMode::ReadWrite);
        for key in [8, 2, 5] {
            writer.add(key, i64::from(key), key).expect("add");
        }
        assert!(writer.has_uncommitted_changes());
        writer.commit().expect("commit");

        let reader = Index::open(&options, AccessMode::ReadOnly).expect("open ro");
        let from_writer: Vec<Locator> = writer
            .locators()
            .collect::<Result<_>>()
            .expect("writer locators");
        let from_reader: Vec<Locator> = reader
            .locators()
            .collect::<Result<_>>()
            .expect("reader locators");
        assert_eq!(from_writer, from_reader);
        assert_eq!(writer.path(), reader.path());
    }

    #[test]
    fn test_read_only_open_of_missing_file_fails() {
        let dir = TempDir::new().expect("temp dir");
        let options = IndexOptions::new(dir.path(), "Missing");
        assert!(matches!(
            Index::open(&options, AccessMode::ReadOnly),
            Err(IndexError::Io(_))
        ));
    }
}
