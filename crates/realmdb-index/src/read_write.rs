//! Read-write index backed by an in-memory sorted mirror
//!
//! Mutations land in the mirror and mark it dirty. The file only changes on
//! [`ReadWriteIndex::commit`], which serializes the whole mirror in key order.

use crate::config::{CommitMode, IndexOptions};
use crate::format::{self, RECORD_SIZE};
use crate::{IndexError, Locator, Result};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
struct Mirror {
    entries: BTreeMap<i32, Locator>,
    dirty: bool,
}

/// Writable index. The mirror is authoritative while the value lives.
///
/// Reads take a shared lock; `add`, `update`, `clear` and `commit` take the
/// exclusive lock, so a commit always writes a consistent snapshot.
#[derive(Debug)]
pub struct ReadWriteIndex {
    path: PathBuf,
    banner: String,
    commit_mode: CommitMode,
    state: RwLock<Mirror>,
}

impl ReadWriteIndex {
    /// Open the index described by `options`.
    ///
    /// An existing file is loaded into the mirror. A missing file is created
    /// with only a header, along with its directory.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::InvalidArgument`] for bad options,
    /// [`IndexError::InvalidFormat`] if the file header is wrong or its
    /// records are not strictly ascending, and [`IndexError::Io`] otherwise.
    pub fn open(options: &IndexOptions) -> Result<Self> {
        options.validate()?;
        let path = options.path();

        if !path.exists() {
            info!("Index {} not found, creating", path.display());
            return Self::create(options);
        }

        let bytes = fs::read(&path)?;
        let entries = Self::load(&path, &bytes, options.banner())?;
        debug!(
            "Loaded index {} with {} records",
            path.display(),
            entries.len()
        );

        Ok(Self {
            path,
            banner: options.banner().to_string(),
            commit_mode: options.commit_mode,
            state: RwLock::new(Mirror {
                entries,
                dirty: false,
            }),
        })
    }

    /// Create an empty index, replacing any file already at the path.
    pub fn create(options: &IndexOptions) -> Result<Self> {
        options.validate()?;
        let path = options.path();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }

        let index = Self {
            path,
            banner: options.banner().to_string(),
            commit_mode: options.commit_mode,
            state: RwLock::new(Mirror::default()),
        };
        index.commit()?;
        debug!("Created empty index {}", index.path.display());
        Ok(index)
    }

    fn load(path: &Path, bytes: &[u8], banner: &str) -> Result<BTreeMap<i32, Locator>> {
        let header_len = format::check_header(path, bytes, banner)?;
        let (count, trailing) = format::record_layout(bytes.len(), header_len);
        if trailing != 0 {
            warn!(
                "Index {} has {} trailing bytes, they will be dropped on commit",
                path.display(),
                trailing
            );
        }

        let mut entries = BTreeMap::new();
        let mut previous: Option<i32> = None;
        for i in 0..count {
            let start = header_len + i * RECORD_SIZE;
            let locator = format::decode_record(&bytes[start..start + RECORD_SIZE], i)?;
            if let Some(prev) = previous
                && locator.key() <= prev
            {
                return Err(IndexError::InvalidFormat {
                    path: path.to_path_buf(),
                    reason: format!(
                        "record {i} has key {} after key {prev}, keys must be strictly ascending",
                        locator.key()
                    ),
                });
            }
            previous = Some(locator.key());
            entries.insert(locator.key(), locator);
        }
        Ok(entries)
    }

    /// Path of the underlying file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Banner written on commit
    pub fn banner(&self) -> &str {
        &self.banner
    }

    /// Commit strategy in use
    pub const fn commit_mode(&self) -> CommitMode {
        self.commit_mode
    }

    /// Insert a new key.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::DuplicateKey`] if `key` is already present.
    pub fn add(&self, key: i32, offset: i64, length: i32) -> Result<Locator> {
        let mut state = self.state.write();
        if state.entries.contains_key(&key) {
            return Err(IndexError::DuplicateKey(key));
        }
        let locator = Locator::new(key, offset, length);
        state.entries.insert(key, locator);
        state.dirty = true;
        Ok(locator)
    }

    /// Point an existing key at a new location.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::KeyNotFound`] if the key is absent.
    pub fn update(&self, locator: &Locator, offset: i64, length: i32) -> Result<Locator> {
        let mut state = self.state.write();
        let slot = state
            .entries
            .get_mut(&locator.key())
            .ok_or(IndexError::KeyNotFound(locator.key()))?;
        let updated = slot.relocated(offset, length);
        *slot = updated;
        state.dirty = true;
        Ok(updated)
    }

    /// Remove every entry.
    pub fn clear(&self) {
        let mut state = self.state.write();
        state.entries.clear();
        state.dirty = true;
    }

    /// Locator for `key`, if present
    pub fn get(&self, key: i32) -> Option<Locator> {
        self.state.read().entries.get(&key).copied()
    }

    /// Whether `key` is present
    pub fn contains(&self, key: i32) -> bool {
        self.state.read().entries.contains_key(&key)
    }

    /// Number of entries in the mirror
    pub fn len(&self) -> usize {
        self.state.read().entries.len()
    }

    /// Whether the mirror is empty
    pub fn is_empty(&self) -> bool {
        self.state.read().entries.is_empty()
    }

    /// Copy of all locators in ascending key order.
    pub fn snapshot(&self) -> Vec<Locator> {
        self.state.read().entries.values().copied().collect()
    }

    /// Iterate a point-in-time snapshot in ascending key order.
    ///
    /// Later mutations do not affect an iterator already handed out.
    pub fn iter(&self) -> std::vec::IntoIter<Locator> {
        self.snapshot().into_iter()
    }

    /// Whether the mirror differs from the last commit
    pub fn has_uncommitted_changes(&self) -> bool {
        self.state.read().dirty
    }

    /// Write the whole mirror to disk.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::CommitFailed`] if any write, truncate, sync or
    /// rename fails. The mirror and its dirty flag are left as they were.
    ///
    /// # Panics
    ///
    /// Panics if the mirror yields keys out of order, which would mean the
    /// sorted map itself is broken.
    pub fn commit(&self) -> Result<()> {
        let mut state = self.state.write();

        let bytes = format::encode_file(&self.banner, state.entries.values(), state.entries.len())
            .map_err(|source| IndexError::CommitFailed {
                path: self.path.clone(),
                source,
            })?;

        let written = match self.commit_mode {
            CommitMode::InPlace => Self::write_in_place(&self.path, &bytes),
            CommitMode::AtomicReplace => Self::write_replace(&self.path, &bytes),
        };
        written.map_err(|source| IndexError::CommitFailed {
            path: self.path.clone(),
            source,
        })?;

        state.dirty = false;
        debug!(
            "Committed index {} ({} records, {} bytes)",
            self.path.display(),
            state.entries.len(),
            bytes.len()
        );
        Ok(())
    }

    fn write_in_place(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        file.write_all(bytes)?;
        file.set_len(bytes.len() as u64)?;
        file.sync_data()
    }

    fn write_replace(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
        let temp_path = path.with_extension("tmp");
        let result =
            Self::write_temp(&temp_path, bytes).and_then(|()| fs::rename(&temp_path, path));
        if result.is_err() {
            let _ = fs::remove_file(&temp_path);
        }
        result
    }

    fn write_temp(temp_path: &Path, bytes: &[u8]) -> std::io::Result<()> {
        let mut file = File::create(temp_path)?;
        file.write_all(bytes)?;
        file.sync_all()
    }
}

impl IntoIterator for &ReadWriteIndex {
    type Item = Locator;
    type IntoIter = std::vec::IntoIter<Locator>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
