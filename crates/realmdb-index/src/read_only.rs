//! Memory-mapped, read-only index
//!
//! The whole file is mapped once at open. Each binary-search probe decodes
//! exactly one 16-byte record from the mapping, so a lookup touches
//! `O(log n)` records and nothing is copied into memory up front.

use crate::format::{self, RECORD_SIZE};
use crate::{IndexError, Locator, Result};
use memmap2::{Mmap, MmapOptions};
use std::fs::File;
use std::iter::FusedIterator;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Read-only view over a committed index file.
///
/// The view reflects the file at the moment it was opened. A writer that
/// commits afterwards is not observed; re-open to see its changes. With
/// [`crate::CommitMode::InPlace`] the writer must not shrink the file while a
/// reader still holds its mapping.
pub struct ReadOnlyIndex {
    path: PathBuf,
    banner: String,
    mmap: Mmap,
    header_len: usize,
    len: usize,
}

impl ReadOnlyIndex {
    /// Open an index file, checking its banner and sentinel.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::Io`] if the file cannot be opened or mapped and
    /// [`IndexError::InvalidFormat`] if the header does not match `banner`.
    pub fn open(path: impl AsRef<Path>, banner: &str) -> Result<Self> {
        let path = path.as_ref();
        let mmap = Self::map(path)?;
        let header_len = format::check_header(path, &mmap, banner)?;
        Ok(Self::from_parts(path, banner.to_string(), mmap, header_len))
    }

    /// Open an index file whose banner is not known in advance.
    pub fn open_detect(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mmap = Self::map(path)?;
        let banner = format::detect_banner(path, &mmap)?;
        let header_len = format::header_len(&banner);
        Ok(Self::from_parts(path, banner, mmap, header_len))
    }

    fn map(path: &Path) -> Result<Mmap> {
        let file = File::open(path)?;

        // Memory-map the file for lookup without reading it in
        #[allow(unsafe_code)]
        let mmap = unsafe { MmapOptions::new().map(&file)? };

        #[cfg(unix)]
        {
            use memmap2::Advice;
            let _ = mmap.advise(Advice::Random);
        }

        Ok(mmap)
    }

    fn from_parts(path: &Path, banner: String, mmap: Mmap, header_len: usize) -> Self {
        let (len, trailing) = format::record_layout(mmap.len(), header_len);
        if trailing != 0 {
            warn!(
                "Index {} has {} trailing bytes after {} records",
                path.display(),
                trailing,
                len
            );
        }
        debug!(
            "Opened read-only index {} ({:?}, {} records)",
            path.display(),
            banner,
            len
        );
        Self {
            path: path.to_path_buf(),
            banner,
            mmap,
            header_len,
            len,
        }
    }

    /// Path of the underlying file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Banner read from the file header
    pub fn banner(&self) -> &str {
        &self.banner
    }

    /// Number of whole records
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Whether the index has no records
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Size of banner plus sentinel
    pub const fn header_len(&self) -> usize {
        self.header_len
    }

    /// Bytes after the last whole record.
    pub fn trailing_bytes(&self) -> usize {
        format::record_layout(self.mmap.len(), self.header_len).1
    }

    /// Decode the record at position `index`.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::OutOfBounds`] if `index >= len()`.
    pub fn record(&self, index: usize) -> Result<Locator> {
        if index >= self.len {
            return Err(IndexError::OutOfBounds {
                index,
                len: self.len,
            });
        }
        let start = self.header_len + index * RECORD_SIZE;
        format::decode_record(&self.mmap[start..start + RECORD_SIZE], index)
    }

    /// Look up `key` by binary search over the mapped records.
    ///
    /// A missing key is `Ok(None)`, never an error.
    pub fn get(&self, key: i32) -> Result<Option<Locator>> {
        // Half-open bounds so an empty index or a miss below index 0 needs
        // no signed arithmetic.
        let mut low = 0usize;
        let mut high = self.len;

        while low < high {
            let mid = low + (high - low) / 2;
            let probe = self.record(mid)?;
            match probe.key().cmp(&key) {
                std::cmp::Ordering::Less => low = mid + 1,
                std::cmp::Ordering::Greater => high = mid,
                std::cmp::Ordering::Equal => return Ok(Some(probe)),
            }
        }

        Ok(None)
    }

    /// Whether `key` is present
    pub fn contains(&self, key: i32) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Iterate all records in file order, decoding lazily.
    ///
    /// Each call starts from the first record.
    pub fn iter(&self) -> Records<'_> {
        Records {
            index: self,
            next: 0,
            failed: false,
        }
    }
}

impl std::fmt::Debug for ReadOnlyIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadOnlyIndex")
            .field("path", &self.path)
            .field("banner", &self.banner)
            .field("len", &self.len)
            .finish_non_exhaustive()
    }
}

impl<'a> IntoIterator for &'a ReadOnlyIndex {
    type Item = Result<Locator>;
    type IntoIter = Records<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Lazily decoding iterator over a [`ReadOnlyIndex`].
///
/// A decode failure is yielded once and ends the iteration.
pub struct Records<'a> {
    index: &'a ReadOnlyIndex,
    next: usize,
    failed: bool,
}

impl Iterator for Records<'_> {
    type Item = Result<Locator>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.next >= self.index.len {
            return None;
        }
        let result = self.index.record(self.next);
        self.next += 1;
        if result.is_err() {
            self.failed = true;
        }
        Some(result)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.failed {
            return (0, Some(0));
        }
        let remaining = self.index.len - self.next;
        (0, Some(remaining))
    }
}

impl FusedIterator for Records<'_> {}
