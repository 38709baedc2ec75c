//! Key to `(offset, length)` locator

use crate::{IndexError, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Where the value for a key lives in an external data store.
///
/// Equality, ordering and hashing consider only the key, so a set of
/// locators behaves like a set of keys. A locator is never mutated; an
/// update produces a new one.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Locator {
    key: i32,
    offset: i64,
    length: i32,
}

impl Locator {
    /// Create a locator for `key`.
    pub const fn new(key: i32, offset: i64, length: i32) -> Self {
        Self {
            key,
            offset,
            length,
        }
    }

    /// Create a locator from parts where the key may be missing.
    ///
    /// Collaborators that carry nullable keys go through here so a missing
    /// key is reported instead of silently defaulted.
    pub fn from_parts(key: Option<i32>, offset: i64, length: i32) -> Result<Self> {
        let key = key.ok_or_else(|| IndexError::InvalidArgument("key".to_string()))?;
        Ok(Self::new(key, offset, length))
    }

    /// Lookup key
    pub const fn key(&self) -> i32 {
        self.key
    }

    /// Byte offset of the value in the data store
    pub const fn offset(&self) -> i64 {
        self.offset
    }

    /// Length of the value in bytes
    pub const fn length(&self) -> i32 {
        self.length
    }

    /// First byte past the value.
    pub fn end(&self) -> i64 {
        self.offset.saturating_add(i64::from(self.length))
    }

    /// A new locator for the same key at a different location.
    #[must_use]
    pub const fn relocated(&self, offset: i64, length: i32) -> Self {
        Self::new(self.key, offset, length)
    }
}

impl PartialEq for Locator {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for Locator {}

impl PartialOrd for Locator {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Locator {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key.cmp(&other.key)
    }
}

impl Hash for Locator {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Locator[{}:{}-{};l={}]",
            self.key,
            self.offset,
            self.end(),
            self.length
        )
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_identity_is_key_only() {
        let a = Locator::new(7, 100, 10);
        let b = Locator::new(7, 900, 90);
        let c = Locator::new(8, 100, 10);

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a < c);

        let set: HashSet<Locator> = [a, b, c].into_iter().collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_missing_key_rejected() {
        let err = Locator::from_parts(None, 0, 0).expect_err("missing key must fail");
        assert!(matches!(err, IndexError::InvalidArgument(_)));

        let ok = Locator::from_parts(Some(3), 16, 4).expect("key present");
        assert_eq!(ok.key(), 3);
        assert_eq!(ok.end(), 20);
    }

    #[test]
    fn test_relocated_keeps_key() {
        let original = Locator::new(12, 0, 64);
        let moved = original.relocated(4096, 128);

        assert_eq!(moved.key(), 12);
        assert_eq!(moved.offset(), 4096);
        assert_eq!(moved.length(), 128);
        // original is untouched
        assert_eq!(original.offset(), 0);
    }

    #[test]
    fn test_display() {
        let locator = Locator::new(5, 1000, 24);
        assert_eq!(locator.to_string(), "Locator[5:1000-1024;l=24]");
    }
}
