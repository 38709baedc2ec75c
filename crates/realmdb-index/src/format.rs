//! Index file header and record codec
//!
//! ```text
//! [0x00]      banner   (N bytes, ASCII, no 0x1A)
//! [N]         sentinel (1 byte, 0x1A)
//! [N+1+16*i]  record i (16 bytes, little-endian)
//!               key    i32
//!               offset i64
//!               length i32
//! ```
//!
//! There is no padding between the header and the first record or between
//! records. Record count is derived from the file length; bytes past the
//! last whole record are ignored by readers and dropped by the next commit.

use crate::{IndexError, Locator, Result};
use binrw::{BinRead, BinWrite};
use std::io::{self, Cursor, Write};
use std::path::Path;

/// Byte separating the banner from the record stream (ASCII SUB).
pub const SENTINEL: u8 = 0x1A;

/// Size of one on-disk record in bytes.
pub const RECORD_SIZE: usize = 16;

/// Longest banner `detect_banner` will scan for.
pub const MAX_BANNER_LEN: usize = 4096;

/// One record as it sits on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little)]
pub struct RawRecord {
    /// Lookup key
    pub key: i32,
    /// Value offset in the data store
    pub offset: i64,
    /// Value length in bytes
    pub length: i32,
}

impl From<RawRecord> for Locator {
    fn from(raw: RawRecord) -> Self {
        Self::new(raw.key, raw.offset, raw.length)
    }
}

impl From<&Locator> for RawRecord {
    fn from(locator: &Locator) -> Self {
        Self {
            key: locator.key(),
            offset: locator.offset(),
            length: locator.length(),
        }
    }
}

/// Size of the banner plus sentinel.
pub fn header_len(banner: &str) -> usize {
    banner.len() + 1
}

/// Check that a banner can be written and found again.
pub fn validate_banner(banner: &str) -> Result<()> {
    if banner.is_empty() {
        return Err(IndexError::InvalidArgument(
            "banner must not be empty".to_string(),
        ));
    }
    if !banner.is_ascii() {
        return Err(IndexError::InvalidArgument(format!(
            "banner must be ASCII: {banner:?}"
        )));
    }
    if banner.as_bytes().contains(&SENTINEL) {
        return Err(IndexError::InvalidArgument(
            "banner must not contain the 0x1A sentinel".to_string(),
        ));
    }
    if banner.len() > MAX_BANNER_LEN {
        return Err(IndexError::InvalidArgument(format!(
            "banner longer than {MAX_BANNER_LEN} bytes"
        )));
    }
    Ok(())
}

/// Banner followed by the sentinel.
pub fn encode_header(banner: &str) -> Vec<u8> {
    let mut header = Vec::with_capacity(header_len(banner));
    header.extend_from_slice(banner.as_bytes());
    header.push(SENTINEL);
    header
}

/// Verify that `bytes` starts with `banner` and the sentinel.
///
/// Returns the header length on success.
pub fn check_header(path: &Path, bytes: &[u8], banner: &str) -> Result<usize> {
    let len = header_len(banner);
    if bytes.len() < len {
        return Err(IndexError::InvalidFormat {
            path: path.to_path_buf(),
            reason: format!(
                "file is {} bytes, shorter than the {len} byte header",
                bytes.len()
            ),
        });
    }
    if &bytes[..banner.len()] != banner.as_bytes() {
        return Err(IndexError::InvalidFormat {
            path: path.to_path_buf(),
            reason: format!("banner mismatch, expected {banner:?}"),
        });
    }
    if bytes[banner.len()] != SENTINEL {
        return Err(IndexError::InvalidFormat {
            path: path.to_path_buf(),
            reason: format!(
                "expected sentinel 0x1A at byte {}, found 0x{:02X}",
                banner.len(),
                bytes[banner.len()]
            ),
        });
    }
    Ok(len)
}

/// Find the banner of an index file of unknown type.
///
/// Scans the first [`MAX_BANNER_LEN`] bytes for the sentinel.
pub fn detect_banner(path: &Path, bytes: &[u8]) -> Result<String> {
    let window = &bytes[..bytes.len().min(MAX_BANNER_LEN + 1)];
    let end = window
        .iter()
        .position(|&b| b == SENTINEL)
        .ok_or_else(|| IndexError::InvalidFormat {
            path: path.to_path_buf(),
            reason: "no 0x1A sentinel in header".to_string(),
        })?;
    let banner = &window[..end];
    if banner.is_empty() || !banner.is_ascii() {
        return Err(IndexError::InvalidFormat {
            path: path.to_path_buf(),
            reason: "banner is empty or not ASCII".to_string(),
        });
    }
    Ok(String::from_utf8_lossy(banner).into_owned())
}

/// Whole records and leftover bytes following a header.
pub const fn record_layout(file_len: usize, header_len: usize) -> (usize, usize) {
    let body = file_len.saturating_sub(header_len);
    (body / RECORD_SIZE, body % RECORD_SIZE)
}

/// Decode the record at position `index` from its 16 bytes.
pub fn decode_record(bytes: &[u8], index: usize) -> Result<Locator> {
    let mut cursor = Cursor::new(bytes);
    RawRecord::read_le(&mut cursor)
        .map(Locator::from)
        .map_err(|e| IndexError::Decode {
            index,
            reason: e.to_string(),
        })
}

/// Serialize a complete index file.
///
/// Records must arrive in strictly ascending key order. Anything else means
/// the caller's sorted map is broken, so this panics rather than writing a
/// file that binary search cannot read.
pub fn encode_file<'a, I>(banner: &str, locators: I, count: usize) -> io::Result<Vec<u8>>
where
    I: IntoIterator<Item = &'a Locator>,
{
    let mut cursor = Cursor::new(Vec::with_capacity(header_len(banner) + count * RECORD_SIZE));
    cursor.write_all(&encode_header(banner))?;

    let mut last_key: Option<i32> = None;
    for locator in locators {
        if let Some(previous) = last_key {
            assert!(
                locator.key() > previous,
                "index records out of order: key {} written after {previous}",
                locator.key()
            );
        }
        last_key = Some(locator.key());

        RawRecord::from(locator)
            .write_le(&mut cursor)
            .map_err(|e| io::Error::other(format!("Failed to encode record: {e}")))?;
    }

    Ok(cursor.into_inner())
}
