use std::fs;
use std::path::Path;

use tracing::warn;

use crate::error::{Error, Result};
use crate::wal::record::{Decoded, WalRecord};

/// Reads WAL records from a segment file for crash recovery.
///
/// Loads the entire file into memory, then iterates record by record.
/// The boundary between recoverable and fatal damage is explicit:
///
/// - An incomplete record at end-of-segment, or a CRC failure on the FINAL
///   complete record, is a write the crash cut short. The prefix before it
///   is valid and replay keeps it.
/// - A bad record with more data behind it cannot be a torn append — the
///   file was damaged and the store refuses to open.
pub struct WalReader {
    data: Vec<u8>,
}

/// Result of replaying one segment.
pub struct Replay {
    /// Well-formed records in write order.
    pub records: Vec<WalRecord>,
    /// Length of the valid prefix in bytes.
    pub valid_len: u64,
    /// Whether a torn write was discarded after the valid prefix.
    pub truncated: bool,
}

impl WalReader {
    /// Open a WAL segment for reading.
    pub fn new(path: &Path) -> Result<Self> {
        let data = fs::read(path)?;
        Ok(WalReader { data })
    }

    /// Create an iterator over the records in the segment.
    pub fn iter(&self) -> WalIterator<'_> {
        WalIterator {
            data: &self.data,
            offset: 0,
            done: false,
        }
    }

    /// Replay the whole segment, tolerating a torn write at the tail.
    ///
    /// Mid-file corruption still fails with `Error::Corruption`.
    pub fn replay(&self) -> Result<Replay> {
        let mut iter = self.iter();
        let mut records = Vec::new();
        for record in &mut iter {
            records.push(record?);
        }
        let truncated = (iter.offset as usize) < self.data.len();
        if truncated {
            warn!(
                valid = iter.offset,
                total = self.data.len(),
                "discarding torn write at WAL tail"
            );
        }
        Ok(Replay {
            records,
            valid_len: iter.offset,
            truncated,
        })
    }
}

/// Iterator over WAL records. Yields records until the end of the valid
/// prefix; yields one `Err` and stops if the damage is not a torn tail.
pub struct WalIterator<'a> {
    data: &'a [u8],
    offset: u64,
    done: bool,
}

impl<'a> Iterator for WalIterator<'a> {
    type Item = Result<WalRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.offset as usize >= self.data.len() {
            return None;
        }

        let remaining = &self.data[self.offset as usize..];

        match WalRecord::decode(remaining) {
            Ok(Decoded::Complete { record, consumed }) => {
                self.offset += consumed as u64;
                Some(Ok(record))
            }
            Ok(Decoded::Incomplete) => {
                // Crash mid-append: keep the prefix, discard the tail.
                self.done = true;
                None
            }
            Ok(Decoded::Corrupt { consumed }) => {
                self.done = true;
                if self.offset as usize + consumed >= self.data.len() {
                    // Torn final write: prefix is valid.
                    None
                } else {
                    Some(Err(Error::Corruption(format!(
                        "bad WAL record at offset {} with {} bytes following",
                        self.offset,
                        self.data.len() - self.offset as usize - consumed,
                    ))))
                }
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
