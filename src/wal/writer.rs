use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::wal::SyncPolicy;
use crate::wal::record::WalRecord;

/// Writes WAL records to a segment file on disk.
///
/// Every write must be durable before it's acknowledged to the client
/// (under the default sync policy). The WAL ensures crash recovery: on
/// restart, replay the segments to reconstruct the memtable.
///
/// Two layers of buffering:
///   BufWriter.flush()  → Rust buffer → OS page cache
///   file.sync_all()    → OS page cache → physical disk
///
/// A failed append rolls the segment back to the previous record boundary.
/// Without that, a partially written record followed by later appends would
/// read as mid-file corruption on replay, which is fatal.
pub struct WalWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    offset: u64,
    sync_policy: SyncPolicy,
    writes_since_sync: usize,
    poisoned: bool,
}

impl WalWriter {
    /// Open a WAL writer at the given path, appending to existing content.
    pub fn new(path: &Path, sync_policy: SyncPolicy) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let offset = file.metadata()?.len();

        Ok(WalWriter {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
            offset,
            sync_policy,
            writes_since_sync: 0,
            poisoned: false,
        })
    }

    /// Append a record to the WAL.
    /// Depending on SyncPolicy, may fsync after this write.
    pub fn append(&mut self, record: &WalRecord) -> Result<()> {
        if self.poisoned {
            return Err(Error::Io(io::Error::other(
                "WAL segment unusable after a failed append could not be rolled back",
            )));
        }

        let encoded = record.encode();
        match self.try_append(&encoded) {
            Ok(()) => Ok(()),
            Err(e) => {
                if self.rollback().is_err() {
                    self.poisoned = true;
                }
                Err(e)
            }
        }
    }

    fn try_append(&mut self, encoded: &[u8]) -> Result<()> {
        self.writer.write_all(encoded)?;
        self.writer.flush()?;

        match self.sync_policy {
            SyncPolicy::EveryWrite => {
                self.writer.get_ref().sync_all()?;
                self.writes_since_sync = 0;
            }
            SyncPolicy::EveryNWrites(n) => {
                self.writes_since_sync += 1;
                if self.writes_since_sync >= n {
                    self.writer.get_ref().sync_all()?;
                    self.writes_since_sync = 0;
                }
            }
        }

        self.offset += encoded.len() as u64;
        Ok(())
    }

    /// Cut the segment back to the last record boundary and discard any
    /// bytes still sitting in the write buffer.
    fn rollback(&mut self) -> io::Result<()> {
        let trunc = OpenOptions::new().write(true).open(&self.path)?;
        trunc.set_len(self.offset)?;
        trunc.sync_all()?;
        drop(trunc);

        let fresh = OpenOptions::new().append(true).open(&self.path)?;
        let old = std::mem::replace(&mut self.writer, BufWriter::new(fresh));
        // into_parts drops the buffered partial record without flushing it.
        let _ = old.into_parts();
        self.writes_since_sync = 0;
        Ok(())
    }

    /// Force fsync to disk. Ensures all buffered writes are durable.
    pub fn sync(&mut self) -> Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        self.writes_since_sync = 0;
        Ok(())
    }

    /// Current file offset (bytes written so far).
    pub fn offset(&self) -> u64 {
        self.offset
    }
}

/// Name of the segment file for a given id.
pub fn segment_file_name(id: u64) -> String {
    format!("wal-{id:06}.log")
}

/// Parse a segment id out of a file name, if it is a WAL segment.
pub fn parse_segment_file_name(name: &str) -> Option<u64> {
    let id = name.strip_prefix("wal-")?.strip_suffix(".log")?;
    id.parse().ok()
}

/// All WAL segments in a directory, sorted by id ascending.
pub fn segment_paths(dir: &Path) -> Result<Vec<(u64, PathBuf)>> {
    let mut segments = Vec::new();
    for dirent in fs::read_dir(dir)? {
        let dirent = dirent?;
        let name = dirent.file_name();
        if let Some(id) = name.to_str().and_then(parse_segment_file_name) {
            segments.push((id, dirent.path()));
        }
    }
    segments.sort_by_key(|(id, _)| *id);
    Ok(segments)
}

/// Manages WAL segment rotation.
///
/// When the memtable rotates to the immutable queue:
/// 1. A new segment becomes active for the fresh memtable
/// 2. The sealed segments stay on disk until the flush they cover is
///    committed to the manifest
/// 3. Only then are they deleted
///
/// CRITICAL INVARIANT: sealed segments are only deleted AFTER their SSTable
/// is fully written, fsync'd and registered. Violating this loses data.
///
/// After recovery the active memtable may be rebuilt from several segments
/// (a crash between rotation and flush commit leaves the old segment
/// behind), so the manager tracks the whole covering set, not one file.
pub struct WalManager {
    dir: PathBuf,
    active: WalWriter,
    active_id: u64,
    /// Paths of every segment whose records live in the active memtable,
    /// including the active segment itself.
    covered: Vec<PathBuf>,
    sync_policy: SyncPolicy,
}

impl WalManager {
    /// Open the manager for a directory, appending to the newest existing
    /// segment or creating the first one.
    pub fn open(dir: &Path, sync_policy: SyncPolicy) -> Result<Self> {
        let existing = segment_paths(dir)?;

        let (active_id, covered) = match existing.last() {
            Some((last_id, _)) => (*last_id, existing.iter().map(|(_, p)| p.clone()).collect()),
            None => {
                let path = dir.join(segment_file_name(1));
                (1, vec![path])
            }
        };

        let active_path = dir.join(segment_file_name(active_id));
        let active = WalWriter::new(&active_path, sync_policy)?;

        Ok(WalManager {
            dir: dir.to_path_buf(),
            active,
            active_id,
            covered,
            sync_policy,
        })
    }

    /// Append a record to the active segment.
    pub fn append(&mut self, record: &WalRecord) -> Result<()> {
        self.active.append(record)
    }

    /// Rotate: seal the current covering set, start a fresh segment.
    ///
    /// Returns the sealed paths; the caller deletes them once the flush
    /// they cover is durably committed. On error nothing has changed and
    /// the old segment stays active.
    pub fn rotate(&mut self) -> Result<Vec<PathBuf>> {
        // The sealed set must be complete on disk before the flush that
        // reads the drained memtable can commit and delete it.
        self.active.sync()?;

        let new_id = self.active_id + 1;
        let new_path = self.dir.join(segment_file_name(new_id));
        self.active = WalWriter::new(&new_path, self.sync_policy)?;
        self.active_id = new_id;

        Ok(std::mem::replace(&mut self.covered, vec![new_path]))
    }

    /// Delete a sealed segment (safe only after its flush is committed).
    pub fn delete_segment(path: &Path) -> Result<()> {
        fs::remove_file(path).map_err(Error::Io)
    }
}
