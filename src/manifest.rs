use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Name of the manifest file inside the store directory.
pub const MANIFEST_FILE: &str = "MANIFEST";
const MANIFEST_TMP_FILE: &str = "MANIFEST.tmp";

/// The durable catalog: which SSTable generations are live.
///
/// The manifest is the commit point for both flush and compaction. A flush
/// registers its new table here before the covering WAL segments may be
/// deleted; a compaction swaps its inputs for its output in ONE rewrite, so
/// a crash at any instant leaves either the old or the new catalog — never
/// a mix that could resurrect dropped tombstones.
///
/// On-disk format, rewritten whole on every change via tmp + rename:
/// ```text
/// ┌──────────┬───────────┬──────────────────────────┐
/// │ CRC (4B) │ Count(4B) │ Generation ids (8B each) │
/// └──────────┴───────────┴──────────────────────────┘
/// ```
/// CRC covers everything after the CRC field. Any file present in the
/// directory but absent here is a leftover of an uncommitted operation and
/// is deleted at open.
pub struct Manifest {
    path: PathBuf,
    tmp_path: PathBuf,
    /// Live generation ids, ascending. Generation order is recency order.
    live: Vec<u64>,
}

impl Manifest {
    /// Load the manifest from a directory, or start empty if none exists.
    /// A present-but-damaged manifest is fatal: the catalog cannot be
    /// trusted, so the store refuses to open.
    pub fn load_or_create(dir: &Path) -> Result<Self> {
        let path = dir.join(MANIFEST_FILE);
        let tmp_path = dir.join(MANIFEST_TMP_FILE);

        // An orphaned tmp file is an interrupted rewrite; the real manifest
        // is still authoritative.
        if tmp_path.exists() {
            fs::remove_file(&tmp_path)?;
        }

        let live = if path.exists() {
            Self::decode(&fs::read(&path)?)?
        } else {
            Vec::new()
        };

        Ok(Manifest {
            path,
            tmp_path,
            live,
        })
    }

    /// Live generation ids, ascending (newest last).
    pub fn live(&self) -> &[u64] {
        &self.live
    }

    /// Register a freshly flushed table. Durable once this returns.
    pub fn add(&mut self, generation: u64) -> Result<()> {
        let mut next = self.live.clone();
        next.push(generation);
        next.sort_unstable();
        self.commit(next)
    }

    /// Commit a compaction: drop the inputs, add the output, one rewrite.
    /// `added` is None when the merge produced nothing but dropped
    /// tombstones and the output file was discarded.
    pub fn replace(&mut self, removed: &[u64], added: Option<u64>) -> Result<()> {
        let mut next: Vec<u64> = self
            .live
            .iter()
            .copied()
            .filter(|g| !removed.contains(g))
            .collect();
        if let Some(generation) = added {
            next.push(generation);
        }
        next.sort_unstable();
        self.commit(next)
    }

    /// Persist the new list, then adopt it. A failed rewrite leaves both
    /// the file and the in-memory state on the old list.
    fn commit(&mut self, next: Vec<u64>) -> Result<()> {
        let bytes = Self::encode(&next);

        fs::write(&self.tmp_path, &bytes)?;
        let tmp = fs::File::open(&self.tmp_path)?;
        tmp.sync_all()?;
        drop(tmp);
        fs::rename(&self.tmp_path, &self.path)?;

        self.live = next;
        Ok(())
    }

    fn encode(live: &[u64]) -> Vec<u8> {
        let mut payload = Vec::with_capacity(4 + live.len() * 8);
        payload.extend_from_slice(&(live.len() as u32).to_le_bytes());
        for generation in live {
            payload.extend_from_slice(&generation.to_le_bytes());
        }

        let mut buf = Vec::with_capacity(4 + payload.len());
        buf.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
        buf.extend_from_slice(&payload);
        buf
    }

    fn decode(data: &[u8]) -> Result<Vec<u64>> {
        if data.len() < 8 {
            return Err(Error::Corruption("manifest too short".into()));
        }

        let stored_crc = u32::from_le_bytes(data[0..4].try_into().unwrap());
        let payload = &data[4..];
        if crc32fast::hash(payload) != stored_crc {
            return Err(Error::Corruption("manifest CRC mismatch".into()));
        }

        let count = u32::from_le_bytes(payload[0..4].try_into().unwrap()) as usize;
        let ids = &payload[4..];
        if ids.len() != count * 8 {
            return Err(Error::Corruption(format!(
                "manifest claims {count} generations but holds {} bytes of ids",
                ids.len()
            )));
        }

        Ok(ids
            .chunks_exact(8)
            .map(|c| u64::from_le_bytes(c.try_into().unwrap()))
            .collect())
    }
}
