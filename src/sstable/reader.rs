use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tracing::warn;

use crate::bloom::BloomFilter;
use crate::error::{Error, Result};
use crate::sstable::block::Block;
use crate::sstable::footer::{Footer, IndexEntry, SSTableMeta};
use crate::sstable::iterator::SSTableIterator;
use crate::types::Version;

/// An opened, immutable SSTable file.
///
/// On open:
/// 1. Read footer (last 40 bytes) → find index and meta block positions
/// 2. Read and parse index block → Vec<IndexEntry>
/// 3. Read meta block → SSTableMeta + bloom filter
/// 4. Ready for queries (data blocks read on demand)
///
/// Readers share the table through `Arc`; when a compaction replaces it,
/// the table is marked obsolete and the file is unlinked once the last
/// in-flight reader drops its handle. An in-progress lookup therefore never
/// dereferences a deleted file.
pub struct SSTable {
    /// Path to the SSTable file (for deletion and error messages).
    path: PathBuf,
    /// Open file handle for reading data blocks. The mutex gives interior
    /// mutability for seek+read across concurrent readers.
    file: Mutex<File>,
    /// Index entries parsed from the index block.
    /// Each entry maps a block's last key to its file location.
    index: Vec<IndexEntry>,
    /// Metadata parsed from the meta block.
    meta: SSTableMeta,
    /// Bloom filter over every key in the table.
    bloom: BloomFilter,
    /// Set when a compaction has superseded this table.
    obsolete: AtomicBool,
}

impl SSTable {
    /// Open an SSTable file, validating its framing.
    ///
    /// Reads the footer from the end of the file, then uses footer offsets
    /// to read the index and meta blocks into memory.
    pub fn open(path: &Path) -> Result<Self> {
        let mut file = File::open(path)?;

        let file_size = file.metadata()?.len();
        if file_size < Footer::SIZE as u64 {
            return Err(Error::Corruption(
                "file too short to contain footer".into(),
            ));
        }

        // Read footer (last 40 bytes)
        let footer_offset = file_size - Footer::SIZE as u64;
        file.seek(SeekFrom::Start(footer_offset))?;
        let mut footer_buf = vec![0u8; Footer::SIZE];
        file.read_exact(&mut footer_buf)?;
        let footer = Footer::decode(&footer_buf)?;

        if footer.index_block_offset + footer.index_block_size > footer_offset
            || footer.meta_block_offset + footer.meta_block_size > footer_offset
        {
            return Err(Error::Corruption("footer offsets out of range".into()));
        }

        // Read and parse the index block
        file.seek(SeekFrom::Start(footer.index_block_offset))?;
        let mut index_buf = vec![0u8; footer.index_block_size as usize];
        file.read_exact(&mut index_buf)?;

        let mut index = Vec::new();
        let mut offset = 0usize;
        while offset < index_buf.len() {
            let (entry, consumed) = IndexEntry::decode(&index_buf[offset..])?;
            index.push(entry);
            offset += consumed;
        }

        // Read the meta block: [meta_len(4B)][meta][bloom]
        file.seek(SeekFrom::Start(footer.meta_block_offset))?;
        let mut meta_buf = vec![0u8; footer.meta_block_size as usize];
        file.read_exact(&mut meta_buf)?;

        if meta_buf.len() < 4 {
            return Err(Error::Corruption("meta block too short".into()));
        }
        let meta_len = u32::from_le_bytes(meta_buf[0..4].try_into().unwrap()) as usize;
        if meta_buf.len() < 4 + meta_len {
            return Err(Error::Corruption("meta block truncated".into()));
        }
        let meta = SSTableMeta::decode(&meta_buf[4..4 + meta_len], file_size)?;
        let bloom = BloomFilter::deserialize(&meta_buf[4 + meta_len..])?;

        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
            index,
            meta,
            bloom,
            obsolete: AtomicBool::new(false),
        })
    }

    /// Point lookup. Returns the stored version (tombstones included) —
    /// the read path decides what a tombstone means.
    ///
    /// Algorithm:
    /// 1. Bloom filter: definitely-absent keys never touch the disk
    /// 2. Range check against [min_key, max_key]
    /// 3. Binary search the index → the one block that could hold the key
    /// 4. Read that block, binary search within it
    pub fn get(&self, key: &[u8]) -> Result<Option<Version>> {
        if !self.bloom.may_contain(key) {
            return Ok(None);
        }

        if key < self.meta.min_key.as_slice() || key > self.meta.max_key.as_slice() {
            return Ok(None);
        }

        // Index is sorted by last_key; find the first block whose last_key
        // is >= key.
        let block_idx = match self
            .index
            .binary_search_by(|entry| entry.last_key.as_slice().cmp(key))
        {
            Ok(idx) => idx,
            Err(idx) => {
                if idx >= self.index.len() {
                    return Ok(None);
                }
                idx
            }
        };

        let block = self.read_block(block_idx)?;
        Ok(block.get(key))
    }

    /// Read and decode the data block at the given index position.
    pub(crate) fn read_block(&self, block_idx: usize) -> Result<Block> {
        let entry = &self.index[block_idx];
        let mut block_data = vec![0u8; entry.size as usize];
        {
            let mut file = self.file.lock();
            file.seek(SeekFrom::Start(entry.offset))?;
            file.read_exact(&mut block_data)?;
        }
        Block::decode(block_data)
    }

    /// Number of data blocks.
    pub(crate) fn num_blocks(&self) -> usize {
        self.index.len()
    }

    /// Create an iterator over all entries in the SSTable, in key order.
    pub fn iter(&self) -> Result<SSTableIterator<'_>> {
        SSTableIterator::new(self)
    }

    /// Get metadata about this SSTable.
    pub fn meta(&self) -> &SSTableMeta {
        &self.meta
    }

    /// Generation id of this table.
    pub fn id(&self) -> u64 {
        self.meta.id
    }

    /// Mark this table as superseded by a compaction. The file is removed
    /// when the last reader drops its handle.
    pub fn mark_obsolete(&self) {
        self.obsolete.store(true, Ordering::Release);
    }
}

impl Drop for SSTable {
    fn drop(&mut self) {
        if self.obsolete.load(Ordering::Acquire) {
            if let Err(e) = fs::remove_file(&self.path) {
                warn!(path = %self.path.display(), error = %e, "failed to remove obsolete SSTable");
            }
        }
    }
}
