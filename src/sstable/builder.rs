use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::bloom::BloomFilter;
use crate::error::Result;
use crate::sstable::block::BlockBuilder;
use crate::sstable::footer::{Footer, IndexEntry, SSTABLE_MAGIC, SSTableMeta};
use crate::types::ValueType;

/// Builds an SSTable file from a sorted stream of entries.
///
/// Used during:
/// - Memtable flush (sorted memtable → SSTable)
/// - Compaction (merged iterators → new SSTable)
///
/// Build process:
/// 1. Add entries one by one (must be in sorted key order)
/// 2. Entries fill up blocks; when a block is full it's written to disk
/// 3. finish() flushes the last block, writes meta (incl. bloom filter),
///    index and footer, then fsyncs
pub struct SSTableBuilder {
    /// Current block being filled with entries.
    block_builder: BlockBuilder,
    /// Index entries: one per flushed data block.
    index_entries: Vec<IndexEntry>,
    /// Tracks current write position in the file.
    data_offset: u64,
    /// Buffered file writer.
    writer: BufWriter<File>,
    /// Generation id of the table being built.
    generation: u64,
    /// Target block size.
    block_size: usize,
    /// Every key added, mirrored into the bloom filter.
    bloom: BloomFilter,
    /// Smallest key added (first key, since entries are sorted).
    min_key: Option<Vec<u8>>,
    /// Largest key added (updated on every add).
    max_key: Option<Vec<u8>>,
    /// Total entries added.
    entry_count: u64,
    /// Highest sequence number added.
    max_sequence: u64,
    /// Last key added to the current block (needed for index entry).
    last_key_in_block: Option<Vec<u8>>,
}

impl SSTableBuilder {
    /// Create a new SSTable builder that writes to the given path.
    ///
    /// `expected_entries` sizes the bloom filter; the flush path knows the
    /// memtable length and compaction uses the sum of its inputs.
    pub fn new(
        path: &Path,
        generation: u64,
        block_size: usize,
        expected_entries: usize,
        bloom_fpr: f64,
    ) -> Result<Self> {
        let file = File::create(path)?;
        let writer = BufWriter::new(file);
        Ok(SSTableBuilder {
            block_builder: BlockBuilder::new(block_size),
            index_entries: Vec::new(),
            data_offset: 0,
            writer,
            generation,
            block_size,
            bloom: BloomFilter::new(expected_entries.max(1), bloom_fpr),
            min_key: None,
            max_key: None,
            entry_count: 0,
            max_sequence: 0,
            last_key_in_block: None,
        })
    }

    /// Add an entry. MUST be called in sorted key order.
    ///
    /// Internally:
    /// 1. Try adding to the current block
    /// 2. If block is full: flush block to file, record index entry, start new block
    /// 3. Add the entry to the new block
    pub fn add(
        &mut self,
        key: &[u8],
        sequence: u64,
        value_type: ValueType,
        value: &[u8],
    ) -> Result<()> {
        if self.min_key.is_none() {
            self.min_key = Some(key.to_vec());
        }
        self.max_key = Some(key.to_vec());
        self.entry_count += 1;
        self.max_sequence = self.max_sequence.max(sequence);
        self.bloom.insert(key);

        if self.block_builder.add(key, sequence, value_type, value) {
            self.last_key_in_block = Some(key.to_vec());
            return Ok(());
        }

        // Block is full — flush it, then add to a fresh block
        self.flush_block()?;

        // First entry of a fresh block is always accepted
        assert!(self.block_builder.add(key, sequence, value_type, value));
        self.last_key_in_block = Some(key.to_vec());

        Ok(())
    }

    /// Flush the current block to disk and record an index entry.
    fn flush_block(&mut self) -> Result<()> {
        if self.block_builder.is_empty() {
            return Ok(());
        }

        let old_builder =
            std::mem::replace(&mut self.block_builder, BlockBuilder::new(self.block_size));
        let block_data = old_builder.build();
        let block_size = block_data.len() as u64;

        self.writer.write_all(&block_data)?;

        self.index_entries.push(IndexEntry {
            last_key: self.last_key_in_block.take().unwrap(),
            offset: self.data_offset,
            size: block_size,
        });

        self.data_offset += block_size;
        Ok(())
    }

    /// Finalize the SSTable: flush last block, write meta block (table meta
    /// + bloom filter), index block, footer, fsync.
    pub fn finish(mut self) -> Result<SSTableMeta> {
        // 1. Flush the last data block
        self.flush_block()?;

        let mut meta = SSTableMeta {
            id: self.generation,
            min_key: self.min_key.take().unwrap_or_default(),
            max_key: self.max_key.take().unwrap_or_default(),
            file_size: 0,
            entry_count: self.entry_count,
            max_sequence: self.max_sequence,
        };

        // 2. Meta block: [meta_len(4B)][meta][bloom]
        let meta_block_offset = self.data_offset;
        let meta_bytes = meta.encode();
        let mut meta_block = Vec::with_capacity(4 + meta_bytes.len());
        meta_block.extend_from_slice(&(meta_bytes.len() as u32).to_le_bytes());
        meta_block.extend_from_slice(&meta_bytes);
        meta_block.extend_from_slice(&self.bloom.serialize());
        let meta_block_size = meta_block.len() as u64;
        self.writer.write_all(&meta_block)?;

        // 3. Index block: serialize all index entries sequentially
        let index_block_offset = meta_block_offset + meta_block_size;
        let mut index_data = Vec::new();
        for entry in &self.index_entries {
            index_data.extend_from_slice(&entry.encode());
        }
        let index_block_size = index_data.len() as u64;
        self.writer.write_all(&index_data)?;

        // 4. Footer
        let footer = Footer {
            index_block_offset,
            index_block_size,
            meta_block_offset,
            meta_block_size,
            magic: SSTABLE_MAGIC,
        };
        self.writer.write_all(&footer.encode())?;

        // 5. Flush buffer + fsync to guarantee durability
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;

        meta.file_size = index_block_offset + index_block_size + Footer::SIZE as u64;
        Ok(meta)
    }
}
