use crate::error::Result;
use crate::iterator::StorageIterator;
use crate::sstable::block::Block;
use crate::sstable::reader::SSTable;
use crate::types::ValueType;

/// Iterates an SSTable's entries in key order, reading one data block at a
/// time. This is the scan side of compaction; point lookups go through
/// `SSTable::get` instead.
pub struct SSTableIterator<'a> {
    table: &'a SSTable,
    /// Index of the block currently loaded.
    block_idx: usize,
    /// Currently loaded block, None once the table is exhausted.
    block: Option<Block>,
    /// Entry position within the current block.
    entry_idx: usize,
}

impl<'a> SSTableIterator<'a> {
    pub(crate) fn new(table: &'a SSTable) -> Result<Self> {
        let mut iter = SSTableIterator {
            table,
            block_idx: 0,
            block: None,
            entry_idx: 0,
        };
        iter.load_block(0)?;
        Ok(iter)
    }

    fn load_block(&mut self, idx: usize) -> Result<()> {
        if idx >= self.table.num_blocks() {
            self.block = None;
            return Ok(());
        }
        self.block = Some(self.table.read_block(idx)?);
        self.block_idx = idx;
        self.entry_idx = 0;
        Ok(())
    }
}

impl<'a> StorageIterator for SSTableIterator<'a> {
    fn key(&self) -> &[u8] {
        self.block.as_ref().unwrap().entry_at(self.entry_idx).key
    }

    fn value(&self) -> &[u8] {
        self.block.as_ref().unwrap().entry_at(self.entry_idx).value
    }

    fn sequence(&self) -> u64 {
        self.block
            .as_ref()
            .unwrap()
            .entry_at(self.entry_idx)
            .sequence
    }

    fn value_type(&self) -> ValueType {
        self.block
            .as_ref()
            .unwrap()
            .entry_at(self.entry_idx)
            .value_type
    }

    fn is_valid(&self) -> bool {
        match &self.block {
            Some(block) => self.entry_idx < block.num_entries(),
            None => false,
        }
    }

    fn next(&mut self) -> Result<()> {
        if let Some(block) = &self.block {
            self.entry_idx += 1;
            if self.entry_idx >= block.num_entries() {
                self.load_block(self.block_idx + 1)?;
            }
        }
        Ok(())
    }
}
