use crate::types::ValueType;

/// Size of the per-entry header: key_len(2) + val_len(4) + flags(1) + sequence(8).
pub const ENTRY_HEADER_SIZE: usize = 2 + 4 + 1 + 8;

/// Accumulates sorted entries and serializes them into a block.
///
/// A block is typically 4KB (matching OS page size / SSD block size).
/// Contains sorted entries + an offset array for binary search.
///
/// On-disk layout of a block:
/// ```text
/// ┌──────────────────────────────────────────────────────────────┐
/// │ Entry 0: [key_len(2B)][val_len(4B)][flags(1B)][seq(8B)][key][value] │
/// │ Entry 1: ...                                                 │
/// │ Entry N: ...                                                 │
/// ├──────────────────────────────────────────────────────────────┤
/// │ Offset array: [off_0(4B)][off_1(4B)]...[off_N(4B)]           │
/// │ Num entries (4B)                                             │
/// └──────────────────────────────────────────────────────────────┘
/// ```
///
/// The offset array at the end enables binary search without parsing
/// every entry — jump to offsets[mid], read the key, compare.
/// Offsets and lengths are 32-bit: the first entry of a block is always
/// accepted whatever its size, so a large value must not overflow them.
pub struct BlockBuilder {
    data: Vec<u8>,
    offsets: Vec<u32>,
    block_size: usize,
}

impl BlockBuilder {
    /// Create a new block builder with target block size.
    pub fn new(block_size: usize) -> Self {
        BlockBuilder {
            data: Vec::new(),
            offsets: Vec::new(),
            block_size,
        }
    }

    /// Add an entry to the block.
    /// Returns false if the block is full (entry doesn't fit).
    /// First entry is always accepted even if it exceeds block_size.
    /// Entries MUST be added in sorted key order.
    pub fn add(&mut self, key: &[u8], sequence: u64, value_type: ValueType, value: &[u8]) -> bool {
        let entry_size = ENTRY_HEADER_SIZE + key.len() + value.len();

        if !self.offsets.is_empty() && self.estimated_size() + entry_size > self.block_size {
            return false;
        }

        self.offsets.push(self.data.len() as u32);

        self.data.extend_from_slice(&(key.len() as u16).to_le_bytes());
        self.data.extend_from_slice(&(value.len() as u32).to_le_bytes());
        self.data.push(value_type.to_flags());
        self.data.extend_from_slice(&sequence.to_le_bytes());
        self.data.extend_from_slice(key);
        self.data.extend_from_slice(value);

        true
    }

    /// Finalize the block: append offset array and entry count.
    pub fn build(self) -> Vec<u8> {
        let mut block = self.data;

        for offset in &self.offsets {
            block.extend_from_slice(&offset.to_le_bytes());
        }

        block.extend_from_slice(&(self.offsets.len() as u32).to_le_bytes());

        block
    }

    /// Current estimated size of the block (data + offsets + count).
    pub fn estimated_size(&self) -> usize {
        self.data.len() + self.offsets.len() * 4 + 4
    }

    /// Whether the block is empty (no entries added).
    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }
}
