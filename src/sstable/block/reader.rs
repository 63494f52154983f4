use crate::error::{Error, Result};
use crate::sstable::block::builder::ENTRY_HEADER_SIZE;
use crate::types::{ValueType, Version};

/// A parsed view of one entry inside a block.
#[derive(Debug)]
pub struct BlockEntry<'a> {
    pub key: &'a [u8],
    pub value: &'a [u8],
    pub sequence: u64,
    pub value_type: ValueType,
}

/// A decoded data block: sorted entries plus the offset array that makes
/// binary search possible without parsing every entry.
pub struct Block {
    data: Vec<u8>,
    offsets: Vec<u32>,
}

impl Block {
    /// Decode a block from its on-disk bytes, validating the trailer.
    pub fn decode(data: Vec<u8>) -> Result<Self> {
        if data.len() < 4 {
            return Err(Error::Corruption("block too short for entry count".into()));
        }

        let count_offset = data.len() - 4;
        let num_entries =
            u32::from_le_bytes(data[count_offset..].try_into().unwrap()) as usize;

        let offsets_size = num_entries
            .checked_mul(4)
            .ok_or_else(|| Error::Corruption("block entry count overflow".into()))?;
        if count_offset < offsets_size {
            return Err(Error::Corruption("block offset array truncated".into()));
        }

        let offsets_start = count_offset - offsets_size;
        let offsets: Vec<u32> = data[offsets_start..count_offset]
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes(c.try_into().unwrap()))
            .collect();

        // Every offset must point at a complete entry header inside the
        // entry area.
        for &off in &offsets {
            if off as usize + ENTRY_HEADER_SIZE > offsets_start {
                return Err(Error::Corruption("block entry offset out of range".into()));
            }
        }

        let mut block = Block { data, offsets };
        block.data.truncate(offsets_start);
        // Parse-check every entry once so later accessors can't run past
        // the entry area.
        for i in 0..block.offsets.len() {
            block.check_entry(i)?;
        }
        Ok(block)
    }

    fn check_entry(&self, index: usize) -> Result<()> {
        let off = self.offsets[index] as usize;
        let key_len = u16::from_le_bytes(self.data[off..off + 2].try_into().unwrap()) as usize;
        let val_len = u32::from_le_bytes(self.data[off + 2..off + 6].try_into().unwrap()) as usize;
        let end = off + ENTRY_HEADER_SIZE + key_len + val_len;
        if end > self.data.len() {
            return Err(Error::Corruption(format!(
                "block entry {index} extends past entry area"
            )));
        }
        Ok(())
    }

    /// Number of entries in the block.
    pub fn num_entries(&self) -> usize {
        self.offsets.len()
    }

    /// Parse the entry at the given index. Bounds were validated in decode.
    pub fn entry_at(&self, index: usize) -> BlockEntry<'_> {
        let off = self.offsets[index] as usize;
        let key_len = u16::from_le_bytes(self.data[off..off + 2].try_into().unwrap()) as usize;
        let val_len = u32::from_le_bytes(self.data[off + 2..off + 6].try_into().unwrap()) as usize;
        let flags = self.data[off + 6];
        let sequence = u64::from_le_bytes(self.data[off + 7..off + 15].try_into().unwrap());

        let key_start = off + ENTRY_HEADER_SIZE;
        let val_start = key_start + key_len;

        BlockEntry {
            key: &self.data[key_start..val_start],
            value: &self.data[val_start..val_start + val_len],
            sequence,
            value_type: ValueType::from_flags(flags),
        }
    }

    /// Binary search for a key. Returns its stored version (tombstones
    /// included) or None if the key is not in this block.
    pub fn get(&self, key: &[u8]) -> Option<Version> {
        let mut lo = 0usize;
        let mut hi = self.offsets.len();
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let entry = self.entry_at(mid);
            match entry.key.cmp(key) {
                std::cmp::Ordering::Less => lo = mid + 1,
                std::cmp::Ordering::Greater => hi = mid,
                std::cmp::Ordering::Equal => {
                    return Some(Version {
                        sequence: entry.sequence,
                        value_type: entry.value_type,
                        value: entry.value.to_vec(),
                    });
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sstable::block::builder::BlockBuilder;

    fn sample_block() -> Block {
        let mut builder = BlockBuilder::new(4096);
        assert!(builder.add(b"apple", 1, ValueType::Put, b"red"));
        assert!(builder.add(b"banana", 2, ValueType::Delete, b""));
        assert!(builder.add(b"cherry", 3, ValueType::Put, b"dark"));
        Block::decode(builder.build()).unwrap()
    }

    #[test]
    fn get_finds_entries_and_misses_cleanly() {
        let block = sample_block();

        let apple = block.get(b"apple").unwrap();
        assert_eq!(apple.sequence, 1);
        assert_eq!(apple.value, b"red");
        assert!(!apple.is_tombstone());

        let banana = block.get(b"banana").unwrap();
        assert!(banana.is_tombstone());
        assert_eq!(banana.sequence, 2);

        assert!(block.get(b"blueberry").is_none());
        assert!(block.get(b"aaa").is_none());
        assert!(block.get(b"zzz").is_none());
    }

    #[test]
    fn entries_iterate_in_key_order() {
        let block = sample_block();
        let keys: Vec<&[u8]> = (0..block.num_entries())
            .map(|i| block.entry_at(i).key)
            .collect();
        assert_eq!(keys, vec![&b"apple"[..], b"banana", b"cherry"]);
    }

    #[test]
    fn decode_rejects_truncated_block() {
        let mut builder = BlockBuilder::new(4096);
        builder.add(b"k", 1, ValueType::Put, b"v");
        let bytes = builder.build();

        assert!(Block::decode(bytes[..2].to_vec()).is_err());
        // Entry count claims more entries than the offset array holds
        let mut mangled = bytes.clone();
        let n = mangled.len();
        mangled[n - 4..].copy_from_slice(&999u32.to_le_bytes());
        assert!(Block::decode(mangled).is_err());
    }
}
