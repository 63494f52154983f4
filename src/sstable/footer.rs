use crate::error::{Error, Result};

/// Magic number to identify SSTable files.
pub const SSTABLE_MAGIC: u64 = 0x4C534D4B56535354; // "LSMKVSST"

/// Metadata about an SSTable file, stored in its meta block.
#[derive(Debug, Clone)]
pub struct SSTableMeta {
    /// Generation id; strictly increasing across flushes and compactions.
    pub id: u64,
    /// Smallest key in the SSTable.
    pub min_key: Vec<u8>,
    /// Largest key in the SSTable.
    pub max_key: Vec<u8>,
    /// File size in bytes.
    pub file_size: u64,
    /// Number of entries (including tombstones).
    pub entry_count: u64,
    /// Highest sequence number stored; recovery uses it to restore the
    /// store's sequence counter.
    pub max_sequence: u64,
}

impl SSTableMeta {
    /// Encode the meta fields.
    /// Format: [id(8B)][min_len(4B)][min][max_len(4B)][max][entry_count(8B)][max_seq(8B)]
    /// (file_size is derived from the file itself on open).
    pub fn encode(&self) -> Vec<u8> {
        let mut buf =
            Vec::with_capacity(8 + 4 + self.min_key.len() + 4 + self.max_key.len() + 16);
        buf.extend_from_slice(&self.id.to_le_bytes());
        buf.extend_from_slice(&(self.min_key.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.min_key);
        buf.extend_from_slice(&(self.max_key.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.max_key);
        buf.extend_from_slice(&self.entry_count.to_le_bytes());
        buf.extend_from_slice(&self.max_sequence.to_le_bytes());
        buf
    }

    /// Decode meta fields, filling `file_size` from the caller.
    pub fn decode(data: &[u8], file_size: u64) -> Result<Self> {
        let mut offset = 0usize;

        let take = |offset: &mut usize, n: usize| -> Result<std::ops::Range<usize>> {
            if data.len() < *offset + n {
                return Err(Error::Corruption("SSTable meta block too short".into()));
            }
            let range = *offset..*offset + n;
            *offset += n;
            Ok(range)
        };

        let id = u64::from_le_bytes(data[take(&mut offset, 8)?].try_into().unwrap());

        let min_len =
            u32::from_le_bytes(data[take(&mut offset, 4)?].try_into().unwrap()) as usize;
        let min_key = data[take(&mut offset, min_len)?].to_vec();

        let max_len =
            u32::from_le_bytes(data[take(&mut offset, 4)?].try_into().unwrap()) as usize;
        let max_key = data[take(&mut offset, max_len)?].to_vec();

        let entry_count = u64::from_le_bytes(data[take(&mut offset, 8)?].try_into().unwrap());
        let max_sequence = u64::from_le_bytes(data[take(&mut offset, 8)?].try_into().unwrap());

        Ok(SSTableMeta {
            id,
            min_key,
            max_key,
            file_size,
            entry_count,
            max_sequence,
        })
    }
}

/// An entry in the SSTable's index block.
/// Maps a block's last key to its location in the file.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    /// Last (largest) key in the block.
    pub last_key: Vec<u8>,
    /// Byte offset of the block in the file.
    pub offset: u64,
    /// Size of the block in bytes.
    pub size: u64,
}

impl IndexEntry {
    /// Encode this index entry to bytes.
    /// Format: [key_len(2B)][key][offset(8B)][size(8B)]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(2 + self.last_key.len() + 16);
        buf.extend_from_slice(&(self.last_key.len() as u16).to_le_bytes());
        buf.extend_from_slice(&self.last_key);
        buf.extend_from_slice(&self.offset.to_le_bytes());
        buf.extend_from_slice(&self.size.to_le_bytes());
        buf
    }

    /// Decode an index entry from bytes, returning (entry, bytes_consumed).
    pub fn decode(data: &[u8]) -> Result<(Self, usize)> {
        if data.len() < 2 {
            return Err(Error::Corruption("index entry too short".into()));
        }
        let key_len = u16::from_le_bytes([data[0], data[1]]) as usize;
        let total = 2 + key_len + 16;
        if data.len() < total {
            return Err(Error::Corruption("index entry truncated".into()));
        }
        let last_key = data[2..2 + key_len].to_vec();
        let offset = u64::from_le_bytes(data[2 + key_len..10 + key_len].try_into().unwrap());
        let size = u64::from_le_bytes(data[10 + key_len..18 + key_len].try_into().unwrap());
        Ok((
            IndexEntry {
                last_key,
                offset,
                size,
            },
            total,
        ))
    }
}

/// The footer sits at the end of the SSTable file.
/// It tells the reader where to find the index and meta blocks.
///
/// ```text
/// ┌──────────────────────────────────────┐
/// │ Index block offset (8B)              │
/// │ Index block size (8B)                │
/// │ Meta block offset (8B)               │
/// │ Meta block size (8B)                 │
/// │ Magic number (8B)                    │
/// └──────────────────────────────────────┘
/// ```
#[derive(Debug, Clone)]
pub struct Footer {
    pub index_block_offset: u64,
    pub index_block_size: u64,
    pub meta_block_offset: u64,
    pub meta_block_size: u64,
    pub magic: u64,
}

impl Footer {
    /// Size of the footer in bytes (fixed).
    pub const SIZE: usize = 8 * 5; // 40 bytes

    /// Encode footer to bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        buf.extend_from_slice(&self.index_block_offset.to_le_bytes());
        buf.extend_from_slice(&self.index_block_size.to_le_bytes());
        buf.extend_from_slice(&self.meta_block_offset.to_le_bytes());
        buf.extend_from_slice(&self.meta_block_size.to_le_bytes());
        buf.extend_from_slice(&self.magic.to_le_bytes());
        buf
    }

    /// Decode footer from bytes.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(Error::Corruption("footer too short".into()));
        }
        let index_block_offset = u64::from_le_bytes(data[0..8].try_into().unwrap());
        let index_block_size = u64::from_le_bytes(data[8..16].try_into().unwrap());
        let meta_block_offset = u64::from_le_bytes(data[16..24].try_into().unwrap());
        let meta_block_size = u64::from_le_bytes(data[24..32].try_into().unwrap());
        let magic = u64::from_le_bytes(data[32..40].try_into().unwrap());

        if magic != SSTABLE_MAGIC {
            return Err(Error::Corruption(format!(
                "bad magic: expected {SSTABLE_MAGIC:#x}, got {magic:#x}"
            )));
        }

        Ok(Footer {
            index_block_offset,
            index_block_size,
            meta_block_offset,
            meta_block_size,
            magic,
        })
    }
}
