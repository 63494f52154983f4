use crate::error::{Error, Result};
use crate::types::{Key, Value, ValueType};

/// A single record in the WAL.
///
/// On-disk format:
/// ```text
/// ┌──────────┬────────┬──────────┬──────────┬────────────┬───────────┬──────────┐
/// │ CRC (4B) │ Len(4B)│ Type(1B) │ Seq (8B) │ Key Len(4B)│ Key (var) │Val (var) │
/// └──────────┴────────┴──────────┴──────────┴────────────┴───────────┴──────────┘
/// ```
///
/// CRC covers everything after the CRC field itself. The sequence number is
/// persisted so replay rebuilds entries with their original write order —
/// a replayed tombstone must still outrank the SSTable versions it shadows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalRecord {
    pub value_type: ValueType,
    pub sequence: u64,
    pub key: Key,
    pub value: Value,
}

// Header sizes
const CRC_SIZE: usize = 4;
const LEN_SIZE: usize = 4;
const TYPE_SIZE: usize = 1;
const SEQ_SIZE: usize = 8;
const KEY_LEN_SIZE: usize = 4;
const HEADER_SIZE: usize = CRC_SIZE + LEN_SIZE + TYPE_SIZE + SEQ_SIZE + KEY_LEN_SIZE;

/// Outcome of decoding bytes at some offset of a WAL segment.
///
/// The distinction matters for recovery: `Incomplete` at the end of a
/// segment is a crash mid-append and the valid prefix survives; `Corrupt`
/// anywhere with further data behind it means the file was damaged and the
/// store must refuse to open.
#[derive(Debug)]
pub enum Decoded {
    /// A well-formed record and the bytes it occupied.
    Complete { record: WalRecord, consumed: usize },
    /// Not enough bytes for a whole record.
    Incomplete,
    /// A full record is present but its CRC does not match.
    Corrupt { consumed: usize },
}

impl WalRecord {
    /// Create a Put record.
    pub fn put(sequence: u64, key: Key, value: Value) -> Self {
        WalRecord {
            value_type: ValueType::Put,
            sequence,
            key,
            value,
        }
    }

    /// Create a Delete (tombstone) record.
    pub fn delete(sequence: u64, key: Key) -> Self {
        WalRecord {
            value_type: ValueType::Delete,
            sequence,
            key,
            value: Vec::new(),
        }
    }

    /// Serialize this record to bytes (including CRC header).
    pub fn encode(&self) -> Vec<u8> {
        let payload_len = TYPE_SIZE + SEQ_SIZE + KEY_LEN_SIZE + self.key.len() + self.value.len();
        let total_len = CRC_SIZE + LEN_SIZE + payload_len;

        let mut buf = Vec::with_capacity(total_len);

        // Reserve space for CRC (filled at the end)
        buf.extend_from_slice(&[0u8; CRC_SIZE]);

        // Length (of everything after CRC and Length fields)
        buf.extend_from_slice(&(payload_len as u32).to_le_bytes());

        buf.push(self.value_type as u8);
        buf.extend_from_slice(&self.sequence.to_le_bytes());
        buf.extend_from_slice(&(self.key.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.key);
        buf.extend_from_slice(&self.value);

        // Compute CRC over everything after the CRC field
        let crc = crc32fast::hash(&buf[CRC_SIZE..]);
        buf[0..CRC_SIZE].copy_from_slice(&crc.to_le_bytes());

        buf
    }

    /// Decode the record starting at `data[0]`.
    ///
    /// Returns `Incomplete` when the buffer holds less than one whole record,
    /// `Corrupt` when the declared length is available but the CRC fails, and
    /// an error when the CRC passes yet the payload is malformed (that cannot
    /// be a torn write).
    pub fn decode(data: &[u8]) -> Result<Decoded> {
        if data.len() < HEADER_SIZE {
            return Ok(Decoded::Incomplete);
        }

        let stored_crc = u32::from_le_bytes(data[0..4].try_into().unwrap());
        let payload_len = u32::from_le_bytes(data[4..8].try_into().unwrap()) as usize;

        let total_len = CRC_SIZE + LEN_SIZE + payload_len;
        if data.len() < total_len {
            return Ok(Decoded::Incomplete);
        }

        // Verify CRC (covers everything after the CRC field)
        let computed_crc = crc32fast::hash(&data[CRC_SIZE..total_len]);
        if stored_crc != computed_crc {
            return Ok(Decoded::Corrupt { consumed: total_len });
        }

        // Parse the payload. The CRC already matched, so any inconsistency
        // from here on is a format error, not a torn write.
        let mut offset = CRC_SIZE + LEN_SIZE;

        let value_type = match data[offset] {
            0x01 => ValueType::Put,
            0x02 => ValueType::Delete,
            b => return Err(Error::Corruption(format!("invalid WAL record type: {b}"))),
        };
        offset += TYPE_SIZE;

        let sequence = u64::from_le_bytes(data[offset..offset + SEQ_SIZE].try_into().unwrap());
        offset += SEQ_SIZE;

        let key_len = u32::from_le_bytes(data[offset..offset + 4].try_into().unwrap()) as usize;
        offset += KEY_LEN_SIZE;

        if offset + key_len > total_len {
            return Err(Error::Corruption("WAL key length exceeds record".into()));
        }
        let key = data[offset..offset + key_len].to_vec();
        offset += key_len;

        let value = data[offset..total_len].to_vec();

        Ok(Decoded::Complete {
            record: WalRecord {
                value_type,
                sequence,
                key,
                value,
            },
            consumed: total_len,
        })
    }

    /// Size of this record when serialized on disk.
    pub fn encoded_size(&self) -> usize {
        HEADER_SIZE + self.key.len() + self.value.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_roundtrip() {
        let record = WalRecord::put(7, b"key".to_vec(), b"value".to_vec());
        let encoded = record.encode();
        assert_eq!(encoded.len(), record.encoded_size());

        match WalRecord::decode(&encoded).unwrap() {
            Decoded::Complete { record: decoded, consumed } => {
                assert_eq!(decoded, record);
                assert_eq!(consumed, encoded.len());
            }
            other => panic!("expected complete record, got {other:?}"),
        }
    }

    #[test]
    fn tombstone_has_empty_value() {
        let record = WalRecord::delete(3, b"gone".to_vec());
        let encoded = record.encode();
        match WalRecord::decode(&encoded).unwrap() {
            Decoded::Complete { record, .. } => {
                assert_eq!(record.value_type, ValueType::Delete);
                assert_eq!(record.sequence, 3);
                assert!(record.value.is_empty());
            }
            other => panic!("expected complete record, got {other:?}"),
        }
    }

    #[test]
    fn short_buffer_is_incomplete() {
        let encoded = WalRecord::put(1, b"k".to_vec(), b"v".to_vec()).encode();
        for cut in [0, 3, HEADER_SIZE - 1, encoded.len() - 1] {
            match WalRecord::decode(&encoded[..cut]).unwrap() {
                Decoded::Incomplete => {}
                other => panic!("cut {cut}: expected incomplete, got {other:?}"),
            }
        }
    }

    #[test]
    fn flipped_bit_is_corrupt() {
        let mut encoded = WalRecord::put(1, b"key".to_vec(), b"val".to_vec()).encode();
        let len = encoded.len();
        encoded[len - 1] ^= 0x80;
        match WalRecord::decode(&encoded).unwrap() {
            Decoded::Corrupt { consumed } => assert_eq!(consumed, len),
            other => panic!("expected corrupt, got {other:?}"),
        }
    }
}
