use xxhash_rust::xxh3::xxh3_128;

use crate::error::{Error, Result};

/// Probabilistic data structure: "is this key in the set?"
///
/// - If any bit is 0 → key is DEFINITELY NOT in the set
/// - If all bits are 1 → key is PROBABLY in the set (false positive possible)
///
/// Used in SSTable reads to skip SSTables that definitely don't contain
/// the target key. On a miss-heavy workload, this reduces disk reads by 90%+.
///
/// Sizing:
///   bits_per_key = -1.44 * log2(false_positive_rate)
///   num_hashes = bits_per_key * ln(2)
///
///   1% FPR  → ~10 bits/key, 7 hashes
///   0.1% FPR → ~14 bits/key, 10 hashes
///
/// Hash trick: don't need k independent hash functions.
/// Use double hashing: h_i(key) = h1(key) + i * h2(key) (mod m)
/// where h1, h2 come from splitting a 128-bit hash into two 64-bit halves.
pub struct BloomFilter {
    bits: Vec<u64>,
    num_hashes: u32,
    num_bits: u32,
}

impl BloomFilter {
    /// Create a new bloom filter sized for expected_items at the given FPR.
    ///
    /// # Panics
    /// Panics if expected_items is 0 or FPR is not in (0, 1).
    pub fn new(expected_items: usize, false_positive_rate: f64) -> Self {
        assert!(expected_items > 0, "expected_items must be > 0");
        assert!(
            false_positive_rate > 0.0 && false_positive_rate < 1.0,
            "FPR must be in (0, 1)"
        );

        let bits_per_key = -1.44 * false_positive_rate.log2();

        let num_bits = ((expected_items as f64) * bits_per_key).ceil() as u32;
        let num_bits = num_bits.max(64);

        let num_hashes = (bits_per_key * 2.0f64.ln()).ceil() as u32;
        let num_hashes = num_hashes.max(1);

        let num_u64s = ((num_bits as usize) + 63) / 64;
        let bits = vec![0u64; num_u64s];

        Self {
            bits,
            num_hashes,
            num_bits,
        }
    }

    /// Add a key to the bloom filter.
    pub fn insert(&mut self, key: &[u8]) {
        let (h1, h2) = Self::hash_key(key);

        for i in 0..self.num_hashes {
            let pos = self.get_position(h1, h2, i);
            self.set_bit(pos);
        }
    }

    /// Check if a key MIGHT be in the set.
    /// false → definitely not here. true → probably here.
    pub fn may_contain(&self, key: &[u8]) -> bool {
        let (h1, h2) = Self::hash_key(key);

        for i in 0..self.num_hashes {
            let pos = self.get_position(h1, h2, i);
            if !self.check_bit(pos) {
                return false;
            }
        }

        true
    }

    /// Serialize the bloom filter to bytes (for the SSTable meta block).
    /// Format: [num_hashes(4B)][num_bits(4B)][bit words(8B each)]
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(8 + self.bits.len() * 8);
        buf.extend_from_slice(&self.num_hashes.to_le_bytes());
        buf.extend_from_slice(&self.num_bits.to_le_bytes());
        for word in &self.bits {
            buf.extend_from_slice(&word.to_le_bytes());
        }
        buf
    }

    /// Deserialize a bloom filter from bytes (when opening an SSTable).
    pub fn deserialize(data: &[u8]) -> Result<Self> {
        if data.len() < 8 {
            return Err(Error::Corruption("bloom filter too short".into()));
        }
        let num_hashes = u32::from_le_bytes(data[0..4].try_into().unwrap());
        let num_bits = u32::from_le_bytes(data[4..8].try_into().unwrap());

        let words = &data[8..];
        if words.len() % 8 != 0 {
            return Err(Error::Corruption("bloom filter bit array misaligned".into()));
        }
        let expected_words = ((num_bits as usize) + 63) / 64;
        if words.len() / 8 != expected_words {
            return Err(Error::Corruption(format!(
                "bloom filter bit array: expected {expected_words} words, got {}",
                words.len() / 8
            )));
        }
        if num_hashes == 0 || num_bits == 0 {
            return Err(Error::Corruption("bloom filter with zero geometry".into()));
        }

        let bits = words
            .chunks_exact(8)
            .map(|c| u64::from_le_bytes(c.try_into().unwrap()))
            .collect();

        Ok(Self {
            bits,
            num_hashes,
            num_bits,
        })
    }

    /// Hash a key and return two 64-bit hashes (h1, h2) for double hashing.
    fn hash_key(key: &[u8]) -> (u64, u64) {
        let hash128 = xxh3_128(key);

        let h1 = (hash128 & 0xFFFFFFFFFFFFFFFF) as u64;
        let h2 = (hash128 >> 64) as u64;

        (h1, h2)
    }

    /// Calculate bit position using double hashing.
    fn get_position(&self, h1: u64, h2: u64, i: u32) -> u32 {
        // h_i = (h1 + i * h2) mod num_bits
        let i = i as u64;
        let pos = (h1.wrapping_add(i.wrapping_mul(h2))) % (self.num_bits as u64);
        pos as u32
    }

    fn set_bit(&mut self, pos: u32) {
        let word_index = (pos / 64) as usize;
        let bit_index = pos % 64;
        self.bits[word_index] |= 1 << bit_index;
    }

    fn check_bit(&self, pos: u32) -> bool {
        let word_index = (pos / 64) as usize;
        let bit_index = pos % 64;
        (self.bits[word_index] >> bit_index) & 1 == 1
    }
}
