//! Bloom filter with key-split enhanced double-hashing.
//!
//! Values are hashed with BLAKE3 into a 128-bit key; the key is split
//! into two 64-bit halves (h1, h2) and enhanced double-hashing derives
//! the probe positions. h2 is forced odd so it stays coprime with any
//! power-of-two modulus.
//!
//! Binary format:
//! ```text
//! [num_bits: u64 LE]           // 8 bytes
//! [num_hashes: u32 LE]         // 4 bytes
//! [padding: u32 LE = 0]        // 4 bytes
//! [bits: u64 LE x word_count]  // word_count = ceil(num_bits / 64)
//! ```

use crate::error::{Error, Result};

/// Header size: num_bits(8) + num_hashes(4) + padding(4) = 16 bytes.
const BLOOM_HEADER_SIZE: usize = 16;

/// Bloom filter backed by a word vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BloomFilter {
    bits: Vec<u64>,
    num_bits: usize,
    num_hashes: usize,
}

/// Compute probe positions from a 128-bit key.
fn probe_positions(key: u128, num_hashes: usize, num_bits: usize) -> impl Iterator<Item = usize> {
    let bytes = key.to_le_bytes();
    let h1 = u64::from_le_bytes(bytes[0..8].try_into().unwrap());
    let h2 = u64::from_le_bytes(bytes[8..16].try_into().unwrap()) | 1;
    (0..num_hashes as u64)
        .map(move |i| (h1.wrapping_add(i.wrapping_mul(h2)) % (num_bits as u64)) as usize)
}

/// Size a filter for `num_keys` insertions at false-positive rate `fpr`.
/// Returns (num_bits rounded up to a word, num_hashes).
fn parameters(num_keys: usize, fpr: f64) -> (usize, usize) {
    let n = num_keys.max(1) as f64;
    let p = fpr.clamp(1e-10, 0.5);
    let ln2 = std::f64::consts::LN_2;
    let m = (-n * p.ln() / (ln2 * ln2)).ceil().max(64.0) as usize;
    let num_bits = (m + 63) & !63;
    let k = ((num_bits as f64 / n) * ln2).round().max(1.0) as usize;
    (num_bits, k)
}

impl BloomFilter {
    /// Create a filter sized for `num_keys` expected insertions at the
    /// given false-positive rate. An empty filter is valid and always
    /// answers false.
    pub fn new(num_keys: usize, fpr: f64) -> Self {
        let (num_bits, num_hashes) = parameters(num_keys, fpr);
        Self {
            bits: vec![0u64; num_bits / 64],
            num_bits,
            num_hashes,
        }
    }

    /// Hash arbitrary bytes into a probe key.
    pub fn key_of(bytes: &[u8]) -> u128 {
        let hash = blake3::hash(bytes);
        u128::from_le_bytes(hash.as_bytes()[0..16].try_into().unwrap())
    }

    pub fn insert(&mut self, key: u128) {
        for pos in probe_positions(key, self.num_hashes, self.num_bits) {
            self.bits[pos / 64] |= 1u64 << (pos % 64);
        }
    }

    /// `false` means definitely absent; `true` means probably present.
    pub fn maybe_contains(&self, key: u128) -> bool {
        probe_positions(key, self.num_hashes, self.num_bits)
            .all(|pos| self.bits[pos / 64] & (1u64 << (pos % 64)) != 0)
    }

    pub fn num_bits(&self) -> usize {
        self.num_bits
    }

    pub fn num_hashes(&self) -> usize {
        self.num_hashes
    }

    pub fn mem_usage(&self) -> usize {
        std::mem::size_of::<Self>() + self.bits.len() * 8
    }

    pub fn encode(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&(self.num_bits as u64).to_le_bytes());
        buf.extend_from_slice(&(self.num_hashes as u32).to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes());
        for &word in &self.bits {
            buf.extend_from_slice(&word.to_le_bytes());
        }
    }

    pub fn decode(bytes: &[u8], pos: &mut usize) -> Result<Self> {
        if *pos + BLOOM_HEADER_SIZE > bytes.len() {
            return Err(Error::Format("bloom filter too small".into()));
        }
        let num_bits = u64::from_le_bytes(bytes[*pos..*pos + 8].try_into().unwrap()) as usize;
        let num_hashes =
            u32::from_le_bytes(bytes[*pos + 8..*pos + 12].try_into().unwrap()) as usize;
        *pos += BLOOM_HEADER_SIZE;
        if num_bits == 0 || num_bits % 64 != 0 {
            return Err(Error::Format(format!("bad bloom bit count: {}", num_bits)));
        }
        let word_count = num_bits / 64;
        if *pos + word_count * 8 > bytes.len() {
            return Err(Error::Format("bloom filter data truncated".into()));
        }
        let mut bits = Vec::with_capacity(word_count);
        for i in 0..word_count {
            let at = *pos + i * 8;
            bits.push(u64::from_le_bytes(bytes[at..at + 8].try_into().unwrap()));
        }
        *pos += word_count * 8;
        Ok(Self { bits, num_bits, num_hashes })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_filter() {
        let bf = BloomFilter::new(0, 0.01);
        for i in 0..100u128 {
            assert!(!bf.maybe_contains(i));
        }
    }

    #[test]
    fn test_no_false_negatives() {
        let n = 1000;
        let mut bf = BloomFilter::new(n, 0.01);
        let keys: Vec<u128> = (0..n as u128)
            .map(|i| BloomFilter::key_of(&i.to_le_bytes()))
            .collect();
        for &k in &keys {
            bf.insert(k);
        }
        for &k in &keys {
            assert!(bf.maybe_contains(k), "false negative for {}", k);
        }
    }

    #[test]
    fn test_fpr_near_target() {
        let n = 10_000;
        let mut bf = BloomFilter::new(n, 0.01);
        for i in 0..n as u128 {
            bf.insert(BloomFilter::key_of(&i.to_le_bytes()));
        }
        let probes = 50_000u128;
        let mut false_positives = 0u64;
        for i in 0..probes {
            let key = BloomFilter::key_of(&(i + 1_000_000).to_le_bytes());
            if bf.maybe_contains(key) {
                false_positives += 1;
            }
        }
        let fpr = false_positives as f64 / probes as f64;
        assert!(fpr < 0.03, "FPR too high: {:.4}", fpr);
    }

    #[test]
    fn test_roundtrip() {
        let mut bf = BloomFilter::new(100, 0.01);
        for i in 0..100u128 {
            bf.insert(BloomFilter::key_of(&i.to_le_bytes()));
        }
        let mut buf = Vec::new();
        bf.encode(&mut buf);
        let mut pos = 0;
        let back = BloomFilter::decode(&buf, &mut pos).unwrap();
        assert_eq!(pos, buf.len());
        assert_eq!(back, bf);
    }

    #[test]
    fn test_decode_truncated() {
        let bf = BloomFilter::new(100, 0.01);
        let mut buf = Vec::new();
        bf.encode(&mut buf);
        let mut pos = 0;
        assert!(BloomFilter::decode(&buf[..buf.len() - 4], &mut pos).is_err());
    }

    #[test]
    fn test_parameters_scale_with_fpr() {
        let (loose_bits, _) = parameters(1000, 0.1);
        let (tight_bits, _) = parameters(1000, 0.001);
        assert!(tight_bits > loose_bits);
        let (bits, hashes) = parameters(1000, 0.01);
        assert_eq!(bits % 64, 0);
        assert!(hashes >= 1);
    }
}
