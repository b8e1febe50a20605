//! Bloom filter with a persisted, fixed-seed hash family.
//!
//! Each data block of a sorted run carries one serialized filter. A filter
//! answers `contains` with **no false negatives**: `false` means the key is
//! definitely absent, `true` means it may be present. Because the filter is
//! written to disk and reloaded by readers long after the writer is gone,
//! the hash family must be reconstructible from the serialized bytes alone
//! — the per-function 32-bit seeds are therefore part of the on-disk form.
//!
//! # On-disk layout
//!
//! All integers big-endian:
//!
//! ```text
//! [m (8)][k (8)][n (8)][seeds (k × 4)][bits (⌈m/64⌉ × 8)]
//! ```
//!
//! - `m` — number of bits
//! - `k` — number of hash functions
//! - `n` — number of keys added so far
//!
//! [`BloomFilter::load`] rejects any truncation.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests;

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use thiserror::Error;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by filter deserialization.
#[derive(Debug, Error)]
pub enum FilterError {
    /// Serialized data is shorter than its header and declared sizes imply.
    #[error("bloom filter data truncated: {0}")]
    Truncated(&'static str),
}

// ------------------------------------------------------------------------------------------------
// Seeds and hashing
// ------------------------------------------------------------------------------------------------

/// Base seed table. Filters with `k <= 8` use a prefix of this table;
/// larger `k` derives further seeds from it (see [`seed_at`]).
const DEFAULT_SEEDS: [u32; 8] = [
    0x47b6_137b,
    0x4497_4d91,
    0x8824_ad5b,
    0xa2b7_289d,
    0x7054_95c7,
    0x2df1_424b,
    0x9efc_4947,
    0x5c6b_fb31,
];

fn seed_at(i: usize) -> u32 {
    let base = DEFAULT_SEEDS[i % DEFAULT_SEEDS.len()];
    base.wrapping_add((i / DEFAULT_SEEDS.len()) as u32 * 7)
}

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Seeded 64-bit FNV-1a fold: the seed bytes are hashed ahead of the key
/// bytes, so distinct seeds yield independent functions while the result
/// stays stable across save/load.
fn seeded_hash(seed: u32, key: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET_BASIS;
    for byte in seed.to_be_bytes().iter().chain(key.iter()) {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

// ------------------------------------------------------------------------------------------------
// BloomFilter
// ------------------------------------------------------------------------------------------------

/// A bit-array bloom filter with `k` seeded hash functions.
#[derive(Clone, Debug)]
pub struct BloomFilter {
    /// Number of bits in the array.
    m: u64,
    /// Number of hash functions.
    k: u64,
    /// Number of keys added.
    n: u64,
    /// Per-function seeds; persisted with the bit array.
    seeds: Vec<u32>,
    /// Bit array packed into 64-bit words.
    bits: Vec<u64>,
}

const DEFAULT_BITS: u64 = 1024;
const DEFAULT_HASHES: u64 = 3;

impl BloomFilter {
    /// Creates a filter with `m` bits and `k` hash functions. A zero for
    /// either parameter selects the default (1024 bits, 3 functions).
    pub fn new(m: u64, k: u64) -> Self {
        let m = if m == 0 { DEFAULT_BITS } else { m };
        let k = if k == 0 { DEFAULT_HASHES } else { k };
        let seeds = (0..k as usize).map(seed_at).collect();
        Self {
            m,
            k,
            n: 0,
            seeds,
            bits: vec![0u64; m.div_ceil(64) as usize],
        }
    }

    /// Sizes a filter for `expected_elements` keys at the target
    /// `false_positive_rate`, using `m = ⌈-n·ln(p)/(ln 2)²⌉` and
    /// `k = max(1, ⌈(m/n)·ln 2⌉)`.
    pub fn with_rate(expected_elements: u64, false_positive_rate: f64) -> Self {
        let n = expected_elements as f64;
        let m = (-n * false_positive_rate.ln() / std::f64::consts::LN_2.powi(2)).ceil() as u64;
        let k = ((m as f64 / n) * std::f64::consts::LN_2).ceil() as u64;
        Self::new(m, k.max(1))
    }

    fn bit_positions<'a>(&'a self, key: &'a [u8]) -> impl Iterator<Item = u64> + 'a {
        self.seeds.iter().map(move |seed| seeded_hash(*seed, key) % self.m)
    }

    /// Adds a key.
    pub fn add(&mut self, key: &[u8]) {
        let m = self.m;
        for i in 0..self.seeds.len() {
            let pos = seeded_hash(self.seeds[i], key) % m;
            self.bits[(pos / 64) as usize] |= 1 << (pos % 64);
        }
        self.n += 1;
    }

    /// Returns `false` when the key is definitely absent, `true` when it
    /// may be present.
    pub fn contains(&self, key: &[u8]) -> bool {
        self.bit_positions(key)
            .all(|pos| self.bits[(pos / 64) as usize] & (1 << (pos % 64)) != 0)
    }

    /// Clears the bit array and the element count. Parameters and seeds
    /// are retained, so the filter hashes identically after a reset.
    pub fn reset(&mut self) {
        self.bits.fill(0);
        self.n = 0;
    }

    /// Estimated false-positive probability at the current fill:
    /// `(1 - e^(-k·n/m))^k`.
    pub fn false_positive_rate(&self) -> f64 {
        if self.n == 0 || self.m == 0 {
            return 0.0;
        }
        let exponent = -(self.k as f64) * self.n as f64 / self.m as f64;
        (1.0 - exponent.exp()).powf(self.k as f64)
    }

    /// Number of keys added since creation or the last reset.
    pub fn len(&self) -> u64 {
        self.n
    }

    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    /// Serializes the filter (layout in the module docs).
    pub fn save(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(24 + self.seeds.len() * 4 + self.bits.len() * 8);
        buf.extend_from_slice(&self.m.to_be_bytes());
        buf.extend_from_slice(&self.k.to_be_bytes());
        buf.extend_from_slice(&self.n.to_be_bytes());
        for seed in &self.seeds {
            buf.extend_from_slice(&seed.to_be_bytes());
        }
        for word in &self.bits {
            buf.extend_from_slice(&word.to_be_bytes());
        }
        buf
    }

    /// Reconstructs a filter from [`save`](Self::save) output. The loaded
    /// filter hashes with the persisted seeds and therefore agrees with
    /// the original on every key.
    pub fn load(data: &[u8]) -> Result<Self, FilterError> {
        if data.len() < 24 {
            return Err(FilterError::Truncated("header"));
        }
        let m = u64::from_be_bytes(data[0..8].try_into().unwrap());
        let k = u64::from_be_bytes(data[8..16].try_into().unwrap());
        let n = u64::from_be_bytes(data[16..24].try_into().unwrap());

        let words = m.div_ceil(64) as usize;
        let expected = 24 + k as usize * 4 + words * 8;
        if data.len() < expected {
            return Err(FilterError::Truncated("seed or bit array"));
        }

        let mut seeds = Vec::with_capacity(k as usize);
        let mut at = 24;
        for _ in 0..k {
            seeds.push(u32::from_be_bytes(data[at..at + 4].try_into().unwrap()));
            at += 4;
        }
        let mut bits = Vec::with_capacity(words);
        for _ in 0..words {
            bits.push(u64::from_be_bytes(data[at..at + 8].try_into().unwrap()));
            at += 8;
        }

        Ok(Self { m, k, n, seeds, bits })
    }
}
