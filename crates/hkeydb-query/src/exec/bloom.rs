//! Bloom filter over row hashes.
//!
//! Filled by `Using_BloomFilter` and probed by `Select_BloomFilter`. Keys
//! are the 64-bit hashes of the compared fields of a row.
//!
//! - Double hashing: probe `i` is `h1 + i*h2`, both derived from the key by
//!   two seeded `FxHasher` passes; `h2` is forced odd.
//! - Probes are mapped into `[0, m)` by 128-bit multiply (Lemire reduction).
//! - Size is chosen from the expected number of keys and the target false
//!   positive rate: `m = -n ln p / (ln 2)^2`, `k = (m/n) ln 2` clamped to
//!   `[1, 16]`.
//! - False positives are possible; false negatives are not.

use std::hash::Hasher;

use rustc_hash::FxHasher;

/// Default false positive rate.
pub const DEFAULT_ERROR_RATE: f64 = 0.0001;

/// A fixed-size bloom filter.
#[derive(Debug, Clone)]
pub struct BloomFilter {
    words: Vec<u64>,
    m_bits: u64,
    k_hashes: u32,
    capacity: usize,
}

impl BloomFilter {
    const SEED1: u64 = 0x9E37_79B9_7F4A_7C15;
    const SEED2: u64 = 0xD1B5_4A32_D192_ED03;

    /// Creates a filter sized for `expected` keys at `error_rate`.
    #[must_use]
    pub fn new(expected: usize, error_rate: f64) -> Self {
        let n = expected.max(1);
        let p = if error_rate > 0.0 && error_rate < 1.0 { error_rate } else { DEFAULT_ERROR_RATE };
        let ln2 = std::f64::consts::LN_2;
        #[allow(clippy::cast_precision_loss)]
        let n_f = n as f64;
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let m_bits = ((-n_f * p.ln() / (ln2 * ln2)).ceil() as u64).max(64);
        #[allow(clippy::cast_precision_loss)]
        let k = ((m_bits as f64 / n_f) * ln2).round();
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let k_hashes = (k as u32).clamp(1, 16);
        let words = usize::try_from(m_bits.div_ceil(64)).unwrap_or(usize::MAX);
        Self { words: vec![0; words], m_bits, k_hashes, capacity: expected }
    }

    /// Number of keys the filter was sized for.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of bits.
    #[must_use]
    pub const fn bits(&self) -> u64 {
        self.m_bits
    }

    /// Number of probes per key.
    #[must_use]
    pub const fn hashes(&self) -> u32 {
        self.k_hashes
    }

    /// Adds a key.
    pub fn add(&mut self, key: u64) {
        let m_bits = self.m_bits;
        let k = self.k_hashes;
        for bit in Self::probes(key, m_bits, k) {
            let (word, mask) = Self::locate(bit);
            if let Some(w) = self.words.get_mut(word) {
                *w |= mask;
            }
        }
    }

    /// Whether the key may have been added. `false` is definite.
    #[must_use]
    pub fn may_contain(&self, key: u64) -> bool {
        Self::probes(key, self.m_bits, self.k_hashes).all(|bit| {
            let (word, mask) = Self::locate(bit);
            self.words.get(word).is_some_and(|w| w & mask != 0)
        })
    }

    fn seeded(seed: u64, key: u64) -> u64 {
        let mut h = FxHasher::default();
        h.write_u64(seed);
        h.write_u64(key);
        h.finish()
    }

    fn probes(key: u64, m_bits: u64, k: u32) -> impl Iterator<Item = u64> {
        let h1 = Self::seeded(Self::SEED1, key);
        let h2 = Self::seeded(Self::SEED2, key) | 1;
        (0..u64::from(k)).map(move |i| {
            let x = h1.wrapping_add(i.wrapping_mul(h2));
            #[allow(clippy::cast_possible_truncation)]
            let bit = ((u128::from(x) * u128::from(m_bits)) >> 64) as u64;
            bit
        })
    }

    const fn locate(bit: u64) -> (usize, u64) {
        #[allow(clippy::cast_possible_truncation)]
        let word = (bit >> 6) as usize;
        (word, 1u64 << (bit & 63))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_false_negatives() {
        let mut filter = BloomFilter::new(1000, 0.01);
        for key in 0..1000u64 {
            filter.add(key.wrapping_mul(0x5851_F42D_4C95_7F2D));
        }
        for key in 0..1000u64 {
            assert!(filter.may_contain(key.wrapping_mul(0x5851_F42D_4C95_7F2D)));
        }
    }

    #[test]
    fn false_positive_rate_is_bounded() {
        let mut filter = BloomFilter::new(1000, 0.01);
        for key in 0..1000u64 {
            filter.add(key);
        }
        let false_positives = (1_000_000..1_010_000u64).filter(|k| filter.may_contain(*k)).count();
        assert!(false_positives < 500, "{false_positives} false positives");
    }

    #[test]
    fn sizing() {
        let filter = BloomFilter::new(0, 0.5);
        assert!(filter.bits() >= 64);
        assert!(filter.hashes() >= 1);
        assert_eq!(filter.capacity(), 0);
        assert!(!filter.may_contain(42));
    }
}
