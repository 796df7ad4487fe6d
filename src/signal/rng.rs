//! Reproducible pseudo-random source for the Monte Carlo backtest.
//!
//! `SeededRng` is a counter-based mixer: each draw advances a 32-bit counter by
//! a fixed odd increment and scrambles it with xorshift-multiply rounds. The
//! state is a plain value owned by the caller, so two generators built from the
//! same seed always yield the same sequence.

use rand::RngCore;

const COUNTER_STEP: u32 = 0x6D2B_79F5;
const FNV_OFFSET: u32 = 0x811C_9DC5;
const FNV_PRIME: u32 = 0x0100_0193;

/// Upper bound on how many values `derive_seed` folds in.
pub const MAX_SEED_VALUES: usize = 512;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeededRng {
    counter: u32,
}

impl SeededRng {
    pub fn new(seed: u32) -> Self {
        SeededRng { counter: seed }
    }

    /// Uniform deviate in `[0, 1)`.
    pub fn next_f64(&mut self) -> f64 {
        self.next_u32() as f64 / 4_294_967_296.0
    }

    /// Uniform index in `0..len`. `len` must be non-zero.
    pub fn next_index(&mut self, len: usize) -> usize {
        debug_assert!(len > 0, "next_index on empty range");
        ((self.next_f64() * len as f64) as usize).min(len.saturating_sub(1))
    }
}

impl RngCore for SeededRng {
    fn next_u32(&mut self) -> u32 {
        self.counter = self.counter.wrapping_add(COUNTER_STEP);
        let mut t = self.counter;
        t = (t ^ (t >> 15)).wrapping_mul(t | 1);
        t ^= t.wrapping_add((t ^ (t >> 7)).wrapping_mul(t | 61));
        t ^ (t >> 14)
    }

    fn next_u64(&mut self) -> u64 {
        let hi = self.next_u32() as u64;
        let lo = self.next_u32() as u64;
        (hi << 32) | lo
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        for chunk in dest.chunks_mut(4) {
            let bytes = self.next_u32().to_le_bytes();
            chunk.copy_from_slice(&bytes[..chunk.len()]);
        }
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        self.fill_bytes(dest);
        Ok(())
    }
}

/// Fold the salt and a bounded prefix of `values` into a 32-bit seed.
///
/// Values are quantised to 1e-6 so the seed only depends on the data that
/// would actually change a simulation.
pub fn derive_seed(values: &[f64], salt: &str) -> u32 {
    let mut hash = FNV_OFFSET;
    let mut fold = |byte: u8| {
        hash ^= byte as u32;
        hash = hash.wrapping_mul(FNV_PRIME);
    };
    for b in salt.as_bytes() {
        fold(*b);
    }
    for v in values.iter().take(MAX_SEED_VALUES) {
        let q = if v.is_finite() {
            (v * 1e6).round() as i64
        } else {
            0
        };
        for b in q.to_le_bytes() {
            fold(b);
        }
    }
    (values.len().min(u32::MAX as usize) as u32) ^ hash
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn same_seed_same_sequence() {
        let mut a = SeededRng::new(42);
        let mut b = SeededRng::new(42);
        for _ in 0..1000 {
            assert_eq!(a.next_f64().to_bits(), b.next_f64().to_bits());
        }
    }

    #[test]
    fn different_seeds_diverge() {
        let mut a = SeededRng::new(1);
        let mut b = SeededRng::new(2);
        let same = (0..64).filter(|_| a.next_u32() == b.next_u32()).count();
        assert!(same < 4);
    }

    #[test]
    fn deviates_are_unit_interval_and_roughly_uniform() {
        let mut rng = SeededRng::new(7);
        let n = 20_000;
        let mut sum = 0.0;
        for _ in 0..n {
            let u = rng.next_f64();
            assert!((0.0..1.0).contains(&u));
            sum += u;
        }
        let mean = sum / n as f64;
        assert!((mean - 0.5).abs() < 0.02, "mean was {}", mean);
    }

    #[test]
    fn index_draws_cover_range() {
        let mut rng = SeededRng::new(99);
        let mut seen = [false; 5];
        for _ in 0..500 {
            seen[rng.next_index(5)] = true;
        }
        assert!(seen.iter().all(|s| *s));
        let via_rand: usize = rng.gen_range(0..5);
        assert!(via_rand < 5);
    }

    #[test]
    fn derive_seed_depends_on_data_and_salt() {
        let rows = [1.0, 2.5, -1.0];
        assert_eq!(derive_seed(&rows, "x"), derive_seed(&rows, "x"));
        assert_ne!(derive_seed(&rows, "x"), derive_seed(&rows, "y"));
        assert_ne!(derive_seed(&rows, "x"), derive_seed(&[1.0, 2.5, -2.0], "x"));
    }
}
