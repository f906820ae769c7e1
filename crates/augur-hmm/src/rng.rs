//! Seedable uniform random source used to break EM symmetry at model
//! initialization.
//!
//! Values are drawn from ChaCha8 in batches and handed out one at a time, so
//! initializing a model costs one generator call per batch rather than one per
//! cell.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Default number of values pre-generated per refill.
pub const DEFAULT_BATCH_SIZE: usize = 256;

/// Batched uniform `[0, 1)` generator.
pub struct DeterministicRng {
    rng: ChaCha8Rng,
    batch: Vec<f64>,
    /// Next unread position in `batch`.
    cursor: usize,
    seed: Option<u64>,
}

impl DeterministicRng {
    /// Reproducible generator. Equal seeds yield equal streams.
    pub fn seeded(seed: u64) -> Self {
        Self::build(ChaCha8Rng::seed_from_u64(seed), Some(seed), DEFAULT_BATCH_SIZE)
    }

    /// Generator seeded from OS entropy.
    pub fn from_entropy() -> Self {
        Self::build(ChaCha8Rng::from_entropy(), None, DEFAULT_BATCH_SIZE)
    }

    /// Seeded generator with a custom refill size (at least 1).
    pub fn with_batch_size(seed: u64, batch_size: usize) -> Self {
        Self::build(ChaCha8Rng::seed_from_u64(seed), Some(seed), batch_size.max(1))
    }

    fn build(rng: ChaCha8Rng, seed: Option<u64>, batch_size: usize) -> Self {
        let batch = vec![0.0; batch_size];
        Self {
            rng,
            cursor: batch.len(),
            batch,
            seed,
        }
    }

    /// Seed this generator was built from, `None` for entropy-seeded ones.
    pub fn seed(&self) -> Option<u64> {
        self.seed
    }

    /// Next uniform value in `[0, 1)`.
    pub fn next_f64(&mut self) -> f64 {
        if self.cursor == self.batch.len() {
            self.refill();
        }
        let value = self.batch[self.cursor];
        self.cursor += 1;
        value
    }

    /// Fill `out` with uniform values in `[0, 1)`.
    pub fn fill(&mut self, out: &mut [f64]) {
        for v in out.iter_mut() {
            *v = self.next_f64();
        }
    }

    fn refill(&mut self) {
        for v in self.batch.iter_mut() {
            *v = self.rng.gen::<f64>();
        }
        self.cursor = 0;
    }
}

/// Fresh base seed from OS entropy, for runs that were not given one.
pub fn entropy_seed() -> u64 {
    ChaCha8Rng::from_entropy().gen()
}

/// Independent seed for ensemble `member` of walk-forward `chunk`.
///
/// SplitMix64 finalizer over the combined inputs, so neighbouring members get
/// uncorrelated ChaCha streams.
pub fn derive_seed(base: u64, chunk: u64, member: u64) -> u64 {
    let mut z = base
        .wrapping_add(chunk.wrapping_mul(0x9E37_79B9_7F4A_7C15))
        .wrapping_add(member.wrapping_mul(0xD1B5_4A32_D192_ED03));
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}
