//! Seeded randomness for sampling, noise and acquisition.
//!
//! Every random draw in SVA starts from a caller supplied `u64`. Work that
//! happens repeatedly (noise for the n-th batch of rows, the optimizer of the
//! i-th loop iteration) takes a substream seed derived from a master seed and
//! a counter, so resuming from saved state replays the same numbers.

use std::hash::Hasher;

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use siphasher::sip::SipHasher13;

/// `StdRng` seeded from a `u64`.
#[derive(Debug, Clone)]
pub struct RngHandle(StdRng);

impl RngHandle {
    /// Generator seeded with `seed`.
    pub fn from_seed(seed: u64) -> Self {
        Self(StdRng::seed_from_u64(seed))
    }

    /// Generator for counter `substream` of `master_seed`.
    pub fn substream(master_seed: u64, substream: u64) -> Self {
        Self::from_seed(derive_substream_seed(master_seed, substream))
    }
}

impl RngCore for RngHandle {
    fn next_u32(&mut self) -> u32 {
        self.0.next_u32()
    }

    fn next_u64(&mut self) -> u64 {
        self.0.next_u64()
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        self.0.fill_bytes(dest)
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        self.0.try_fill_bytes(dest)
    }
}

/// Seed of counter `substream` under `master_seed`: SipHash-1-3 with zero
/// keys over both words.
pub fn derive_substream_seed(master_seed: u64, substream: u64) -> u64 {
    let mut hasher = SipHasher13::new_with_keys(0, 0);
    hasher.write_u64(master_seed);
    hasher.write_u64(substream);
    hasher.finish()
}
