//! Seedable random number generator.
//!
//! Message ids, tokens, cookies secrets and retransmission jitter come from
//! here. With a seed (see [`Config::rng_seed`](crate::Config::rng_seed)) they
//! are deterministic, which the integration tests rely on. Key material never
//! comes from here, it is always drawn from `OsRng`.

use rand::distributions::{Distribution, Standard};
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};

pub struct SeededRng {
    inner: Option<StdRng>,
}

impl SeededRng {
    /// `None` falls back to the thread-local generator.
    pub fn new(seed: Option<u64>) -> Self {
        let inner = seed.map(StdRng::seed_from_u64);
        Self { inner }
    }

    pub fn random<T>(&mut self) -> T
    where
        Standard: Distribution<T>,
    {
        match self.inner.as_mut() {
            Some(rng) => rng.gen(),
            None => rand::random(),
        }
    }

    pub fn fill(&mut self, dest: &mut [u8]) {
        match self.inner.as_mut() {
            Some(rng) => rng.fill_bytes(dest),
            None => rand::thread_rng().fill_bytes(dest),
        }
    }

    /// Uniform value in `low..high`.
    pub fn range(&mut self, low: u64, high: u64) -> u64 {
        match self.inner.as_mut() {
            Some(rng) => rng.gen_range(low..high),
            None => rand::thread_rng().gen_range(low..high),
        }
    }
}

impl std::fmt::Debug for SeededRng {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeededRng")
            .field("seeded", &self.inner.is_some())
            .finish()
    }
}
