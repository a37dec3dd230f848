use std::time::Duration;

use crate::rng::SeededRng;

/// Doubling retransmission timer shared by the CoAP transaction layer and the
/// DTLS retransmission queue.
///
/// The first timeout is `start_rto`, optionally stretched by a random factor
/// (CoAP's `ACK_RANDOM_FACTOR`). Every [`attempt`](Self::attempt) doubles it
/// until `retries` attempts are used up.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    start_rto: Duration,
    retries: usize,
    rto: Duration,
    left: usize,
}

impl ExponentialBackoff {
    pub fn new(start_rto: Duration, retries: usize) -> Self {
        Self {
            start_rto,
            retries,
            rto: start_rto,
            left: retries,
        }
    }

    /// Like [`new`](Self::new), with the initial timeout drawn uniformly from
    /// `start_rto .. start_rto * factor_percent / 100`.
    pub fn randomized(
        start_rto: Duration,
        retries: usize,
        factor_percent: u64,
        rng: &mut SeededRng,
    ) -> Self {
        let low = start_rto.as_millis() as u64;
        let high = low * factor_percent / 100;
        let first = if high > low {
            Duration::from_millis(rng.range(low, high))
        } else {
            start_rto
        };
        Self::new(first, retries)
    }

    pub fn reset(&mut self) {
        self.rto = self.start_rto;
        self.left = self.retries;
    }

    pub fn rto(&self) -> Duration {
        self.rto
    }

    /// Number of attempts made so far.
    pub fn attempts(&self) -> usize {
        self.retries - self.left
    }

    pub fn attempt(&mut self) {
        let Some(n) = self.left.checked_sub(1) else {
            return;
        };
        self.left = n;
        self.rto = self.rto.saturating_mul(2);
    }

    pub fn can_retry(&self) -> bool {
        self.left > 0
    }
}
