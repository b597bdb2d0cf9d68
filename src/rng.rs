// rng.rs
//
// Injectable randomness for the simulated values (route length, waypoint
// count, intersection complexity, infrastructure quality, forecast noise).
// Production and tests both use a seeded generator so runs are reproducible.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Default seed used when no explicit seed is configured.
pub const DEFAULT_SEED: u64 = 42;

/// A source of uniform random numbers.
pub trait RandomSource: Send {
    /// Uniform value in `[0, 1)`.
    fn next_f64(&mut self) -> f64;

    /// Uniform value in `[low, high)`. Returns `low` when the range is empty.
    fn range_f64(&mut self, low: f64, high: f64) -> f64 {
        if high <= low {
            return low;
        }
        low + self.next_f64() * (high - low)
    }

    /// Uniform integer in `[low, high]` (inclusive).
    fn range_u32(&mut self, low: u32, high: u32) -> u32 {
        if high <= low {
            return low;
        }
        let span = f64::from(high - low + 1);
        let offset = (self.next_f64() * span).floor() as u32;
        low + offset.min(high - low)
    }
}

/// `StdRng` seeded from a `u64`.
#[derive(Debug, Clone)]
pub struct SeededRandom {
    rng: StdRng,
}

impl SeededRandom {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Default for SeededRandom {
    fn default() -> Self {
        Self::new(DEFAULT_SEED)
    }
}

impl RandomSource for SeededRandom {
    fn next_f64(&mut self) -> f64 {
        self.rng.random::<f64>()
    }

    fn range_f64(&mut self, low: f64, high: f64) -> f64 {
        if high <= low {
            return low;
        }
        self.rng.random_range(low..high)
    }
}

/// Always returns the same value. Handy for pinning simulated values in tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedRandom(pub f64);

impl RandomSource for FixedRandom {
    fn next_f64(&mut self) -> f64 {
        self.0.clamp(0.0, 0.999_999)
    }
}
