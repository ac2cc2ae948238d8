use std::time::Duration;

use crate::generation::types::BackoffConfig;

/// Exponential backoff with a cap and seeded uniform jitter. Pure: the same
/// (seed, attempt) pair always yields the same delay.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    base_ms: u64,
    multiplier: f64,
    max_ms: u64,
    jitter_fraction: f64,
    jitter_seed: u64,
}

impl BackoffPolicy {
    pub fn new(config: &BackoffConfig) -> Self {
        Self {
            base_ms: config.base_ms.max(1),
            multiplier: config.multiplier.max(1.0),
            max_ms: config.max_ms.max(1),
            jitter_fraction: config.jitter_fraction.clamp(0.0, 1.0),
            jitter_seed: config.jitter_seed,
        }
    }

    /// Default policy for ordinary calls.
    pub fn standard() -> Self {
        Self::new(&BackoffConfig::default())
    }

    /// Preset for expensive long-running calls: longer base, gentler cap.
    pub fn conservative() -> Self {
        Self::new(&BackoffConfig {
            base_ms: 2_000,
            multiplier: 3.0,
            max_ms: 30_000,
            jitter_fraction: 0.1,
            jitter_seed: 0,
        })
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        let exponential = self.base_ms as f64 * self.multiplier.powi(attempt as i32);
        let capped = exponential.min(self.max_ms as f64);
        let jitter_span = self.base_ms as f64 * self.jitter_fraction;
        let jitter = unit_interval(self.jitter_seed, attempt) * jitter_span;
        Duration::from_millis((capped + jitter) as u64)
    }
}

// splitmix64 output mapped into [0, 1).
fn unit_interval(seed: u64, attempt: u32) -> f64 {
    let mut x = seed ^ ((attempt as u64).wrapping_add(1).wrapping_mul(0x9e3779b97f4a7c15));
    x = (x ^ (x >> 30)).wrapping_mul(0xbf58476d1ce4e5b9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94d049bb133111eb);
    x ^= x >> 31;
    (x >> 11) as f64 / (1u64 << 53) as f64
}
