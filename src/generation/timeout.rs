use std::time::Duration;

use crate::generation::types::{TaskClass, TimeoutConfig};

/// Maps (payload size, task class) to a bounded per-attempt timeout.
/// Deterministic and side-effect free; the hard cap guarantees no single
/// attempt can hang past the class maximum.
#[derive(Debug, Clone)]
pub struct TimeoutEstimator {
    config: TimeoutConfig,
}

impl TimeoutEstimator {
    pub fn new(config: TimeoutConfig) -> Self {
        Self { config }
    }

    pub fn estimate(&self, payload_chars: usize, task_class: TaskClass) -> Duration {
        let class = self.config.for_class(task_class);
        let mut total_ms = class.base_ms as u128;
        if payload_chars > class.size_threshold_chars {
            let extra_chars = (payload_chars - class.size_threshold_chars) as u128;
            total_ms += extra_chars * class.per_extra_char_us as u128 / 1_000;
        }
        let clamped = total_ms.min(class.hard_cap_ms as u128).max(1);
        Duration::from_millis(clamped as u64)
    }
}

impl Default for TimeoutEstimator {
    fn default() -> Self {
        Self::new(TimeoutConfig::default())
    }
}
