use std::{collections::HashMap, sync::Arc};

use serde::Serialize;
use tokio::sync::Mutex;

use crate::generation::{
    telemetry::{GenTelemetryEvent, emit_generation_event},
    types::{CapabilityName, MonitorConfig},
};

#[derive(Debug, Clone, Serialize)]
pub struct CapabilityHealthRecord {
    pub success_count: u64,
    pub failure_count: u64,
    pub enabled: bool,
}

impl Default for CapabilityHealthRecord {
    fn default() -> Self {
        Self {
            success_count: 0,
            failure_count: 0,
            enabled: true,
        }
    }
}

impl CapabilityHealthRecord {
    fn total(&self) -> u64 {
        self.success_count + self.failure_count
    }

    fn failure_ratio(&self) -> f64 {
        if self.total() == 0 {
            return 0.0;
        }
        self.failure_count as f64 / self.total() as f64
    }
}

/// Per-capability health counters. Record operations are the only mutators;
/// a capability whose failure ratio crosses the threshold (once the sample
/// is large enough) is disabled for the rest of the process. There is no
/// automatic re-enable; `reset` is the explicit operator hook, and also
/// gives tests isolated lifecycles instead of a process-wide singleton.
#[derive(Clone)]
pub struct ReliabilityMonitor {
    config: MonitorConfig,
    records: Arc<Mutex<HashMap<CapabilityName, CapabilityHealthRecord>>>,
}

impl ReliabilityMonitor {
    pub fn new(config: MonitorConfig) -> Self {
        Self {
            config,
            records: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub async fn is_enabled(&self, capability: &str) -> bool {
        let guard = self.records.lock().await;
        guard
            .get(capability)
            .map(|record| record.enabled)
            .unwrap_or(true)
    }

    pub async fn record_success(&self, capability: &str) {
        let mut guard = self.records.lock().await;
        let record = guard.entry(capability.to_string()).or_default();
        record.success_count = record.success_count.saturating_add(1);
    }

    pub async fn record_failure(&self, capability: &str) {
        let mut guard = self.records.lock().await;
        let record = guard.entry(capability.to_string()).or_default();
        record.failure_count = record.failure_count.saturating_add(1);

        if record.enabled
            && record.total() >= self.config.min_sample_size
            && record.failure_ratio() > self.config.failure_ratio_threshold
        {
            record.enabled = false;
            tracing::warn!(
                target: "generation",
                capability = capability,
                success_count = record.success_count,
                failure_count = record.failure_count,
                "capability_disabled"
            );
            emit_generation_event(GenTelemetryEvent::CapabilityDisabled {
                capability: capability.to_string(),
                success_count: record.success_count,
                failure_count: record.failure_count,
            });
        }
    }

    pub async fn snapshot(&self, capability: &str) -> Option<CapabilityHealthRecord> {
        let guard = self.records.lock().await;
        guard.get(capability).cloned()
    }

    pub async fn snapshot_all(&self) -> HashMap<CapabilityName, CapabilityHealthRecord> {
        let guard = self.records.lock().await;
        guard.clone()
    }

    /// Operator action: clears counters and re-enables the capability.
    pub async fn reset(&self, capability: &str) {
        let mut guard = self.records.lock().await;
        guard.remove(capability);
    }

    pub async fn reset_all(&self) {
        let mut guard = self.records.lock().await;
        guard.clear();
    }
}
