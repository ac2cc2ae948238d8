use std::future::Future;

use crate::generation::{
    error::GenError,
    monitor::ReliabilityMonitor,
    telemetry::{GenTelemetryEvent, emit_generation_event},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvokeSource {
    Enhanced,
    Baseline,
}

#[derive(Debug)]
pub struct GatewayResult<T> {
    pub value: T,
    pub source: InvokeSource,
}

/// Thin façade in front of capability enhancements. Consults the monitor
/// before running the enhancement, reports the outcome back, and is the
/// only layer that converts an enhancement failure into a baseline
/// fallback. The baseline path always runs when asked; a disabled
/// capability is skipped, never blocked.
#[derive(Clone)]
pub struct CapabilityGateway {
    monitor: ReliabilityMonitor,
}

impl CapabilityGateway {
    pub fn new(monitor: ReliabilityMonitor) -> Self {
        Self { monitor }
    }

    pub fn monitor(&self) -> &ReliabilityMonitor {
        &self.monitor
    }

    pub async fn invoke<T, EnhanceFut, BaselineFut>(
        &self,
        capability: &str,
        enhancement: impl FnOnce() -> EnhanceFut,
        baseline: impl FnOnce() -> BaselineFut,
    ) -> Result<GatewayResult<T>, GenError>
    where
        EnhanceFut: Future<Output = Result<T, GenError>>,
        BaselineFut: Future<Output = Result<T, GenError>>,
    {
        if !self.monitor.is_enabled(capability).await {
            tracing::debug!(
                target: "generation",
                capability = capability,
                "capability_disabled_using_baseline"
            );
            let value = baseline().await?;
            return Ok(GatewayResult {
                value,
                source: InvokeSource::Baseline,
            });
        }

        match enhancement().await {
            Ok(value) => {
                self.monitor.record_success(capability).await;
                Ok(GatewayResult {
                    value,
                    source: InvokeSource::Enhanced,
                })
            }
            Err(err) => {
                self.monitor.record_failure(capability).await;
                tracing::warn!(
                    target: "generation",
                    capability = capability,
                    kind = ?err.kind,
                    error = %err,
                    "enhancement_failed_falling_back"
                );
                emit_generation_event(GenTelemetryEvent::FallbackEngaged {
                    capability: capability.to_string(),
                });
                let value = baseline().await?;
                Ok(GatewayResult {
                    value,
                    source: InvokeSource::Baseline,
                })
            }
        }
    }
}
