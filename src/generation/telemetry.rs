use std::sync::{Arc, OnceLock};

use crate::generation::{
    error::GenErrorKind,
    types::{CapabilityName, RequestId, Target, TargetId},
};

#[derive(Debug, Clone)]
pub enum GenTelemetryEvent {
    RequestStarted {
        request_id: RequestId,
        target_id: TargetId,
    },
    AttemptStarted {
        request_id: RequestId,
        attempt: u32,
        target: Target,
    },
    AttemptFailed {
        request_id: RequestId,
        attempt: u32,
        kind: GenErrorKind,
        retryable: bool,
    },
    StreamFirstChunk {
        request_id: RequestId,
    },
    RequestCompleted {
        request_id: RequestId,
        attempts: u32,
    },
    RequestFailed {
        request_id: RequestId,
        attempts: u32,
        error_kind: GenErrorKind,
    },
    RequestCancelled {
        request_id: RequestId,
    },
    FallbackEngaged {
        capability: CapabilityName,
    },
    CapabilityDisabled {
        capability: CapabilityName,
        success_count: u64,
        failure_count: u64,
    },
}

pub trait TelemetrySink: Send + Sync {
    fn on_event(&self, event: GenTelemetryEvent);
}

static SINK: OnceLock<Arc<dyn TelemetrySink>> = OnceLock::new();

/// Installs the process-wide sink. Returns false if one was already set.
pub fn install_telemetry_sink(sink: Arc<dyn TelemetrySink>) -> bool {
    SINK.set(sink).is_ok()
}

pub(crate) fn emit_generation_event(event: GenTelemetryEvent) {
    if let Some(sink) = SINK.get() {
        sink.on_event(event);
    } else {
        StderrTelemetrySink.on_event(event);
    }
}

pub fn generation_debug_enabled() -> bool {
    static ENABLED: OnceLock<bool> = OnceLock::new();
    *ENABLED.get_or_init(|| {
        std::env::var("BREAKWATER_DEBUG_GENERATION")
            .ok()
            .is_some_and(|raw| env_flag_enabled(&raw))
    })
}

fn env_flag_enabled(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on" | "debug"
    )
}

#[derive(Default)]
pub struct NoopTelemetrySink;

impl TelemetrySink for NoopTelemetrySink {
    fn on_event(&self, _event: GenTelemetryEvent) {}
}

#[derive(Default)]
pub struct StderrTelemetrySink;

impl TelemetrySink for StderrTelemetrySink {
    fn on_event(&self, event: GenTelemetryEvent) {
        if !generation_debug_enabled() {
            return;
        }

        match event {
            GenTelemetryEvent::RequestStarted {
                request_id,
                target_id,
            } => {
                eprintln!(
                    "[generation] request_started request_id={} target_id={}",
                    request_id, target_id,
                );
            }
            GenTelemetryEvent::AttemptStarted {
                request_id,
                attempt,
                target,
            } => {
                eprintln!(
                    "[generation] attempt_started request_id={} attempt={} target={:?}",
                    request_id, attempt, target,
                );
            }
            GenTelemetryEvent::AttemptFailed {
                request_id,
                attempt,
                kind,
                retryable,
            } => {
                eprintln!(
                    "[generation] attempt_failed request_id={} attempt={} kind={:?} retryable={}",
                    request_id, attempt, kind, retryable,
                );
            }
            GenTelemetryEvent::StreamFirstChunk { request_id } => {
                eprintln!(
                    "[generation] stream_first_chunk request_id={}",
                    request_id
                );
            }
            GenTelemetryEvent::RequestCompleted {
                request_id,
                attempts,
            } => {
                eprintln!(
                    "[generation] request_completed request_id={} attempts={}",
                    request_id, attempts,
                );
            }
            GenTelemetryEvent::RequestFailed {
                request_id,
                attempts,
                error_kind,
            } => {
                eprintln!(
                    "[generation] request_failed request_id={} attempts={} error_kind={:?}",
                    request_id, attempts, error_kind,
                );
            }
            GenTelemetryEvent::RequestCancelled { request_id } => {
                eprintln!("[generation] request_cancelled request_id={}", request_id);
            }
            GenTelemetryEvent::FallbackEngaged { capability } => {
                eprintln!("[generation] fallback_engaged capability={}", capability);
            }
            GenTelemetryEvent::CapabilityDisabled {
                capability,
                success_count,
                failure_count,
            } => {
                eprintln!(
                    "[generation] capability_disabled capability={} success_count={} failure_count={}",
                    capability, success_count, failure_count,
                );
            }
        }
    }
}
