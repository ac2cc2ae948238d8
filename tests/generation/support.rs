#![allow(dead_code)]

use std::{
    collections::VecDeque,
    sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use breakwater::generation::{
    client::{CallContext, RawGenerationCall},
    error::{GenError, GenErrorKind, internal_error},
    types::{
        BackoffConfig, GenerationConfig, GenerationRequest, RawTextStream, RetryConfig,
        TargetId, TaskTimeoutConfig, TimeoutConfig,
    },
};
use tokio::sync::Mutex;

pub enum ScriptStep {
    Reply(String),
    Fail(GenErrorKind),
    Hang(Duration),
    StreamChunks {
        chunks: Vec<&'static str>,
        then_fail: Option<GenErrorKind>,
    },
}

/// Raw call double that replays a scripted sequence of outcomes and records
/// what the client asked of it.
pub struct ScriptedCall {
    script: Mutex<VecDeque<ScriptStep>>,
    calls: AtomicU32,
    targets_seen: Mutex<Vec<TargetId>>,
    temperatures_seen: Mutex<Vec<f32>>,
}

impl ScriptedCall {
    pub fn new(steps: Vec<ScriptStep>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(steps.into()),
            calls: AtomicU32::new(0),
            targets_seen: Mutex::new(Vec::new()),
            temperatures_seen: Mutex::new(Vec::new()),
        })
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub async fn targets(&self) -> Vec<TargetId> {
        self.targets_seen.lock().await.clone()
    }

    pub async fn temperatures(&self) -> Vec<f32> {
        self.temperatures_seen.lock().await.clone()
    }

    async fn record(&self, ctx: &CallContext, request: &GenerationRequest) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.targets_seen.lock().await.push(ctx.target_id.clone());
        self.temperatures_seen
            .lock()
            .await
            .push(request.sampling.temperature);
    }

    async fn next_step(&self) -> Option<ScriptStep> {
        self.script.lock().await.pop_front()
    }
}

#[async_trait]
impl RawGenerationCall for ScriptedCall {
    async fn invoke(
        &self,
        ctx: &CallContext,
        request: &GenerationRequest,
    ) -> Result<String, GenError> {
        self.record(ctx, request).await;
        match self.next_step().await {
            Some(ScriptStep::Reply(text)) => Ok(text),
            Some(ScriptStep::Fail(kind)) => Err(GenError::new(kind, "scripted failure")),
            Some(ScriptStep::Hang(duration)) => {
                tokio::time::sleep(duration).await;
                Ok("late reply".to_string())
            }
            Some(ScriptStep::StreamChunks { .. }) => {
                Err(internal_error("stream step reached through invoke"))
            }
            None => Err(internal_error("script exhausted")),
        }
    }

    async fn invoke_stream(
        &self,
        ctx: &CallContext,
        request: &GenerationRequest,
    ) -> Result<RawTextStream, GenError> {
        self.record(ctx, request).await;
        match self.next_step().await {
            Some(ScriptStep::Reply(text)) => Ok(Box::pin(tokio_stream::once(Ok(text)))),
            Some(ScriptStep::Fail(kind)) => Err(GenError::new(kind, "scripted failure")),
            Some(ScriptStep::Hang(duration)) => {
                tokio::time::sleep(duration).await;
                Ok(Box::pin(tokio_stream::once(Ok("late reply".to_string()))))
            }
            Some(ScriptStep::StreamChunks { chunks, then_fail }) => {
                let mut items: Vec<Result<String, GenError>> = chunks
                    .into_iter()
                    .map(|chunk| Ok(chunk.to_string()))
                    .collect();
                if let Some(kind) = then_fail {
                    items.push(Err(GenError::new(kind, "scripted mid-stream failure")));
                }
                Ok(Box::pin(tokio_stream::iter(items)))
            }
            None => Err(internal_error("script exhausted")),
        }
    }
}

/// Config with near-zero backoff so retry tests finish promptly.
pub fn fast_config(retry_budget: u32) -> GenerationConfig {
    GenerationConfig {
        retry: RetryConfig {
            retry_budget,
            backoff: BackoffConfig {
                base_ms: 1,
                multiplier: 1.0,
                max_ms: 1,
                jitter_fraction: 0.0,
                jitter_seed: 0,
            },
        },
        ..GenerationConfig::default()
    }
}

/// Fast config whose per-attempt timeout is tiny, for timeout-path tests.
pub fn tight_timeout_config(retry_budget: u32, timeout_ms: u64) -> GenerationConfig {
    let class = TaskTimeoutConfig {
        base_ms: timeout_ms,
        size_threshold_chars: usize::MAX,
        per_extra_char_us: 0,
        hard_cap_ms: timeout_ms,
    };
    GenerationConfig {
        timeouts: TimeoutConfig {
            short_text: class.clone(),
            structured_extraction: class.clone(),
            large_structured_extraction: class,
        },
        ..fast_config(retry_budget)
    }
}
