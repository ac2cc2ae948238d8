use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::{sync::mpsc, time::sleep};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::generation::{
    backoff::BackoffPolicy,
    error::{GenError, GenErrorKind, cancelled},
    telemetry::{GenTelemetryEvent, emit_generation_event},
    timeout::TimeoutEstimator,
    types::{
        AttemptOutcome, GenerationAttempt, GenerationConfig, GenerationOutcome, GenerationRequest,
        RawTextStream, RequestId, RetryConfig, StreamChunk, StreamChunkStream, Target,
        TargetConfig, TargetId,
    },
};

/// Per-attempt context handed to the injected raw call.
#[derive(Debug, Clone)]
pub struct CallContext {
    pub request_id: RequestId,
    pub target: Target,
    pub target_id: TargetId,
    pub attempt: u32,
    pub timeout: Duration,
}

/// The only coupling point to the actual generative backend. Implementations
/// must be safe to invoke concurrently.
#[async_trait]
pub trait RawGenerationCall: Send + Sync {
    async fn invoke(
        &self,
        ctx: &CallContext,
        request: &GenerationRequest,
    ) -> Result<String, GenError>;

    async fn invoke_stream(
        &self,
        ctx: &CallContext,
        request: &GenerationRequest,
    ) -> Result<RawTextStream, GenError> {
        let text = self.invoke(ctx, request).await?;
        Ok(Box::pin(tokio_stream::once(Ok(text))))
    }
}

#[derive(Clone)]
pub struct ResilientClient {
    retry: RetryConfig,
    backoff: BackoffPolicy,
    timeouts: TimeoutEstimator,
    targets: TargetConfig,
}

impl ResilientClient {
    pub fn new(config: &GenerationConfig) -> Self {
        Self {
            retry: config.retry.clone(),
            backoff: BackoffPolicy::new(&config.retry.backoff),
            timeouts: TimeoutEstimator::new(config.timeouts.clone()),
            targets: config.targets.clone(),
        }
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn timeouts(&self) -> &TimeoutEstimator {
        &self.timeouts
    }

    /// Executes the raw call under the estimated timeout, retrying timeouts
    /// and transport failures with backoff. An overload signal pins every
    /// later attempt in this request to the fallback target.
    pub async fn generate(
        &self,
        request: &GenerationRequest,
        raw: Arc<dyn RawGenerationCall>,
        cancel: &CancellationToken,
    ) -> Result<GenerationOutcome, GenError> {
        let timeout = self
            .timeouts
            .estimate(request.payload_chars(), request.task_class);
        let mut attempts: Vec<GenerationAttempt> = Vec::new();
        let mut target = Target::Primary;
        let mut last_err: Option<GenError> = None;

        emit_generation_event(GenTelemetryEvent::RequestStarted {
            request_id: request.request_id.clone(),
            target_id: self.targets.resolve(target).clone(),
        });

        for attempt in 0..self.retry.retry_budget {
            if attempt > 0 {
                let delay = self.backoff.delay(attempt - 1);
                tokio::select! {
                    _ = cancel.cancelled() => {
                        emit_generation_event(GenTelemetryEvent::RequestCancelled {
                            request_id: request.request_id.clone(),
                        });
                        return Err(cancelled("generation cancelled during backoff"));
                    }
                    _ = sleep(delay) => {}
                }
            }

            let ctx = CallContext {
                request_id: request.request_id.clone(),
                target,
                target_id: self.targets.resolve(target).clone(),
                attempt,
                timeout,
            };
            let started_at = Instant::now();
            emit_generation_event(GenTelemetryEvent::AttemptStarted {
                request_id: request.request_id.clone(),
                attempt,
                target,
            });
            tracing::debug!(
                target: "generation",
                request_id = %request.request_id,
                attempt = attempt,
                call_target = %ctx.target_id,
                timeout_ms = timeout.as_millis() as u64,
                "attempt_started"
            );

            let result = tokio::select! {
                _ = cancel.cancelled() => {
                    emit_generation_event(GenTelemetryEvent::RequestCancelled {
                        request_id: request.request_id.clone(),
                    });
                    return Err(cancelled("generation cancelled mid-attempt"));
                }
                invoked = tokio::time::timeout(timeout, raw.invoke(&ctx, request)) => invoked,
            };

            let err = match result {
                Ok(Ok(text)) => {
                    attempts.push(GenerationAttempt {
                        index: attempt,
                        target,
                        timeout,
                        started_at,
                        finished_at: Instant::now(),
                        outcome: AttemptOutcome::Success,
                        raw_text: Some(text.clone()),
                    });
                    tracing::debug!(
                        target: "generation",
                        request_id = %request.request_id,
                        attempts = attempts.len(),
                        elapsed_ms = started_at.elapsed().as_millis() as u64,
                        "request_completed"
                    );
                    emit_generation_event(GenTelemetryEvent::RequestCompleted {
                        request_id: request.request_id.clone(),
                        attempts: attempt + 1,
                    });
                    return Ok(GenerationOutcome {
                        text,
                        target,
                        attempts,
                    });
                }
                Ok(Err(err)) => err,
                Err(_elapsed) => GenError::new(
                    GenErrorKind::Timeout,
                    format!("attempt exceeded {}ms timeout", timeout.as_millis()),
                )
                .with_target(ctx.target_id.clone()),
            };

            emit_generation_event(GenTelemetryEvent::AttemptFailed {
                request_id: request.request_id.clone(),
                attempt,
                kind: err.kind,
                retryable: err.retryable,
            });
            tracing::debug!(
                target: "generation",
                request_id = %request.request_id,
                attempt = attempt,
                kind = ?err.kind,
                retryable = err.retryable,
                elapsed_ms = started_at.elapsed().as_millis() as u64,
                error = %err.message,
                "attempt_failed"
            );

            if !err.retryable {
                emit_generation_event(GenTelemetryEvent::RequestFailed {
                    request_id: request.request_id.clone(),
                    attempts: attempt + 1,
                    error_kind: err.kind,
                });
                return Err(err);
            }

            let outcome = match err.kind {
                GenErrorKind::Timeout => AttemptOutcome::Timeout,
                GenErrorKind::Overloaded => AttemptOutcome::Overload,
                _ => AttemptOutcome::Transport,
            };
            attempts.push(GenerationAttempt {
                index: attempt,
                target,
                timeout,
                started_at,
                finished_at: Instant::now(),
                outcome,
                raw_text: None,
            });
            if outcome == AttemptOutcome::Overload && target == Target::Primary {
                target = Target::Fallback;
                tracing::debug!(
                    target: "generation",
                    request_id = %request.request_id,
                    call_target = %self.targets.fallback,
                    "escalated_to_fallback_target"
                );
            }
            last_err = Some(err);
        }

        let exhausted = match last_err {
            Some(last) => GenError::new(
                GenErrorKind::RetryBudgetExhausted,
                format!(
                    "retry budget of {} attempts exhausted",
                    self.retry.retry_budget
                ),
            )
            .with_target(self.targets.resolve(target).clone())
            .with_cause(last),
            None => GenError::new(
                GenErrorKind::RetryBudgetExhausted,
                "retry budget is zero, no attempt was made",
            ),
        };
        emit_generation_event(GenTelemetryEvent::RequestFailed {
            request_id: request.request_id.clone(),
            attempts: self.retry.retry_budget,
            error_kind: exhausted.kind,
        });
        Err(exhausted)
    }

    /// Streaming variant under the same retry/timeout contract. A failure
    /// mid-stream fails the whole attempt and restarts from scratch; chunks
    /// carry their attempt index so consumers can discard partial text from
    /// a failed attempt.
    pub async fn generate_stream(
        &self,
        request: &GenerationRequest,
        raw: Arc<dyn RawGenerationCall>,
        cancel: &CancellationToken,
    ) -> Result<StreamChunkStream, GenError> {
        let (tx, rx) = mpsc::channel::<Result<StreamChunk, GenError>>(64);
        let client = self.clone();
        let request = request.clone();
        let cancel = cancel.clone();

        tokio::spawn(async move {
            run_stream_attempts(client, request, raw, cancel, tx).await;
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}

async fn run_stream_attempts(
    client: ResilientClient,
    request: GenerationRequest,
    raw: Arc<dyn RawGenerationCall>,
    cancel: CancellationToken,
    tx: mpsc::Sender<Result<StreamChunk, GenError>>,
) {
    let timeout = client
        .timeouts
        .estimate(request.payload_chars(), request.task_class);
    let mut target = Target::Primary;
    let mut last_err: Option<GenError> = None;
    let mut first_chunk_seen = false;

    emit_generation_event(GenTelemetryEvent::RequestStarted {
        request_id: request.request_id.clone(),
        target_id: client.targets.resolve(target).clone(),
    });

    for attempt in 0..client.retry.retry_budget {
        if attempt > 0 {
            let delay = client.backoff.delay(attempt - 1);
            tokio::select! {
                _ = cancel.cancelled() => {
                    emit_generation_event(GenTelemetryEvent::RequestCancelled {
                        request_id: request.request_id.clone(),
                    });
                    return;
                }
                _ = tx.closed() => return,
                _ = sleep(delay) => {}
            }
        }

        let ctx = CallContext {
            request_id: request.request_id.clone(),
            target,
            target_id: client.targets.resolve(target).clone(),
            attempt,
            timeout,
        };
        emit_generation_event(GenTelemetryEvent::AttemptStarted {
            request_id: request.request_id.clone(),
            attempt,
            target,
        });
        let attempt_started_at = Instant::now();
        let deadline = sleep(timeout);
        tokio::pin!(deadline);

        let attempt_err: GenError = 'attempt: {
            let mut stream = tokio::select! {
                _ = cancel.cancelled() => {
                    emit_generation_event(GenTelemetryEvent::RequestCancelled {
                        request_id: request.request_id.clone(),
                    });
                    return;
                }
                _ = &mut deadline => {
                    break 'attempt GenError::new(
                        GenErrorKind::Timeout,
                        format!("stream start exceeded {}ms timeout", timeout.as_millis()),
                    )
                    .with_target(ctx.target_id.clone());
                }
                opened = raw.invoke_stream(&ctx, &request) => match opened {
                    Ok(stream) => stream,
                    Err(err) => break 'attempt err,
                },
            };

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        emit_generation_event(GenTelemetryEvent::RequestCancelled {
                            request_id: request.request_id.clone(),
                        });
                        return;
                    }
                    _ = tx.closed() => return,
                    _ = &mut deadline => {
                        break 'attempt GenError::new(
                            GenErrorKind::Timeout,
                            format!("stream exceeded {}ms timeout", timeout.as_millis()),
                        )
                        .with_target(ctx.target_id.clone());
                    }
                    item = stream.next() => match item {
                        None => {
                            tracing::debug!(
                                target: "generation",
                                request_id = %request.request_id,
                                attempt = attempt,
                                elapsed_ms = attempt_started_at.elapsed().as_millis() as u64,
                                "stream_completed"
                            );
                            emit_generation_event(GenTelemetryEvent::RequestCompleted {
                                request_id: request.request_id.clone(),
                                attempts: attempt + 1,
                            });
                            return;
                        }
                        Some(Ok(delta)) => {
                            if !first_chunk_seen {
                                first_chunk_seen = true;
                                emit_generation_event(GenTelemetryEvent::StreamFirstChunk {
                                    request_id: request.request_id.clone(),
                                });
                            }
                            let chunk = StreamChunk { attempt, delta };
                            if tx.send(Ok(chunk)).await.is_err() {
                                return;
                            }
                        }
                        Some(Err(err)) => break 'attempt err,
                    }
                }
            }
        };

        emit_generation_event(GenTelemetryEvent::AttemptFailed {
            request_id: request.request_id.clone(),
            attempt,
            kind: attempt_err.kind,
            retryable: attempt_err.retryable,
        });
        tracing::debug!(
            target: "generation",
            request_id = %request.request_id,
            attempt = attempt,
            kind = ?attempt_err.kind,
            retryable = attempt_err.retryable,
            elapsed_ms = attempt_started_at.elapsed().as_millis() as u64,
            error = %attempt_err.message,
            "stream_attempt_failed"
        );

        if !attempt_err.retryable {
            emit_generation_event(GenTelemetryEvent::RequestFailed {
                request_id: request.request_id.clone(),
                attempts: attempt + 1,
                error_kind: attempt_err.kind,
            });
            let _ = tx.send(Err(attempt_err)).await;
            return;
        }
        if attempt_err.kind == GenErrorKind::Overloaded && target == Target::Primary {
            target = Target::Fallback;
        }
        last_err = Some(attempt_err);
    }

    let exhausted = match last_err {
        Some(last) => GenError::new(
            GenErrorKind::RetryBudgetExhausted,
            format!(
                "retry budget of {} attempts exhausted",
                client.retry.retry_budget
            ),
        )
        .with_target(client.targets.resolve(target).clone())
        .with_cause(last),
        None => GenError::new(
            GenErrorKind::RetryBudgetExhausted,
            "retry budget is zero, no attempt was made",
        ),
    };
    emit_generation_event(GenTelemetryEvent::RequestFailed {
        request_id: request.request_id.clone(),
        attempts: client.retry.retry_budget,
        error_kind: exhausted.kind,
    });
    let _ = tx.send(Err(exhausted)).await;
}
