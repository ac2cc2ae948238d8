use std::{
    pin::Pin,
    time::{Duration, Instant},
};

use futures_core::Stream;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::generation::error::GenError;

pub type CapabilityName = String;
pub type TargetId = String;
pub type RequestId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskClass {
    ShortText,
    StructuredExtraction,
    LargeStructuredExtraction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default)]
    pub top_k: Option<u32>,
    #[serde(default)]
    pub max_output_tokens: Option<u64>,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
            top_p: default_top_p(),
            top_k: None,
            max_output_tokens: None,
        }
    }
}

impl SamplingParams {
    /// Stricter parameter set for regeneration round `step` (1-based).
    /// Each step halves temperature, lowers top_p, and halves top_k,
    /// pushing the backend toward deterministic structured output.
    pub fn constrained(&self, step: u32) -> Self {
        let factor = 0.5_f32.powi(step as i32);
        Self {
            temperature: (self.temperature * factor).max(0.0),
            top_p: (self.top_p - 0.15 * step as f32).max(0.1),
            top_k: self.top_k.map(|k| (k >> step.min(31)).max(1)),
            max_output_tokens: self.max_output_tokens,
        }
    }
}

fn default_temperature() -> f32 {
    0.7
}

fn default_top_p() -> f32 {
    0.95
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub request_id: RequestId,
    pub task_class: TaskClass,
    pub prompt: String,
    #[serde(default)]
    pub system: Option<String>,
    #[serde(default)]
    pub sampling: SamplingParams,
    #[serde(default)]
    pub schema_id: Option<String>,
}

impl GenerationRequest {
    pub fn new(task_class: TaskClass, prompt: impl Into<String>) -> Self {
        Self {
            request_id: Uuid::now_v7().to_string(),
            task_class,
            prompt: prompt.into(),
            system: None,
            sampling: SamplingParams::default(),
            schema_id: None,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_sampling(mut self, sampling: SamplingParams) -> Self {
        self.sampling = sampling;
        self
    }

    pub fn with_schema_id(mut self, schema_id: impl Into<String>) -> Self {
        self.schema_id = Some(schema_id.into());
        self
    }

    pub fn payload_chars(&self) -> usize {
        let system_chars = self
            .system
            .as_deref()
            .map(|system| system.chars().count())
            .unwrap_or(0);
        self.prompt.chars().count() + system_chars
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Target {
    Primary,
    Fallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    Timeout,
    Transport,
    Overload,
}

#[derive(Debug, Clone)]
pub struct GenerationAttempt {
    pub index: u32,
    pub target: Target,
    pub timeout: Duration,
    pub started_at: Instant,
    pub finished_at: Instant,
    pub outcome: AttemptOutcome,
    pub raw_text: Option<String>,
}

#[derive(Debug, Clone)]
pub struct GenerationOutcome {
    pub text: String,
    pub target: Target,
    pub attempts: Vec<GenerationAttempt>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamChunk {
    pub attempt: u32,
    pub delta: String,
}

pub type StreamChunkStream =
    Pin<Box<dyn Stream<Item = Result<StreamChunk, GenError>> + Send + 'static>>;

pub type RawTextStream = Pin<Box<dyn Stream<Item = Result<String, GenError>> + Send + 'static>>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffConfig {
    #[serde(default = "default_backoff_base_ms")]
    pub base_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub multiplier: f64,
    #[serde(default = "default_backoff_max_ms")]
    pub max_ms: u64,
    #[serde(default = "default_jitter_fraction")]
    pub jitter_fraction: f64,
    #[serde(default)]
    pub jitter_seed: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_ms: default_backoff_base_ms(),
            multiplier: default_backoff_multiplier(),
            max_ms: default_backoff_max_ms(),
            jitter_fraction: default_jitter_fraction(),
            jitter_seed: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts allowed per request, including the first.
    #[serde(default = "default_retry_budget")]
    pub retry_budget: u32,
    #[serde(default)]
    pub backoff: BackoffConfig,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            retry_budget: default_retry_budget(),
            backoff: BackoffConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskTimeoutConfig {
    pub base_ms: u64,
    pub size_threshold_chars: usize,
    pub per_extra_char_us: u64,
    pub hard_cap_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_short_text_timeouts")]
    pub short_text: TaskTimeoutConfig,
    #[serde(default = "default_structured_extraction_timeouts")]
    pub structured_extraction: TaskTimeoutConfig,
    #[serde(default = "default_large_structured_extraction_timeouts")]
    pub large_structured_extraction: TaskTimeoutConfig,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            short_text: default_short_text_timeouts(),
            structured_extraction: default_structured_extraction_timeouts(),
            large_structured_extraction: default_large_structured_extraction_timeouts(),
        }
    }
}

impl TimeoutConfig {
    pub fn for_class(&self, task_class: TaskClass) -> &TaskTimeoutConfig {
        match task_class {
            TaskClass::ShortText => &self.short_text,
            TaskClass::StructuredExtraction => &self.structured_extraction,
            TaskClass::LargeStructuredExtraction => &self.large_structured_extraction,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    #[serde(default = "default_primary_target")]
    pub primary: TargetId,
    #[serde(default = "default_fallback_target")]
    pub fallback: TargetId,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            primary: default_primary_target(),
            fallback: default_fallback_target(),
        }
    }
}

impl TargetConfig {
    pub fn resolve(&self, target: Target) -> &TargetId {
        match target {
            Target::Primary => &self.primary,
            Target::Fallback => &self.fallback,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_min_sample_size")]
    pub min_sample_size: u64,
    #[serde(default = "default_failure_ratio_threshold")]
    pub failure_ratio_threshold: f64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            min_sample_size: default_min_sample_size(),
            failure_ratio_threshold: default_failure_ratio_threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum ExtractionStrategy {
    PostHocRepair,
    RegenerateWithStricterSampling {
        #[serde(default = "default_max_regenerations")]
        max_regenerations: u32,
    },
}

impl Default for ExtractionStrategy {
    fn default() -> Self {
        Self::RegenerateWithStricterSampling {
            max_regenerations: default_max_regenerations(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerationConfig {
    #[serde(default)]
    pub targets: TargetConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub extraction: ExtractionStrategy,
}

fn default_backoff_base_ms() -> u64 {
    200
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_backoff_max_ms() -> u64 {
    5_000
}

fn default_jitter_fraction() -> f64 {
    0.25
}

fn default_retry_budget() -> u32 {
    3
}

fn default_short_text_timeouts() -> TaskTimeoutConfig {
    TaskTimeoutConfig {
        base_ms: 8_000,
        size_threshold_chars: 4_000,
        per_extra_char_us: 100,
        hard_cap_ms: 20_000,
    }
}

fn default_structured_extraction_timeouts() -> TaskTimeoutConfig {
    TaskTimeoutConfig {
        base_ms: 15_000,
        size_threshold_chars: 6_000,
        per_extra_char_us: 500,
        hard_cap_ms: 60_000,
    }
}

fn default_large_structured_extraction_timeouts() -> TaskTimeoutConfig {
    TaskTimeoutConfig {
        base_ms: 30_000,
        size_threshold_chars: 10_000,
        per_extra_char_us: 1_000,
        hard_cap_ms: 120_000,
    }
}

fn default_primary_target() -> TargetId {
    "primary".to_string()
}

fn default_fallback_target() -> TargetId {
    "fallback".to_string()
}

fn default_min_sample_size() -> u64 {
    10
}

fn default_failure_ratio_threshold() -> f64 {
    0.3
}

fn default_max_regenerations() -> u32 {
    2
}
