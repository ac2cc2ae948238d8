use std::sync::Arc;

use jsonschema::{JSONSchema, ValidationError};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::generation::{
    client::{RawGenerationCall, ResilientClient},
    error::{GenError, GenErrorKind, malformed_request},
    repair::{self, RepairOutcome},
    types::{ExtractionStrategy, GenerationRequest},
};

/// A schema-valid structured value plus where it came from: which
/// regeneration round and which repair stage produced it.
#[derive(Debug, Clone)]
pub struct Extraction {
    pub value: Value,
    pub round: u32,
    pub stage: &'static str,
}

#[derive(Clone)]
pub struct StructuredExtractor {
    client: ResilientClient,
    strategy: ExtractionStrategy,
}

impl StructuredExtractor {
    pub fn new(client: ResilientClient, strategy: ExtractionStrategy) -> Self {
        Self { client, strategy }
    }

    /// Generates, repairs, and validates until a schema-valid value emerges
    /// or the configured strategy is out of rounds. Failure is always typed
    /// and carries the last raw text plus accumulated diagnostics; no
    /// default value is ever substituted.
    pub async fn extract(
        &self,
        request: &GenerationRequest,
        raw: Arc<dyn RawGenerationCall>,
        schema: &Value,
        cancel: &CancellationToken,
    ) -> Result<Extraction, GenError> {
        let compiled = JSONSchema::compile(schema)
            .map_err(|err| malformed_request(format!("target schema does not compile: {err}")))?;

        let max_regenerations = match self.strategy {
            ExtractionStrategy::PostHocRepair => 0,
            ExtractionStrategy::RegenerateWithStricterSampling { max_regenerations } => {
                max_regenerations
            }
        };

        let mut diagnostics: Vec<String> = Vec::new();
        let mut last_raw_text: Option<String> = None;
        let mut last_was_unrepairable = false;

        for round in 0..=max_regenerations {
            let round_request = if round == 0 {
                request.clone()
            } else {
                let mut stricter = request.clone();
                stricter.sampling = request.sampling.constrained(round);
                stricter
            };

            let outcome = self.client.generate(&round_request, raw.clone(), cancel).await?;
            last_raw_text = Some(outcome.text.clone());

            match repair::repair(&outcome.text) {
                RepairOutcome::Parsed { value, stage, trail } => {
                    last_was_unrepairable = false;
                    diagnostics.extend(trail.iter().filter_map(|result| result.note.clone()));
                    let violations = validate_against_schema(&compiled, &value);
                    if violations.is_empty() {
                        tracing::debug!(
                            target: "generation",
                            request_id = %request.request_id,
                            round = round,
                            stage = stage,
                            "extraction_validated"
                        );
                        return Ok(Extraction {
                            value,
                            round,
                            stage,
                        });
                    }
                    tracing::debug!(
                        target: "generation",
                        request_id = %request.request_id,
                        round = round,
                        stage = stage,
                        violations = violations.len(),
                        "extraction_schema_invalid"
                    );
                    diagnostics.extend(violations);
                }
                RepairOutcome::Unrepaired { trail, .. } => {
                    last_was_unrepairable = true;
                    diagnostics.extend(trail.iter().filter_map(|result| result.note.clone()));
                    tracing::debug!(
                        target: "generation",
                        request_id = %request.request_id,
                        round = round,
                        "extraction_unrepairable"
                    );
                }
            }
        }

        let kind = if last_was_unrepairable {
            GenErrorKind::UnrepairableOutput
        } else {
            GenErrorKind::SchemaValidationFailed
        };
        let message = match kind {
            GenErrorKind::UnrepairableOutput => {
                "no repair stage produced structured output".to_string()
            }
            _ => format!(
                "output failed schema validation after {} round(s)",
                max_regenerations + 1
            ),
        };
        let mut err = GenError::new(kind, message)
            .with_retryable(false)
            .with_diagnostics(diagnostics);
        if let Some(raw_text) = last_raw_text {
            err = err.with_raw_text(raw_text);
        }
        Err(err)
    }
}

fn validate_against_schema(compiled: &JSONSchema, value: &Value) -> Vec<String> {
    match compiled.validate(value) {
        Ok(()) => Vec::new(),
        Err(errors_iter) => {
            let validation_errors: Vec<ValidationError> = errors_iter.collect();
            validation_errors
                .into_iter()
                .map(|error| format!("schema violation at {}: {}", error.instance_path, error))
                .collect()
        }
    }
}
