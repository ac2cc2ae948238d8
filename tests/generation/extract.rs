use breakwater::generation::{
    client::ResilientClient,
    error::GenErrorKind,
    extract::StructuredExtractor,
    types::{ExtractionStrategy, GenerationRequest, TaskClass},
};
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::support::{ScriptStep, ScriptedCall, fast_config};

fn request() -> GenerationRequest {
    GenerationRequest::new(TaskClass::StructuredExtraction, "extract the profile")
        .with_schema_id("profile.v1")
}

fn profile_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "name": { "type": "string" }
        },
        "required": ["name"],
        "additionalProperties": false
    })
}

fn extractor(strategy: ExtractionStrategy) -> StructuredExtractor {
    StructuredExtractor::new(ResilientClient::new(&fast_config(3)), strategy)
}

#[tokio::test]
async fn given_messy_but_recoverable_output_when_extracted_then_schema_valid_value_returned() {
    let raw = ScriptedCall::new(vec![ScriptStep::Reply(
        "```json\n{\"name\": \"ada\",}\n```".to_string(),
    )]);
    let extractor = extractor(ExtractionStrategy::PostHocRepair);

    let extraction = extractor
        .extract(&request(), raw, &profile_schema(), &CancellationToken::new())
        .await
        .expect("repaired output should validate");

    assert_eq!(extraction.value, json!({"name": "ada"}));
    assert_eq!(extraction.round, 0);
}

#[tokio::test]
async fn given_schema_violation_when_extracted_then_regeneration_uses_stricter_sampling() {
    let raw = ScriptedCall::new(vec![
        ScriptStep::Reply(r#"{"nickname": "ada"}"#.to_string()),
        ScriptStep::Reply(r#"{"name": "ada"}"#.to_string()),
    ]);
    let extractor = extractor(ExtractionStrategy::RegenerateWithStricterSampling {
        max_regenerations: 2,
    });

    let extraction = extractor
        .extract(
            &request(),
            raw.clone(),
            &profile_schema(),
            &CancellationToken::new(),
        )
        .await
        .expect("second round should validate");

    assert_eq!(extraction.round, 1);
    let temperatures = raw.temperatures().await;
    assert_eq!(temperatures.len(), 2);
    assert!(
        temperatures[1] < temperatures[0],
        "regeneration must lower temperature: {temperatures:?}"
    );
}

#[tokio::test]
async fn given_every_round_invalid_when_extracted_then_schema_failure_carries_diagnostics() {
    let raw = ScriptedCall::new(vec![
        ScriptStep::Reply(r#"{"nickname": "a"}"#.to_string()),
        ScriptStep::Reply(r#"{"nickname": "b"}"#.to_string()),
    ]);
    let extractor = extractor(ExtractionStrategy::RegenerateWithStricterSampling {
        max_regenerations: 1,
    });

    let err = extractor
        .extract(&request(), raw, &profile_schema(), &CancellationToken::new())
        .await
        .expect_err("no round validates");

    assert_eq!(err.kind, GenErrorKind::SchemaValidationFailed);
    assert_eq!(err.raw_text.as_deref(), Some(r#"{"nickname": "b"}"#));
    assert!(
        err.diagnostics
            .iter()
            .any(|diagnostic| diagnostic.contains("schema violation")),
        "diagnostics: {:?}",
        err.diagnostics
    );
}

#[tokio::test]
async fn given_unrepairable_output_when_extracted_then_error_carries_raw_text() {
    let raw = ScriptedCall::new(vec![ScriptStep::Reply(
        "nothing structured in here".to_string(),
    )]);
    let extractor = extractor(ExtractionStrategy::PostHocRepair);

    let err = extractor
        .extract(&request(), raw, &profile_schema(), &CancellationToken::new())
        .await
        .expect_err("prose cannot be repaired");

    assert_eq!(err.kind, GenErrorKind::UnrepairableOutput);
    assert_eq!(err.raw_text.as_deref(), Some("nothing structured in here"));
    assert!(!err.diagnostics.is_empty());
}

#[tokio::test]
async fn given_post_hoc_strategy_when_first_output_invalid_then_no_regeneration_occurs() {
    let raw = ScriptedCall::new(vec![
        ScriptStep::Reply(r#"{"nickname": "a"}"#.to_string()),
        ScriptStep::Reply(r#"{"name": "a"}"#.to_string()),
    ]);
    let extractor = extractor(ExtractionStrategy::PostHocRepair);

    let err = extractor
        .extract(&request(), raw.clone(), &profile_schema(), &CancellationToken::new())
        .await
        .expect_err("post-hoc strategy does not regenerate");

    assert_eq!(err.kind, GenErrorKind::SchemaValidationFailed);
    assert_eq!(raw.call_count(), 1);
}

#[tokio::test]
async fn given_uncompilable_schema_when_extracted_then_caller_error_is_returned() {
    let raw = ScriptedCall::new(vec![ScriptStep::Reply(r#"{"name": "a"}"#.to_string())]);
    let extractor = extractor(ExtractionStrategy::PostHocRepair);
    let bad_schema = json!({"type": 12});

    let err = extractor
        .extract(&request(), raw.clone(), &bad_schema, &CancellationToken::new())
        .await
        .expect_err("schema must compile before any call");

    assert_eq!(err.kind, GenErrorKind::MalformedRequest);
    assert_eq!(raw.call_count(), 0, "no generation call for a caller error");
}

#[tokio::test]
async fn given_client_failure_when_extracted_then_typed_failure_propagates() {
    let raw = ScriptedCall::new(vec![ScriptStep::Fail(GenErrorKind::MalformedRequest)]);
    let extractor = extractor(ExtractionStrategy::PostHocRepair);

    let err = extractor
        .extract(&request(), raw, &profile_schema(), &CancellationToken::new())
        .await
        .expect_err("client failure must propagate");

    assert_eq!(err.kind, GenErrorKind::MalformedRequest);
}
