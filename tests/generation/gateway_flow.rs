use std::sync::{
    Arc,
    atomic::{AtomicU32, Ordering},
};

use breakwater::generation::{
    error::{GenError, GenErrorKind, internal_error},
    gateway::{CapabilityGateway, InvokeSource},
    monitor::ReliabilityMonitor,
    types::MonitorConfig,
};

fn gateway(min_sample_size: u64, failure_ratio_threshold: f64) -> CapabilityGateway {
    CapabilityGateway::new(ReliabilityMonitor::new(MonitorConfig {
        min_sample_size,
        failure_ratio_threshold,
    }))
}

#[tokio::test]
async fn given_enabled_capability_when_invoked_then_enhancement_runs_and_success_is_recorded() {
    let gateway = gateway(10, 0.3);

    let result = gateway
        .invoke(
            "summarize",
            || async { Ok::<_, GenError>("enhanced".to_string()) },
            || async { Ok("baseline".to_string()) },
        )
        .await
        .expect("enhancement should succeed");

    assert_eq!(result.value, "enhanced");
    assert_eq!(result.source, InvokeSource::Enhanced);
    let record = gateway
        .monitor()
        .snapshot("summarize")
        .await
        .expect("outcome was recorded");
    assert_eq!(record.success_count, 1);
    assert_eq!(record.failure_count, 0);
}

#[tokio::test]
async fn given_failing_enhancement_when_invoked_then_baseline_result_is_returned() {
    let gateway = gateway(10, 0.3);

    let result = gateway
        .invoke(
            "summarize",
            || async { Err::<String, _>(internal_error("model produced garbage")) },
            || async { Ok("baseline".to_string()) },
        )
        .await
        .expect("baseline should cover the failure");

    assert_eq!(result.value, "baseline");
    assert_eq!(result.source, InvokeSource::Baseline);
    let record = gateway
        .monitor()
        .snapshot("summarize")
        .await
        .expect("failure was recorded");
    assert_eq!(record.failure_count, 1);
}

#[tokio::test]
async fn given_disabled_capability_when_invoked_then_enhancement_is_never_called() {
    let gateway = gateway(4, 0.5);
    for _ in 0..4 {
        gateway.monitor().record_failure("flaky").await;
    }
    assert!(!gateway.monitor().is_enabled("flaky").await);

    let enhancement_calls = Arc::new(AtomicU32::new(0));
    let calls = enhancement_calls.clone();
    let result = gateway
        .invoke(
            "flaky",
            move || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok("enhanced".to_string())
                }
            },
            || async { Ok("baseline".to_string()) },
        )
        .await
        .expect("baseline path is always available");

    assert_eq!(result.source, InvokeSource::Baseline);
    assert_eq!(enhancement_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn given_repeated_failures_when_threshold_crossed_then_later_invocations_skip_enhancement() {
    let gateway = gateway(4, 0.5);
    let enhancement_calls = Arc::new(AtomicU32::new(0));

    for _ in 0..6 {
        let calls = enhancement_calls.clone();
        let result = gateway
            .invoke(
                "wobbly",
                move || {
                    let calls = calls.clone();
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Err::<String, _>(internal_error("still broken"))
                    }
                },
                || async { Ok("baseline".to_string()) },
            )
            .await
            .expect("every invocation lands on the baseline");
        assert_eq!(result.value, "baseline");
    }

    assert_eq!(
        enhancement_calls.load(Ordering::SeqCst),
        4,
        "after four failures the capability is disabled and skipped"
    );
    assert!(!gateway.monitor().is_enabled("wobbly").await);
}

#[tokio::test]
async fn given_other_capability_disabled_when_invoked_then_this_one_still_enhances() {
    let gateway = gateway(4, 0.5);
    for _ in 0..4 {
        gateway.monitor().record_failure("broken-one").await;
    }

    let result = gateway
        .invoke(
            "healthy-one",
            || async { Ok::<_, GenError>("enhanced".to_string()) },
            || async { Ok("baseline".to_string()) },
        )
        .await
        .expect("unrelated capability is unaffected");

    assert_eq!(result.source, InvokeSource::Enhanced);
}

#[tokio::test]
async fn given_failing_baseline_when_invoked_then_typed_error_propagates() {
    let gateway = gateway(10, 0.3);

    let err = gateway
        .invoke(
            "summarize",
            || async { Err::<String, _>(internal_error("enhancement broke")) },
            || async { Err::<String, _>(GenError::new(GenErrorKind::Transport, "baseline broke")) },
        )
        .await
        .expect_err("baseline failure is surfaced, never swallowed");

    assert_eq!(err.kind, GenErrorKind::Transport);
}
