use std::sync::Arc;
use std::time::Duration;

use crate::support::{
    helpers::{immediate_config, init_tracing, shipment_request},
    mock_executor::{Scripted, ScriptedExecutor},
};
use anyhow::Result;
use serde_json::json;
use storefetch::{
    CoordinatorConfig, DelayPolicy, NonEmptyAt, PollError, PollState, PollingCoordinator,
    Telemetry,
};
use tokio::time::{sleep, Instant};

fn shipment_coordinator(
    config: &CoordinatorConfig,
    backend: &ScriptedExecutor,
) -> PollingCoordinator<serde_json::Value> {
    PollingCoordinator::for_executor(
        config,
        Arc::new(Telemetry::default()),
        backend.clone(),
        shipment_request,
        NonEmptyAt::new("/detail"),
    )
}

#[tokio::test(start_paused = true)]
async fn detail_arrives_on_last_attempt() -> Result<()> {
    init_tracing();
    let backend = ScriptedExecutor::new(Duration::from_millis(20));
    let s1 = shipment_request("S1")?;
    let mut responses = vec![Scripted::Payload(json!({ "detail": {} })); 4];
    responses.push(Scripted::Payload(json!({ "detail": { "id": "S1" } })));
    backend.script(&s1, responses);

    let coordinator = shipment_coordinator(&immediate_config(5), &backend);
    coordinator.set_target("S1");
    let payload = coordinator.wait_for_outcome().await?;

    let session = coordinator.snapshot();
    assert_eq!(session.state(), PollState::Succeeded);
    assert_eq!(session.attempts(), 5);
    assert_eq!(payload, json!({ "detail": { "id": "S1" } }));
    assert_eq!(session.result(), Some(&payload));
    assert_eq!(backend.calls(&s1), 5);

    sleep(Duration::from_secs(5)).await;
    assert_eq!(backend.calls(&s1), 5, "no attempts after success");
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn empty_detail_exhausts_budget_and_stays_degraded() -> Result<()> {
    init_tracing();
    let backend = ScriptedExecutor::new(Duration::from_millis(20));
    let s1 = shipment_request("S1")?;

    let coordinator = shipment_coordinator(&immediate_config(5), &backend);
    coordinator.set_target("S1");
    let err = coordinator.wait_for_outcome().await.unwrap_err();
    assert_eq!(
        err,
        PollError::BudgetExhausted {
            target: "S1".into(),
            attempts: 5
        }
    );

    let session = coordinator.snapshot();
    assert_eq!(session.state(), PollState::Exhausted);
    assert_eq!(session.attempts(), 5);
    assert!(session.degraded());
    assert_eq!(session.result(), None);

    coordinator.set_target("S1");
    sleep(Duration::from_secs(5)).await;
    assert_eq!(backend.calls(&s1), 5, "exhausted target is not polled again");
    assert_eq!(coordinator.snapshot().state(), PollState::Exhausted);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn fetch_failures_count_as_attempts() -> Result<()> {
    init_tracing();
    let backend = ScriptedExecutor::new(Duration::from_millis(5));
    let s1 = shipment_request("S1")?;
    backend.script(
        &s1,
        vec![
            Scripted::Failure("upstream 500"),
            Scripted::Failure("upstream 500"),
            Scripted::Payload(json!({ "detail": { "id": "S1" } })),
        ],
    );

    let coordinator = shipment_coordinator(&immediate_config(5), &backend);
    coordinator.set_target("S1");
    coordinator.wait_for_outcome().await?;

    assert_eq!(coordinator.snapshot().attempts(), 3);
    assert_eq!(coordinator.snapshot().last_error(), None);
    assert_eq!(coordinator.telemetry().snapshot().fetch_failures, 2);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn retarget_mid_flight_discards_stale_result() -> Result<()> {
    init_tracing();
    let backend = ScriptedExecutor::new(Duration::from_millis(10));
    let s1 = shipment_request("S1")?;
    let s2 = shipment_request("S2")?;
    backend.latency(&s1, Duration::from_millis(500));
    backend.script(&s1, vec![Scripted::Failure("gateway timeout")]);
    backend.script(
        &s2,
        vec![
            Scripted::Payload(json!({ "detail": {} })),
            Scripted::Payload(json!({ "detail": { "id": "S2" } })),
        ],
    );

    let coordinator = shipment_coordinator(&immediate_config(5), &backend);
    coordinator.set_target("S1");
    sleep(Duration::from_millis(50)).await;
    assert!(coordinator.snapshot().in_flight());

    coordinator.set_target("S2");
    let fresh = coordinator.snapshot();
    assert_eq!(fresh.target(), Some("S2"));
    assert_eq!(fresh.attempts(), 0);

    let payload = coordinator.wait_for_outcome().await?;
    assert_eq!(payload, json!({ "detail": { "id": "S2" } }));

    sleep(Duration::from_secs(1)).await;
    let session = coordinator.snapshot();
    assert_eq!(session.target(), Some("S2"));
    assert_eq!(session.attempts(), 2);
    assert_eq!(session.result(), Some(&json!({ "detail": { "id": "S2" } })));
    assert_eq!(backend.calls(&s1), 1);
    assert_eq!(session.last_error(), None);

    let telemetry = coordinator.telemetry().snapshot();
    assert_eq!(telemetry.stale_discards, 1);
    assert_eq!(telemetry.fetch_failures, 0, "stale failure is not counted");
    assert_eq!(telemetry.incomplete_results, 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn waiter_learns_about_retarget() -> Result<()> {
    init_tracing();
    let backend = ScriptedExecutor::new(Duration::from_millis(100));
    let coordinator = Arc::new(shipment_coordinator(&immediate_config(5), &backend));
    coordinator.set_target("S1");

    let waiter = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move { coordinator.wait_for_outcome().await })
    };
    sleep(Duration::from_millis(10)).await;
    coordinator.set_target("S2");

    assert_eq!(
        waiter.await?,
        Err(PollError::Retargeted {
            previous: "S1".into()
        })
    );
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn attempts_are_sequential_and_spaced_by_backoff() -> Result<()> {
    init_tracing();
    let backend = ScriptedExecutor::new(Duration::from_millis(10));
    let config = CoordinatorConfig::builder()
        .max_attempts(4)
        .delay(DelayPolicy::Exponential {
            initial: Duration::from_millis(100),
            max: Duration::from_millis(250),
        })
        .build()?;
    let coordinator = shipment_coordinator(&config, &backend);

    let started = Instant::now();
    coordinator.set_target("S1");
    let _ = coordinator.wait_for_outcome().await;

    // 4 fetches of 10ms plus waits of 100, 200 and 250ms.
    assert!(started.elapsed() >= Duration::from_millis(590));
    assert_eq!(backend.max_concurrent_calls(), 1);
    assert_eq!(coordinator.snapshot().attempts(), 4);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn manual_refresh_after_degraded_state() -> Result<()> {
    init_tracing();
    let backend = ScriptedExecutor::new(Duration::from_millis(10));
    let s1 = shipment_request("S1")?;
    let mut responses = vec![Scripted::Payload(json!({ "detail": {} })); 2];
    responses.push(Scripted::Payload(json!({ "detail": { "id": "S1" } })));
    backend.script(&s1, responses);

    let coordinator = shipment_coordinator(&immediate_config(2), &backend);
    coordinator.set_target("S1");
    assert!(coordinator.wait_for_outcome().await.is_err());
    assert!(coordinator.snapshot().degraded());

    assert!(coordinator.refresh());
    assert!(!coordinator.refresh(), "refresh is ignored while fetching");
    let payload = coordinator.wait_for_outcome().await?;
    assert_eq!(payload["detail"]["id"], "S1");
    assert!(!coordinator.snapshot().degraded());
    Ok(())
}
