//! Architectural Contract Test: Dispatch Failure Resilience
//!
//! This test verifies that a failing DNS registrar cannot stall the
//! pipeline: the failed event completes anyway and the failure stays
//! observable instead of being retried.
//!
//! Constraints verified:
//! - A DNS failure never blocks event completion
//! - The failed event is marked done and never redispatched
//! - Other events in the same cycle are unaffected
//! - The failure is observable via the cycle summary and the engine
//!   event stream
//!
//! If this test fails, failure containment is broken.

mod common;

use chrono::Utc;
use common::*;
use vmdns_core::state::MemoryStateStore;
use vmdns_core::traits::{EventId, EventKind};
use vmdns_core::{EngineEvent, ReconcilerEngine};

#[tokio::test]
async fn dns_failure_does_not_block_completion() {
    let store = MemoryStateStore::new();
    for id in [41u64, 42, 43] {
        store.insert_event(id.into(), Utc::now()).await;
    }

    let source = MockEventSource::new();
    source.add_enriched(enriched_event(
        41,
        EventKind::VmCreate,
        "node41",
        "example.com",
        "10.0.0.41",
    ));
    source.add_enriched(enriched_event(
        42,
        EventKind::VmCreate,
        "node42",
        "example.com",
        "10.0.0.42",
    ));
    source.add_enriched(enriched_event(
        43,
        EventKind::VmCreate,
        "node43",
        "example.com",
        "10.0.0.43",
    ));

    let registrar = MockRegistrar::new();
    registrar.fail_on("node42.example.com");

    let (engine, mut event_rx) = ReconcilerEngine::new(
        Box::new(MockEventSource::sharing_counters_with(&source)),
        Box::new(store.clone()),
        Box::new(MockRegistrar::sharing_counters_with(&registrar)),
        minimal_config(),
    )
    .expect("engine construction succeeds");

    let summary = engine.run_cycle().await.expect("cycle succeeds");

    assert_eq!(summary.processed, 3, "the DNS failure must not stop the batch");
    assert_eq!(summary.drifted, 1);
    for id in [41u64, 42, 43] {
        assert!(
            store.is_done(id.into()).await,
            "event {} must be marked done",
            id
        );
    }
    assert_eq!(
        registrar.create_call_count(),
        3,
        "every event gets its dispatch attempt"
    );

    // The failure is queryable from the engine event stream
    let events = drain_events(&mut event_rx);
    let drifted: Vec<_> = events
        .iter()
        .filter(|event| matches!(event, EngineEvent::EventProcessedWithDrift { .. }))
        .collect();
    assert_eq!(drifted.len(), 1);
    match drifted[0] {
        EngineEvent::EventProcessedWithDrift { id, error, .. } => {
            assert_eq!(*id, EventId(42));
            assert!(error.contains("simulated outage"));
        }
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn failed_event_never_redispatched() {
    let store = MemoryStateStore::new();
    store.insert_event(42u64.into(), Utc::now()).await;

    let source = MockEventSource::new();
    source.add_enriched(enriched_event(
        42,
        EventKind::VmCreate,
        "node42",
        "example.com",
        "10.0.0.42",
    ));

    let registrar = MockRegistrar::new();
    registrar.fail_on("node42.example.com");

    let (engine, _event_rx) = ReconcilerEngine::new(
        Box::new(MockEventSource::sharing_counters_with(&source)),
        Box::new(store.clone()),
        Box::new(MockRegistrar::sharing_counters_with(&registrar)),
        minimal_config(),
    )
    .expect("engine construction succeeds");

    let first = engine.run_cycle().await.expect("first cycle succeeds");
    let second = engine.run_cycle().await.expect("second cycle succeeds");

    assert_eq!(first.drifted, 1);
    assert_eq!(second.listed, 0, "the failed event is done, not pending");
    assert_eq!(
        registrar.create_call_count(),
        1,
        "a DNS failure is never retried"
    );
    assert!(store.is_done(42u64.into()).await);
}

#[tokio::test]
async fn remove_failure_contained_like_create_failure() {
    let store = MemoryStateStore::new();
    store.insert_event(51u64.into(), Utc::now()).await;

    let source = MockEventSource::new();
    source.add_enriched(enriched_event(
        51,
        EventKind::VmDestroy,
        "node51",
        "example.com",
        "10.0.0.51",
    ));

    let registrar = MockRegistrar::new();
    registrar.fail_on("node51.example.com");

    let (engine, _event_rx) = ReconcilerEngine::new(
        Box::new(MockEventSource::sharing_counters_with(&source)),
        Box::new(store.clone()),
        Box::new(MockRegistrar::sharing_counters_with(&registrar)),
        minimal_config(),
    )
    .expect("engine construction succeeds");

    let summary = engine.run_cycle().await.expect("cycle succeeds");

    assert_eq!(summary.drifted, 1);
    assert_eq!(registrar.remove_call_count(), 1);
    assert!(store.is_done(51u64.into()).await);
}
