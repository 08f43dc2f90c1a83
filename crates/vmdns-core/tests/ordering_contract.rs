//! Architectural Contract Test: Dispatch Ordering
//!
//! This test verifies that events are dispatched in ascending id order
//! regardless of the order the backing queries return them in.
//!
//! Constraints verified:
//! - Dispatch order within a cycle is ascending event id
//! - Ordering is owned by the engine, not the source
//! - Duplicate enrichment rows collapse to one dispatch per id
//!
//! If this test fails, replay ordering is broken.

mod common;

use chrono::Utc;
use common::*;
use vmdns_core::ReconcilerEngine;
use vmdns_core::state::MemoryStateStore;
use vmdns_core::traits::EventKind;

#[tokio::test]
async fn events_dispatch_in_ascending_id_order() {
    // Ids seeded out of order and enrichments scrambled; dispatch order
    // must still be 2, 5, 9

    let store = MemoryStateStore::new();
    for id in [5u64, 2, 9] {
        store.insert_event(id.into(), Utc::now()).await;
    }

    let source = MockEventSource::new();
    source.add_enriched(enriched_event(
        9,
        EventKind::VmCreate,
        "node09",
        "example.com",
        "10.0.0.9",
    ));
    source.add_enriched(enriched_event(
        2,
        EventKind::VmCreate,
        "node02",
        "example.com",
        "10.0.0.2",
    ));
    source.add_enriched(enriched_event(
        5,
        EventKind::VmCreate,
        "node05",
        "example.com",
        "10.0.0.5",
    ));

    let registrar = MockRegistrar::new();

    let (engine, _event_rx) = ReconcilerEngine::new(
        Box::new(MockEventSource::sharing_counters_with(&source)),
        Box::new(store.clone()),
        Box::new(MockRegistrar::sharing_counters_with(&registrar)),
        minimal_config(),
    )
    .expect("engine construction succeeds");

    let summary = engine.run_cycle().await.expect("cycle succeeds");
    assert_eq!(summary.listed, 3);
    assert_eq!(summary.processed, 3);

    let fqdns: Vec<String> = registrar.calls().into_iter().map(|call| call.fqdn).collect();
    assert_eq!(
        fqdns,
        vec![
            "node02.example.com",
            "node05.example.com",
            "node09.example.com"
        ],
        "dispatch must follow ascending event id"
    );
}

#[tokio::test]
async fn mixed_kinds_keep_id_order() {
    // A destroy with a lower id dispatches before a create with a higher
    // one; kind never influences ordering

    let store = MemoryStateStore::new();
    store.insert_event(3u64.into(), Utc::now()).await;
    store.insert_event(4u64.into(), Utc::now()).await;

    let source = MockEventSource::new();
    source.add_enriched(enriched_event(
        4,
        EventKind::VmCreate,
        "node04",
        "example.com",
        "10.0.0.4",
    ));
    source.add_enriched(enriched_event(
        3,
        EventKind::VmDestroy,
        "node03",
        "example.com",
        "10.0.0.3",
    ));

    let registrar = MockRegistrar::new();

    let (engine, _event_rx) = ReconcilerEngine::new(
        Box::new(MockEventSource::sharing_counters_with(&source)),
        Box::new(store.clone()),
        Box::new(MockRegistrar::sharing_counters_with(&registrar)),
        minimal_config(),
    )
    .expect("engine construction succeeds");

    engine.run_cycle().await.expect("cycle succeeds");

    let ops: Vec<&'static str> = registrar.calls().into_iter().map(|call| call.op).collect();
    assert_eq!(ops, vec!["remove", "create"]);
}

#[tokio::test]
async fn duplicate_enrichment_rows_dispatch_once() {
    // A source may hand back the same id twice (the metadata join is not
    // unique); the engine must still dispatch it exactly once

    let store = MemoryStateStore::new();
    store.insert_event(7u64.into(), Utc::now()).await;

    let source = MockEventSource::new();
    source.add_enriched(enriched_event(
        7,
        EventKind::VmCreate,
        "node07",
        "example.com",
        "10.0.0.7",
    ));
    source.add_enriched(enriched_event(
        7,
        EventKind::VmCreate,
        "node07",
        "example.com",
        "10.0.0.7",
    ));

    let registrar = MockRegistrar::new();

    let (engine, _event_rx) = ReconcilerEngine::new(
        Box::new(MockEventSource::sharing_counters_with(&source)),
        Box::new(store.clone()),
        Box::new(MockRegistrar::sharing_counters_with(&registrar)),
        minimal_config(),
    )
    .expect("engine construction succeeds");

    let summary = engine.run_cycle().await.expect("cycle succeeds");

    assert_eq!(summary.processed, 1);
    assert_eq!(
        registrar.create_call_count(),
        1,
        "duplicate rows must not cause duplicate dispatch"
    );
    assert!(store.is_done(7u64.into()).await);
}
