//! Test doubles and common utilities for architecture contract tests
//!
//! This module provides scripted doubles for the engine's seams. The state
//! store side uses the real `MemoryStateStore`, whose clones share state,
//! so tests observe exactly what the engine persisted.

use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

use vmdns_core::EngineEvent;
use vmdns_core::config::{DatabaseConfig, EngineConfig, ReconcilerConfig, RegistrarConfig};
use vmdns_core::error::Result;
use vmdns_core::traits::{
    DnsRegistrar, EnrichedVmEvent, EventId, EventKind, EventSource, UsageEvent,
};
use vmdns_core::Error;

/// A scripted EventSource serving canned events
pub struct MockEventSource {
    /// Raw events served by fetch_window (the startup preflight)
    window: Arc<Mutex<Vec<UsageEvent>>>,
    /// Enriched events served by enrich_ids, filtered to the requested ids
    enriched: Arc<Mutex<Vec<EnrichedVmEvent>>>,
    /// Ids passed to the most recent enrich_ids call
    last_enrich_ids: Arc<Mutex<Vec<EventId>>>,
    /// Call counter for fetch_window()
    fetch_call_count: Arc<AtomicUsize>,
    /// Call counter for enrich_ids()
    enrich_call_count: Arc<AtomicUsize>,
    /// When set, fetch_window() fails
    fail_fetch: Arc<AtomicBool>,
    /// When set, enrich_ids() fails
    fail_enrich: Arc<AtomicBool>,
}

impl MockEventSource {
    pub fn new() -> Self {
        Self {
            window: Arc::new(Mutex::new(Vec::new())),
            enriched: Arc::new(Mutex::new(Vec::new())),
            last_enrich_ids: Arc::new(Mutex::new(Vec::new())),
            fetch_call_count: Arc::new(AtomicUsize::new(0)),
            enrich_call_count: Arc::new(AtomicUsize::new(0)),
            fail_fetch: Arc::new(AtomicBool::new(false)),
            fail_enrich: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Script an enriched event; serving order is insertion order
    pub fn add_enriched(&self, event: EnrichedVmEvent) {
        self.enriched.lock().unwrap().push(event);
    }

    /// Script a raw event for the startup preflight window
    pub fn add_window_event(&self, event: UsageEvent) {
        self.window.lock().unwrap().push(event);
    }

    /// Get the number of times fetch_window() was called
    pub fn fetch_call_count(&self) -> usize {
        self.fetch_call_count.load(Ordering::SeqCst)
    }

    /// Get the number of times enrich_ids() was called
    pub fn enrich_call_count(&self) -> usize {
        self.enrich_call_count.load(Ordering::SeqCst)
    }

    /// Ids the engine passed to the most recent enrich_ids call
    pub fn last_enrich_ids(&self) -> Vec<EventId> {
        self.last_enrich_ids.lock().unwrap().clone()
    }

    /// Make fetch_window() fail (or succeed again)
    pub fn set_fail_fetch(&self, fail: bool) {
        self.fail_fetch.store(fail, Ordering::SeqCst);
    }

    /// Make enrich_ids() fail (or succeed again)
    pub fn set_fail_enrich(&self, fail: bool) {
        self.fail_enrich.store(fail, Ordering::SeqCst);
    }

    /// Create a new MockEventSource that shares state with an existing one
    pub fn sharing_counters_with(other: &Self) -> Self {
        Self {
            window: Arc::clone(&other.window),
            enriched: Arc::clone(&other.enriched),
            last_enrich_ids: Arc::clone(&other.last_enrich_ids),
            fetch_call_count: Arc::clone(&other.fetch_call_count),
            enrich_call_count: Arc::clone(&other.enrich_call_count),
            fail_fetch: Arc::clone(&other.fail_fetch),
            fail_enrich: Arc::clone(&other.fail_enrich),
        }
    }
}

#[async_trait::async_trait]
impl EventSource for MockEventSource {
    async fn fetch_window(&self, window_start: DateTime<Utc>) -> Result<Vec<UsageEvent>> {
        self.fetch_call_count.fetch_add(1, Ordering::SeqCst);

        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(Error::source("injected fetch_window failure"));
        }

        Ok(self
            .window
            .lock()
            .unwrap()
            .iter()
            .filter(|event| event.created > window_start)
            .cloned()
            .collect())
    }

    async fn enrich_ids(
        &self,
        ids: &[EventId],
        window_start: DateTime<Utc>,
    ) -> Result<Vec<EnrichedVmEvent>> {
        self.enrich_call_count.fetch_add(1, Ordering::SeqCst);
        *self.last_enrich_ids.lock().unwrap() = ids.to_vec();

        if self.fail_enrich.load(Ordering::SeqCst) {
            return Err(Error::source("injected enrich_ids failure"));
        }

        Ok(self
            .enriched
            .lock()
            .unwrap()
            .iter()
            .filter(|event| ids.contains(&event.id) && event.created > window_start)
            .cloned()
            .collect())
    }
}

/// One recorded registrar call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrarCall {
    pub op: &'static str,
    pub fqdn: String,
    pub ip: IpAddr,
}

/// A mock DnsRegistrar that records calls and can fail on demand
pub struct MockRegistrar {
    /// Every create/remove call, in order
    calls: Arc<Mutex<Vec<RegistrarCall>>>,
    /// Call counter for create_records()
    create_call_count: Arc<AtomicUsize>,
    /// Call counter for remove_records()
    remove_call_count: Arc<AtomicUsize>,
    /// FQDNs whose calls fail
    failing_fqdns: Arc<Mutex<HashSet<String>>>,
}

impl MockRegistrar {
    pub fn new() -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            create_call_count: Arc::new(AtomicUsize::new(0)),
            remove_call_count: Arc::new(AtomicUsize::new(0)),
            failing_fqdns: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Get the list of calls that were made
    pub fn calls(&self) -> Vec<RegistrarCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Get the number of times create_records() was called
    pub fn create_call_count(&self) -> usize {
        self.create_call_count.load(Ordering::SeqCst)
    }

    /// Get the number of times remove_records() was called
    pub fn remove_call_count(&self) -> usize {
        self.remove_call_count.load(Ordering::SeqCst)
    }

    /// Make every call for `fqdn` fail
    pub fn fail_on(&self, fqdn: &str) {
        self.failing_fqdns.lock().unwrap().insert(fqdn.to_string());
    }

    /// Create a new MockRegistrar that shares state with an existing one
    pub fn sharing_counters_with(other: &Self) -> Self {
        Self {
            calls: Arc::clone(&other.calls),
            create_call_count: Arc::clone(&other.create_call_count),
            remove_call_count: Arc::clone(&other.remove_call_count),
            failing_fqdns: Arc::clone(&other.failing_fqdns),
        }
    }

    fn record(&self, op: &'static str, fqdn: &str, ip: IpAddr) -> Result<()> {
        self.calls.lock().unwrap().push(RegistrarCall {
            op,
            fqdn: fqdn.to_string(),
            ip,
        });

        if self.failing_fqdns.lock().unwrap().contains(fqdn) {
            return Err(Error::registrar(
                "mock",
                format!("simulated outage for {}", fqdn),
            ));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl DnsRegistrar for MockRegistrar {
    async fn create_records(&self, fqdn: &str, ip: IpAddr) -> Result<()> {
        self.create_call_count.fetch_add(1, Ordering::SeqCst);
        self.record("create", fqdn, ip)
    }

    async fn remove_records(&self, fqdn: &str, ip: IpAddr) -> Result<()> {
        self.remove_call_count.fetch_add(1, Ordering::SeqCst);
        self.record("remove", fqdn, ip)
    }

    fn registrar_name(&self) -> &'static str {
        "mock"
    }
}

/// An enriched event with realistic defaults
pub fn enriched_event(
    id: u64,
    kind: EventKind,
    name: &str,
    domain: &str,
    ip: &str,
) -> EnrichedVmEvent {
    EnrichedVmEvent {
        id: EventId(id),
        kind,
        created: Utc::now() - chrono::Duration::hours(1),
        resource_name: name.to_string(),
        private_ip: ip.parse().expect("test IP parses"),
        instance_name: format!("i-2-{}-VM", id),
        vm_mac: "02:00:4c:7f:00:01".to_string(),
        datacenter_id: 1,
        os_name: "CentOS 7".to_string(),
        host_ip: "192.168.10.4".to_string(),
        host_mac: "52:54:00:12:34:56".to_string(),
        network_domain: domain.to_string(),
    }
}

/// A raw usage event created an hour ago
pub fn usage_event(id: u64, event_type: &str) -> UsageEvent {
    UsageEvent {
        id: EventId(id),
        event_type: event_type.to_string(),
        created: Utc::now() - chrono::Duration::hours(1),
        resource_id: id,
        resource_name: Some(format!("node{:02}", id)),
    }
}

/// Helper to create a minimal ReconcilerConfig for testing
pub fn minimal_config() -> ReconcilerConfig {
    ReconcilerConfig {
        database: DatabaseConfig {
            host: "db.test".to_string(),
            user: "test".to_string(),
            password: "test".to_string(),
            ..DatabaseConfig::default()
        },
        registrar: RegistrarConfig::Nictool {
            endpoint: "https://nictool.test/api".to_string(),
            username: "test".to_string(),
            password: "test".to_string(),
            ttl: 300,
        },
        engine: EngineConfig {
            poll_interval_secs: 1,
            discovery_lookback_days: 1,
            enrichment_lookback_days: 7,
            event_channel_capacity: 100,
        },
    }
}

/// Drain every engine event currently buffered on the receiver
pub fn drain_events(rx: &mut tokio::sync::mpsc::Receiver<EngineEvent>) -> Vec<EngineEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
