// # Event Source Trait
//
// Defines the read-only view over the orchestration platform's usage-event
// log and the metadata joins needed to act on an event.
//
// ## Implementations
//
// - CloudStack MySQL: `vmdns-source-cloudstack` crate
// - Future: other orchestrators exposing an append-only event table
//
// ## Usage
//
// ```rust,ignore
// use vmdns_core::EventSource;
// use chrono::{Duration, Utc};
//
// #[tokio::main]
// async fn main() -> anyhow::Result<()> {
//     let source = /* EventSource implementation */;
//
//     let window_start = Utc::now() - Duration::days(1);
//     let events = source.fetch_window(window_start).await?;
//     println!("{} events in window", events.len());
//
//     Ok(())
// }
// ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;
use std::net::IpAddr;

/// Identifier of a usage event
///
/// Assigned by the orchestration platform: unique and monotonically
/// increasing, so ascending id order is also observation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventId(pub u64);

impl EventId {
    /// The raw identifier value
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl From<u64> for EventId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Lifecycle event kinds this system acts on
///
/// The platform's event log carries many more types; everything outside
/// this enum is filtered out before dispatch, so routing is a closed match
/// and an unhandled type cannot slip through silently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A VM was created
    VmCreate,
    /// A VM was destroyed
    VmDestroy,
}

impl EventKind {
    /// The platform's wire string for this kind
    pub const fn as_db_str(self) -> &'static str {
        match self {
            EventKind::VmCreate => "VM.CREATE",
            EventKind::VmDestroy => "VM.DESTROY",
        }
    }

    /// Parse a platform event-type string
    ///
    /// Returns `None` for every type this system does not act on.
    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "VM.CREATE" => Some(EventKind::VmCreate),
            "VM.DESTROY" => Some(EventKind::VmDestroy),
            _ => None,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_db_str())
    }
}

/// A bare usage event as recorded by the platform
///
/// Immutable and owned by the external event log; this system only reads it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageEvent {
    /// Event identifier
    pub id: EventId,
    /// Raw platform event type (e.g. "VM.CREATE", "NET.IPASSIGN")
    pub event_type: String,
    /// When the platform recorded the event
    pub created: DateTime<Utc>,
    /// Identifier of the resource the event refers to
    pub resource_id: u64,
    /// Display name of the resource, when the platform recorded one
    pub resource_name: Option<String>,
}

/// A usage event joined with the VM/host/network metadata needed to act on it
///
/// Built fresh each cycle from the source-of-truth tables and handed to the
/// dispatcher; never cached across cycles. Every field is populated by name
/// from the join row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrichedVmEvent {
    /// Event identifier
    pub id: EventId,
    /// Which lifecycle transition this is
    pub kind: EventKind,
    /// When the platform recorded the event
    pub created: DateTime<Utc>,
    /// VM resource name; becomes the host label of the FQDN
    pub resource_name: String,
    /// VM private address; target of the forward record
    pub private_ip: IpAddr,
    /// Platform-internal instance name
    pub instance_name: String,
    /// MAC address of the VM's NIC
    pub vm_mac: String,
    /// Datacenter the VM runs in
    pub datacenter_id: u64,
    /// Guest OS display name
    pub os_name: String,
    /// Address of the host carrying the VM
    pub host_ip: String,
    /// MAC address of the host
    pub host_mac: String,
    /// Network domain of the VM's network; becomes the zone part of the FQDN
    pub network_domain: String,
}

impl EnrichedVmEvent {
    /// Fully qualified domain name for this VM
    ///
    /// Always `resource_name.network_domain`, no trailing dot.
    pub fn fqdn(&self) -> String {
        format!("{}.{}", self.resource_name, self.network_domain)
    }
}

/// Trait for event source implementations
///
/// Both methods are pure reads; an event source never writes to the
/// platform's tables. Implementations must be thread-safe and usable
/// across async tasks.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Fetch all usage events created after `window_start`
    ///
    /// Used at startup as a connectivity probe and backlog report.
    ///
    /// # Returns
    ///
    /// - `Ok(Vec<UsageEvent>)`: every event in the window, ordered by id
    /// - `Err(Error)`: the event log could not be queried
    async fn fetch_window(
        &self,
        window_start: DateTime<Utc>,
    ) -> Result<Vec<UsageEvent>, crate::Error>;

    /// Join the given event ids against VM/host/network metadata
    ///
    /// Only `VM.CREATE`/`VM.DESTROY` events created after `window_start`
    /// are considered. Ids whose join yields no usable row are silently
    /// absent from the result (an enrichment miss, not an error); such ids
    /// stay unprocessed and are re-listed next cycle.
    ///
    /// # Returns
    ///
    /// - `Ok(Vec<EnrichedVmEvent>)`: at most one element per requested id;
    ///   order is unspecified, dispatch ordering is owned by the engine
    /// - `Err(Error)`: the metadata tables could not be queried
    async fn enrich_ids(
        &self,
        ids: &[EventId],
        window_start: DateTime<Utc>,
    ) -> Result<Vec<EnrichedVmEvent>, crate::Error>;
}
