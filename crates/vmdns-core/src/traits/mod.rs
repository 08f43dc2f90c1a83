//! Core traits for the vmdns system
//!
//! This module defines the abstract interfaces that all implementations must follow.
//!
//! - [`EventSource`]: Read usage events and join them with VM metadata
//! - [`StateStore`]: Durable event-processing state for at-least-once delivery
//! - [`DnsRegistrar`]: Create/remove DNS records via registrar APIs

pub mod event_source;
pub mod registrar;
pub mod state_store;

pub use event_source::{EnrichedVmEvent, EventId, EventKind, EventSource, UsageEvent};
pub use registrar::DnsRegistrar;
pub use state_store::{MarkOutcome, StateStore};
