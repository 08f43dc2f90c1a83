// # vmdns-core
//
// Core library for the VM usage-event → DNS reconciliation system.
//
// ## Architecture Overview
//
// This library provides the core functionality for keeping DNS in step
// with VM lifecycle events:
// - **EventSource**: Trait for reading usage events and joining VM metadata
// - **StateStore**: Trait for the durable event-processing state table
// - **DnsRegistrar**: Trait for creating/removing forward+reverse records
// - **EventDispatcher**: Closed-enum routing from event kind to DNS effect
// - **ReconcilerEngine**: Polling loop that ties the pieces together
//
// ## Design Principles
//
// 1. **Separation of Concerns**: Core logic is separate from implementations
// 2. **Poll-Driven**: One sequential cycle at a fixed interval, no hidden concurrency
// 3. **At-Least-Once**: Events are durably marked done only after dispatch
// 4. **Library-First**: All core functionality can be used as a library

pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod state;
pub mod traits;

// Re-export core types for convenience
pub use config::{DatabaseConfig, EngineConfig, ReconcilerConfig, RegistrarConfig};
pub use dispatch::{DispatchOutcome, EventDispatcher};
pub use engine::{CycleSummary, EngineEvent, ReconcilerEngine};
pub use error::{Error, Result};
pub use state::MemoryStateStore;
pub use traits::{
    DnsRegistrar, EnrichedVmEvent, EventId, EventKind, EventSource, MarkOutcome, StateStore,
    UsageEvent,
};
