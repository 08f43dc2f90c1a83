// # State Store Trait
//
// Defines the interface for durable event-processing state.
//
// ## Purpose
//
// The state store is the system's only writable table: a mapping from event
// id to processing state, kept separate from the platform's own event log.
// A row exists for an id iff that event has been dispatched; absence means
// "not yet processed or currently in flight". Rows are never deleted.
//
// ## Implementations
//
// - CloudStack MySQL: `vmdns-source-cloudstack` crate
// - In-memory (tests/embedding): `vmdns_core::state::MemoryStateStore`
//
// ## Usage
//
// ```rust,ignore
// use vmdns_core::{EventId, MarkOutcome, StateStore};
// use chrono::{Duration, Utc};
//
// #[tokio::main]
// async fn main() -> anyhow::Result<()> {
//     let store = /* StateStore implementation */;
//
//     let ids = store.list_unprocessed_ids(Utc::now() - Duration::days(1)).await?;
//     for id in ids {
//         // dispatch, then:
//         store.mark_done(id).await?;
//     }
//
//     Ok(())
// }
// ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::traits::event_source::EventId;

/// Result of marking an event done
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkOutcome {
    /// A state row was inserted; this call made the event durable
    Recorded,
    /// The event was already marked done; nothing changed
    AlreadyDone,
}

/// Trait for state store implementations
///
/// All methods must be safe to call concurrently from multiple tasks,
/// though the engine itself never overlaps calls. The design assumes a
/// single worker process per state table; two workers sharing one table
/// can race `list_unprocessed_ids`/`mark_done` and double-dispatch.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// List ids of events with no processing-state row
    ///
    /// Considers events created at or after `window_start`.
    ///
    /// # Returns
    ///
    /// - `Ok(Vec<EventId>)`: unprocessed ids, ordered ascending
    /// - `Err(Error)`: the store could not be queried; the caller must
    ///   treat the whole cycle as failed (nothing was marked)
    async fn list_unprocessed_ids(
        &self,
        window_start: DateTime<Utc>,
    ) -> Result<Vec<EventId>, crate::Error>;

    /// Durably mark an event as processed
    ///
    /// Idempotent upsert: inserts `(id, DONE)` when no row exists, and is
    /// a reported no-op when the row is already there. Never partially
    /// commits; on `Err` the caller must assume the id is still unmarked
    /// and will be re-listed next cycle (at-least-once delivery).
    ///
    /// # Returns
    ///
    /// - `Ok(MarkOutcome::Recorded)`: the row was inserted by this call
    /// - `Ok(MarkOutcome::AlreadyDone)`: the row already existed
    /// - `Err(Error)`: the write failed durably
    async fn mark_done(&self, id: EventId) -> Result<MarkOutcome, crate::Error>;
}
