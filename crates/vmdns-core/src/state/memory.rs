// # Memory State Store
//
// In-memory implementation of StateStore.
//
// ## Purpose
//
// Keeps the processing-state table and a mirror of the event log in memory.
// Because the real event log is owned by an external platform, this store
// also carries the set of known events (seeded via `insert_event`) so
// `list_unprocessed_ids` has something to list.
//
// ## Crash Behavior
//
// - All marks are lost on restart
// - Every event in the discovery window is then dispatched again, so DNS
//   mutations repeat (harmless for create, a no-op for remove)
//
// ## When to Use
//
// - Contract and unit tests
// - Embedding the engine against a synthetic event feed

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::Error;
use crate::traits::event_source::EventId;
use crate::traits::state_store::{MarkOutcome, StateStore};

#[derive(Debug, Default)]
struct Inner {
    /// Known events: id -> creation time
    events: BTreeMap<EventId, DateTime<Utc>>,
    /// Ids with a state row
    done: BTreeSet<EventId>,
}

/// In-memory state store implementation
///
/// State lives in maps behind an `RwLock`; cloning shares the same state,
/// which lets tests keep a handle on a store that was boxed into an engine.
///
/// # Example
///
/// ```rust,no_run
/// use vmdns_core::state::MemoryStateStore;
/// use vmdns_core::traits::state_store::StateStore;
/// use chrono::{Duration, Utc};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = MemoryStateStore::new();
///     store.insert_event(100.into(), Utc::now()).await;
///
///     let ids = store.list_unprocessed_ids(Utc::now() - Duration::days(1)).await?;
///     assert_eq!(ids.len(), 1);
///
///     store.mark_done(100.into()).await?;
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct MemoryStateStore {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryStateStore {
    /// Create a new empty memory state store
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner::default())),
        }
    }

    /// Add an event to the store's view of the event log
    ///
    /// Mirrors the platform writing a row to its usage-event table.
    pub async fn insert_event(&self, id: EventId, created: DateTime<Utc>) {
        let mut guard = self.inner.write().await;
        guard.events.insert(id, created);
    }

    /// Check whether an id has a state row
    pub async fn is_done(&self, id: EventId) -> bool {
        self.inner.read().await.done.contains(&id)
    }

    /// Get the number of state rows (events marked done)
    pub async fn len(&self) -> usize {
        self.inner.read().await.done.len()
    }

    /// Check if the store has no state rows
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.done.is_empty()
    }

    /// Clear all events and state rows
    pub async fn clear(&self) {
        let mut guard = self.inner.write().await;
        guard.events.clear();
        guard.done.clear();
    }
}

impl Default for MemoryStateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn list_unprocessed_ids(
        &self,
        window_start: DateTime<Utc>,
    ) -> Result<Vec<EventId>, Error> {
        let guard = self.inner.read().await;
        // BTreeMap iteration is ascending by id, which is the contract order
        Ok(guard
            .events
            .iter()
            .filter(|(id, created)| **created >= window_start && !guard.done.contains(id))
            .map(|(id, _)| *id)
            .collect())
    }

    async fn mark_done(&self, id: EventId) -> Result<MarkOutcome, Error> {
        let mut guard = self.inner.write().await;
        if guard.done.insert(id) {
            Ok(MarkOutcome::Recorded)
        } else {
            Ok(MarkOutcome::AlreadyDone)
        }
    }
}
