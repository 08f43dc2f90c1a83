//! Core reconciliation engine
//!
//! The ReconcilerEngine is responsible for:
//! - Polling the state store for unprocessed usage events
//! - Enriching them with VM/host/network metadata via EventSource
//! - Dispatching each one to the DNS side effect for its kind
//! - Durably marking every dispatched event done
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐
//! │ StateStore  │─── unprocessed ids ───┐
//! └─────────────┘                       │
//!                                       ▼
//! ┌─────────────┐              ┌──────────────────┐
//! │ EventSource │── enriched ─►│ ReconcilerEngine │───► EngineEvents
//! └─────────────┘              └────────┬─────────┘
//!                                       │ dispatch, then mark done
//!                         ┌─────────────┴─────────────┐
//!                         ▼                           ▼
//!                 ┌────────────────┐          ┌──────────────┐
//!                 │EventDispatcher │─────────►│ DnsRegistrar │
//!                 └────────────────┘          └──────────────┘
//! ```
//!
//! ## Cycle Flow
//!
//! 1. List unprocessed event ids within the discovery window
//! 2. If none, go back to sleep (no enrichment query)
//! 3. Enrich the ids with VM/host/network metadata (misses drop out silently)
//! 4. Dispatch each enriched event in ascending id order, one at a time
//! 5. Mark each dispatched event done, whether or not the DNS call succeeded
//! 6. Sleep the poll interval and repeat

use crate::config::ReconcilerConfig;
use crate::dispatch::{DispatchOutcome, EventDispatcher};
use crate::error::Result;
use crate::traits::{DnsRegistrar, EventId, EventKind, EventSource, StateStore};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Events emitted by the ReconcilerEngine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// Engine started; the preflight probe saw this many events in the
    /// discovery window (processed and unprocessed alike)
    Started {
        backlog: usize,
    },

    /// An event was dispatched and durably marked done
    EventProcessed {
        id: EventId,
        kind: EventKind,
        fqdn: String,
    },

    /// An event was marked done although its DNS mutation failed
    ///
    /// This is the queryable drift record: DNS no longer matches VM state
    /// for this name and never will without operator action.
    EventProcessedWithDrift {
        id: EventId,
        kind: EventKind,
        fqdn: String,
        error: String,
    },

    /// A cycle aborted before completing; its remaining ids stay unmarked
    /// and are re-listed on the next poll
    CycleFailed {
        error: String,
    },

    /// Engine stopped
    Stopped {
        reason: String,
    },
}

/// Result of one reconciliation cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleSummary {
    /// Unprocessed ids listed at the start of the cycle
    pub listed: usize,
    /// Events dispatched and marked done
    pub processed: usize,
    /// Subset of `processed` whose DNS mutation failed
    pub drifted: usize,
}

/// Core reconciliation engine
///
/// The engine orchestrates the entire usage-event → DNS flow. It runs
/// continuously, polling for unprocessed events at a fixed interval.
///
/// ## Lifecycle
///
/// 1. Create with [`ReconcilerEngine::new()`]
/// 2. Start with [`ReconcilerEngine::run()`]
/// 3. Engine runs until a shutdown signal is received
///
/// ## Delivery guarantees
///
/// At-least-once: an event is marked done only after its dispatch call
/// returned, and a failed mark leaves the id to be re-listed next cycle.
/// The DNS side effect itself is fire-and-forget — a registrar failure is
/// recorded as drift, never retried.
///
/// ## Concurrency
///
/// One cycle, one event, one awaited call at a time. Nothing is spawned
/// and dispatch futures are never joined, so within a cycle there is no
/// concurrency to reason about. Running a second engine against the same
/// state table is unsupported (both would list and dispatch the same ids).
pub struct ReconcilerEngine {
    /// Read-only view of the platform's event log
    source: Box<dyn EventSource>,

    /// Durable processing-state table
    state_store: Box<dyn StateStore>,

    /// Routing plus DNS side effects
    dispatcher: EventDispatcher,

    /// Seconds to sleep between cycles
    poll_interval_secs: u64,

    /// Discovery window in days
    discovery_lookback_days: u32,

    /// Enrichment window in days
    enrichment_lookback_days: u32,

    /// Sender half of the monitoring channel handed out by `new`
    event_tx: mpsc::Sender<EngineEvent>,
}

impl ReconcilerEngine {
    /// Create a new reconciliation engine
    ///
    /// # Parameters
    ///
    /// - `source`: event source implementation
    /// - `state_store`: state store implementation
    /// - `registrar`: DNS registrar implementation
    /// - `config`: full system configuration (validated here)
    ///
    /// # Returns
    ///
    /// A tuple of (engine, event_receiver) where event_receiver yields
    /// engine events for monitoring
    pub fn new(
        source: Box<dyn EventSource>,
        state_store: Box<dyn StateStore>,
        registrar: Box<dyn DnsRegistrar>,
        config: ReconcilerConfig,
    ) -> Result<(Self, mpsc::Receiver<EngineEvent>)> {
        config.validate()?;

        let (tx, rx) = mpsc::channel(config.engine.event_channel_capacity);

        let engine = Self {
            source,
            state_store,
            dispatcher: EventDispatcher::new(registrar),
            poll_interval_secs: config.engine.poll_interval_secs,
            discovery_lookback_days: config.engine.discovery_lookback_days,
            enrichment_lookback_days: config.engine.enrichment_lookback_days,
            event_tx: tx,
        };

        Ok((engine, rx))
    }

    /// Run the engine
    ///
    /// Performs the startup preflight, then polls indefinitely until a
    /// shutdown signal (SIGINT) is received.
    ///
    /// # Returns
    ///
    /// - `Ok(())`: clean shutdown
    /// - `Err(Error)`: fatal startup error (backing store unreachable)
    pub async fn run(&self) -> Result<()> {
        self.run_internal(None).await
    }

    /// Run one reconciliation cycle
    ///
    /// Public so embedders and tests can drive cycles deterministically
    /// without the polling loop.
    ///
    /// # Returns
    ///
    /// - `Ok(CycleSummary)`: the cycle completed
    /// - `Err(Error)`: a store/source call failed; everything not yet
    ///   marked in this cycle is re-listed on the next poll
    pub async fn run_cycle(&self) -> Result<CycleSummary> {
        let now = chrono::Utc::now();
        let discovery_start = now - chrono::Duration::days(i64::from(self.discovery_lookback_days));

        let ids = self.state_store.list_unprocessed_ids(discovery_start).await?;
        let mut summary = CycleSummary {
            listed: ids.len(),
            ..CycleSummary::default()
        };

        if ids.is_empty() {
            debug!("No unprocessed events in the discovery window");
            return Ok(summary);
        }
        debug!("{} unprocessed events in the discovery window", ids.len());

        let enrichment_start =
            now - chrono::Duration::days(i64::from(self.enrichment_lookback_days));
        let mut events = self.source.enrich_ids(&ids, enrichment_start).await?;

        // The loop owns its ordering and at-most-once guarantees: ascending
        // id, one dispatch per id, independent of what the source returned.
        events.sort_by_key(|event| event.id);
        events.dedup_by_key(|event| event.id);

        if events.len() < ids.len() {
            debug!(
                "{} of {} events not enrichable this cycle",
                ids.len() - events.len(),
                ids.len()
            );
        }

        for event in &events {
            let fqdn = event.fqdn();
            let outcome = self.dispatcher.dispatch(event).await;

            // Marked done regardless of the DNS outcome. A failed mark
            // aborts the rest of the batch so those ids are re-listed.
            self.state_store.mark_done(event.id).await?;
            summary.processed += 1;

            match outcome {
                DispatchOutcome::Applied => {
                    self.emit_event(EngineEvent::EventProcessed {
                        id: event.id,
                        kind: event.kind,
                        fqdn,
                    });
                }
                DispatchOutcome::DnsFailed { error } => {
                    summary.drifted += 1;
                    self.emit_event(EngineEvent::EventProcessedWithDrift {
                        id: event.id,
                        kind: event.kind,
                        fqdn,
                        error,
                    });
                }
            }
        }

        Ok(summary)
    }

    /// Internal run implementation that accepts an optional shutdown signal
    ///
    /// The in-flight cycle is never cancelled; shutdown is observed at the
    /// sleep point between cycles.
    ///
    /// # Parameters
    ///
    /// - `shutdown_rx`: optional oneshot receiver to trigger shutdown
    ///   (fed by the daemon's signal task, or by tests)
    async fn run_internal(
        &self,
        shutdown_rx: Option<tokio::sync::oneshot::Receiver<()>>,
    ) -> Result<()> {
        // Startup preflight: one probe over the discovery window. An
        // unreachable backing store at startup is fatal; after this point a
        // failure only ever aborts the current cycle.
        let discovery_start = chrono::Utc::now()
            - chrono::Duration::days(i64::from(self.discovery_lookback_days));
        let backlog = self.source.fetch_window(discovery_start).await?.len();
        info!(
            "Engine started: {} events visible in the discovery window, polling every {}s",
            backlog, self.poll_interval_secs
        );

        self.emit_event(EngineEvent::Started { backlog });

        let poll_interval = tokio::time::Duration::from_secs(self.poll_interval_secs);

        if let Some(mut rx) = shutdown_rx {
            // Caller-provided shutdown channel (daemon signal task or tests)
            loop {
                self.run_cycle_logged().await;

                tokio::select! {
                    _ = tokio::time::sleep(poll_interval) => {}

                    result = &mut rx => {
                        // A dropped sender must not masquerade as an
                        // operator-initiated signal.
                        let reason = match result {
                            Ok(()) => {
                                info!("Shutdown signal received");
                                "Shutdown signal"
                            }
                            Err(_) => {
                                warn!("Shutdown channel closed without a signal, stopping");
                                "Shutdown channel closed"
                            }
                        };
                        self.emit_event(EngineEvent::Stopped {
                            reason: reason.to_string(),
                        });
                        return Ok(());
                    }
                }
            }
        } else {
            // No channel: listen for CTRL-C directly
            loop {
                self.run_cycle_logged().await;

                tokio::select! {
                    _ = tokio::time::sleep(poll_interval) => {}

                    _ = tokio::signal::ctrl_c() => {
                        info!("Shutdown signal received");
                        self.emit_event(EngineEvent::Stopped {
                            reason: "Shutdown signal".to_string(),
                        });
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Run one cycle, folding failures into logs and engine events
    ///
    /// A failed cycle leaves its unmarked ids to the next poll; the loop
    /// keeps running (unbounded retry, no backoff beyond the interval).
    async fn run_cycle_logged(&self) {
        match self.run_cycle().await {
            Ok(summary) if summary.processed > 0 => {
                info!(
                    "Cycle complete: {} processed, {} drifted ({} listed)",
                    summary.processed, summary.drifted, summary.listed
                );
            }
            Ok(_) => {}
            Err(e) => {
                error!("Reconciliation cycle failed: {}", e);
                self.emit_event(EngineEvent::CycleFailed {
                    error: e.to_string(),
                });
            }
        }
    }

    /// Emit an engine event
    ///
    /// # Parameters
    ///
    /// - `event`: the event to emit
    fn emit_event(&self, event: EngineEvent) {
        // Send event, logging a warning if the channel is full or closed.
        // Dropping events keeps the engine from blocking on a slow consumer.
        if self.event_tx.try_send(event).is_err() {
            warn!(
                "Event channel full or closed, dropping engine event. Consider increasing event_channel_capacity."
            );
        }
    }

    /// Run the engine with an externally supplied shutdown signal
    ///
    /// The daemon uses this to tie shutdown to its own signal handling
    /// (SIGTERM as well as SIGINT); contract tests use it for
    /// deterministic shutdown. Passing `None` behaves like [`run()`].
    ///
    /// [`run()`]: ReconcilerEngine::run
    pub async fn run_with_shutdown(
        &self,
        shutdown_rx: Option<tokio::sync::oneshot::Receiver<()>>,
    ) -> Result<()> {
        self.run_internal(shutdown_rx).await
    }
}
