// # Event Dispatcher
//
// Routes an enriched event to the DNS side effect for its kind.
//
// ## Purpose
//
// The dispatcher is pure routing plus FQDN construction: a closed match
// over `EventKind` where each arm calls a statically-known registrar
// operation. All side effects live behind the `DnsRegistrar` trait.
//
// ## Failure policy
//
// Registrar failures are swallowed, not propagated. A failed DNS mutation
// must not block the event pipeline or cause infinite reprocessing of a
// permanently-failing record, so the dispatcher reports
// `DispatchOutcome::DnsFailed` and the engine still marks the event done.
// The cost is drift between VM state and DNS state, which is why the
// outcome is a distinguishable value and not just a log line.

use crate::traits::event_source::{EnrichedVmEvent, EventKind};
use crate::traits::registrar::DnsRegistrar;

/// Outcome of dispatching one enriched event
///
/// There is no failure variant that blocks completion; every dispatch ends
/// with the event eligible for `mark_done`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The DNS mutation succeeded
    Applied,
    /// The DNS mutation failed and will never be retried
    ///
    /// The event is still marked done; DNS now drifts from VM state until
    /// an operator intervenes.
    DnsFailed {
        /// Stringified registrar error
        error: String,
    },
}

/// Routes enriched events to the registrar
pub struct EventDispatcher {
    registrar: Box<dyn DnsRegistrar>,
}

impl EventDispatcher {
    /// Create a dispatcher delegating side effects to the given registrar
    pub fn new(registrar: Box<dyn DnsRegistrar>) -> Self {
        Self { registrar }
    }

    /// Dispatch one event
    ///
    /// Infallible by type: a registrar error is logged once at error level
    /// and folded into the returned outcome.
    pub async fn dispatch(&self, event: &EnrichedVmEvent) -> DispatchOutcome {
        let fqdn = event.fqdn();

        let result = match event.kind {
            EventKind::VmCreate => {
                tracing::info!(
                    "Creating DNS records for event {}: {} -> {}",
                    event.id,
                    fqdn,
                    event.private_ip
                );
                self.registrar.create_records(&fqdn, event.private_ip).await
            }
            EventKind::VmDestroy => {
                tracing::info!(
                    "Removing DNS records for event {}: {} ({})",
                    event.id,
                    fqdn,
                    event.private_ip
                );
                self.registrar.remove_records(&fqdn, event.private_ip).await
            }
        };

        match result {
            Ok(()) => DispatchOutcome::Applied,
            Err(e) => {
                tracing::error!(
                    "Unable to {} records for {} via {}: {} (event {} will still be marked done)",
                    match event.kind {
                        EventKind::VmCreate => "add",
                        EventKind::VmDestroy => "remove",
                    },
                    fqdn,
                    self.registrar.registrar_name(),
                    e,
                    event.id
                );
                DispatchOutcome::DnsFailed {
                    error: e.to_string(),
                }
            }
        }
    }
}
