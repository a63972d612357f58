//! Single-slot rendezvous between a renegotiation and its asynchronous outcome.
//!
//! The waiting operation arms the slot *before* it triggers the collaborator,
//! so an outcome delivered immediately from another thread is never lost. At
//! most one outcome is pending per call; the call's monitor guarantees it.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{oneshot, watch};
use tracing::{debug, warn};
use uuid::Uuid;

use super::state::CallState;
use crate::errors::{CallControlError, Result};
use crate::negotiation::{NegotiationEvent, NegotiationEventKind};
use crate::signaling::SignalResponse;

/// What the armed slot accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Awaited {
    /// The response to the request with this id
    Response(Uuid),
    /// A negotiation result of this kind (failures of any kind also match)
    Negotiation(NegotiationEventKind),
}

#[derive(Debug)]
pub(crate) enum Outcome {
    Response(SignalResponse),
    Negotiation(NegotiationEvent),
}

impl Outcome {
    fn matches(&self, awaited: Awaited) -> bool {
        match (self, awaited) {
            (Outcome::Response(response), Awaited::Response(id)) => response.request.id == id,
            (Outcome::Negotiation(event), Awaited::Negotiation(kind)) => !event.successful || event.kind == kind,
            _ => false,
        }
    }
}

struct Pending {
    awaited: Awaited,
    tx: oneshot::Sender<Outcome>,
}

#[derive(Default)]
pub(crate) struct RenegotiationSlot {
    pending: Mutex<Option<Pending>>,
}

impl RenegotiationSlot {
    pub(crate) fn arm(&self, awaited: Awaited) -> oneshot::Receiver<Outcome> {
        let (tx, rx) = oneshot::channel();
        if let Some(stale) = self.pending.lock().replace(Pending { awaited, tx }) {
            warn!("Replacing stale pending renegotiation outcome {:?}", stale.awaited);
        }
        rx
    }

    /// Hand `outcome` to the armed waiter; `false` when nobody waits for it
    pub(crate) fn deliver(&self, outcome: Outcome) -> bool {
        let pending = {
            let mut slot = self.pending.lock();
            match slot.as_ref() {
                Some(pending) if outcome.matches(pending.awaited) => slot.take(),
                _ => None,
            }
        };
        match pending {
            Some(pending) => pending.tx.send(outcome).is_ok(),
            None => false,
        }
    }

    pub(crate) fn clear(&self) {
        if let Some(pending) = self.pending.lock().take() {
            debug!("Dropping pending renegotiation outcome {:?}", pending.awaited);
        }
    }

    pub(crate) fn is_pending(&self) -> bool {
        self.pending.lock().is_some()
    }
}

/// Wait for the armed outcome.
///
/// Fails with [`CallControlError::Signal`] as soon as the call is no longer
/// answered, and with [`CallControlError::Timeout`] after `timeout`.
pub(crate) async fn wait_for(
    mut outcome: oneshot::Receiver<Outcome>,
    mut state: watch::Receiver<CallState>,
    timeout: Duration,
) -> Result<Outcome> {
    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);

    loop {
        let current = *state.borrow_and_update();
        if current != CallState::Answered {
            return Err(CallControlError::signal(format!("Call left the answered state ({})", current)));
        }

        tokio::select! {
            biased;
            delivered = &mut outcome => {
                return delivered.map_err(|_| CallControlError::signal("Renegotiation abandoned"));
            }
            changed = state.changed() => {
                if changed.is_err() {
                    return Err(CallControlError::signal("Call state is gone"));
                }
            }
            _ = &mut deadline => {
                return Err(CallControlError::Timeout(timeout));
            }
        }
    }
}
