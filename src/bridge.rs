//! Correlates the engine's asynchronous local description with the offer request that asked
//! for it.

use crate::peer::{EngineObserver, PeerState};
use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Identifies one accepted offer. The generation distinguishes offers that reuse an id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OfferTicket {
    pub id: i64,
    generation: u64,
}

/// The at-most-one offer waiting for its local description.
#[derive(Debug, Default)]
pub struct PendingOffer {
    current: Option<OfferTicket>,
    generation: u64,
    since: Option<DateTime<Utc>>,
}

impl PendingOffer {
    pub fn id(&self) -> Option<i64> {
        self.current.map(|t| t.id)
    }

    pub fn is_pending(&self) -> bool {
        self.current.is_some()
    }

    /// How long the current offer has been waiting.
    pub fn age(&self) -> Option<TimeDelta> {
        self.since.map(|since| Utc::now() - since)
    }

    /// Start waiting on `id`. Returns `None` if another offer is still pending.
    pub fn begin(&mut self, id: i64) -> Option<OfferTicket> {
        if self.current.is_some() {
            return None;
        }
        self.generation += 1;
        let ticket = OfferTicket {
            id,
            generation: self.generation,
        };
        self.current = Some(ticket);
        self.since = Some(Utc::now());
        Some(ticket)
    }

    /// Take the pending id. Only the first call after `begin` yields it.
    pub fn complete(&mut self) -> Option<i64> {
        self.since = None;
        self.current.take().map(|t| t.id)
    }

    /// Take the pending id only if it is still the offer `ticket` refers to.
    pub fn expire(&mut self, ticket: OfferTicket) -> Option<i64> {
        if self.current == Some(ticket) {
            self.complete()
        } else {
            None
        }
    }
}

/// Events the signaling loop consumes from the engine side.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    LocalDescription(String),
    StateChange(PeerState),
}

/// Engine observer that hands every callback to the signaling loop.
///
/// The loop is the only owner of the pending offer, so callbacks never touch it directly.
pub struct DescriptionBridge {
    tx: mpsc::UnboundedSender<EngineEvent>,
}

impl DescriptionBridge {
    pub fn new(tx: mpsc::UnboundedSender<EngineEvent>) -> Self {
        Self { tx }
    }

    fn forward(&self, event: EngineEvent) {
        if self.tx.send(event).is_err() {
            warn!("signaling loop is gone, dropping engine event");
        }
    }
}

impl EngineObserver for DescriptionBridge {
    fn on_local_description(&self, description: String) {
        debug!("local description ready ({} bytes)", description.len());
        self.forward(EngineEvent::LocalDescription(description));
    }

    fn on_connection_state_change(&self, state: PeerState) {
        debug!("peer connection state: {state}");
        self.forward(EngineEvent::StateChange(state));
    }
}
