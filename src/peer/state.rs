use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of the session engine as seen by the signaling coordinator.
///
/// The coordinator never owns these transitions; it reads them from the engine to gate methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PeerState {
    /// No negotiation in progress. The only state in which an offer is accepted.
    #[default]
    Closed,
    /// Local offer created, waiting for the remote answer.
    New,
    /// Remote description applied, connectivity checks running.
    Connecting,
    /// Transport established.
    Completed,
    Disconnected,
    Failed,
}

impl PeerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::New => "new",
            Self::Connecting => "connecting",
            Self::Completed => "completed",
            Self::Disconnected => "disconnected",
            Self::Failed => "failed",
        }
    }

    /// True when a fresh offer may be started.
    pub fn accepts_offer(&self) -> bool {
        matches!(self, Self::Closed)
    }

    /// True when a remote answer may be applied.
    pub fn accepts_answer(&self) -> bool {
        matches!(self, Self::New)
    }
}

impl fmt::Display for PeerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_closed_accepts_offer() {
        assert!(PeerState::Closed.accepts_offer());
        for state in [
            PeerState::New,
            PeerState::Connecting,
            PeerState::Completed,
            PeerState::Disconnected,
            PeerState::Failed,
        ] {
            assert!(!state.accepts_offer(), "{state} must not accept an offer");
        }
    }

    #[test]
    fn only_new_accepts_answer() {
        assert!(PeerState::New.accepts_answer());
        assert!(!PeerState::Closed.accepts_answer());
        assert!(!PeerState::Connecting.accepts_answer());
    }

    #[test]
    fn names_are_lowercase() {
        assert_eq!(PeerState::Completed.to_string(), "completed");
        assert_eq!(
            serde_json::to_string(&PeerState::Connecting).unwrap(),
            "\"connecting\""
        );
    }
}
