//! The real-time session engine seen through the operations the coordinator needs.

pub mod connection;
pub mod data_channel;
pub mod ice;
pub mod state;
pub mod types;

use crate::error::EngineError;
use async_trait::async_trait;
use std::sync::Arc;

pub use connection::WebRtcEngine;
pub use state::PeerState;
pub use types::{IceServerConfig, IceServerKind};

/// Notifications the engine delivers from its own execution context.
///
/// Implementations must not block: the engine may call these from inside its callbacks.
pub trait EngineObserver: Send + Sync {
    /// The complete local description is ready (ICE gathering finished).
    fn on_local_description(&self, description: String);

    fn on_connection_state_change(&self, state: PeerState);
}

/// Operations a session engine exposes to the signaling coordinator.
#[async_trait]
pub trait SessionEngine: Send + Sync {
    /// Register the single observer for this engine instance, replacing any previous one.
    fn set_observer(&self, observer: Arc<dyn EngineObserver>);

    /// Start a local offer. The description arrives later through the observer.
    async fn create_offer(&self) -> Result<(), EngineError>;

    async fn set_remote_description(&self, sdp: &str) -> Result<(), EngineError>;

    fn state(&self) -> PeerState;

    async fn close(&self) -> Result<(), EngineError>;
}
