//! Signaling coordinator that negotiates a WebRTC session for a device over a
//! publish/subscribe bus.
//!
//! A remote client publishes JSON-RPC shaped requests (`offer`, `answer`, `state`, `close`) on
//! `webrtc/<deviceId>/jsonrpc`; replies go out on `webrtc/<deviceId>/jsonrpc-reply`. The reply to
//! `offer` is produced later, when the engine reports its complete local description.

pub mod bridge;
pub mod config;
pub mod envelope;
pub mod error;
pub mod logger;
pub mod peer;
pub mod session;
pub mod signaling;
pub mod transport;
pub mod utils;

pub use config::{BrokerConfig, SignalingConfig};
pub use envelope::{Reply, Request};
pub use error::{ConfigError, DecodeError, EngineError, SignalingError, TransportError};
pub use logger::{init_logging, LoggingConfig};
pub use peer::{EngineObserver, PeerState, SessionEngine, WebRtcEngine};
pub use session::{SignalingChannel, SignalingSession};
pub use signaling::Method;
pub use transport::{
    MemoryBroker, MemoryClient, MqttClient, PubSubClient, TransportAdapter, TransportEvent,
};
pub use utils::ChannelTopics;
