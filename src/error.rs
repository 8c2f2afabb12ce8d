use thiserror::Error;

/// Why an inbound payload could not be treated as a request.
#[derive(Debug, Error, PartialEq)]
pub enum DecodeError {
    #[error("payload is not valid json: {0}")]
    Syntax(String),

    #[error("payload is not a json object")]
    NotAnObject,

    #[error("cannot find id")]
    MissingId,

    #[error("cannot find method")]
    MissingMethod,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TransportError {
    #[error("connection refused by broker {uri}")]
    ConnectionRefused { uri: String },

    #[error("client is not connected")]
    NotConnected,

    #[error("invalid topic: {topic:?}")]
    InvalidTopic { topic: String },

    #[error("not subscribed to {topic}")]
    NotSubscribed { topic: String },

    #[error("unsupported broker uri {uri:?}")]
    InvalidUri { uri: String },

    #[error("payload of {size} bytes exceeds the {limit} byte buffer")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("transport failure: {0}")]
    Other(String),
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("no peer connection")]
    NoPeerConnection,

    #[error("a peer connection is already negotiating")]
    AlreadyNegotiating,

    #[error("local description unavailable")]
    NoLocalDescription,

    #[error("invalid session description: {0}")]
    InvalidDescription(String),

    #[error(transparent)]
    WebRtc(#[from] webrtc::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Errors surfaced by channel setup and teardown. Request handling never returns these;
/// it logs and degrades to "no reply" instead.
#[derive(Debug, Error)]
pub enum SignalingError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("signaling loop has already stopped")]
    Stopped,
}

pub type Result<T, E = SignalingError> = std::result::Result<T, E>;
