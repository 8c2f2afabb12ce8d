use crate::peer::types::{IceServerConfig, IceServerKind};
use rand::Rng;

/// Topics a device listens and answers on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelTopics {
    pub subscribe: String,
    pub publish: String,
}

impl ChannelTopics {
    pub fn for_device(device_id: &str) -> Self {
        Self {
            subscribe: format!("webrtc/{device_id}/jsonrpc"),
            publish: format!("webrtc/{device_id}/jsonrpc-reply"),
        }
    }
}

/// `<prefix>-<mac as 12 lowercase hex digits>`, the id devices advertise themselves with.
pub fn device_id_from_mac(prefix: &str, mac: [u8; 6]) -> String {
    format!("{prefix}-{}", hex::encode(mac))
}

pub fn random_device_id(prefix: &str) -> String {
    format!("{prefix}-{}", hex::encode(rand::rng().random::<[u8; 6]>()))
}

// Adds the scheme to an ICE server url when it is missing
pub fn add_ice_url_scheme(config: &IceServerConfig) -> String {
    if config.url.starts_with("turn:")
        || config.url.starts_with("turns:")
        || config.url.starts_with("stun:")
        || config.url.starts_with("stuns:")
    {
        config.url.clone()
    } else {
        let scheme = match config.kind {
            IceServerKind::Turn => "turn:",
            IceServerKind::Stun => "stun:",
        };
        format!("{}{}", scheme, config.url)
    }
}
