use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum IceServerKind {
    #[default]
    Stun,
    Turn,
}

/// ICE server used by the WebRTC engine
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct IceServerConfig {
    pub url: String,
    #[serde(default)]
    pub kind: IceServerKind,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub credential: Option<String>,
}

impl IceServerConfig {
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            kind: IceServerKind::Stun,
            username: None,
            credential: None,
        }
    }
}

impl Default for IceServerConfig {
    fn default() -> Self {
        Self::stun("stun:stun.l.google.com:19302")
    }
}
