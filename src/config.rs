// Configuration for the signaling coordinator.
// Defaults match the device firmware; a TOML file may override any field.

use crate::error::ConfigError;
use crate::logger::LoggingConfig;
use crate::peer::types::{IceServerConfig, IceServerKind};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const KEEP_ALIVE_TIMEOUT_SECONDS: u64 = 60;
pub const BUF_SIZE: usize = 4096;
pub const DEFAULT_OFFER_TIMEOUT_SECONDS: u64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum MqttProtocol {
    #[serde(rename = "3.1.1")]
    V311,
    #[default]
    #[serde(rename = "5")]
    V5,
}

/// Connection options handed to the pub/sub client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub uri: String,
    pub protocol: MqttProtocol,
    pub keepalive_secs: u64,
    /// Reconnecting silently would resume with stale topic state; callers re-join instead.
    pub auto_reconnect: bool,
    /// Keep the broker-side session so queued messages survive a reconnect.
    pub clean_session: bool,
    /// Largest MQTT packet sent or accepted.
    pub buffer_size: usize,
    /// Generated from a random suffix when unset.
    pub client_id: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            uri: "mqtt://broker.emqx.io:1883".into(),
            protocol: MqttProtocol::V5,
            keepalive_secs: KEEP_ALIVE_TIMEOUT_SECONDS,
            auto_reconnect: false,
            clean_session: false,
            buffer_size: BUF_SIZE,
            client_id: None,
            username: None,
            password: None,
        }
    }
}

impl BrokerConfig {
    pub fn keepalive(&self) -> Duration {
        Duration::from_secs(self.keepalive_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalingConfig {
    pub device_id: String,
    /// Seconds an accepted offer may wait for its local description. Zero waits forever.
    pub offer_timeout_secs: u64,
    pub data_channel_label: String,
    pub broker: BrokerConfig,
    pub ice_servers: Vec<IceServerConfig>,
    pub logging: LoggingConfig,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            device_id: String::new(),
            offer_timeout_secs: DEFAULT_OFFER_TIMEOUT_SECONDS,
            data_channel_label: "datachannel".into(),
            broker: BrokerConfig::default(),
            ice_servers: vec![IceServerConfig::default()],
            logging: LoggingConfig::default(),
        }
    }
}

impl SignalingConfig {
    pub fn for_device(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            ..Self::default()
        }
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn offer_timeout(&self) -> Option<Duration> {
        (self.offer_timeout_secs > 0).then(|| Duration::from_secs(self.offer_timeout_secs))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.device_id.is_empty() {
            return Err(ConfigError::Invalid("device_id cannot be empty".into()));
        }
        if self.device_id.contains(['/', '+', '#']) {
            return Err(ConfigError::Invalid(format!(
                "device_id {:?} cannot contain '/', '+' or '#'",
                self.device_id
            )));
        }
        if self.broker.keepalive_secs > u64::from(u16::MAX) {
            return Err(ConfigError::Invalid(format!(
                "broker.keepalive_secs {} exceeds {}",
                self.broker.keepalive_secs,
                u16::MAX
            )));
        }
        if self.broker.buffer_size == 0 {
            return Err(ConfigError::Invalid("broker.buffer_size must be positive".into()));
        }
        for server in &self.ice_servers {
            if server.url.is_empty() {
                return Err(ConfigError::Invalid("ICE server url cannot be empty".into()));
            }
            if server.kind == IceServerKind::Turn
                && (server.username.is_none() || server.credential.is_none())
            {
                return Err(ConfigError::Invalid(format!(
                    "TURN server {} requires username and credential",
                    server.url
                )));
            }
        }
        Ok(())
    }
}
