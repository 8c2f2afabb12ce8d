//! Publish/subscribe transport the signaling channel rides on.

pub mod memory;
pub mod mqtt;

use crate::config::BrokerConfig;
use crate::error::TransportError;
use crate::utils::ChannelTopics;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

pub use memory::{MemoryBroker, MemoryClient};
pub use mqtt::{ConnectOptions, MqttClient};

/// Publish topics must be concrete: no wildcards, not empty.
pub(crate) fn validate_topic(topic: &str) -> Result<(), TransportError> {
    if topic.is_empty() || topic.contains(['+', '#']) {
        return Err(TransportError::InvalidTopic {
            topic: topic.to_owned(),
        });
    }
    Ok(())
}

/// Events a connected client delivers from its event-delivery context.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Connected,
    Disconnected,
    Subscribed(String),
    Unsubscribed(String),
    Message { topic: String, payload: Bytes },
    Error(String),
}

/// Client primitives of a publish/subscribe broker connection.
#[async_trait]
pub trait PubSubClient: Send + Sync {
    /// Open the connection. Events, starting with `Connected`, arrive on the returned receiver.
    async fn connect(
        &self,
        options: &BrokerConfig,
    ) -> Result<mpsc::UnboundedReceiver<TransportEvent>, TransportError>;

    async fn subscribe(&self, topic: &str) -> Result<(), TransportError>;

    async fn unsubscribe(&self, topic: &str) -> Result<(), TransportError>;

    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), TransportError>;

    async fn disconnect(&self) -> Result<(), TransportError>;
}

/// A client bound to one device's pair of topics.
///
/// Publishing is fire-and-forget and teardown is best effort: failures are logged here and
/// never handed back to the request path.
pub struct TransportAdapter {
    client: Arc<dyn PubSubClient>,
    topics: ChannelTopics,
    options: BrokerConfig,
}

impl TransportAdapter {
    pub fn new(
        client: Arc<dyn PubSubClient>,
        topics: ChannelTopics,
        options: BrokerConfig,
    ) -> Self {
        Self {
            client,
            topics,
            options,
        }
    }

    pub fn topics(&self) -> &ChannelTopics {
        &self.topics
    }

    pub fn is_request_topic(&self, topic: &str) -> bool {
        topic == self.topics.subscribe
    }

    pub async fn open(&self) -> Result<mpsc::UnboundedReceiver<TransportEvent>, TransportError> {
        info!(
            "connecting to {} (keepalive {}s, auto_reconnect={}, clean_session={})",
            self.options.uri,
            self.options.keepalive_secs,
            self.options.auto_reconnect,
            self.options.clean_session
        );
        match self.client.connect(&self.options).await {
            Ok(events) => {
                info!("connect succeeded");
                Ok(events)
            }
            Err(e) => {
                error!("connect failed: {e}");
                Err(e)
            }
        }
    }

    /// Subscribe to the request topic; called once the broker confirms the connection.
    pub async fn subscribe(&self) -> bool {
        match self.client.subscribe(&self.topics.subscribe).await {
            Ok(()) => {
                debug!("subscribed to {}", self.topics.subscribe);
                true
            }
            Err(e) => {
                error!("subscribe to {} failed: {e}", self.topics.subscribe);
                false
            }
        }
    }

    pub async fn publish(&self, message: &str) {
        debug!("publish {} bytes to {}", message.len(), self.topics.publish);
        if let Err(e) = self
            .client
            .publish(&self.topics.publish, Bytes::copy_from_slice(message.as_bytes()))
            .await
        {
            error!("publish to {} failed: {e}", self.topics.publish);
        }
    }

    /// Unsubscribe, then disconnect. Disconnect is attempted even if unsubscribe failed.
    pub async fn close(&self) {
        if let Err(e) = self.client.unsubscribe(&self.topics.subscribe).await {
            error!("unsubscribe from {} failed: {e}", self.topics.subscribe);
        }
        if let Err(e) = self.client.disconnect().await {
            error!("failed to disconnect from broker: {e}");
        }
    }
}
