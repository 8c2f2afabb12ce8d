#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use peer_signaling::{
    BrokerConfig, ChannelTopics, EngineError, EngineObserver, MemoryBroker, MemoryClient,
    PeerState, PubSubClient, SessionEngine, SignalingConfig, TransportEvent,
};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

pub const DEVICE: &str = "esp32-246f2800abcd";

/// Engine whose callbacks fire only when a test says so.
#[derive(Default)]
pub struct ScriptedEngine {
    state: Mutex<PeerState>,
    observer: Mutex<Option<Arc<dyn EngineObserver>>>,
    pub offers: Mutex<u32>,
    pub closes: Mutex<u32>,
    pub remote: Mutex<Option<String>>,
}

impl ScriptedEngine {
    pub fn set_state(&self, state: PeerState) {
        *self.state.lock() = state;
    }

    fn observer(&self) -> Option<Arc<dyn EngineObserver>> {
        self.observer.lock().clone()
    }

    pub fn has_observer(&self) -> bool {
        self.observer.lock().is_some()
    }

    pub fn emit_description(&self, sdp: &str) {
        if let Some(observer) = self.observer() {
            observer.on_local_description(sdp.to_owned());
        }
    }

    /// The engine drops the connection on its own.
    pub fn fail_and_close(&self) {
        self.set_state(PeerState::Closed);
        if let Some(observer) = self.observer() {
            observer.on_connection_state_change(PeerState::Failed);
            observer.on_connection_state_change(PeerState::Closed);
        }
    }
}

#[async_trait]
impl SessionEngine for ScriptedEngine {
    fn set_observer(&self, observer: Arc<dyn EngineObserver>) {
        *self.observer.lock() = Some(observer);
    }

    async fn create_offer(&self) -> Result<(), EngineError> {
        *self.offers.lock() += 1;
        self.set_state(PeerState::New);
        Ok(())
    }

    async fn set_remote_description(&self, sdp: &str) -> Result<(), EngineError> {
        *self.remote.lock() = Some(sdp.to_owned());
        self.set_state(PeerState::Connecting);
        Ok(())
    }

    fn state(&self) -> PeerState {
        *self.state.lock()
    }

    async fn close(&self) -> Result<(), EngineError> {
        *self.closes.lock() += 1;
        self.set_state(PeerState::Closed);
        if let Some(observer) = self.observer() {
            observer.on_connection_state_change(PeerState::Closed);
        }
        Ok(())
    }
}

pub fn config() -> SignalingConfig {
    let mut config = SignalingConfig::for_device(DEVICE);
    config.logging.enabled = false;
    config
}

/// The browser side: publishes requests and reads replies.
pub struct RemotePeer {
    client: MemoryClient,
    events: mpsc::UnboundedReceiver<TransportEvent>,
    topics: ChannelTopics,
}

impl RemotePeer {
    pub async fn connect(broker: &MemoryBroker) -> Self {
        let client = broker.client("browser");
        let options = BrokerConfig {
            clean_session: true,
            ..BrokerConfig::default()
        };
        let events = client.connect(&options).await.unwrap();
        let topics = ChannelTopics::for_device(DEVICE);
        client.subscribe(&topics.publish).await.unwrap();
        Self {
            client,
            events,
            topics,
        }
    }

    pub async fn send(&self, payload: &str) {
        self.client
            .publish(&self.topics.subscribe, Bytes::from(payload.to_owned()))
            .await
            .unwrap();
    }

    pub async fn next_reply_within(&mut self, wait: Duration) -> Value {
        tokio::time::timeout(wait, async {
            loop {
                match self.events.recv().await {
                    Some(TransportEvent::Message { payload, .. }) => {
                        return serde_json::from_slice::<Value>(&payload).unwrap();
                    }
                    Some(_) => continue,
                    None => panic!("remote peer disconnected"),
                }
            }
        })
        .await
        .expect("no reply arrived")
    }

    pub async fn next_reply(&mut self) -> Value {
        self.next_reply_within(Duration::from_secs(2)).await
    }

    pub async fn expect_silence(&mut self) {
        let waited = tokio::time::timeout(Duration::from_millis(300), async {
            loop {
                match self.events.recv().await {
                    Some(TransportEvent::Message { payload, .. }) => return Some(payload),
                    Some(_) => continue,
                    None => return None,
                }
            }
        })
        .await;
        if let Ok(Some(payload)) = waited {
            panic!("unexpected reply {}", String::from_utf8_lossy(&payload));
        }
    }
}

/// Wait until the device has subscribed to its request topic.
pub async fn wait_subscribed(broker: &MemoryBroker) {
    let topic = ChannelTopics::for_device(DEVICE).subscribe;
    for _ in 0..200 {
        if broker.subscriber_count(&topic) == 1 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("device never subscribed to {topic}");
}
