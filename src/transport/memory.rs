//! In-process broker with MQTT-like session semantics.
//!
//! Topics are matched exactly. A client connecting with `clean_session = false` keeps its
//! subscriptions across a disconnect and has messages queued for it until it comes back.

use super::{validate_topic, PubSubClient, TransportEvent};
use crate::config::BrokerConfig;
use crate::error::TransportError;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, trace};

#[derive(Default)]
struct ClientSession {
    sink: Option<mpsc::UnboundedSender<TransportEvent>>,
    subscriptions: HashSet<String>,
    persistent: bool,
    queued: Vec<(String, Bytes)>,
}

#[derive(Default)]
struct BrokerState {
    offline: bool,
    sessions: HashMap<String, ClientSession>,
}

impl BrokerState {
    fn connected(&mut self, client_id: &str) -> Result<&mut ClientSession, TransportError> {
        self.sessions
            .get_mut(client_id)
            .filter(|s| s.sink.is_some())
            .ok_or(TransportError::NotConnected)
    }

    fn route(&mut self, topic: &str, payload: &Bytes) -> usize {
        let mut delivered = 0;
        for session in self.sessions.values_mut() {
            if !session.subscriptions.contains(topic) {
                continue;
            }
            let sent = session.sink.as_ref().map(|sink| {
                sink.send(TransportEvent::Message {
                    topic: topic.to_owned(),
                    payload: payload.clone(),
                })
                .is_ok()
            });
            match sent {
                Some(true) => delivered += 1,
                Some(false) => session.sink = None,
                None if session.persistent => {
                    session.queued.push((topic.to_owned(), payload.clone()))
                }
                None => {}
            }
        }
        delivered
    }
}

#[derive(Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn client(&self, client_id: impl Into<String>) -> MemoryClient {
        MemoryClient {
            broker: self.clone(),
            client_id: client_id.into(),
        }
    }

    /// While offline every connection attempt is refused.
    pub fn set_online(&self, online: bool) {
        self.state.lock().offline = !online;
    }

    pub fn is_connected(&self, client_id: &str) -> bool {
        self.state
            .lock()
            .sessions
            .get(client_id)
            .is_some_and(|s| s.sink.is_some())
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.state
            .lock()
            .sessions
            .values()
            .filter(|s| s.subscriptions.contains(topic))
            .count()
    }

    /// Publish from outside any client. Returns how many live subscribers received it.
    pub fn inject(&self, topic: &str, payload: Bytes) -> Result<usize, TransportError> {
        validate_topic(topic)?;
        Ok(self.state.lock().route(topic, &payload))
    }
}

pub struct MemoryClient {
    broker: MemoryBroker,
    client_id: String,
}

impl MemoryClient {
    fn notify(session: &ClientSession, event: TransportEvent) {
        if let Some(sink) = &session.sink {
            let _ = sink.send(event);
        }
    }
}

#[async_trait]
impl PubSubClient for MemoryClient {
    async fn connect(
        &self,
        options: &BrokerConfig,
    ) -> Result<mpsc::UnboundedReceiver<TransportEvent>, TransportError> {
        let mut state = self.broker.state.lock();
        if state.offline {
            return Err(TransportError::ConnectionRefused {
                uri: options.uri.clone(),
            });
        }

        let session = state.sessions.entry(self.client_id.clone()).or_default();
        if options.clean_session || !session.persistent {
            session.subscriptions.clear();
            session.queued.clear();
        }
        session.persistent = !options.clean_session;

        if let Some(old) = session.sink.take() {
            let _ = old.send(TransportEvent::Disconnected);
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(TransportEvent::Connected);
        for (topic, payload) in session.queued.drain(..) {
            let _ = tx.send(TransportEvent::Message { topic, payload });
        }
        session.sink = Some(tx);
        debug!("client {} connected", self.client_id);
        Ok(rx)
    }

    async fn subscribe(&self, topic: &str) -> Result<(), TransportError> {
        validate_topic(topic)?;
        let mut state = self.broker.state.lock();
        let session = state.connected(&self.client_id)?;
        session.subscriptions.insert(topic.to_owned());
        Self::notify(session, TransportEvent::Subscribed(topic.to_owned()));
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), TransportError> {
        let mut state = self.broker.state.lock();
        let session = state.connected(&self.client_id)?;
        if !session.subscriptions.remove(topic) {
            return Err(TransportError::NotSubscribed {
                topic: topic.to_owned(),
            });
        }
        Self::notify(session, TransportEvent::Unsubscribed(topic.to_owned()));
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), TransportError> {
        validate_topic(topic)?;
        let mut state = self.broker.state.lock();
        state.connected(&self.client_id)?;
        let delivered = state.route(topic, &payload);
        trace!("{} published to {topic}, {delivered} receivers", self.client_id);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        let mut state = self.broker.state.lock();
        let session = state.connected(&self.client_id)?;
        Self::notify(session, TransportEvent::Disconnected);
        session.sink = None;
        if !session.persistent {
            state.sessions.remove(&self.client_id);
        }
        debug!("client {} disconnected", self.client_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(clean_session: bool) -> BrokerConfig {
        BrokerConfig {
            clean_session,
            ..BrokerConfig::default()
        }
    }

    async fn next_message(rx: &mut mpsc::UnboundedReceiver<TransportEvent>) -> (String, Bytes) {
        loop {
            match rx.recv().await {
                Some(TransportEvent::Message { topic, payload }) => return (topic, payload),
                Some(_) => continue,
                None => panic!("event stream closed"),
            }
        }
    }

    #[tokio::test]
    async fn routes_to_exact_topic_only() {
        let broker = MemoryBroker::new();
        let a = broker.client("a");
        let b = broker.client("b");
        let mut a_rx = a.connect(&options(true)).await.unwrap();
        let _b_rx = b.connect(&options(true)).await.unwrap();
        a.subscribe("x/y").await.unwrap();

        b.publish("x/y/z", Bytes::from_static(b"no")).await.unwrap();
        b.publish("x/y", Bytes::from_static(b"yes")).await.unwrap();
        let (topic, payload) = next_message(&mut a_rx).await;
        assert_eq!(topic, "x/y");
        assert_eq!(&payload[..], b"yes");
    }

    #[tokio::test]
    async fn rejects_invalid_topics_and_handles() {
        let broker = MemoryBroker::new();
        let client = broker.client("a");
        assert_eq!(
            client.publish("t", Bytes::new()).await,
            Err(TransportError::NotConnected)
        );
        let _rx = client.connect(&options(true)).await.unwrap();
        assert!(matches!(
            client.publish("", Bytes::new()).await,
            Err(TransportError::InvalidTopic { .. })
        ));
        assert!(matches!(
            client.subscribe("webrtc/+/jsonrpc").await,
            Err(TransportError::InvalidTopic { .. })
        ));
        assert!(matches!(
            client.unsubscribe("never").await,
            Err(TransportError::NotSubscribed { .. })
        ));
    }

    #[tokio::test]
    async fn persistent_session_queues_while_offline() {
        let broker = MemoryBroker::new();
        let device = broker.client("device");
        let _rx = device.connect(&options(false)).await.unwrap();
        device.subscribe("inbox").await.unwrap();
        device.disconnect().await.unwrap();
        assert!(!broker.is_connected("device"));

        assert_eq!(broker.inject("inbox", Bytes::from_static(b"queued")).unwrap(), 0);

        let mut rx = device.connect(&options(false)).await.unwrap();
        assert_eq!(rx.recv().await, Some(TransportEvent::Connected));
        let (_, payload) = next_message(&mut rx).await;
        assert_eq!(&payload[..], b"queued");
        assert_eq!(broker.subscriber_count("inbox"), 1);
    }

    #[tokio::test]
    async fn clean_session_forgets_subscriptions() {
        let broker = MemoryBroker::new();
        let device = broker.client("device");
        let _rx = device.connect(&options(true)).await.unwrap();
        device.subscribe("inbox").await.unwrap();
        device.disconnect().await.unwrap();
        assert_eq!(broker.subscriber_count("inbox"), 0);
        assert_eq!(broker.inject("inbox", Bytes::new()).unwrap(), 0);
    }
}
