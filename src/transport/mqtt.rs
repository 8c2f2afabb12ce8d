//! MQTT broker connection on `rumqttc`.
//!
//! The client speaks 3.1.1 or 5 depending on [`BrokerConfig::protocol`]. Its event loop runs on
//! a spawned task; unless `auto_reconnect` is set, the first connection error ends it and the
//! caller has to join again.

use super::{validate_topic, PubSubClient, TransportEvent};
use crate::config::{BrokerConfig, MqttProtocol};
use crate::error::TransportError;
use crate::utils::random_device_id;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub const DEFAULT_PORT: u16 = 1883;
const CLIENT_ID_PREFIX: &str = "peer-signaling";
const REQUEST_CAPACITY: usize = 16;
const CONNACK_TIMEOUT: Duration = Duration::from_secs(10);
const DISCONNECT_GRACE: Duration = Duration::from_secs(1);
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Everything the broker connection is opened with, resolved from a [`BrokerConfig`].
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectOptions {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub protocol: MqttProtocol,
    pub keepalive: Duration,
    pub clean_session: bool,
    /// Largest packet sent or accepted.
    pub max_packet_size: usize,
    pub credentials: Option<(String, String)>,
    pub auto_reconnect: bool,
}

impl ConnectOptions {
    pub fn from_config(config: &BrokerConfig) -> Result<Self, TransportError> {
        let (host, port) = parse_uri(&config.uri)?;
        let client_id = config
            .client_id
            .clone()
            .unwrap_or_else(|| random_device_id(CLIENT_ID_PREFIX));
        let credentials = config
            .username
            .clone()
            .map(|user| (user, config.password.clone().unwrap_or_default()));

        Ok(Self {
            host,
            port,
            client_id,
            protocol: config.protocol,
            keepalive: config.keepalive(),
            clean_session: config.clean_session,
            max_packet_size: config.buffer_size,
            credentials,
            auto_reconnect: config.auto_reconnect,
        })
    }

    pub fn v311(&self) -> rumqttc::MqttOptions {
        let mut options =
            rumqttc::MqttOptions::new(self.client_id.clone(), self.host.clone(), self.port);
        options
            .set_keep_alive(self.keepalive)
            .set_clean_session(self.clean_session)
            .set_max_packet_size(self.max_packet_size, self.max_packet_size);
        if let Some((user, password)) = &self.credentials {
            options.set_credentials(user.clone(), password.clone());
        }
        options
    }

    pub fn v5(&self) -> rumqttc::v5::MqttOptions {
        let mut options =
            rumqttc::v5::MqttOptions::new(self.client_id.clone(), self.host.clone(), self.port);
        options
            .set_keep_alive(self.keepalive)
            .set_clean_start(self.clean_session)
            .set_max_packet_size(Some(u32::try_from(self.max_packet_size).unwrap_or(u32::MAX)));
        if let Some((user, password)) = &self.credentials {
            options.set_credentials(user.clone(), password.clone());
        }
        options
    }
}

/// `mqtt://host[:port]` or `tcp://host[:port]`.
fn parse_uri(uri: &str) -> Result<(String, u16), TransportError> {
    let invalid = || TransportError::InvalidUri {
        uri: uri.to_owned(),
    };
    let rest = uri
        .strip_prefix("mqtt://")
        .or_else(|| uri.strip_prefix("tcp://"))
        .ok_or_else(invalid)?;
    let authority = rest.split('/').next().unwrap_or_default();
    let (host, port) = match authority.rsplit_once(':') {
        Some((host, port)) => (host, port.parse::<u16>().map_err(|_| invalid())?),
        None => (authority, DEFAULT_PORT),
    };
    if host.is_empty() {
        return Err(invalid());
    }
    Ok((host.to_owned(), port))
}

fn ensure_fits(size: usize, limit: usize) -> Result<(), TransportError> {
    if size > limit {
        return Err(TransportError::PayloadTooLarge { size, limit });
    }
    Ok(())
}

fn client_error(e: impl std::fmt::Display) -> TransportError {
    TransportError::Other(e.to_string())
}

/// Topics of in-flight (un)subscribe requests. Acks carry only a packet id and the broker
/// answers in request order, so the oldest entry names the acknowledged topic.
#[derive(Default)]
struct AckQueue {
    subscribes: Mutex<VecDeque<String>>,
    unsubscribes: Mutex<VecDeque<String>>,
}

impl AckQueue {
    fn subscribed(&self) -> TransportEvent {
        TransportEvent::Subscribed(self.subscribes.lock().pop_front().unwrap_or_default())
    }

    fn unsubscribed(&self) -> TransportEvent {
        TransportEvent::Unsubscribed(self.unsubscribes.lock().pop_front().unwrap_or_default())
    }

    fn clear(&self) {
        self.subscribes.lock().clear();
        self.unsubscribes.lock().clear();
    }
}

/// One protocol version's event loop, reduced to the events the session consumes.
#[async_trait]
trait EventSource: Send + 'static {
    /// `Ok(None)` for traffic nobody upstream cares about.
    async fn next_event(&mut self, acks: &AckQueue) -> Result<Option<TransportEvent>, String>;
}

#[async_trait]
impl EventSource for rumqttc::EventLoop {
    async fn next_event(&mut self, acks: &AckQueue) -> Result<Option<TransportEvent>, String> {
        use rumqttc::{Event, Packet};

        let packet = match self.poll().await.map_err(|e| e.to_string())? {
            Event::Incoming(packet) => packet,
            Event::Outgoing(_) => return Ok(None),
        };
        Ok(match packet {
            Packet::ConnAck(_) => Some(TransportEvent::Connected),
            Packet::Publish(publish) => Some(TransportEvent::Message {
                topic: publish.topic,
                payload: publish.payload,
            }),
            Packet::SubAck(_) => Some(acks.subscribed()),
            Packet::UnsubAck(_) => Some(acks.unsubscribed()),
            Packet::Disconnect => Some(TransportEvent::Disconnected),
            _ => None,
        })
    }
}

#[async_trait]
impl EventSource for rumqttc::v5::EventLoop {
    async fn next_event(&mut self, acks: &AckQueue) -> Result<Option<TransportEvent>, String> {
        use rumqttc::v5::mqttbytes::v5::Packet;
        use rumqttc::v5::Event;

        let packet = match self.poll().await.map_err(|e| e.to_string())? {
            Event::Incoming(packet) => packet,
            Event::Outgoing(_) => return Ok(None),
        };
        Ok(match packet {
            Packet::ConnAck(_) => Some(TransportEvent::Connected),
            Packet::Publish(publish) => Some(TransportEvent::Message {
                topic: String::from_utf8_lossy(&publish.topic).into_owned(),
                payload: publish.payload,
            }),
            Packet::SubAck(_) => Some(acks.subscribed()),
            Packet::UnsubAck(_) => Some(acks.unsubscribed()),
            Packet::Disconnect(_) => Some(TransportEvent::Disconnected),
            _ => None,
        })
    }
}

async fn await_connack<S: EventSource>(source: &mut S, acks: &AckQueue) -> Result<(), String> {
    let wait = async {
        loop {
            if let Some(TransportEvent::Connected) = source.next_event(acks).await? {
                return Ok::<(), String>(());
            }
        }
    };
    tokio::time::timeout(CONNACK_TIMEOUT, wait)
        .await
        .map_err(|_| "timed out waiting for CONNACK".to_string())?
}

async fn drive<S: EventSource>(
    mut source: S,
    events: mpsc::UnboundedSender<TransportEvent>,
    acks: Arc<AckQueue>,
    closing: Arc<AtomicBool>,
    auto_reconnect: bool,
) {
    loop {
        match source.next_event(&acks).await {
            Ok(Some(event)) => {
                if events.send(event).is_err() {
                    break;
                }
            }
            Ok(None) => {}
            Err(_) if closing.load(Ordering::Acquire) => break,
            Err(e) => {
                warn!("MQTT connection error: {e}");
                let _ = events.send(TransportEvent::Error(e));
                let _ = events.send(TransportEvent::Disconnected);
                if !auto_reconnect {
                    break;
                }
                acks.clear();
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        }
    }
    debug!("MQTT event loop stopped");
}

#[derive(Clone)]
enum Client {
    V311(rumqttc::AsyncClient),
    V5(rumqttc::v5::AsyncClient),
}

impl Client {
    async fn subscribe(&self, topic: &str) -> Result<(), TransportError> {
        match self {
            Self::V311(c) => c
                .subscribe(topic, rumqttc::QoS::AtMostOnce)
                .await
                .map_err(client_error),
            Self::V5(c) => c
                .subscribe(topic, rumqttc::v5::mqttbytes::QoS::AtMostOnce)
                .await
                .map_err(client_error),
        }
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), TransportError> {
        match self {
            Self::V311(c) => c.unsubscribe(topic).await.map_err(client_error),
            Self::V5(c) => c.unsubscribe(topic).await.map_err(client_error),
        }
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        match self {
            Self::V311(c) => c
                .publish(topic, rumqttc::QoS::AtMostOnce, false, payload)
                .await
                .map_err(client_error),
            Self::V5(c) => c
                .publish(topic, rumqttc::v5::mqttbytes::QoS::AtMostOnce, false, payload)
                .await
                .map_err(client_error),
        }
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        match self {
            Self::V311(c) => c.disconnect().await.map_err(client_error),
            Self::V5(c) => c.disconnect().await.map_err(client_error),
        }
    }
}

struct Connection {
    client: Client,
    max_packet_size: usize,
    acks: Arc<AckQueue>,
    closing: Arc<AtomicBool>,
    driver: JoinHandle<()>,
}

/// [`PubSubClient`] talking to a real MQTT broker.
#[derive(Default)]
pub struct MqttClient {
    connection: Mutex<Option<Connection>>,
}

impl MqttClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn handle(&self) -> Result<(Client, usize, Arc<AckQueue>), TransportError> {
        self.connection
            .lock()
            .as_ref()
            .map(|c| (c.client.clone(), c.max_packet_size, c.acks.clone()))
            .ok_or(TransportError::NotConnected)
    }
}

#[async_trait]
impl PubSubClient for MqttClient {
    async fn connect(
        &self,
        config: &BrokerConfig,
    ) -> Result<mpsc::UnboundedReceiver<TransportEvent>, TransportError> {
        let options = ConnectOptions::from_config(config)?;
        if let Some(old) = self.connection.lock().take() {
            old.closing.store(true, Ordering::Release);
            old.driver.abort();
        }

        let refused = |reason: String| {
            warn!("broker {} refused connection: {reason}", config.uri);
            TransportError::ConnectionRefused {
                uri: config.uri.clone(),
            }
        };
        let (tx, rx) = mpsc::unbounded_channel();
        let acks = Arc::new(AckQueue::default());
        let closing = Arc::new(AtomicBool::new(false));

        let (client, driver) = match options.protocol {
            MqttProtocol::V311 => {
                let (client, mut eventloop) =
                    rumqttc::AsyncClient::new(options.v311(), REQUEST_CAPACITY);
                await_connack(&mut eventloop, &acks).await.map_err(refused)?;
                let _ = tx.send(TransportEvent::Connected);
                let driver = tokio::spawn(drive(
                    eventloop,
                    tx,
                    acks.clone(),
                    closing.clone(),
                    options.auto_reconnect,
                ));
                (Client::V311(client), driver)
            }
            MqttProtocol::V5 => {
                let (client, mut eventloop) =
                    rumqttc::v5::AsyncClient::new(options.v5(), REQUEST_CAPACITY);
                await_connack(&mut eventloop, &acks).await.map_err(refused)?;
                let _ = tx.send(TransportEvent::Connected);
                let driver = tokio::spawn(drive(
                    eventloop,
                    tx,
                    acks.clone(),
                    closing.clone(),
                    options.auto_reconnect,
                ));
                (Client::V5(client), driver)
            }
        };

        info!(
            "connected to {}:{} as {}",
            options.host, options.port, options.client_id
        );
        *self.connection.lock() = Some(Connection {
            client,
            max_packet_size: options.max_packet_size,
            acks,
            closing,
            driver,
        });
        Ok(rx)
    }

    async fn subscribe(&self, topic: &str) -> Result<(), TransportError> {
        let (client, _, acks) = self.handle()?;
        acks.subscribes.lock().push_back(topic.to_owned());
        let result = client.subscribe(topic).await;
        if result.is_err() {
            acks.subscribes.lock().pop_back();
        }
        result
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), TransportError> {
        let (client, _, acks) = self.handle()?;
        acks.unsubscribes.lock().push_back(topic.to_owned());
        let result = client.unsubscribe(topic).await;
        if result.is_err() {
            acks.unsubscribes.lock().pop_back();
        }
        result
    }

    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), TransportError> {
        validate_topic(topic)?;
        let (client, limit, _) = self.handle()?;
        ensure_fits(payload.len(), limit)?;
        client.publish(topic, payload.to_vec()).await
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        let connection = self
            .connection
            .lock()
            .take()
            .ok_or(TransportError::NotConnected)?;
        connection.closing.store(true, Ordering::Release);
        let result = connection.client.disconnect().await;

        let mut driver = connection.driver;
        if tokio::time::timeout(DISCONNECT_GRACE, &mut driver).await.is_err() {
            driver.abort();
        }
        result
    }
}
