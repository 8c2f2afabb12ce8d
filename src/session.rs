//! One device's signaling session: joined channel, bound engine, pending offer.
//!
//! All state lives in [`SignalingSession`], owned by a single task. Transport deliveries,
//! engine callbacks and offer timers reach it only as messages, so the pending offer is never
//! touched from two contexts at once.

use crate::bridge::{DescriptionBridge, EngineEvent, OfferTicket, PendingOffer};
use crate::config::SignalingConfig;
use crate::envelope::{self, Reply};
use crate::error::{Result, SignalingError};
use crate::peer::{PeerState, SessionEngine};
use crate::signaling::{self, RESULT_CLOSED, RESULT_TIMEOUT};
use crate::transport::{MqttClient, PubSubClient, TransportAdapter, TransportEvent};
use crate::utils::ChannelTopics;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub struct SignalingSession {
    transport: TransportAdapter,
    engine: Arc<dyn SessionEngine>,
    pending: PendingOffer,
    offer_timeout: Option<Duration>,
    timers: mpsc::UnboundedSender<OfferTicket>,
}

impl SignalingSession {
    pub fn new(
        transport: TransportAdapter,
        engine: Arc<dyn SessionEngine>,
        offer_timeout: Option<Duration>,
        timers: mpsc::UnboundedSender<OfferTicket>,
    ) -> Self {
        Self {
            transport,
            engine,
            pending: PendingOffer::default(),
            offer_timeout,
            timers,
        }
    }

    pub fn topics(&self) -> &ChannelTopics {
        self.transport.topics()
    }

    pub fn pending_request_id(&self) -> Option<i64> {
        self.pending.id()
    }

    pub async fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connected => {
                info!("MQTT_EVENT_CONNECTED");
                self.transport.subscribe().await;
            }
            TransportEvent::Disconnected => info!("MQTT_EVENT_DISCONNECTED"),
            TransportEvent::Subscribed(topic) => info!("MQTT_EVENT_SUBSCRIBED {topic}"),
            TransportEvent::Unsubscribed(topic) => info!("MQTT_EVENT_UNSUBSCRIBED {topic}"),
            TransportEvent::Error(reason) => warn!("MQTT_EVENT_ERROR {reason}"),
            TransportEvent::Message { topic, payload } => {
                if self.transport.is_request_topic(&topic) {
                    self.handle_request(&payload).await;
                } else {
                    debug!("ignoring message on {topic}");
                }
            }
        }
    }

    /// Decode, dispatch and answer one inbound payload.
    pub async fn handle_request(&mut self, payload: &[u8]) {
        debug!("DATA={}", String::from_utf8_lossy(payload));
        let request = match envelope::decode(payload) {
            Ok(request) => request,
            Err(e) => {
                warn!("dropping request: {e}");
                return;
            }
        };

        let outcome = signaling::dispatch(self.engine.as_ref(), &mut self.pending, &request).await;
        for reply in &outcome.replies {
            self.publish(reply).await;
        }
        if let Some(ticket) = outcome.deferred {
            self.arm_offer_timer(ticket);
        }
    }

    pub async fn handle_engine_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::LocalDescription(description) => {
                self.on_local_description(description).await
            }
            EngineEvent::StateChange(state) => self.on_state_change(state).await,
        }
    }

    async fn on_local_description(&mut self, description: String) {
        let age = self.pending.age().map_or(0, |age| age.num_milliseconds());
        match self.pending.complete() {
            Some(id) => {
                info!("answering offer {id} with local description after {age} ms");
                self.publish(&Reply::with_result(id, description)).await;
            }
            None => debug!("local description with no pending offer, not publishing"),
        }
    }

    async fn on_state_change(&mut self, state: PeerState) {
        info!("PeerConnectionState: {state}");
        // a stale Closed from a torn-down connection must not cancel a fresh offer
        if state != PeerState::Closed || self.engine.state() != PeerState::Closed {
            return;
        }
        if let Some(id) = self.pending.complete() {
            warn!("engine closed while offer {id} was pending");
            self.publish(&Reply::with_result(id, RESULT_CLOSED)).await;
        }
    }

    pub async fn handle_offer_timeout(&mut self, ticket: OfferTicket) {
        let Some(id) = self.pending.expire(ticket) else {
            return;
        };
        warn!("offer {id} timed out waiting for local description");
        if let Err(e) = self.engine.close().await {
            error!("close after offer timeout failed: {e}");
        }
        self.publish(&Reply::with_result(id, RESULT_TIMEOUT)).await;
    }

    fn arm_offer_timer(&self, ticket: OfferTicket) {
        let Some(timeout) = self.offer_timeout else {
            return;
        };
        let timers = self.timers.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = timers.send(ticket);
        });
    }

    async fn publish(&self, reply: &Reply) {
        match envelope::encode(reply) {
            Ok(text) => self.transport.publish(&text).await,
            Err(e) => error!("failed to encode reply {}: {e}", reply.id),
        }
    }

    pub async fn leave(&self) {
        self.transport.close().await;
    }
}

enum Control {
    PendingId(oneshot::Sender<Option<i64>>),
    Leave(oneshot::Sender<()>),
}

/// A joined signaling channel. Dropping it without [`leave`](Self::leave) still tears the
/// transport down once the loop notices.
pub struct SignalingChannel {
    topics: ChannelTopics,
    control: mpsc::Sender<Control>,
    task: JoinHandle<()>,
}

impl SignalingChannel {
    /// Bind `engine` to the device's topics and connect `client` to the broker.
    pub async fn join(
        config: &SignalingConfig,
        client: Arc<dyn PubSubClient>,
        engine: Arc<dyn SessionEngine>,
    ) -> Result<Self> {
        config.validate()?;
        let topics = ChannelTopics::for_device(&config.device_id);
        info!("joining channel {}", topics.subscribe);

        let transport = TransportAdapter::new(client, topics.clone(), config.broker.clone());
        let inbound = transport.open().await?;

        let (engine_tx, engine_rx) = mpsc::unbounded_channel();
        engine.set_observer(Arc::new(DescriptionBridge::new(engine_tx)));

        let (timer_tx, timer_rx) = mpsc::unbounded_channel();
        let session = SignalingSession::new(transport, engine, config.offer_timeout(), timer_tx);
        let (control_tx, control_rx) = mpsc::channel(8);
        let task = tokio::spawn(run(session, inbound, engine_rx, timer_rx, control_rx));

        Ok(Self {
            topics,
            control: control_tx,
            task,
        })
    }

    /// [`join`](Self::join) over a broker connection opened from `config.broker`.
    pub async fn join_mqtt(
        config: &SignalingConfig,
        engine: Arc<dyn SessionEngine>,
    ) -> Result<Self> {
        Self::join(config, Arc::new(MqttClient::new()), engine).await
    }

    pub fn topics(&self) -> &ChannelTopics {
        &self.topics
    }

    pub async fn pending_request_id(&self) -> Result<Option<i64>> {
        let (tx, rx) = oneshot::channel();
        self.control
            .send(Control::PendingId(tx))
            .await
            .map_err(|_| SignalingError::Stopped)?;
        rx.await.map_err(|_| SignalingError::Stopped)
    }

    /// Unsubscribe and disconnect, then stop the loop.
    pub async fn leave(self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.control
            .send(Control::Leave(tx))
            .await
            .map_err(|_| SignalingError::Stopped)?;
        rx.await.map_err(|_| SignalingError::Stopped)?;
        self.task.await.map_err(|_| SignalingError::Stopped)
    }
}

async fn run(
    mut session: SignalingSession,
    mut inbound: mpsc::UnboundedReceiver<TransportEvent>,
    mut engine_events: mpsc::UnboundedReceiver<EngineEvent>,
    mut timers: mpsc::UnboundedReceiver<OfferTicket>,
    mut control: mpsc::Receiver<Control>,
) {
    loop {
        tokio::select! {
            Some(event) = inbound.recv() => session.handle_transport_event(event).await,
            Some(event) = engine_events.recv() => session.handle_engine_event(event).await,
            Some(ticket) = timers.recv() => session.handle_offer_timeout(ticket).await,
            command = control.recv() => match command {
                Some(Control::PendingId(reply)) => {
                    let _ = reply.send(session.pending_request_id());
                }
                Some(Control::Leave(done)) => {
                    info!("leaving channel {}", session.topics().subscribe);
                    session.leave().await;
                    let _ = done.send(());
                    break;
                }
                None => {
                    session.leave().await;
                    break;
                }
            },
        }
    }
}
