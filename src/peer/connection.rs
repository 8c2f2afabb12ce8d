use crate::config::SignalingConfig;
use crate::error::EngineError;
use crate::peer::data_channel::{attach_dc, DataChannelStatus};
use crate::peer::ice::watch_gathering;
use crate::peer::state::PeerState;
use crate::peer::types::IceServerConfig;
use crate::peer::{EngineObserver, SessionEngine};
use crate::utils::add_ice_url_scheme;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use webrtc::{
    api::APIBuilder,
    data_channel::data_channel_init::RTCDataChannelInit,
    ice_transport::ice_server::RTCIceServer,
    peer_connection::{
        configuration::RTCConfiguration,
        peer_connection_state::RTCPeerConnectionState,
        policy::{bundle_policy::RTCBundlePolicy, rtcp_mux_policy::RTCRtcpMuxPolicy},
        sdp::session_description::RTCSessionDescription,
        RTCPeerConnection,
    },
};

/// The live peer connection, if any. `generation` advances whenever a connection is replaced
/// or torn down so that callbacks from an old connection can recognise themselves as stale.
#[derive(Default)]
struct Slot {
    peer: Option<Arc<RTCPeerConnection>>,
    generation: u64,
    observer: Option<Arc<dyn EngineObserver>>,
    /// A remote answer was applied to `peer`.
    answered: bool,
}

impl Slot {
    /// `Some(observer)` while `generation` is still current.
    fn current(&self, generation: u64) -> Option<Option<Arc<dyn EngineObserver>>> {
        (self.generation == generation).then(|| self.observer.clone())
    }

    fn retire(&mut self) -> (Option<Arc<RTCPeerConnection>>, Option<Arc<dyn EngineObserver>>) {
        self.generation += 1;
        self.answered = false;
        (self.peer.take(), self.observer.clone())
    }
}

/// [`SessionEngine`] backed by a `webrtc` peer connection with a single data channel.
///
/// The engine is `Closed` while no peer connection exists; each offer builds a fresh one.
pub struct WebRtcEngine {
    ice_servers: Vec<IceServerConfig>,
    data_channel_label: String,
    data_channel: Arc<DataChannelStatus>,
    slot: Arc<Mutex<Slot>>,
}

impl WebRtcEngine {
    pub fn new(ice_servers: Vec<IceServerConfig>, data_channel_label: impl Into<String>) -> Self {
        Self {
            ice_servers,
            data_channel_label: data_channel_label.into(),
            data_channel: Arc::default(),
            slot: Arc::default(),
        }
    }

    pub fn from_config(config: &SignalingConfig) -> Self {
        Self::new(config.ice_servers.clone(), config.data_channel_label.clone())
    }

    async fn new_peer(&self, generation: u64) -> Result<Arc<RTCPeerConnection>, EngineError> {
        let api = APIBuilder::new().build();
        let pc = Arc::new(api.new_peer_connection(rtc_config(&self.ice_servers)).await?);

        watch_gathering(&pc);

        let slot = Arc::downgrade(&self.slot);
        let data_channel = self.data_channel.clone();
        pc.on_peer_connection_state_change(Box::new(move |st: RTCPeerConnectionState| {
            let state = map_state(st);
            if state != PeerState::Completed {
                data_channel.set_open(false);
            }
            let slot = slot.clone();
            let data_channel = data_channel.clone();
            Box::pin(async move {
                let Some(slot) = slot.upgrade() else {
                    return;
                };
                let current = slot.lock().current(generation);
                let Some(observer) = current else {
                    debug!("state {state} from a replaced peer connection");
                    return;
                };
                info!("peer connection state changed to {state}");
                if state == PeerState::Completed {
                    info!("data channel open: {}", data_channel.is_open());
                }
                if let Some(observer) = observer {
                    observer.on_connection_state_change(state);
                }
                if state == PeerState::Failed {
                    tokio::spawn(teardown(slot, generation));
                }
            })
        }));

        Ok(pc)
    }

    async fn start_offer(
        &self,
        pc: &Arc<RTCPeerConnection>,
        generation: u64,
    ) -> Result<(), EngineError> {
        let dc = pc
            .create_data_channel(&self.data_channel_label, Some(RTCDataChannelInit::default()))
            .await?;
        attach_dc(&dc, self.data_channel.clone());

        let offer = pc.create_offer(None).await?;
        let mut gather_complete = pc.gathering_complete_promise().await;
        pc.set_local_description(offer).await?;

        let pc = Arc::downgrade(pc);
        let slot = Arc::downgrade(&self.slot);
        tokio::spawn(async move {
            let _ = gather_complete.recv().await;
            let (Some(pc), Some(slot)) = (pc.upgrade(), slot.upgrade()) else {
                return;
            };
            let current = slot.lock().current(generation);
            let Some(observer) = current else {
                debug!("gathering finished for a replaced peer connection");
                return;
            };
            match (pc.local_description().await, observer) {
                (Some(desc), Some(observer)) => observer.on_local_description(desc.sdp),
                (Some(_), None) => warn!("local description ready but no observer registered"),
                (None, _) => {
                    error!("after ICE gathering: {}", EngineError::NoLocalDescription);
                    teardown(slot, generation).await;
                }
            }
        });
        Ok(())
    }
}

#[async_trait]
impl SessionEngine for WebRtcEngine {
    fn set_observer(&self, observer: Arc<dyn EngineObserver>) {
        self.slot.lock().observer = Some(observer);
    }

    async fn create_offer(&self) -> Result<(), EngineError> {
        let generation = {
            let mut slot = self.slot.lock();
            if slot.peer.is_some() {
                return Err(EngineError::AlreadyNegotiating);
            }
            slot.generation += 1;
            slot.generation
        };

        let pc = self.new_peer(generation).await?;
        self.slot.lock().peer = Some(pc.clone());

        if let Err(e) = self.start_offer(&pc, generation).await {
            teardown(self.slot.clone(), generation).await;
            return Err(e);
        }
        Ok(())
    }

    async fn set_remote_description(&self, sdp: &str) -> Result<(), EngineError> {
        let (pc, generation) = {
            let slot = self.slot.lock();
            let pc = slot.peer.clone().ok_or(EngineError::NoPeerConnection)?;
            (pc, slot.generation)
        };
        let answer = RTCSessionDescription::answer(sdp.to_owned())
            .map_err(|e| EngineError::InvalidDescription(e.to_string()))?;
        pc.set_remote_description(answer).await?;

        let mut slot = self.slot.lock();
        if slot.generation == generation {
            slot.answered = true;
        }
        Ok(())
    }

    fn state(&self) -> PeerState {
        let slot = self.slot.lock();
        let Some(pc) = slot.peer.as_ref() else {
            return PeerState::Closed;
        };
        // transports start asynchronously after the answer is applied
        match map_state(pc.connection_state()) {
            PeerState::New if slot.answered => PeerState::Connecting,
            state => state,
        }
    }

    async fn close(&self) -> Result<(), EngineError> {
        let (pc, observer) = self.slot.lock().retire();
        self.data_channel.set_open(false);
        let result = match pc {
            Some(pc) => pc.close().await.map_err(EngineError::from),
            None => Ok(()),
        };
        if let Some(observer) = observer {
            observer.on_connection_state_change(PeerState::Closed);
        }
        result
    }
}

/// Close the connection of `generation` if it is still current and report `Closed`.
async fn teardown(slot: Arc<Mutex<Slot>>, generation: u64) {
    let retired = {
        let mut slot = slot.lock();
        (slot.generation == generation).then(|| slot.retire())
    };
    let Some((pc, observer)) = retired else {
        return;
    };
    if let Some(pc) = pc {
        if let Err(e) = pc.close().await {
            warn!("closing failed peer connection: {e}");
        }
    }
    if let Some(observer) = observer {
        observer.on_connection_state_change(PeerState::Closed);
    }
}

pub fn map_state(state: RTCPeerConnectionState) -> PeerState {
    match state {
        RTCPeerConnectionState::Unspecified | RTCPeerConnectionState::New => PeerState::New,
        RTCPeerConnectionState::Connecting => PeerState::Connecting,
        RTCPeerConnectionState::Connected => PeerState::Completed,
        RTCPeerConnectionState::Disconnected => PeerState::Disconnected,
        RTCPeerConnectionState::Failed => PeerState::Failed,
        RTCPeerConnectionState::Closed => PeerState::Closed,
    }
}

/// Peer connection configuration from the configured ICE servers
fn rtc_config(servers: &[IceServerConfig]) -> RTCConfiguration {
    let ice_servers = servers
        .iter()
        .map(|server| RTCIceServer {
            urls: vec![add_ice_url_scheme(server)],
            username: server.username.clone().unwrap_or_default(),
            credential: server.credential.clone().unwrap_or_default(),
            ..Default::default()
        })
        .collect();

    RTCConfiguration {
        ice_servers,
        bundle_policy: RTCBundlePolicy::MaxBundle,
        rtcp_mux_policy: RTCRtcpMuxPolicy::Require,
        ..Default::default()
    }
}
