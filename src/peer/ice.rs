use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, warn};
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::peer_connection::RTCPeerConnection;

/// Counts of gathered local candidates by type
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CandidateSummary {
    pub host: usize,
    pub srflx: usize,
    pub relay: usize,
}

pub fn analyze_candidates(candidates: &[String]) -> CandidateSummary {
    let mut summary = CandidateSummary::default();
    for candidate in candidates {
        if candidate.contains("typ host") {
            summary.host += 1;
        } else if candidate.contains("typ srflx") {
            summary.srflx += 1;
        } else if candidate.contains("typ relay") {
            summary.relay += 1;
        }
    }
    summary
}

fn dump_candidate(cand: &RTCIceCandidate) -> Option<String> {
    let init = cand.to_json().ok()?;
    debug!(
        "local candidate={} sdp_mid={:?} sdp_mline_index={:?}",
        init.candidate, init.sdp_mid, init.sdp_mline_index
    );
    Some(init.candidate)
}

/// Trace local candidates as they are gathered and summarise them once gathering ends.
///
/// Candidates are not signaled individually; they reach the peer inside the final local
/// description.
pub fn watch_gathering(pc: &Arc<RTCPeerConnection>) {
    let gathered: Arc<Mutex<Vec<String>>> = Arc::default();

    pc.on_ice_candidate(Box::new(move |cand: Option<RTCIceCandidate>| {
        match cand {
            Some(c) => {
                if let Some(line) = dump_candidate(&c) {
                    gathered.lock().push(line);
                }
            }
            None => {
                let summary = analyze_candidates(&gathered.lock());
                info!(
                    "ICE gathering finished: {} host, {} srflx, {} relay",
                    summary.host, summary.srflx, summary.relay
                );
                if summary.srflx == 0 && summary.relay == 0 {
                    warn!("no server reflexive or relay candidates, peers behind NAT may fail");
                }
            }
        }
        Box::pin(async {})
    }));

    pc.on_ice_gathering_state_change(Box::new(move |state| {
        debug!("ICE gathering state changed to: {state:?}");
        Box::pin(async {})
    }));
}
