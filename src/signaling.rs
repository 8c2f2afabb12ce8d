//! Method dispatch for inbound signaling requests.

use crate::bridge::{OfferTicket, PendingOffer};
use crate::envelope::{Reply, Request};
use crate::peer::SessionEngine;
use tracing::{error, info, warn};

pub const RESULT_BUSY: &str = "busy";
pub const RESULT_TIMEOUT: &str = "timeout";
pub const RESULT_CLOSED: &str = "closed";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Method {
    Offer,
    Answer,
    State,
    Close,
    Unsupported(String),
}

impl Method {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Offer => "offer",
            Self::Answer => "answer",
            Self::State => "state",
            Self::Close => "close",
            Self::Unsupported(name) => name,
        }
    }
}

impl From<&str> for Method {
    fn from(name: &str) -> Self {
        match name {
            "offer" => Self::Offer,
            "answer" => Self::Answer,
            "state" => Self::State,
            "close" => Self::Close,
            other => Self::Unsupported(other.to_owned()),
        }
    }
}

/// What one request produced: replies to publish now, and possibly an offer whose reply
/// is deferred until the engine reports its local description.
#[derive(Debug, Default, PartialEq)]
pub struct Dispatch {
    pub replies: Vec<Reply>,
    pub deferred: Option<OfferTicket>,
}

impl Dispatch {
    fn reply(reply: Reply) -> Self {
        Self {
            replies: vec![reply],
            deferred: None,
        }
    }

    fn deferred(ticket: OfferTicket) -> Self {
        Self {
            replies: Vec::new(),
            deferred: Some(ticket),
        }
    }
}

/// Route a decoded request against the engine's current state.
pub async fn dispatch(
    engine: &dyn SessionEngine,
    pending: &mut PendingOffer,
    request: &Request,
) -> Dispatch {
    let method = Method::from(request.method.as_str());
    info!("METHOD={} id={} STATE={}", method.as_str(), request.id, engine.state());

    match method {
        Method::Offer => handle_offer(engine, pending, request.id).await,
        Method::Answer => handle_answer(engine, request).await,
        Method::State => Dispatch::reply(Reply::with_result(request.id, engine.state().as_str())),
        Method::Close => handle_close(engine, pending, request.id).await,
        Method::Unsupported(name) => {
            warn!("unsupported method {name:?}");
            Dispatch::reply(Reply::bare(request.id))
        }
    }
}

async fn handle_offer(engine: &dyn SessionEngine, pending: &mut PendingOffer, id: i64) -> Dispatch {
    if !engine.state().accepts_offer() {
        return Dispatch::reply(Reply::with_result(id, RESULT_BUSY));
    }
    let Some(ticket) = pending.begin(id) else {
        return Dispatch::reply(Reply::with_result(id, RESULT_BUSY));
    };

    match engine.create_offer().await {
        Ok(()) => Dispatch::deferred(ticket),
        Err(e) => {
            error!("create offer failed: {e}");
            pending.expire(ticket);
            Dispatch::reply(Reply::bare(id))
        }
    }
}

async fn handle_answer(engine: &dyn SessionEngine, request: &Request) -> Dispatch {
    let state = engine.state();
    if !state.accepts_answer() {
        warn!("answer ignored in state {state}");
        return Dispatch::reply(Reply::bare(request.id));
    }
    let Some(sdp) = request.params_str() else {
        warn!("cannot find params");
        return Dispatch::reply(Reply::bare(request.id));
    };

    match engine.set_remote_description(sdp).await {
        Ok(()) => Dispatch::reply(Reply::with_result(request.id, "")),
        Err(e) => {
            error!("set remote description failed: {e}");
            Dispatch::reply(Reply::bare(request.id))
        }
    }
}

async fn handle_close(engine: &dyn SessionEngine, pending: &mut PendingOffer, id: i64) -> Dispatch {
    let mut replies = Vec::with_capacity(2);
    if let Some(offer_id) = pending.complete() {
        info!("close supersedes pending offer {offer_id}");
        replies.push(Reply::with_result(offer_id, RESULT_CLOSED));
    }
    if let Err(e) = engine.close().await {
        error!("close failed: {e}");
    }
    replies.push(Reply::with_result(id, ""));
    Dispatch {
        replies,
        deferred: None,
    }
}
