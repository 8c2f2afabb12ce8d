mod common;

use common::{config, wait_subscribed, RemotePeer, ScriptedEngine};
use peer_signaling::{
    ConfigError, MemoryBroker, PeerState, SignalingChannel, SignalingConfig, SignalingError,
    TransportError,
};
use serde_json::json;
use std::sync::Arc;

async fn setup() -> (MemoryBroker, Arc<ScriptedEngine>, SignalingChannel, RemotePeer) {
    setup_with(config()).await
}

async fn setup_with(
    config: SignalingConfig,
) -> (MemoryBroker, Arc<ScriptedEngine>, SignalingChannel, RemotePeer) {
    let broker = MemoryBroker::new();
    let engine = Arc::new(ScriptedEngine::default());
    let channel = SignalingChannel::join(&config, Arc::new(broker.client("device")), engine.clone())
        .await
        .unwrap();
    wait_subscribed(&broker).await;
    let remote = RemotePeer::connect(&broker).await;
    (broker, engine, channel, remote)
}

/// Requests are handled in arrival order, so once this state query is answered every
/// earlier request has been dispatched.
async fn settle(remote: &mut RemotePeer, id: i64) {
    remote
        .send(&json!({"jsonrpc": "2.0", "id": id, "method": "state"}).to_string())
        .await;
    assert_eq!(remote.next_reply().await["id"], id);
}

#[tokio::test]
async fn offer_is_answered_with_the_local_description() {
    let (_broker, engine, channel, mut remote) = setup().await;

    remote.send(r#"{"jsonrpc":"2.0","id":7,"method":"offer"}"#).await;
    // no immediate reply: the next thing published answers the state query
    remote.send(r#"{"jsonrpc":"2.0","id":8,"method":"state"}"#).await;
    assert_eq!(
        remote.next_reply().await,
        json!({"jsonrpc": "2.0", "id": 8, "result": "new"})
    );
    assert_eq!(channel.pending_request_id().await.unwrap(), Some(7));

    engine.emit_description("sdp-blob");
    assert_eq!(
        remote.next_reply().await,
        json!({"jsonrpc": "2.0", "id": 7, "result": "sdp-blob"})
    );
    assert_eq!(channel.pending_request_id().await.unwrap(), None);
    assert_eq!(*engine.offers.lock(), 1);
}

#[tokio::test]
async fn second_offer_is_busy_and_keeps_the_first_pending() {
    let (_broker, engine, channel, mut remote) = setup().await;

    remote.send(r#"{"jsonrpc":"2.0","id":1,"method":"offer"}"#).await;
    remote.send(r#"{"jsonrpc":"2.0","id":2,"method":"offer"}"#).await;
    assert_eq!(
        remote.next_reply().await,
        json!({"jsonrpc": "2.0", "id": 2, "result": "busy"})
    );
    assert_eq!(channel.pending_request_id().await.unwrap(), Some(1));
    assert_eq!(*engine.offers.lock(), 1);

    engine.emit_description("v=0");
    assert_eq!(remote.next_reply().await["id"], 1);
}

#[tokio::test]
async fn offer_is_busy_outside_closed_state() {
    let (_broker, engine, channel, mut remote) = setup().await;
    engine.set_state(PeerState::Completed);

    remote.send(r#"{"jsonrpc":"2.0","id":3,"method":"offer"}"#).await;
    assert_eq!(
        remote.next_reply().await,
        json!({"jsonrpc": "2.0", "id": 3, "result": "busy"})
    );
    assert_eq!(channel.pending_request_id().await.unwrap(), None);
}

#[tokio::test]
async fn spurious_description_publishes_nothing() {
    let (_broker, engine, _channel, mut remote) = setup().await;

    remote.send(r#"{"jsonrpc":"2.0","id":7,"method":"offer"}"#).await;
    settle(&mut remote, 100).await;
    engine.emit_description("first");
    assert_eq!(remote.next_reply().await["result"], "first");

    engine.emit_description("second");
    remote.expect_silence().await;
}

#[tokio::test]
async fn malformed_requests_are_dropped() {
    let (_broker, _engine, _channel, mut remote) = setup().await;

    for payload in [
        "{not json",
        r#"{"jsonrpc":"2.0","method":"state"}"#,
        r#"{"jsonrpc":"2.0","id":null,"method":"state"}"#,
        r#"{"jsonrpc":"2.0","id":"5","method":"state"}"#,
        r#"{"jsonrpc":"2.0","id":5}"#,
        r#"{"jsonrpc":"2.0","id":5,"method":["state"]}"#,
    ] {
        remote.send(payload).await;
    }
    remote.send(r#"{"jsonrpc":"2.0","id":6,"method":"state"}"#).await;
    assert_eq!(
        remote.next_reply().await,
        json!({"jsonrpc": "2.0", "id": 6, "result": "closed"})
    );
    remote.expect_silence().await;
}

#[tokio::test]
async fn answer_in_new_moves_the_session_on() {
    let (_broker, engine, _channel, mut remote) = setup().await;

    remote.send(r#"{"jsonrpc":"2.0","id":1,"method":"offer"}"#).await;
    settle(&mut remote, 100).await;
    engine.emit_description("local");
    assert_eq!(remote.next_reply().await["id"], 1);

    remote
        .send(r#"{"jsonrpc":"2.0","id":2,"method":"answer","params":"v=0 remote"}"#)
        .await;
    assert_eq!(
        remote.next_reply().await,
        json!({"jsonrpc": "2.0", "id": 2, "result": ""})
    );
    assert_eq!(engine.remote.lock().as_deref(), Some("v=0 remote"));

    remote.send(r#"{"jsonrpc":"2.0","id":3,"method":"state"}"#).await;
    assert_eq!(remote.next_reply().await["result"], "connecting");
}

#[tokio::test]
async fn answer_outside_new_is_acknowledged_without_result() {
    let (_broker, engine, _channel, mut remote) = setup().await;

    remote
        .send(r#"{"jsonrpc":"2.0","id":4,"method":"answer","params":"v=0"}"#)
        .await;
    assert_eq!(remote.next_reply().await, json!({"jsonrpc": "2.0", "id": 4}));
    assert!(engine.remote.lock().is_none());
}

#[tokio::test]
async fn state_reflects_the_engine() {
    let (_broker, engine, _channel, mut remote) = setup().await;

    for (id, state) in [
        (1, PeerState::Closed),
        (2, PeerState::Completed),
        (3, PeerState::Disconnected),
    ] {
        engine.set_state(state);
        remote
            .send(&json!({"jsonrpc": "2.0", "id": id, "method": "state"}).to_string())
            .await;
        assert_eq!(
            remote.next_reply().await,
            json!({"jsonrpc": "2.0", "id": id, "result": state.as_str()})
        );
    }
}

#[tokio::test]
async fn close_always_succeeds_and_closes_the_engine() {
    let (_broker, engine, _channel, mut remote) = setup().await;
    engine.set_state(PeerState::Completed);

    remote.send(r#"{"jsonrpc":"2.0","id":5,"method":"close"}"#).await;
    assert_eq!(
        remote.next_reply().await,
        json!({"jsonrpc": "2.0", "id": 5, "result": ""})
    );
    remote.send(r#"{"jsonrpc":"2.0","id":6,"method":"state"}"#).await;
    assert_eq!(remote.next_reply().await["result"], "closed");
    assert_eq!(*engine.closes.lock(), 1);
}

#[tokio::test]
async fn close_answers_a_pending_offer() {
    let (_broker, engine, channel, mut remote) = setup().await;

    remote.send(r#"{"jsonrpc":"2.0","id":1,"method":"offer"}"#).await;
    remote.send(r#"{"jsonrpc":"2.0","id":2,"method":"close"}"#).await;
    assert_eq!(
        remote.next_reply().await,
        json!({"jsonrpc": "2.0", "id": 1, "result": "closed"})
    );
    assert_eq!(
        remote.next_reply().await,
        json!({"jsonrpc": "2.0", "id": 2, "result": ""})
    );
    assert_eq!(channel.pending_request_id().await.unwrap(), None);

    engine.emit_description("late");
    remote.expect_silence().await;
}

#[tokio::test]
async fn engine_dropping_the_connection_answers_a_pending_offer() {
    let (_broker, engine, channel, mut remote) = setup().await;

    remote.send(r#"{"jsonrpc":"2.0","id":1,"method":"offer"}"#).await;
    settle(&mut remote, 2).await;

    engine.fail_and_close();
    assert_eq!(
        remote.next_reply().await,
        json!({"jsonrpc": "2.0", "id": 1, "result": "closed"})
    );
    assert_eq!(channel.pending_request_id().await.unwrap(), None);
}

#[tokio::test]
async fn unsupported_method_is_acknowledged_without_result() {
    let (_broker, _engine, _channel, mut remote) = setup().await;

    remote.send(r#"{"jsonrpc":"2.0","id":9,"method":"reboot"}"#).await;
    assert_eq!(remote.next_reply().await, json!({"jsonrpc": "2.0", "id": 9}));
}

#[tokio::test]
async fn leave_unsubscribes_and_disconnects() {
    let (broker, _engine, channel, _remote) = setup().await;
    let topic = channel.topics().subscribe.clone();
    assert_eq!(topic, "webrtc/esp32-246f2800abcd/jsonrpc");

    channel.leave().await.unwrap();
    assert_eq!(broker.subscriber_count(&topic), 0);
    assert!(!broker.is_connected("device"));
}

#[tokio::test]
async fn join_fails_when_the_broker_refuses() {
    let broker = MemoryBroker::new();
    broker.set_online(false);
    let engine = Arc::new(ScriptedEngine::default());
    let err = SignalingChannel::join(&config(), Arc::new(broker.client("device")), engine.clone())
        .await
        .err()
        .unwrap();
    assert!(matches!(
        err,
        SignalingError::Transport(TransportError::ConnectionRefused { .. })
    ));
    // the engine is left without an observer tied to a loop that never started
    assert!(!engine.has_observer());
}

#[tokio::test]
async fn join_rejects_an_invalid_device_id() {
    let broker = MemoryBroker::new();
    let err = SignalingChannel::join(
        &SignalingConfig::for_device("bad/id"),
        Arc::new(broker.client("device")),
        Arc::new(ScriptedEngine::default()),
    )
    .await
    .err()
    .unwrap();
    assert!(matches!(err, SignalingError::Config(ConfigError::Invalid(_))));
}

#[tokio::test]
async fn join_over_mqtt_fails_against_an_unreachable_broker() {
    let mut config = config();
    config.broker.uri = "mqtt://127.0.0.1:1".into();
    let engine = Arc::new(ScriptedEngine::default());
    let err = SignalingChannel::join_mqtt(&config, engine.clone())
        .await
        .err()
        .unwrap();
    assert!(matches!(
        err,
        SignalingError::Transport(TransportError::ConnectionRefused { .. })
    ));
    assert!(!engine.has_observer());
}
