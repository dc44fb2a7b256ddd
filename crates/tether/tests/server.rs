//! Integration tests for the server and handler, driven by a raw WebSocket
//! client so every frame is visible.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tether::prelude::*;
use tether_protocol::{Channel, Envelope, Payload, SystemMessage};
use tokio_tungstenite::tungstenite::Message;

// =========================================================================
// Helpers
// =========================================================================

type ClientWs =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Starts a server on a random port and returns the address.
async fn start_server(room: RoomConfig) -> String {
    let server = TetherServerBuilder::new()
        .bind("127.0.0.1:0")
        .room_config(room)
        .build()
        .await
        .expect("server should build");

    let addr = server
        .local_addr()
        .expect("should have local addr")
        .to_string();

    tokio::spawn(async move {
        let _ = server.run().await;
    });

    // Give the accept loop a moment to start.
    tokio::time::sleep(Duration::from_millis(10)).await;
    addr
}

async fn connect(addr: &str) -> ClientWs {
    let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
        .await
        .expect("should connect");
    ws
}

fn encode_envelope(envelope: &Envelope) -> Message {
    let bytes = serde_json::to_vec(envelope).expect("encode");
    Message::Binary(bytes.into())
}

fn system(seq: u64, message: SystemMessage) -> Message {
    encode_envelope(&Envelope::system(seq, 0, message))
}

fn room(seq: u64, data: Vec<u8>) -> Message {
    encode_envelope(&Envelope::room(seq, 0, Channel::ReliableOrdered, data))
}

async fn next_envelope(ws: &mut ClientWs) -> Envelope {
    let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
        .await
        .expect("timed out waiting for a frame")
        .expect("stream ended")
        .expect("recv");
    serde_json::from_slice(&msg.into_data()).expect("decode")
}

async fn next_system(ws: &mut ClientWs) -> SystemMessage {
    loop {
        if let Payload::System(message) = next_envelope(ws).await.payload {
            return message;
        }
    }
}

async fn next_room(ws: &mut ClientWs) -> ServerMessage {
    loop {
        if let Payload::Room(data) = next_envelope(ws).await.payload {
            return serde_json::from_slice(&data).expect("room message");
        }
    }
}

/// Sends a handshake and returns the answer.
async fn handshake(ws: &mut ClientWs) -> SystemMessage {
    ws.send(system(
        0,
        SystemMessage::Handshake {
            version: PROTOCOL_VERSION,
        },
    ))
    .await
    .expect("send handshake");
    next_system(ws).await
}

async fn join(ws: &mut ClientWs, selector: RoomSelector, name: &str) -> SystemMessage {
    ws.send(system(
        1,
        SystemMessage::JoinOrCreate {
            selector,
            options: JoinOptions::new(name, 0),
        },
    ))
    .await
    .expect("send join");
    next_system(ws).await
}

/// A heartbeat round trip, proving the connection is still served.
async fn assert_alive(ws: &mut ClientWs) {
    ws.send(system(9, SystemMessage::Heartbeat { client_time: 777 }))
        .await
        .expect("send heartbeat");
    match next_system(ws).await {
        SystemMessage::HeartbeatAck { client_time, .. } => assert_eq!(client_time, 777),
        other => panic!("expected HeartbeatAck, got {other:?}"),
    }
}

// =========================================================================
// Handshake
// =========================================================================

#[tokio::test]
async fn test_handshake_success() {
    let addr = start_server(RoomConfig::default()).await;
    let mut ws = connect(&addr).await;

    match handshake(&mut ws).await {
        SystemMessage::HandshakeAck { .. } => {}
        other => panic!("expected HandshakeAck, got {other:?}"),
    }
}

#[tokio::test]
async fn test_handshake_version_mismatch() {
    let addr = start_server(RoomConfig::default()).await;
    let mut ws = connect(&addr).await;

    ws.send(system(0, SystemMessage::Handshake { version: 999 }))
        .await
        .expect("send");
    match next_system(&mut ws).await {
        SystemMessage::Error { code, .. } => assert_eq!(code, 400),
        other => panic!("expected Error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_first_message_must_be_handshake() {
    let addr = start_server(RoomConfig::default()).await;
    let mut ws = connect(&addr).await;

    ws.send(system(0, SystemMessage::ListRooms)).await.expect("send");
    match next_system(&mut ws).await {
        SystemMessage::Error { code, .. } => assert_eq!(code, 400),
        other => panic!("expected Error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_heartbeat_response() {
    let addr = start_server(RoomConfig::default()).await;
    let mut ws = connect(&addr).await;
    handshake(&mut ws).await;
    assert_alive(&mut ws).await;
}

// =========================================================================
// Rooms
// =========================================================================

#[tokio::test]
async fn test_join_answers_then_sends_snapshot() {
    let addr = start_server(RoomConfig::default()).await;
    let mut ws = connect(&addr).await;
    handshake(&mut ws).await;

    let session_id = match join(&mut ws, RoomSelector::named("R1"), "Ada").await {
        SystemMessage::RoomJoined { session_id, .. } => session_id,
        other => panic!("expected RoomJoined, got {other:?}"),
    };
    assert_eq!(session_id.as_str().len(), 9);

    match next_room(&mut ws).await {
        ServerMessage::StateSnapshot { state } => {
            let me = state.get(&session_id).expect("own entity in snapshot");
            assert_eq!(me.name, "Ada");
        }
        other => panic!("expected snapshot, got {other:?}"),
    }
}

#[tokio::test]
async fn test_second_join_on_same_connection_is_conflict() {
    let addr = start_server(RoomConfig::default()).await;
    let mut ws = connect(&addr).await;
    handshake(&mut ws).await;
    join(&mut ws, RoomSelector::Any, "Ada").await;

    match join(&mut ws, RoomSelector::Any, "Ada").await {
        SystemMessage::Error { code, .. } => assert_eq!(code, 409),
        other => panic!("expected Error 409, got {other:?}"),
    }
}

#[tokio::test]
async fn test_join_unknown_room_id_is_not_found() {
    let addr = start_server(RoomConfig::default()).await;
    let mut ws = connect(&addr).await;
    handshake(&mut ws).await;

    match join(&mut ws, RoomSelector::Id { room_id: RoomId(9_999) }, "Ada").await {
        SystemMessage::Error { code, .. } => assert_eq!(code, 404),
        other => panic!("expected Error 404, got {other:?}"),
    }
}

#[tokio::test]
async fn test_full_named_room_is_conflict() {
    let addr = start_server(RoomConfig {
        max_clients: 1,
        ..RoomConfig::default()
    })
    .await;

    let mut first = connect(&addr).await;
    handshake(&mut first).await;
    join(&mut first, RoomSelector::named("solo"), "Ada").await;

    let mut second = connect(&addr).await;
    handshake(&mut second).await;
    match join(&mut second, RoomSelector::named("solo"), "Bo").await {
        SystemMessage::Error { code, .. } => assert_eq!(code, 409),
        other => panic!("expected Error 409, got {other:?}"),
    }
}

#[tokio::test]
async fn test_list_rooms_shows_open_rooms() {
    let addr = start_server(RoomConfig::default()).await;
    let mut ws = connect(&addr).await;
    handshake(&mut ws).await;
    join(&mut ws, RoomSelector::named("lobby"), "Ada").await;

    let mut observer = connect(&addr).await;
    handshake(&mut observer).await;
    observer
        .send(system(1, SystemMessage::ListRooms))
        .await
        .expect("send");
    match next_system(&mut observer).await {
        SystemMessage::RoomList { rooms } => {
            let lobby = rooms
                .iter()
                .find(|r| r.name.as_deref() == Some("lobby"))
                .expect("lobby listed");
            assert_eq!(lobby.player_count, 1);
            assert_eq!(lobby.max_players, 16);
        }
        other => panic!("expected RoomList, got {other:?}"),
    }
}

// =========================================================================
// Room messages
// =========================================================================

#[tokio::test]
async fn test_malformed_room_message_is_400_and_connection_survives() {
    let addr = start_server(RoomConfig::default()).await;
    let mut ws = connect(&addr).await;
    handshake(&mut ws).await;
    join(&mut ws, RoomSelector::Any, "Ada").await;
    next_room(&mut ws).await; // snapshot

    ws.send(room(2, br#"{"kind":"changeSkin","skinId":"red"}"#.to_vec()))
        .await
        .expect("send");
    match next_system(&mut ws).await {
        SystemMessage::Error { code, .. } => assert_eq!(code, 400),
        other => panic!("expected Error 400, got {other:?}"),
    }
    assert_alive(&mut ws).await;
}

#[tokio::test]
async fn test_undecodable_envelope_is_dropped() {
    let addr = start_server(RoomConfig::default()).await;
    let mut ws = connect(&addr).await;
    handshake(&mut ws).await;

    ws.send(Message::Binary(b"definitely not json".to_vec().into()))
        .await
        .expect("send");
    assert_alive(&mut ws).await;
}

#[tokio::test]
async fn test_room_message_before_join_is_ignored() {
    let addr = start_server(RoomConfig::default()).await;
    let mut ws = connect(&addr).await;
    handshake(&mut ws).await;

    let data = serde_json::to_vec(&ClientMessage::ChangeSkin { skin_id: 1 }).unwrap();
    ws.send(room(1, data)).await.expect("send");
    assert_alive(&mut ws).await;
}

#[tokio::test]
async fn test_skin_change_is_clamped_and_announced() {
    let addr = start_server(RoomConfig::default()).await;

    let mut a = connect(&addr).await;
    handshake(&mut a).await;
    let a_id = match join(&mut a, RoomSelector::named("R1"), "Ada").await {
        SystemMessage::RoomJoined { session_id, .. } => session_id,
        other => panic!("expected RoomJoined, got {other:?}"),
    };
    next_room(&mut a).await;

    let mut b = connect(&addr).await;
    handshake(&mut b).await;
    join(&mut b, RoomSelector::named("R1"), "Bo").await;
    next_room(&mut b).await;

    let data = serde_json::to_vec(&ClientMessage::ChangeSkin { skin_id: 99 }).unwrap();
    a.send(room(2, data)).await.expect("send");

    // B gets the fast-path notice (and a patch); skip the patch.
    loop {
        match next_room(&mut b).await {
            ServerMessage::SkinChanged { player_id, skin_id } => {
                assert_eq!(player_id, a_id);
                assert_eq!(skin_id, 4);
                break;
            }
            ServerMessage::StatePatch { .. } | ServerMessage::StateSnapshot { .. } => continue,
        }
    }
}

#[tokio::test]
async fn test_disconnect_closes_connection() {
    let addr = start_server(RoomConfig::default()).await;
    let mut ws = connect(&addr).await;
    handshake(&mut ws).await;

    ws.send(system(
        1,
        SystemMessage::Disconnect {
            reason: "bye".into(),
        },
    ))
    .await
    .expect("send");

    let closed = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await;
    assert!(closed.is_ok(), "server should close the connection");
}

#[tokio::test]
async fn test_shutdown_stops_rooms_and_disconnects_members() {
    let server = TetherServerBuilder::new()
        .bind("127.0.0.1:0")
        .build()
        .await
        .expect("server should build");
    let addr = server.local_addr().expect("local addr").to_string();
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let running = tokio::spawn(server.run_until(async {
        let _ = stop_rx.await;
    }));
    tokio::time::sleep(Duration::from_millis(10)).await;

    let mut ws = connect(&addr).await;
    handshake(&mut ws).await;
    assert!(matches!(
        join(&mut ws, RoomSelector::named("R1"), "Ada").await,
        SystemMessage::RoomJoined { .. }
    ));

    stop_tx.send(()).expect("server still running");
    tokio::time::timeout(Duration::from_secs(2), running)
        .await
        .expect("server should stop")
        .expect("server task")
        .expect("clean shutdown");

    match next_system(&mut ws).await {
        SystemMessage::Disconnect { reason } => assert_eq!(reason, "server shutting down"),
        other => panic!("expected Disconnect, got {other:?}"),
    }

    // The listener is gone with the server.
    assert!(
        tokio_tungstenite::connect_async(format!("ws://{addr}"))
            .await
            .is_err()
    );
}
