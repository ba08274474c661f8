//! End-to-end relay conversation over the WebSocket transport, without a
//! web framework in the way: handshake, join, send, echo.

use parley_core::{MemoryStore, RelayEngine, RelayEvent, StaticTokenVerifier};
use parley_protocol::{Frame, FrameType, PROTOCOL_VERSION};
use parley_transport::{websocket, Connection, Transport, WebSocketTransport};
use std::sync::Arc;

#[tokio::test]
async fn test_relay_conversation_over_websocket() {
    let transport = WebSocketTransport::bind("127.0.0.1:0".parse().unwrap())
        .await
        .unwrap();
    let addr = transport.local_addr().unwrap();

    let engine = RelayEngine::new(
        Arc::new(StaticTokenVerifier::new().with_token("tok-a", "alice")),
        Arc::new(MemoryStore::new()),
    );

    let server = tokio::spawn(async move {
        let mut conn = transport.accept().await.unwrap();

        // Handshake
        let Some(Frame::Connect {
            credential,
            identity,
            ..
        }) = conn.recv().await.unwrap()
        else {
            panic!("expected connect frame");
        };
        let mut session = engine
            .connect(&credential, identity.as_deref())
            .await
            .unwrap();
        conn.send(Frame::connected(
            session.connection_id().as_str(),
            session.identity().clone(),
            PROTOCOL_VERSION.major,
            30_000,
        ))
        .await
        .unwrap();

        // Join answered with history
        let Some(Frame::Join { id, room }) = conn.recv().await.unwrap() else {
            panic!("expected join frame");
        };
        let history = session.join(&room).await.unwrap();
        let messages = history.into_iter().map(Into::into).collect();
        conn.send(Frame::history(id, room, messages)).await.unwrap();

        // Send, then forward the echoed fan-out from the session mailbox
        let Some(Frame::Send { room, body, .. }) = conn.recv().await.unwrap() else {
            panic!("expected send frame");
        };
        session.send(&room, &body).await.unwrap();
        while let Some(event) = session.try_event() {
            if let RelayEvent::Message(msg) = event {
                conn.send(Frame::message(msg.into())).await.unwrap();
            }
        }

        conn.close().await.unwrap();
    });

    let mut client = websocket::connect(&format!("ws://{addr}"), 64 * 1024)
        .await
        .unwrap();

    client
        .send(Frame::connect_as(PROTOCOL_VERSION.major, "tok-a", "alice"))
        .await
        .unwrap();
    let connected = client.recv().await.unwrap().unwrap();
    assert_eq!(connected.frame_type(), FrameType::Connected);

    client.send(Frame::join(1, "lobby")).await.unwrap();
    match client.recv().await.unwrap().unwrap() {
        Frame::History { id, room, messages } => {
            assert_eq!(id, 1);
            assert_eq!(room, "lobby");
            assert!(messages.is_empty());
        }
        other => panic!("expected history, got {other:?}"),
    }

    client.send(Frame::send("lobby", "hello")).await.unwrap();
    match client.recv().await.unwrap().unwrap() {
        Frame::Message {
            room,
            sender,
            body,
            seq,
            ..
        } => {
            assert_eq!(room, "lobby");
            assert_eq!(sender, "alice");
            assert_eq!(body, "hello");
            assert_eq!(seq, 1);
        }
        other => panic!("expected message, got {other:?}"),
    }

    server.await.unwrap();
}
