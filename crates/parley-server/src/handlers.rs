//! Connection handlers for the Parley server.
//!
//! This module owns the WebSocket frame loop: handshake, command
//! dispatch into the relay engine, and forwarding of engine pushes back
//! to the client.

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::Result;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use bytes::BytesMut;
use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use parley_core::{
    EngineConfig, MemoryStore, RelayEngine, RelayError, RelayEvent, RouterConfig, Session,
    StaticTokenVerifier,
};
use parley_protocol::{codec, Frame, Version, PROTOCOL_VERSION};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// The relay engine.
    pub engine: Arc<RelayEngine>,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let verifier = StaticTokenVerifier::from_tokens(config.auth.tokens.clone());
        let engine_config = EngineConfig {
            auth_timeout: Duration::from_millis(config.auth.timeout_ms),
            max_message_size: config.limits.max_message_size,
            router: RouterConfig {
                max_rooms: config.limits.max_rooms,
                max_subscriptions_per_connection: config.limits.max_subscriptions_per_connection,
            },
        };

        Self {
            engine: RelayEngine::with_config(
                Arc::new(verifier),
                Arc::new(MemoryStore::new()),
                engine_config,
            ),
            config,
        }
    }
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let state = Arc::new(AppState::new(config.clone()));

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    // Build router
    let app = Router::new()
        .route(&config.transport.websocket_path, get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state);

    // Bind and serve
    let addr = config.bind_addr();
    let listener = TcpListener::bind(addr).await?;

    info!("Parley server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );

    axum::serve(listener, app).await?;

    Ok(())
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = state.engine.stats();
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "connections": stats.connections,
        "online": stats.online,
        "rooms": stats.rooms,
    }))
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_websocket(socket, state))
}

/// Handle a WebSocket connection: handshake, then the frame loop.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>) {
    let _metrics_guard = ConnectionMetricsGuard::new();

    let (mut sender, mut receiver) = socket.split();
    let mut read_buffer = BytesMut::with_capacity(4096);

    if state.engine.stats().connections >= state.config.limits.max_connections {
        warn!("Connection limit reached, rejecting");
        metrics::record_error("transport");
        let frame = Frame::error(0, "transport", 4006, "Server at capacity");
        let _ = send_frame(&mut sender, &frame).await;
        return;
    }

    // Handshake: the first frame must be Connect and must arrive within
    // the auth timeout. An unauthenticated connection never reaches the
    // engine's registries.
    let auth_timeout = Duration::from_millis(state.config.auth.timeout_ms);
    let first = match timeout(auth_timeout, read_frame(&mut receiver, &mut read_buffer)).await {
        Ok(Some(frame)) => frame,
        Ok(None) => return,
        Err(_) => {
            let err = RelayError::AuthTimeout;
            metrics::record_error(err.kind());
            let frame = Frame::error(0, err.kind(), err.code(), err.to_string());
            let _ = send_frame(&mut sender, &frame).await;
            return;
        }
    };

    let Frame::Connect {
        version,
        credential,
        identity,
    } = first
    else {
        metrics::record_error("auth");
        let frame = Frame::error(0, "auth", 4001, "First frame must be connect");
        let _ = send_frame(&mut sender, &frame).await;
        return;
    };

    if !Version::new(version, 0).is_compatible_with(&PROTOCOL_VERSION) {
        metrics::record_error("transport");
        let frame = Frame::error(
            0,
            "transport",
            4006,
            format!("Unsupported protocol version {version}"),
        );
        let _ = send_frame(&mut sender, &frame).await;
        return;
    }

    let mut session = match state.engine.connect(&credential, identity.as_deref()).await {
        Ok(session) => session,
        Err(err) => {
            warn!(error = %err, "Handshake rejected");
            metrics::record_error(err.kind());
            let frame = Frame::error(0, err.kind(), err.code(), err.to_string());
            let _ = send_frame(&mut sender, &frame).await;
            return;
        }
    };

    let connected = Frame::connected(
        session.connection_id().as_str(),
        session.identity().clone(),
        PROTOCOL_VERSION.major,
        state.config.heartbeat.interval_ms as u32,
    );
    if send_frame(&mut sender, &connected).await.is_err() {
        return; // Session drop tears down presence and memberships
    }
    metrics::set_presence_online(state.engine.stats().online);

    debug!(
        connection = %session.connection_id(),
        identity = %session.identity(),
        "Session established"
    );

    let mut events = session.take_events().expect("fresh session has a mailbox");

    'conn: loop {
        tokio::select! {
            biased;

            // Engine pushes: room messages and presence snapshots
            event = events.recv() => {
                let Some(event) = event else { break };
                let frame = match event {
                    RelayEvent::Message(msg) => Frame::message(msg.into()),
                    RelayEvent::Presence(online) => Frame::presence(online),
                };
                if send_frame(&mut sender, &frame).await.is_err() {
                    break;
                }
            }

            // Client frames; text is accepted for compatibility and
            // treated as binary
            msg = receiver.next() => {
                let chunk = match msg {
                    Some(Ok(Message::Binary(data))) => data,
                    Some(Ok(Message::Text(text))) => text.into_bytes(),
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                        continue;
                    }
                    Some(Ok(Message::Pong(_))) => continue,
                    Some(Ok(Message::Close(_))) => {
                        debug!(connection = %session.connection_id(), "Received close frame");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(connection = %session.connection_id(), error = %e, "WebSocket error");
                        metrics::record_error("transport");
                        break;
                    }
                    None => {
                        debug!(connection = %session.connection_id(), "WebSocket stream ended");
                        break;
                    }
                };

                read_buffer.extend_from_slice(&chunk);
                loop {
                    match codec::decode_from(&mut read_buffer) {
                        Ok(Some(frame)) => {
                            if !handle_frame(&frame, &session, &state, &mut sender).await {
                                break 'conn;
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            warn!(connection = %session.connection_id(), error = %e, "Protocol error");
                            metrics::record_error("transport");
                            break 'conn;
                        }
                    }
                }
            }
        }
    }

    session.close();
    metrics::set_active_rooms(state.engine.stats().rooms);
    metrics::set_presence_online(state.engine.stats().online);

    debug!("WebSocket disconnected");
}

/// Read one frame during the handshake, before the session exists.
async fn read_frame(
    receiver: &mut SplitStream<WebSocket>,
    read_buffer: &mut BytesMut,
) -> Option<Frame> {
    loop {
        match codec::decode_from(read_buffer) {
            Ok(Some(frame)) => return Some(frame),
            Ok(None) => {}
            Err(_) => return None,
        }

        match receiver.next().await? {
            Ok(Message::Binary(data)) => read_buffer.extend_from_slice(&data),
            Ok(Message::Text(text)) => read_buffer.extend_from_slice(text.as_bytes()),
            Ok(Message::Ping(_) | Message::Pong(_)) => {}
            Ok(Message::Close(_)) | Err(_) => return None,
        }
    }
}

/// Handle a decoded client frame. Returns whether the session continues.
async fn handle_frame(
    frame: &Frame,
    session: &Session,
    state: &Arc<AppState>,
    sender: &mut SplitSink<WebSocket, Message>,
) -> bool {
    match frame {
        Frame::Join { id, room } => {
            debug!(connection = %session.connection_id(), room = %room, "Join request");

            match session.join(room).await {
                Ok(history) => {
                    metrics::record_subscription();
                    metrics::set_active_rooms(state.engine.stats().rooms);
                    let messages = history.into_iter().map(Into::into).collect();
                    send_frame(sender, &Frame::history(*id, room.clone(), messages))
                        .await
                        .is_ok()
                }
                Err(err) => report_error(sender, *id, &err).await,
            }
        }

        Frame::Leave { id, room } => {
            debug!(connection = %session.connection_id(), room = %room, "Leave request");

            match session.leave(room) {
                Ok(()) => {
                    metrics::set_active_rooms(state.engine.stats().rooms);
                    send_frame(sender, &Frame::ack(*id)).await.is_ok()
                }
                Err(err) => report_error(sender, *id, &err).await,
            }
        }

        Frame::Send { id, room, body } => {
            let start = Instant::now();

            match session.send(room, body).await {
                Ok(message) => {
                    metrics::record_message(message.body_size(), "inbound");
                    metrics::record_delivery(start.elapsed().as_secs_f64());
                    match id {
                        Some(id) => send_frame(sender, &Frame::ack(*id)).await.is_ok(),
                        None => true,
                    }
                }
                Err(err) => report_error(sender, id.unwrap_or(0), &err).await,
            }
        }

        Frame::Ping { timestamp } => send_frame(sender, &Frame::pong(*timestamp)).await.is_ok(),

        Frame::Pong { .. } => true,

        Frame::Connect { .. } => {
            warn!(connection = %session.connection_id(), "Duplicate connect frame");
            true
        }

        _ => {
            warn!(
                connection = %session.connection_id(),
                frame_type = ?frame.frame_type(),
                "Unexpected frame type"
            );
            true
        }
    }
}

/// Report a failed request to the client. Recoverable errors leave the
/// session open; fatal ones end the frame loop.
async fn report_error(
    sender: &mut SplitSink<WebSocket, Message>,
    id: u64,
    err: &RelayError,
) -> bool {
    warn!(error = %err, "Request failed");
    metrics::record_error(err.kind());

    let frame = Frame::error(id, err.kind(), err.code(), err.to_string());
    send_frame(sender, &frame).await.is_ok() && err.is_recoverable()
}

/// Send a frame to the WebSocket.
async fn send_frame(sender: &mut SplitSink<WebSocket, Message>, frame: &Frame) -> Result<()> {
    let data = codec::encode(frame)?;
    metrics::record_message(data.len(), "outbound");
    sender.send(Message::Binary(data.to_vec())).await?;
    Ok(())
}
