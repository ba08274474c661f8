//! WebSocket transport implementation.
//!
//! This module provides a WebSocket-based transport using tokio-tungstenite.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures_util::{SinkExt, StreamExt};
use parley_protocol::{codec, Frame};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_tungstenite::{
    accept_async, connect_async,
    tungstenite::{Error as WsError, Message},
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, error, info, warn};

use crate::traits::{Connection, Transport, TransportError};

/// WebSocket transport configuration.
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Maximum WebSocket message size in bytes.
    pub max_frame_size: usize,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".parse().unwrap(),
            max_frame_size: 64 * 1024, // 64 KB
        }
    }
}

/// WebSocket transport.
pub struct WebSocketTransport {
    listener: TcpListener,
    config: WebSocketConfig,
}

impl WebSocketTransport {
    /// Create a new WebSocket transport.
    ///
    /// # Errors
    ///
    /// Returns an error if binding to the address fails.
    pub async fn new(config: WebSocketConfig) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(config.bind_addr)
            .await
            .map_err(TransportError::Io)?;

        info!("WebSocket transport listening on {}", config.bind_addr);

        Ok(Self { listener, config })
    }

    /// Create a new WebSocket transport with default config.
    ///
    /// # Errors
    ///
    /// Returns an error if binding fails.
    pub async fn bind(addr: SocketAddr) -> Result<Self, TransportError> {
        Self::new(WebSocketConfig {
            bind_addr: addr,
            ..Default::default()
        })
        .await
    }

    /// Get the local address this transport is bound to.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.local_addr().ok()
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn accept(&self) -> Result<Box<dyn Connection>, TransportError> {
        let (stream, addr) = self.listener.accept().await.map_err(TransportError::Io)?;

        debug!("Accepted TCP connection from {}", addr);

        let ws_stream = accept_async(stream).await.map_err(|e| {
            error!("WebSocket handshake failed: {}", e);
            TransportError::Handshake(e.to_string())
        })?;

        debug!("WebSocket handshake completed with {}", addr);

        let conn = WebSocketConnection::new(ws_stream, Some(addr), self.config.max_frame_size);
        Ok(Box::new(conn))
    }

    fn name(&self) -> &'static str {
        "websocket"
    }
}

/// Open a client-side WebSocket connection.
///
/// # Errors
///
/// Returns an error if the handshake fails.
pub async fn connect(
    url: &str,
    max_frame_size: usize,
) -> Result<WebSocketConnection<MaybeTlsStream<TcpStream>>, TransportError> {
    let (ws_stream, _response) = connect_async(url)
        .await
        .map_err(|e| TransportError::Handshake(e.to_string()))?;

    debug!("Client WebSocket connected to {}", url);

    Ok(WebSocketConnection::new(ws_stream, None, max_frame_size))
}

/// A WebSocket connection.
pub struct WebSocketConnection<S> {
    stream: Arc<Mutex<WebSocketStream<S>>>,
    remote_addr: Option<SocketAddr>,
    is_open: AtomicBool,
    read_buffer: BytesMut,
    max_frame_size: usize,
}

impl<S> WebSocketConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    fn new(
        stream: WebSocketStream<S>,
        remote_addr: Option<SocketAddr>,
        max_frame_size: usize,
    ) -> Self {
        Self {
            stream: Arc::new(Mutex::new(stream)),
            remote_addr,
            is_open: AtomicBool::new(true),
            read_buffer: BytesMut::with_capacity(4096),
            max_frame_size,
        }
    }
}

#[async_trait]
impl<S> Connection for WebSocketConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn recv(&mut self) -> Result<Option<Frame>, TransportError> {
        let mut stream = self.stream.lock().await;

        loop {
            // Drain buffered bytes before touching the socket again
            if let Some(frame) = codec::decode_from(&mut self.read_buffer)? {
                return Ok(Some(frame));
            }

            // Frames ride in binary messages; text is accepted for
            // compatibility and treated the same.
            let chunk = match stream.next().await {
                Some(Ok(Message::Binary(data))) => data,
                Some(Ok(Message::Text(text))) => text.into_bytes(),
                Some(Ok(Message::Ping(payload))) => {
                    if let Err(e) = stream.send(Message::Pong(payload)).await {
                        warn!("Failed to answer ping: {}", e);
                    }
                    continue;
                }
                Some(Ok(Message::Pong(_) | Message::Frame(_))) => continue,
                Some(Ok(Message::Close(_))) | Some(Err(WsError::ConnectionClosed)) | None => {
                    debug!("WebSocket closed by peer");
                    self.is_open.store(false, Ordering::SeqCst);
                    return Ok(None);
                }
                Some(Err(e)) => {
                    error!("WebSocket error: {}", e);
                    self.is_open.store(false, Ordering::SeqCst);
                    return Err(TransportError::ReceiveFailed(e.to_string()));
                }
            };

            if chunk.len() > self.max_frame_size {
                warn!(
                    "Message too large: {} bytes (max: {})",
                    chunk.len(),
                    self.max_frame_size
                );
                return Err(TransportError::Protocol(
                    parley_protocol::ProtocolError::FrameTooLarge(chunk.len()),
                ));
            }

            self.read_buffer.extend_from_slice(&chunk);
        }
    }

    async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        let data = codec::encode(&frame)?;
        self.send_raw(data).await
    }

    async fn send_raw(&mut self, data: Bytes) -> Result<(), TransportError> {
        if !self.is_open.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionClosed);
        }

        let mut stream = self.stream.lock().await;
        stream
            .send(Message::Binary(data.to_vec()))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if !self.is_open.swap(false, Ordering::SeqCst) {
            return Ok(()); // Already closed
        }

        let mut stream = self.stream.lock().await;
        stream
            .close(None)
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    fn remote_addr(&self) -> Option<String> {
        self.remote_addr.map(|addr| addr.to_string())
    }

    fn is_open(&self) -> bool {
        self.is_open.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_protocol::FrameType;

    #[test]
    fn test_websocket_config_default() {
        let config = WebSocketConfig::default();
        assert_eq!(config.bind_addr.port(), 8080);
        assert_eq!(config.max_frame_size, 64 * 1024);
    }

    #[tokio::test]
    async fn test_websocket_frame_roundtrip() {
        let transport = WebSocketTransport::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let addr = transport.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let mut conn = transport.accept().await.unwrap();
            // Echo frames until the client hangs up
            while let Some(frame) = conn.recv().await.unwrap() {
                conn.send(frame).await.unwrap();
            }
        });

        let mut client = connect(&format!("ws://{addr}"), 64 * 1024).await.unwrap();
        assert!(client.is_open());

        client.send(Frame::join(1, "lobby")).await.unwrap();
        let echoed = client.recv().await.unwrap().unwrap();
        assert_eq!(echoed, Frame::join(1, "lobby"));

        client.send(Frame::ping()).await.unwrap();
        let echoed = client.recv().await.unwrap().unwrap();
        assert_eq!(echoed.frame_type(), FrameType::Ping);

        client.close().await.unwrap();
        assert!(!client.is_open());
        server.await.unwrap();
    }
}
