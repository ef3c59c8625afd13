//! WebSocket transport implementation.
//!
//! This module provides a WebSocket-based transport using tokio-tungstenite.
//! Envelopes travel as binary frames carrying the length-prefixed codec
//! from `relay-protocol`; partial frames are reassembled across reads.

use async_trait::async_trait;
use bytes::BytesMut;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use relay_protocol::{codec, Envelope};
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{
    accept_async,
    tungstenite::{Error as WsError, Message},
    WebSocketStream,
};
use tracing::{debug, error, info, warn};

use crate::traits::{Session, SessionReader, SessionWriter, Transport, TransportError};

/// WebSocket transport configuration.
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Maximum message size in bytes.
    pub max_message_size: usize,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9100".parse().unwrap(),
            max_message_size: 64 * 1024, // 64 KB
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
    async fn accept(&self) -> Result<Box<dyn Session>, TransportError> {
        let (stream, addr) = self.listener.accept().await.map_err(TransportError::Io)?;

        debug!("Accepted TCP connection from {}", addr);

        let ws_stream = accept_async(stream).await.map_err(|e| {
            error!("WebSocket handshake failed: {}", e);
            TransportError::Other(format!("WebSocket handshake failed: {}", e))
        })?;

        debug!("WebSocket handshake completed with {}", addr);

        let session = WebSocketSession {
            stream: ws_stream,
            remote_addr: addr,
            max_message_size: self.config.max_message_size,
        };
        Ok(Box::new(session))
    }

    fn name(&self) -> &'static str {
        "websocket"
    }
}

/// An accepted WebSocket session.
pub struct WebSocketSession {
    stream: WebSocketStream<TcpStream>,
    remote_addr: SocketAddr,
    max_message_size: usize,
}

impl Session for WebSocketSession {
    fn remote_addr(&self) -> Option<String> {
        Some(self.remote_addr.to_string())
    }

    fn split(self: Box<Self>) -> (Box<dyn SessionReader>, Box<dyn SessionWriter>) {
        let (sink, stream) = self.stream.split();
        let reader = WebSocketReader {
            stream,
            read_buffer: BytesMut::with_capacity(4096),
            max_message_size: self.max_message_size,
        };
        let writer = WebSocketWriter { sink };
        (Box::new(reader), Box::new(writer))
    }
}

/// Inbound half of a WebSocket session.
pub struct WebSocketReader {
    stream: SplitStream<WebSocketStream<TcpStream>>,
    read_buffer: BytesMut,
    max_message_size: usize,
}

#[async_trait]
impl SessionReader for WebSocketReader {
    async fn recv(&mut self) -> Result<Option<Envelope>, TransportError> {
        // First, try to decode from the existing buffer
        if let Some(envelope) = codec::decode_from(&mut self.read_buffer)? {
            return Ok(Some(envelope));
        }

        // Need more data - read from the WebSocket
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Binary(data))) => {
                    if data.len() > self.max_message_size {
                        warn!(
                            "Message too large: {} bytes (max: {})",
                            data.len(),
                            self.max_message_size
                        );
                        return Err(TransportError::Protocol(
                            relay_protocol::ProtocolError::FrameTooLarge(data.len()),
                        ));
                    }

                    self.read_buffer.extend_from_slice(&data);

                    // Try to decode an envelope
                    if let Some(envelope) = codec::decode_from(&mut self.read_buffer)? {
                        return Ok(Some(envelope));
                    }
                    // Need more data, continue reading
                }
                Some(Ok(Message::Text(text))) => {
                    // For compatibility, treat text as binary
                    self.read_buffer.extend_from_slice(text.as_bytes());

                    if let Some(envelope) = codec::decode_from(&mut self.read_buffer)? {
                        return Ok(Some(envelope));
                    }
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                    // tungstenite answers pings itself
                }
                Some(Ok(Message::Close(_))) => {
                    debug!("Received close frame");
                    return Ok(None);
                }
                Some(Ok(Message::Frame(_))) => {
                    // Raw frame, ignore
                }
                Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) => {
                    debug!("Connection closed");
                    return Ok(None);
                }
                Some(Err(e)) => {
                    error!("WebSocket error: {}", e);
                    return Err(TransportError::ReceiveFailed(e.to_string()));
                }
                None => {
                    debug!("WebSocket stream ended");
                    return Ok(None);
                }
            }
        }
    }
}

/// Outbound half of a WebSocket session.
pub struct WebSocketWriter {
    sink: SplitSink<WebSocketStream<TcpStream>, Message>,
}

#[async_trait]
impl SessionWriter for WebSocketWriter {
    async fn send(&mut self, envelope: &Envelope) -> Result<(), TransportError> {
        let data = codec::encode(envelope)?;
        self.sink
            .send(Message::Binary(data.to_vec()))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.sink
            .close()
            .await
            .map_err(|e| TransportError::Other(format!("Failed to close: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::{SinkExt, StreamExt};
    use tokio_tungstenite::connect_async;

    #[test]
    fn test_websocket_config_default() {
        let config = WebSocketConfig::default();
        assert_eq!(config.bind_addr.port(), 9100);
        assert_eq!(config.max_message_size, 64 * 1024);
    }

    #[tokio::test]
    async fn test_loopback_envelope_exchange() {
        let transport = WebSocketTransport::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let addr = transport.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let session = transport.accept().await.unwrap();
            let (mut reader, mut writer) = session.split();

            let inbound = reader.recv().await.unwrap().unwrap();
            assert_eq!(inbound, Envelope::login("alice"));

            writer
                .send(&Envelope::user_list_update("alice"))
                .await
                .unwrap();
            writer.close().await.unwrap();
        });

        let (mut client, _) = connect_async(format!("ws://{}", addr)).await.unwrap();

        let encoded = codec::encode(&Envelope::login("alice")).unwrap();
        client.send(Message::Binary(encoded.to_vec())).await.unwrap();

        let reply = loop {
            match client.next().await.unwrap().unwrap() {
                Message::Binary(data) => break codec::decode(&data).unwrap(),
                _ => continue,
            }
        };
        assert_eq!(reply, Envelope::user_list_update("alice"));

        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_loopback_partial_frame_reassembly() {
        let transport = WebSocketTransport::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let addr = transport.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let session = transport.accept().await.unwrap();
            let (mut reader, _writer) = session.split();
            reader.recv().await.unwrap().unwrap()
        });

        let (mut client, _) = connect_async(format!("ws://{}", addr)).await.unwrap();

        // Deliver one logical frame across two WebSocket messages.
        let encoded = codec::encode(&Envelope::chat("alice", "split")).unwrap();
        let (head, tail) = encoded.split_at(3);
        client.send(Message::Binary(head.to_vec())).await.unwrap();
        client.send(Message::Binary(tail.to_vec())).await.unwrap();

        let received = server.await.unwrap();
        assert_eq!(received, Envelope::chat("alice", "split"));
    }
}
