//! Transport abstraction traits for relay.
//!
//! The router core never touches sockets: it consumes a stream of
//! `(connection, envelope)` pairs and pushes envelopes back out. These
//! traits define that boundary so the server can be transport-agnostic.
//!
//! A [`Session`] splits into independent reader and writer halves, so a
//! read blocked on a quiet peer can never stall outbound delivery.

use async_trait::async_trait;
use relay_protocol::Envelope;
use thiserror::Error;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to receive data.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// Protocol error.
    #[error("Protocol error: {0}")]
    Protocol(#[from] relay_protocol::ProtocolError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// A transport that can accept sessions.
///
/// Transports are responsible for handling the underlying protocol
/// (handshake, framing) and hand out uniform [`Session`] objects.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Accept a new session.
    ///
    /// This method blocks until a new session is available or an error occurs.
    async fn accept(&self) -> Result<Box<dyn Session>, TransportError>;

    /// Get the transport name (e.g., "websocket").
    fn name(&self) -> &'static str;
}

/// An accepted session, not yet split into halves.
pub trait Session: Send {
    /// Get the remote address of the peer, if available.
    fn remote_addr(&self) -> Option<String>;

    /// Split into independent reader and writer halves.
    fn split(self: Box<Self>) -> (Box<dyn SessionReader>, Box<dyn SessionWriter>);
}

/// The inbound half of a session.
#[async_trait]
pub trait SessionReader: Send {
    /// Receive the next envelope from the peer.
    ///
    /// Returns `None` if the session is closed cleanly.
    async fn recv(&mut self) -> Result<Option<Envelope>, TransportError>;
}

/// The outbound half of a session.
#[async_trait]
pub trait SessionWriter: Send {
    /// Send an envelope to the peer.
    async fn send(&mut self, envelope: &Envelope) -> Result<(), TransportError>;

    /// Close the session gracefully.
    async fn close(&mut self) -> Result<(), TransportError>;
}
