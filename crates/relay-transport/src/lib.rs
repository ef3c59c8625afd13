//! # relay-transport
//!
//! Transport boundary for the relay group-chat router.
//!
//! The router core only needs a stream of inbound envelopes per session
//! and a way to push envelopes back out; this crate provides that contract
//! and a WebSocket implementation of it.
//!
//! ## Transport Abstraction
//!
//! All transports implement the [`Transport`] and [`Session`] traits.
//! A session splits into independent reader and writer halves so that
//! inbound and outbound traffic never block each other.
//!
//! ```rust,ignore
//! use relay_transport::{Transport, WebSocketTransport};
//!
//! async fn accept_loop(transport: WebSocketTransport) {
//!     while let Ok(session) = transport.accept().await {
//!         let (reader, writer) = session.split();
//!         // Hand the halves to the session loop
//!     }
//! }
//! ```

pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use traits::{Session, SessionReader, SessionWriter, Transport, TransportError};

#[cfg(feature = "websocket")]
pub use websocket::{WebSocketConfig, WebSocketTransport};
