//! # relay-protocol
//!
//! Wire protocol definitions for the relay group-chat router.
//!
//! This crate defines the envelope exchanged between chat clients and the
//! router and its binary codec.
//!
//! ## Envelope kinds
//!
//! - `CHAT` - Public message, broadcast to everyone online
//! - `PRIVATE_CHAT` - Direct message to one identity
//! - `LOGIN` / `JOIN` - Bind an identity to the sending connection
//! - `USER_LIST_UPDATE` - Server-derived online identity snapshot
//! - `SERVER_INFO` - Informational notice from the server
//!
//! Unrecognized commands are preserved and forwarded unchanged.
//!
//! ## Example
//!
//! ```rust
//! use relay_protocol::{codec, Envelope};
//!
//! let envelope = Envelope::chat("alice", "Hello, room!");
//!
//! // Encode and decode
//! let encoded = codec::encode(&envelope).unwrap();
//! let decoded = codec::decode(&encoded).unwrap();
//! assert_eq!(envelope, decoded);
//! ```

pub mod codec;
pub mod envelope;

pub use codec::{decode, encode, EnvelopeCodec, ProtocolError};
pub use envelope::{Envelope, EnvelopeError, Kind, SERVER_IDENTITY};
