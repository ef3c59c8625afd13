//! Codec for encoding and decoding relay envelopes.
//!
//! This module provides MessagePack-based serialization with length-prefixed
//! framing. Field names on the wire follow the original protocol
//! (`from`, `to`, `content`, `isPrivate`, `command`).

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::envelope::{Envelope, EnvelopeError};

/// Maximum frame size (64 KiB). Chat payloads are short text.
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

/// Length prefix size in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds maximum size.
    #[error("Frame size {0} exceeds maximum {MAX_FRAME_SIZE}")]
    FrameTooLarge(usize),

    /// Not enough data to decode a frame.
    #[error("Incomplete frame: need {0} more bytes")]
    Incomplete(usize),

    /// MessagePack encoding error.
    #[error("Encoding error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// MessagePack decoding error.
    #[error("Decoding error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    /// Decoded envelope violates the protocol shape.
    #[error("Invalid envelope: {0}")]
    Invalid(#[from] EnvelopeError),
}

/// Encode an envelope to bytes.
///
/// The encoded format is:
/// - 4 bytes: Big-endian length prefix
/// - N bytes: MessagePack-encoded envelope
///
/// # Errors
///
/// Returns an error if the envelope is too large or encoding fails.
pub fn encode(envelope: &Envelope) -> Result<Bytes, ProtocolError> {
    let payload = rmp_serde::to_vec_named(envelope)?;

    if payload.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(payload.len()));
    }

    let mut buf = BytesMut::with_capacity(LENGTH_PREFIX_SIZE + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.extend_from_slice(&payload);

    Ok(buf.freeze())
}

/// Encode an envelope into an existing buffer.
///
/// # Errors
///
/// Returns an error if the envelope is too large or encoding fails.
pub fn encode_into(envelope: &Envelope, buf: &mut BytesMut) -> Result<(), ProtocolError> {
    let payload = rmp_serde::to_vec_named(envelope)?;

    if payload.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(payload.len()));
    }

    buf.reserve(LENGTH_PREFIX_SIZE + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.extend_from_slice(&payload);

    Ok(())
}

/// Decode an envelope from bytes.
///
/// # Errors
///
/// Returns an error if the data is incomplete, too large, or invalid.
/// An envelope without a sender identity is rejected here rather than
/// surfaced to routing, and a direct-message flag that contradicts the
/// command is normalized away.
pub fn decode(data: &[u8]) -> Result<Envelope, ProtocolError> {
    if data.len() < LENGTH_PREFIX_SIZE {
        return Err(ProtocolError::Incomplete(LENGTH_PREFIX_SIZE - data.len()));
    }

    let length = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;

    if length > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(length));
    }

    let total_size = LENGTH_PREFIX_SIZE + length;
    if data.len() < total_size {
        return Err(ProtocolError::Incomplete(total_size - data.len()));
    }

    let mut envelope: Envelope = rmp_serde::from_slice(&data[LENGTH_PREFIX_SIZE..total_size])?;
    envelope.validate()?;
    envelope.normalize();
    Ok(envelope)
}

/// Try to decode an envelope from a buffer, advancing it if successful.
///
/// Returns `Ok(Some(envelope))` if a complete frame was decoded,
/// `Ok(None)` if more data is needed, or `Err` on protocol error.
///
/// # Errors
///
/// Returns an error if the frame is too large or invalid.
pub fn decode_from(buf: &mut BytesMut) -> Result<Option<Envelope>, ProtocolError> {
    if buf.len() < LENGTH_PREFIX_SIZE {
        return Ok(None);
    }

    let length = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;

    if length > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(length));
    }

    let total_size = LENGTH_PREFIX_SIZE + length;
    if buf.len() < total_size {
        return Ok(None);
    }

    buf.advance(LENGTH_PREFIX_SIZE);
    let payload = buf.split_to(length);
    let mut envelope: Envelope = rmp_serde::from_slice(&payload)?;
    envelope.validate()?;
    envelope.normalize();

    Ok(Some(envelope))
}

/// Codec for streaming envelope encoding/decoding.
#[derive(Debug, Default)]
pub struct EnvelopeCodec {
    // Reserved for future state (e.g., compression context)
}

impl EnvelopeCodec {
    /// Create a new codec instance.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Encode an envelope to bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails.
    pub fn encode(&self, envelope: &Envelope) -> Result<Bytes, ProtocolError> {
        encode(envelope)
    }

    /// Decode an envelope from bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if decoding fails.
    pub fn decode(&self, data: &[u8]) -> Result<Envelope, ProtocolError> {
        decode(data)
    }

    /// Try to decode an envelope from a buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is invalid.
    pub fn decode_from(&self, buf: &mut BytesMut) -> Result<Option<Envelope>, ProtocolError> {
        decode_from(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::Kind;

    #[test]
    fn test_encode_decode_roundtrip() {
        let envelopes = vec![
            Envelope::chat("alice", "Hello, room!"),
            Envelope::private_chat("alice", "bob", "psst"),
            Envelope::login("carol"),
            Envelope::join("dave"),
            Envelope::user_list_update("alice,bob,carol"),
            Envelope::server_info("alice", "welcome"),
        ];

        for envelope in envelopes {
            let encoded = encode(&envelope).unwrap();
            let decoded = decode(&encoded).unwrap();
            assert_eq!(envelope, decoded);
        }
    }

    #[test]
    fn test_unknown_command_survives_roundtrip() {
        let envelope = Envelope::new("alice", None, "...", Kind::Other("TYPING".into()));
        let encoded = encode(&envelope).unwrap();
        let decoded = decode(&encoded).unwrap();
        assert_eq!(decoded.kind, Kind::Other("TYPING".into()));
    }

    #[test]
    fn test_decode_incomplete() {
        let envelope = Envelope::chat("alice", "hello");
        let encoded = encode(&envelope).unwrap();

        let partial = &encoded[..5];
        match decode(partial) {
            Err(ProtocolError::Incomplete(_)) => {}
            other => panic!("Expected Incomplete error, got {:?}", other),
        }
    }

    #[test]
    fn test_frame_too_large() {
        let envelope = Envelope::chat("alice", "x".repeat(MAX_FRAME_SIZE + 1));

        match encode(&envelope) {
            Err(ProtocolError::FrameTooLarge(_)) => {}
            other => panic!("Expected FrameTooLarge error, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_rejects_missing_from() {
        let mut envelope = Envelope::chat("alice", "hello");
        envelope.from.clear();
        // Encode skips validation so we can test the decode-side guard.
        let encoded = encode(&envelope).unwrap();

        match decode(&encoded) {
            Err(ProtocolError::Invalid(_)) => {}
            other => panic!("Expected Invalid error, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_normalizes_contradictory_private_flag() {
        let mut envelope = Envelope::chat("alice", "hello");
        envelope.private = true;
        let encoded = encode(&envelope).unwrap();
        assert!(!decode(&encoded).unwrap().private);

        let mut dm = Envelope::private_chat("alice", "bob", "psst");
        dm.private = false;
        let encoded = encode(&dm).unwrap();
        assert!(decode(&encoded).unwrap().private);

        let mut buf = BytesMut::new();
        encode_into(&envelope, &mut buf).unwrap();
        assert!(!decode_from(&mut buf).unwrap().unwrap().private);
    }

    #[test]
    fn test_streaming_decode() {
        let first = Envelope::chat("alice", "one");
        let second = Envelope::chat("bob", "two");

        let mut buf = BytesMut::new();
        encode_into(&first, &mut buf).unwrap();
        encode_into(&second, &mut buf).unwrap();

        let decoded1 = decode_from(&mut buf).unwrap().unwrap();
        let decoded2 = decode_from(&mut buf).unwrap().unwrap();

        assert_eq!(first, decoded1);
        assert_eq!(second, decoded2);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_streaming_decode_partial() {
        let envelope = Envelope::chat("alice", "split across reads");
        let encoded = encode(&envelope).unwrap();

        let mut buf = BytesMut::new();
        buf.extend_from_slice(&encoded[..6]);
        assert!(decode_from(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&encoded[6..]);
        let decoded = decode_from(&mut buf).unwrap().unwrap();
        assert_eq!(envelope, decoded);
    }
}
