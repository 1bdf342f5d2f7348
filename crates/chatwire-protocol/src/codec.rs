//! Codec for chatwire events and envelopes.
//!
//! Events and envelopes are JSON. Several outbound payloads may be written
//! as one text frame, separated by [`BATCH_DELIMITER`]; serialized JSON never
//! contains a raw newline, so splitting on it is unambiguous.

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::envelope::Envelope;
use crate::events::{InboundEvent, OutboundEvent};

/// Maximum inbound frame size in bytes.
pub const MAX_FRAME_SIZE: usize = 512;

/// Separator between coalesced payloads in one outgoing frame.
pub const BATCH_DELIMITER: u8 = b'\n';

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds the configured maximum size.
    #[error("Frame size {size} exceeds maximum {max}")]
    FrameTooLarge { size: usize, max: usize },

    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Check a frame length against a limit.
///
/// # Errors
///
/// Returns [`ProtocolError::FrameTooLarge`] if `size` exceeds `max`.
pub fn check_frame_size(size: usize, max: usize) -> Result<(), ProtocolError> {
    if size > max {
        return Err(ProtocolError::FrameTooLarge { size, max });
    }
    Ok(())
}

/// Decode an inbound event from a frame.
///
/// # Errors
///
/// Returns an error if the frame is not a valid inbound event.
pub fn decode_inbound(data: &[u8]) -> Result<InboundEvent, ProtocolError> {
    Ok(serde_json::from_slice(data)?)
}

/// Encode an inbound event. Used by clients and tests.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode_inbound(event: &InboundEvent) -> Result<Bytes, ProtocolError> {
    Ok(Bytes::from(serde_json::to_vec(event)?))
}

/// Encode an outbound event.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode_outbound(event: &OutboundEvent) -> Result<Bytes, ProtocolError> {
    Ok(Bytes::from(serde_json::to_vec(event)?))
}

/// Decode a single outbound event.
///
/// # Errors
///
/// Returns an error if the payload is not a valid outbound event.
pub fn decode_outbound(data: &[u8]) -> Result<OutboundEvent, ProtocolError> {
    Ok(serde_json::from_slice(data)?)
}

/// Encode a fan-out envelope.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode_envelope(envelope: &Envelope) -> Result<Bytes, ProtocolError> {
    Ok(Bytes::from(serde_json::to_vec(envelope)?))
}

/// Decode a fan-out envelope.
///
/// # Errors
///
/// Returns an error if the data is not a valid envelope.
pub fn decode_envelope(data: &[u8]) -> Result<Envelope, ProtocolError> {
    Ok(serde_json::from_slice(data)?)
}

/// Append a payload to an outgoing batch, inserting the delimiter if the
/// batch already holds a payload.
pub fn append_to_batch(buf: &mut BytesMut, payload: &[u8]) {
    if !buf.is_empty() {
        buf.put_u8(BATCH_DELIMITER);
    }
    buf.extend_from_slice(payload);
}

/// Split a received frame into its individual payloads.
pub fn split_batch(data: &[u8]) -> impl Iterator<Item = &[u8]> {
    data.split(|b| *b == BATCH_DELIMITER)
        .filter(|part| !part.is_empty())
}

/// Decode every outbound event in a (possibly coalesced) frame.
///
/// # Errors
///
/// Returns the first decoding error encountered.
pub fn decode_outbound_batch(data: &[u8]) -> Result<Vec<OutboundEvent>, ProtocolError> {
    split_batch(data).map(decode_outbound).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;

    #[test]
    fn test_decode_inbound_malformed() {
        match decode_inbound(b"{not json") {
            Err(ProtocolError::Json(_)) => {}
            other => panic!("Expected Json error, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_inbound_missing_recipient() {
        assert!(decode_inbound(br#"{"type":"chat","content":"hi"}"#).is_err());
    }

    #[test]
    fn test_check_frame_size() {
        assert!(check_frame_size(MAX_FRAME_SIZE, MAX_FRAME_SIZE).is_ok());
        match check_frame_size(MAX_FRAME_SIZE + 1, MAX_FRAME_SIZE) {
            Err(ProtocolError::FrameTooLarge { size, max }) => {
                assert_eq!(size, 513);
                assert_eq!(max, 512);
            }
            other => panic!("Expected FrameTooLarge, got {:?}", other),
        }
    }

    #[test]
    fn test_batch_coalescing() {
        let first = encode_outbound(&OutboundEvent::online(1)).unwrap();
        let second = encode_outbound(&OutboundEvent::typing(2)).unwrap();

        let mut buf = BytesMut::new();
        append_to_batch(&mut buf, &first);
        assert_eq!(&buf[..], &first[..]);

        append_to_batch(&mut buf, &second);
        assert_eq!(buf.len(), first.len() + 1 + second.len());
        assert_eq!(buf[first.len()], BATCH_DELIMITER);

        let events = decode_outbound_batch(&buf).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind(), EventKind::Online);
        assert_eq!(events[1].kind(), EventKind::Typing);
    }

    #[test]
    fn test_payload_with_newline_in_content_stays_single_line() {
        let message = crate::events::ChatMessage {
            id: 1,
            sender_id: 1,
            recipient_id: 2,
            content: "line one\nline two".into(),
            is_read: false,
            created_at: chrono::Utc::now(),
        };
        let encoded = encode_outbound(&OutboundEvent::chat(message)).unwrap();
        assert!(!encoded.contains(&BATCH_DELIMITER));
        assert_eq!(split_batch(&encoded).count(), 1);
    }

    #[test]
    fn test_envelope_codec() {
        let payload = encode_outbound(&OutboundEvent::typing(3)).unwrap();
        let encoded = encode_envelope(&Envelope::new(9, payload.clone())).unwrap();
        let decoded = decode_envelope(&encoded).unwrap();

        assert_eq!(decoded.user_id, 9);
        assert_eq!(decoded.payload, payload);
        assert!(decode_envelope(b"garbage").is_err());
    }
}
