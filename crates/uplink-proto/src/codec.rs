//! Codec for encoding/decoding control messages

use crate::messages::ControlMessage;
use bytes::Bytes;
use thiserror::Error;

/// Codec errors
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Serialization error: {0}")]
    SerializationError(#[from] bincode::Error),

    #[error("Message too large: {0} bytes")]
    MessageTooLarge(usize),
}

/// Control message codec.
///
/// One encoded message per transport frame (the WebSocket layer already
/// delimits messages, so no length prefix is needed on the wire).
pub struct ControlCodec;

impl ControlCodec {
    /// Encode a control message to bytes
    pub fn encode(msg: &ControlMessage) -> Result<Bytes, CodecError> {
        let payload = bincode::serialize(msg)?;

        if payload.len() > crate::MAX_MESSAGE_SIZE {
            return Err(CodecError::MessageTooLarge(payload.len()));
        }

        Ok(Bytes::from(payload))
    }

    /// Decode a control message from a complete frame
    pub fn decode(frame: &[u8]) -> Result<ControlMessage, CodecError> {
        if frame.len() > crate::MAX_MESSAGE_SIZE {
            return Err(CodecError::MessageTooLarge(frame.len()));
        }

        Ok(bincode::deserialize(frame)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode() {
        let msg = ControlMessage::Ping {
            seq: 7,
            timestamp: 123456,
        };

        let encoded = ControlCodec::encode(&msg).unwrap();
        let decoded = ControlCodec::decode(&encoded).unwrap();

        assert_eq!(msg, decoded);
    }

    #[test]
    fn test_decode_garbage() {
        let result = ControlCodec::decode(&[0xff; 3]);
        assert!(result.is_err());
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let msg = ControlMessage::HttpResponseChunk {
            stream_id: 1,
            data: vec![0u8; crate::MAX_MESSAGE_SIZE + 1],
            is_final: false,
        };

        let result = ControlCodec::encode(&msg);
        assert!(matches!(result, Err(CodecError::MessageTooLarge(_))));
    }
}
