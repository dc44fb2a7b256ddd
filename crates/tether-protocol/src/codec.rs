//! Codec trait and implementations.
//!
//! A codec converts between Rust types and raw bytes. Everything above the
//! transport goes through a [`Codec`], so the encoding can be swapped
//! without touching the room or client code.

use serde::{Serialize, de::DeserializeOwned};

use crate::ProtocolError;

/// Encodes Rust types to bytes and decodes bytes back.
///
/// `Send + Sync + 'static` so one codec can be shared by every
/// connection task.
pub trait Codec: Send + Sync + 'static {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError>;

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError>;
}

/// JSON codec via `serde_json`. Human-readable, easy to debug from a
/// browser console.
#[cfg(feature = "json")]
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

#[cfg(feature = "json")]
impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(value).map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError> {
        serde_json::from_slice(data).map_err(ProtocolError::Decode)
    }
}

#[cfg(all(test, feature = "json"))]
mod tests {
    use super::*;
    use crate::{Envelope, SystemMessage};

    #[test]
    fn test_json_codec_envelope_round_trip() {
        let codec = JsonCodec;
        let envelope = Envelope::system(3, 1_000, SystemMessage::ListRooms);
        let bytes = codec.encode(&envelope).unwrap();
        let decoded: Envelope = codec.decode(&bytes).unwrap();
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn test_decode_garbage_returns_error() {
        let result: Result<Envelope, _> = JsonCodec.decode(b"not json at all");
        assert!(matches!(result, Err(ProtocolError::Decode(_))));
    }

    #[test]
    fn test_decode_unknown_system_message_type_returns_error() {
        let json = br#"{"seq":1,"timestamp":0,"payload":{"type":"System","data":{"type":"Teleport"}}}"#;
        let result: Result<Envelope, _> = JsonCodec.decode(json);
        assert!(result.is_err());
    }
}
