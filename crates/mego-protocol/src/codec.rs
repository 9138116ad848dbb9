//! Wire codecs.
//!
//! The transport is message framed, so a codec only has to turn one envelope
//! into one frame and back. JSON frames travel as WebSocket text messages,
//! MessagePack frames as binary messages.

use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::error::{ProtocolError, ProtocolResult};

/// Envelope encoding used on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    /// UTF-8 JSON.
    #[default]
    Json,
    /// MessagePack with named struct fields.
    #[serde(alias = "messagepack")]
    Msgpack,
}

impl Codec {
    /// Encodes a value into a frame.
    pub fn encode<T: Serialize>(&self, value: &T) -> ProtocolResult<Vec<u8>> {
        match self {
            Self::Json => Ok(serde_json::to_vec(value)?),
            Self::Msgpack => Ok(rmp_serde::to_vec_named(value)?),
        }
    }

    /// Decodes a frame into a value.
    pub fn decode<T: DeserializeOwned>(&self, frame: &[u8]) -> ProtocolResult<T> {
        if frame.is_empty() {
            return Err(ProtocolError::EmptyMessage);
        }
        match self {
            Self::Json => Ok(serde_json::from_slice(frame)?),
            Self::Msgpack => Ok(rmp_serde::from_slice(frame)?),
        }
    }

    /// True if frames must be sent as binary messages.
    pub fn is_binary(&self) -> bool {
        matches!(self, Self::Msgpack)
    }
}

/// Rejects frames larger than `max` bytes.
pub fn check_size(size: usize, max: usize) -> ProtocolResult<()> {
    if size > max {
        return Err(ProtocolError::MessageTooLarge { size, max });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Chunk, Request, Response};
    use mego_core::Status;
    use serde_json::json;

    #[test]
    fn json_request_decodes() {
        let frame = br#"{"method":"Sum","id":7,"params":[3,4]}"#;
        let request: Request = Codec::Json.decode(frame).unwrap();
        assert_eq!(request.method, "Sum");
        assert_eq!(request.params, vec![json!(3), json!(4)]);
    }

    #[test]
    fn msgpack_carries_chunks() {
        let request = Request::new("Upload", 1).with_chunk(Chunk::last(vec![0u8, 255, 7]));
        let frame = Codec::Msgpack.encode(&request).unwrap();
        let decoded: Request = Codec::Msgpack.decode(&frame).unwrap();
        assert_eq!(decoded.chunk, Some(Chunk::last(vec![0u8, 255, 7])));
    }

    #[test]
    fn msgpack_response_keeps_optional_fields_apart() {
        let response = Response::event("chat", json!("hello"));
        let frame = Codec::Msgpack.encode(&response).unwrap();
        let decoded: Response = Codec::Msgpack.decode(&frame).unwrap();
        assert_eq!(decoded.event.as_deref(), Some("chat"));
        assert_eq!(decoded.status, Status::Ok);
        assert!(decoded.id.is_none());
    }

    #[test]
    fn empty_frame_is_rejected() {
        let result: ProtocolResult<Request> = Codec::Json.decode(&[]);
        assert!(matches!(result, Err(ProtocolError::EmptyMessage)));
    }

    #[test]
    fn garbage_reports_decode_error() {
        let result: ProtocolResult<Request> = Codec::Json.decode(b"{not json");
        let error = result.unwrap_err();
        assert!(matches!(error, ProtocolError::Json(_)));
        assert!(error.to_string().starts_with("invalid JSON message"));

        let result: ProtocolResult<Request> = Codec::Msgpack.decode(&[0xc1]);
        assert!(matches!(result, Err(ProtocolError::MsgpackDecode(_))));
    }

    #[test]
    fn codec_names_in_config() {
        let codec: Codec = serde_json::from_str(r#""msgpack""#).unwrap();
        assert_eq!(codec, Codec::Msgpack);
        let codec: Codec = serde_json::from_str(r#""messagepack""#).unwrap();
        assert!(codec.is_binary());
        assert!(!Codec::Json.is_binary());
    }

    #[test]
    fn size_check() {
        assert!(check_size(10, 10).is_ok());
        let error = check_size(11, 10).unwrap_err();
        assert_eq!(error.to_string(), "message too large: 11 bytes (max: 10)");
    }
}
