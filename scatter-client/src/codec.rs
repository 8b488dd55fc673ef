//! Serialization contract for request and response payloads.
//!
//! The core never interprets payload bytes. Callers supply a serializer per
//! dispatcher; it rides along with every sub-request so the transport can
//! encode the request and decode the response at the wire boundary.

use bytes::Bytes;
use thiserror::Error;

/// Codec errors.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The request could not be encoded.
    #[error("encode failed: {reason}")]
    Encode {
        /// Why encoding failed.
        reason: String,
    },

    /// The response bytes could not be decoded.
    #[error("decode failed: {reason}")]
    Decode {
        /// Why decoding failed.
        reason: String,
    },

    /// The encoded payload exceeds the transport's message limit.
    #[error("payload too large: {actual} > {max}")]
    TooLarge {
        /// Encoded size in bytes.
        actual: usize,
        /// Maximum allowed size in bytes.
        max: usize,
    },
}

/// Encodes requests and decodes responses for one request/response pair.
///
/// Implementations must be cheap to share; the dispatcher clones an `Arc`
/// of the serializer into every sub-request.
pub trait Serializer<Req, Resp>: Send + Sync {
    /// Encodes a request payload for the wire.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError`] if the payload cannot be encoded or exceeds
    /// the message limit.
    fn encode_request(&self, request: &Req) -> Result<Bytes, CodecError>;

    /// Decodes a response payload from the wire.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError`] if the bytes do not form a valid response.
    fn decode_response(&self, buf: Bytes) -> Result<Resp, CodecError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Serializer for UTF-8 string payloads.
    struct Utf8Serializer;

    impl Serializer<String, String> for Utf8Serializer {
        fn encode_request(&self, request: &String) -> Result<Bytes, CodecError> {
            Ok(Bytes::copy_from_slice(request.as_bytes()))
        }

        fn decode_response(&self, buf: Bytes) -> Result<String, CodecError> {
            String::from_utf8(buf.to_vec()).map_err(|err| CodecError::Decode {
                reason: err.to_string(),
            })
        }
    }

    #[test]
    fn test_utf8_round_trip() {
        let serializer = Utf8Serializer;
        let encoded = serializer.encode_request(&"ping".to_string()).expect("encodes");
        let decoded = serializer.decode_response(encoded).expect("decodes");
        assert_eq!(decoded, "ping");
    }

    #[test]
    fn test_decode_rejects_invalid_utf8() {
        let serializer = Utf8Serializer;
        let result = serializer.decode_response(Bytes::from_static(&[0xff, 0xfe]));
        assert!(matches!(result, Err(CodecError::Decode { .. })));
    }
}
