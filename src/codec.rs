//! Payload serialization contract.
//!
//! The host supplies the codec; the persisters only require an opaque
//! byte-encode/decode pair. `Postcard` is the default, `Json` is provided
//! for hosts that want store contents to be inspectable.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Error, Result};

/// Opaque byte codec for persisted payloads.
pub trait PayloadCodec: Send + Sync {
    /// Serialize a payload to bytes.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>>;

    /// Deserialize a payload from bytes.
    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T>;
}

/// Compact binary codec (default).
#[derive(Debug, Clone, Copy, Default)]
pub struct Postcard;

impl PayloadCodec for Postcard {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        postcard::to_allocvec(value).map_err(|e| Error::Serialization {
            message: e.to_string(),
        })
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        postcard::from_bytes(bytes).map_err(|e| Error::Serialization {
            message: e.to_string(),
        })
    }
}

/// Human-readable JSON codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct Json;

impl PayloadCodec for Json {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        serde_json::to_vec(value).map_err(|e| Error::Serialization {
            message: e.to_string(),
        })
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        serde_json::from_slice(bytes).map_err(|e| Error::Serialization {
            message: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        name: String,
        count: u32,
    }

    #[test]
    fn postcard_roundtrip() {
        let value = Sample {
            name: "x".to_string(),
            count: 7,
        };
        let bytes = Postcard.encode(&value).expect("encode");
        let back: Sample = Postcard.decode(&bytes).expect("decode");
        assert_eq!(back, value);
    }

    #[test]
    fn json_roundtrip() {
        let value = Sample {
            name: "x".to_string(),
            count: 7,
        };
        let bytes = Json.encode(&value).expect("encode");
        let back: Sample = Json.decode(&bytes).expect("decode");
        assert_eq!(back, value);
    }

    #[test]
    fn decode_failure_reports_serialization_error() {
        let err = Json.decode::<Sample>(b"not json").expect_err("must fail");
        assert!(matches!(err, Error::Serialization { .. }));
    }
}
