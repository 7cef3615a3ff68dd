// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Payload Codecs
//!
//! A codec binds a wire content-type tag to an encode/decode pair. Two codecs ship
//! with the crate: UTF-8 JSON text and MessagePack. `ContentType` acts as the
//! registry, resolving a tag read from a delivery to the codec that understands it.

use crate::errors::CodecError;
use serde::{de::DeserializeOwned, Serialize};
use std::{fmt, str::FromStr};

/// Content type tag for JSON payloads
pub const JSON_CONTENT_TYPE: &str = "application/json";
/// Content type tag for MessagePack payloads
pub const MSGPACK_CONTENT_TYPE: &str = "application/x-msgpack";

/// Encode/decode pair tied to a single content-type tag.
///
/// Implementations must satisfy `decode(encode(v)) == v` for every value the
/// payload type can represent.
pub trait Codec: Send + Sync + 'static {
    /// The tag attached to published messages and required on consumed ones.
    fn content_type(&self) -> &'static str;

    fn encode<T>(&self, value: &T) -> Result<Vec<u8>, CodecError>
    where
        T: Serialize + ?Sized;

    fn decode<T>(&self, bytes: &[u8]) -> Result<T, CodecError>
    where
        T: DeserializeOwned;
}

/// UTF-8 JSON text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn content_type(&self) -> &'static str {
        JSON_CONTENT_TYPE
    }

    fn encode<T>(&self, value: &T) -> Result<Vec<u8>, CodecError>
    where
        T: Serialize + ?Sized,
    {
        serde_json::to_vec(value).map_err(|err| CodecError::Encode {
            content_type: JSON_CONTENT_TYPE,
            reason: err.to_string(),
        })
    }

    fn decode<T>(&self, bytes: &[u8]) -> Result<T, CodecError>
    where
        T: DeserializeOwned,
    {
        serde_json::from_slice(bytes).map_err(|err| CodecError::Decode {
            content_type: JSON_CONTENT_TYPE,
            reason: err.to_string(),
        })
    }
}

/// MessagePack, with structs written as maps so field names travel on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MsgPackCodec;

impl Codec for MsgPackCodec {
    fn content_type(&self) -> &'static str {
        MSGPACK_CONTENT_TYPE
    }

    fn encode<T>(&self, value: &T) -> Result<Vec<u8>, CodecError>
    where
        T: Serialize + ?Sized,
    {
        rmp_serde::to_vec_named(value).map_err(|err| CodecError::Encode {
            content_type: MSGPACK_CONTENT_TYPE,
            reason: err.to_string(),
        })
    }

    fn decode<T>(&self, bytes: &[u8]) -> Result<T, CodecError>
    where
        T: DeserializeOwned,
    {
        rmp_serde::from_slice(bytes).map_err(|err| CodecError::Decode {
            content_type: MSGPACK_CONTENT_TYPE,
            reason: err.to_string(),
        })
    }
}

/// The registry of built-in codecs, keyed by content-type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentType {
    Json,
    MsgPack,
}

impl ContentType {
    /// Resolves a wire tag to its codec. Tags must match exactly.
    pub fn from_tag(tag: &str) -> Option<ContentType> {
        match tag {
            JSON_CONTENT_TYPE => Some(ContentType::Json),
            MSGPACK_CONTENT_TYPE => Some(ContentType::MsgPack),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Json => JSON_CONTENT_TYPE,
            ContentType::MsgPack => MSGPACK_CONTENT_TYPE,
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentType {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ContentType::from_tag(s).ok_or_else(|| CodecError::UnsupportedContentType(s.to_owned()))
    }
}

impl Codec for ContentType {
    fn content_type(&self) -> &'static str {
        self.as_str()
    }

    fn encode<T>(&self, value: &T) -> Result<Vec<u8>, CodecError>
    where
        T: Serialize + ?Sized,
    {
        match self {
            ContentType::Json => JsonCodec.encode(value),
            ContentType::MsgPack => MsgPackCodec.encode(value),
        }
    }

    fn decode<T>(&self, bytes: &[u8]) -> Result<T, CodecError>
    where
        T: DeserializeOwned,
    {
        match self {
            ContentType::Json => JsonCodec.decode(bytes),
            ContentType::MsgPack => MsgPackCodec.decode(bytes),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::collections::BTreeMap;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Move {
        player: String,
        to_location: String,
        units: Vec<u32>,
        note: Option<String>,
    }

    fn sample() -> Move {
        Move {
            player: "washington".into(),
            to_location: "europe".into(),
            units: vec![1, 2, 3],
            note: None,
        }
    }

    #[test]
    fn both_codecs_round_trip_a_struct() {
        for codec in [ContentType::Json, ContentType::MsgPack] {
            let bytes = codec.encode(&sample()).unwrap();
            let decoded: Move = codec.decode(&bytes).unwrap();
            assert_eq!(decoded, sample(), "{codec}");
        }
    }

    #[test]
    fn json_writes_utf8_text() {
        let mut map = BTreeMap::new();
        map.insert("a", 1);
        let bytes = JsonCodec.encode(&map).unwrap();
        assert_eq!(std::str::from_utf8(&bytes).unwrap(), r#"{"a":1}"#);
    }

    #[test]
    fn msgpack_writes_structs_as_maps() {
        let bytes = MsgPackCodec.encode(&sample()).unwrap();
        // fixmap marker with four entries
        assert_eq!(bytes[0], 0x84);
    }

    #[test]
    fn malformed_bytes_yield_a_typed_decode_error() {
        let err = JsonCodec.decode::<Move>(b"{not json").unwrap_err();
        assert!(matches!(
            err,
            CodecError::Decode {
                content_type: JSON_CONTENT_TYPE,
                ..
            }
        ));

        let err = MsgPackCodec.decode::<Move>(&[0xc1]).unwrap_err();
        assert!(matches!(
            err,
            CodecError::Decode {
                content_type: MSGPACK_CONTENT_TYPE,
                ..
            }
        ));
    }

    #[test]
    fn registry_resolves_exact_tags_only() {
        assert_eq!(ContentType::from_tag("application/json"), Some(ContentType::Json));
        assert_eq!(
            "application/x-msgpack".parse::<ContentType>(),
            Ok(ContentType::MsgPack)
        );
        assert_eq!(ContentType::from_tag("application/json; charset=utf-8"), None);
        assert_eq!(
            "text/plain".parse::<ContentType>(),
            Err(CodecError::UnsupportedContentType("text/plain".into()))
        );
        assert_eq!(ContentType::MsgPack.content_type(), MsgPackCodec.content_type());
    }
}
