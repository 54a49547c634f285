//! MsgPack codec using `rmp-serde`.
//!
//! Always use `to_vec_named`, never `to_vec`: structs must go on the wire as
//! maps keyed by field name. Positional arrays would make every schema change
//! a breaking change, and the service decodes by name.

use crate::error::Result;

/// MessagePack codec for frame payloads.
pub struct MsgPackCodec;

impl MsgPackCodec {
    /// Encode a value to MsgPack bytes (struct-as-map).
    ///
    /// # Errors
    ///
    /// Returns error if the value cannot be serialized.
    #[inline]
    pub fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(value)?)
    }

    /// Decode MsgPack bytes to a value.
    ///
    /// # Errors
    ///
    /// Returns error if the bytes cannot be deserialized to type T.
    #[inline]
    pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConsumerError;
    use crate::protocol::{
        BindServiceReply, Producer, QueryServiceStateRequest, RemoteMethod, TracingServiceState,
    };

    #[test]
    fn test_encode_decode_bind_reply() {
        let reply = BindServiceReply {
            service_id: 7,
            methods: vec![RemoteMethod {
                id: 1,
                name: "QueryServiceState".into(),
            }],
        };

        let encoded = MsgPackCodec::encode(&reply).unwrap();
        let decoded: BindServiceReply = MsgPackCodec::decode(&encoded).unwrap();

        assert_eq!(decoded, reply);
    }

    #[test]
    fn test_structs_are_encoded_as_maps() {
        let producer = Producer {
            id: 1,
            name: "x".into(),
            uid: 0,
        };

        let encoded = MsgPackCodec::encode(&producer).unwrap();

        // 0x83 = fixmap with 3 entries; a fixarray would be 0x93.
        assert_eq!(encoded[0], 0x83, "Expected fixmap, got {:02X}", encoded[0]);
    }

    #[test]
    fn test_empty_request_is_empty_map() {
        let encoded = MsgPackCodec::encode(&QueryServiceStateRequest {}).unwrap();
        assert_eq!(encoded, vec![0x80]);
    }

    #[test]
    fn test_decode_error_on_invalid_data() {
        let result: Result<TracingServiceState> = MsgPackCodec::decode(b"\xc1 not msgpack");
        assert!(matches!(result, Err(ConsumerError::MsgPackDecode(_))));
    }

    #[test]
    fn test_binary_payload_roundtrip() {
        let data: Vec<u8> = vec![0x01, 0x02, 0x03, 0x04, 0x05];
        let encoded = MsgPackCodec::encode(&serde_bytes::Bytes::new(&data)).unwrap();

        // bin8 format marker.
        assert_eq!(encoded[0], 0xc4);

        let decoded: serde_bytes::ByteBuf = MsgPackCodec::decode(&encoded).unwrap();
        assert_eq!(decoded.as_ref(), &data);
    }
}
