//! Codec module - serialization/deserialization for payloads.
//!
//! Every payload on the wire is MessagePack. [`MsgPackCodec`] wraps
//! `rmp-serde` and always encodes structs as maps so that fields can be
//! added on either side without breaking older peers.
//!
//! # Example
//!
//! ```
//! use perfetto_consumer::codec::MsgPackCodec;
//!
//! let encoded = MsgPackCodec::encode(&"hello").unwrap();
//! let decoded: String = MsgPackCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded, "hello");
//! ```

mod msgpack;

pub use msgpack::MsgPackCodec;
