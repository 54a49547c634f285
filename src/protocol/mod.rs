//! Protocol module - wire format, framing, and payload messages.
//!
//! This module implements the binary protocol spoken with the service:
//! - 11-byte header encoding/decoding
//! - Frame buffer for accumulating partial reads
//! - Frame struct with typed accessors
//! - Handshake and query payload messages

mod frame;
mod frame_buffer;
mod messages;
mod wire_format;

pub use frame::{build_frame, Frame};
pub use frame_buffer::FrameBuffer;
pub use messages::{
    BindServiceReply, BindServiceRequest, DataSource, DataSourceDescriptor, Producer,
    QueryServiceStateRequest, RemoteError, RemoteMethod, TracingServiceState,
};
pub use wire_format::{
    decode_header, encode_header, flags, Header, ABORT_METHOD_ID, ABSOLUTE_MAX_PAYLOAD_SIZE,
    BIND_METHOD_ID, DEFAULT_MAX_PAYLOAD_SIZE, HEADER_SIZE, RESERVED_METHOD_ID,
};
