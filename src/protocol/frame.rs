//! Frame struct with typed accessors.
//!
//! Represents a complete protocol frame with header and payload.
//! Uses `bytes::Bytes` for zero-copy payload sharing.
//!
//! # Example
//!
//! ```
//! use perfetto_consumer::protocol::{Frame, Header, flags};
//! use bytes::Bytes;
//!
//! let header = Header::new(1, flags::STREAM_CHUNK, 42, 5);
//! let frame = Frame::new(header, Bytes::from_static(b"hello"));
//!
//! assert_eq!(frame.request_id(), 42);
//! assert!(frame.is_stream());
//! ```

use bytes::Bytes;

use super::wire_format::{flags, Header, HEADER_SIZE};

/// A complete protocol frame.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Decoded header.
    pub header: Header,
    /// Payload bytes (zero-copy via `bytes::Bytes`).
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame from header and payload.
    pub fn new(header: Header, payload: Bytes) -> Self {
        Self { header, payload }
    }

    /// Get a reference to the payload bytes.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Get the method ID.
    #[inline]
    pub fn method_id(&self) -> u16 {
        self.header.method_id
    }

    /// Get the request ID.
    #[inline]
    pub fn request_id(&self) -> u32 {
        self.header.request_id
    }

    /// Check if this is a response.
    #[inline]
    pub fn is_response(&self) -> bool {
        flags::has_flag(self.header.flags, flags::IS_RESPONSE)
    }

    /// Check if this is an error response.
    #[inline]
    pub fn is_error(&self) -> bool {
        flags::has_flag(self.header.flags, flags::IS_ERROR)
    }

    /// Check if this is a stream frame.
    #[inline]
    pub fn is_stream(&self) -> bool {
        flags::has_flag(self.header.flags, flags::IS_STREAM)
    }

    /// Check if this is the final stream frame.
    #[inline]
    pub fn is_stream_end(&self) -> bool {
        flags::has_flag(self.header.flags, flags::STREAM_END)
    }

    /// Check if this is an abort signal.
    #[inline]
    pub fn is_abort(&self) -> bool {
        self.header.is_abort()
    }

    /// Check if this belongs to the bind handshake.
    #[inline]
    pub fn is_bind(&self) -> bool {
        self.header.is_bind()
    }
}

/// Build a complete frame as a single byte vector.
///
/// `payload_length` is taken from `payload`.
///
/// # Example
///
/// ```
/// use perfetto_consumer::protocol::{build_frame, flags, HEADER_SIZE};
///
/// let bytes = build_frame(1, flags::STREAM_CHUNK, 42, b"hello");
/// assert_eq!(bytes.len(), HEADER_SIZE + 5);
/// ```
pub fn build_frame(method_id: u16, frame_flags: u8, request_id: u32, payload: &[u8]) -> Vec<u8> {
    let header = Header::new(method_id, frame_flags, request_id, payload.len() as u32);
    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
    buf.extend_from_slice(&header.encode());
    buf.extend_from_slice(payload);
    buf
}
