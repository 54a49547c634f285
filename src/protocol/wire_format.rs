//! Wire format encoding and decoding.
//!
//! Implements the 11-byte header format:
//! ```text
//! ┌──────────┬───────┬──────────┬──────────┐
//! │ Method ID│ Flags │ Req ID   │ Length   │
//! │ 2 bytes  │ 1 byte│ 4 bytes  │ 4 bytes  │
//! │ uint16 BE│       │ uint32 BE│ uint32 BE│
//! └──────────┴───────┴──────────┴──────────┘
//! ```
//!
//! All multi-byte integers are Big Endian.

use crate::error::{ConsumerError, Result};

/// Header size in bytes (fixed, exactly 11).
pub const HEADER_SIZE: usize = 11;

/// Default maximum payload size (64 MB).
pub const DEFAULT_MAX_PAYLOAD_SIZE: u32 = 64 * 1024 * 1024;

/// Absolute maximum payload size (~2 GB, max i32).
pub const ABSOLUTE_MAX_PAYLOAD_SIZE: u32 = 2_147_483_647;

/// Reserved method ID for the ABORT signal (client -> service).
pub const ABORT_METHOD_ID: u16 = 0xFFFF;

/// Reserved method ID for the bind-service handshake.
pub const BIND_METHOD_ID: u16 = 0xFFFE;

/// Reserved method ID (never use).
pub const RESERVED_METHOD_ID: u16 = 0;

/// Flag constants for the protocol.
pub mod flags {
    /// Direction: from service (1) or from client (0).
    pub const FROM_SERVICE: u8 = 0b0000_0001;
    /// Message type: response (1) or request (0).
    pub const IS_RESPONSE: u8 = 0b0000_0010;
    /// Error flag: error (1) or ok (0).
    pub const IS_ERROR: u8 = 0b0000_0100;
    /// Stream flag: stream chunk (1) or single message (0).
    pub const IS_STREAM: u8 = 0b0000_1000;
    /// Stream end flag: final frame (1) or more coming (0).
    pub const STREAM_END: u8 = 0b0001_0000;

    /// Reserved bits mask (bits 5-7).
    pub const RESERVED_MASK: u8 = 0b1110_0000;

    /// Check if a specific flag is set.
    #[inline]
    pub fn has_flag(flags: u8, flag: u8) -> bool {
        flags & flag != 0
    }

    /// Request flags (client -> service).
    pub const REQUEST: u8 = 0;

    // Common flag combinations for replies

    /// Response flags: from_service + is_response = 0x03
    pub const RESPONSE: u8 = FROM_SERVICE | IS_RESPONSE;
    /// Error response flags: from_service + is_response + is_error = 0x07
    pub const ERROR_RESPONSE: u8 = FROM_SERVICE | IS_RESPONSE | IS_ERROR;
    /// Stream chunk flags: from_service + is_response + is_stream = 0x0B
    pub const STREAM_CHUNK: u8 = FROM_SERVICE | IS_RESPONSE | IS_STREAM;
    /// Stream end flags: from_service + is_response + is_stream + stream_end = 0x1B
    pub const STREAM_END_RESPONSE: u8 = FROM_SERVICE | IS_RESPONSE | IS_STREAM | STREAM_END;
}

/// Decoded header from wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Method identifier (1-65533, 0 reserved, 0xFFFE = bind, 0xFFFF = abort).
    pub method_id: u16,
    /// Flags byte (see `flags` module).
    pub flags: u8,
    /// Request identifier, assigned by the client and echoed in replies.
    pub request_id: u32,
    /// Payload length in bytes.
    pub payload_length: u32,
}

impl Header {
    /// Create a new header.
    pub fn new(method_id: u16, flags: u8, request_id: u32, payload_length: u32) -> Self {
        Self {
            method_id,
            flags,
            request_id,
            payload_length,
        }
    }

    /// Encode header to bytes (Big Endian).
    ///
    /// # Example
    ///
    /// ```
    /// use perfetto_consumer::protocol::{Header, flags};
    ///
    /// let header = Header::new(1, flags::RESPONSE, 42, 100);
    /// let bytes = header.encode();
    /// assert_eq!(bytes.len(), 11);
    /// ```
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        self.encode_into(&mut buf);
        buf
    }

    /// Encode header into an existing buffer.
    ///
    /// # Panics
    ///
    /// Panics if buffer is smaller than `HEADER_SIZE` (11 bytes).
    pub fn encode_into(&self, buf: &mut [u8]) {
        debug_assert!(buf.len() >= HEADER_SIZE);
        buf[0..2].copy_from_slice(&self.method_id.to_be_bytes());
        buf[2] = self.flags;
        buf[3..7].copy_from_slice(&self.request_id.to_be_bytes());
        buf[7..11].copy_from_slice(&self.payload_length.to_be_bytes());
    }

    /// Decode header from bytes (Big Endian).
    ///
    /// Returns `None` if buffer is too short.
    ///
    /// # Example
    ///
    /// ```
    /// use perfetto_consumer::protocol::Header;
    ///
    /// let bytes = [0, 1, 0x03, 0, 0, 0, 42, 0, 0, 0, 100];
    /// let header = Header::decode(&bytes).unwrap();
    /// assert_eq!(header.method_id, 1);
    /// assert_eq!(header.request_id, 42);
    /// assert_eq!(header.payload_length, 100);
    /// ```
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_SIZE {
            return None;
        }
        Some(Self {
            method_id: u16::from_be_bytes([buf[0], buf[1]]),
            flags: buf[2],
            request_id: u32::from_be_bytes([buf[3], buf[4], buf[5], buf[6]]),
            payload_length: u32::from_be_bytes([buf[7], buf[8], buf[9], buf[10]]),
        })
    }

    /// Validate the header for protocol compliance.
    ///
    /// Checks:
    /// - Method ID is not 0 (reserved)
    /// - Payload length doesn't exceed max
    /// - Reserved flag bits are 0
    pub fn validate(&self, max_payload_size: u32) -> Result<()> {
        if self.method_id == RESERVED_METHOD_ID {
            return Err(ConsumerError::Protocol(
                "Method ID 0 is reserved".to_string(),
            ));
        }

        if self.payload_length > max_payload_size {
            return Err(ConsumerError::Protocol(format!(
                "Payload size {} exceeds maximum {}",
                self.payload_length, max_payload_size
            )));
        }

        if self.flags & flags::RESERVED_MASK != 0 {
            return Err(ConsumerError::Protocol(
                "Reserved flag bits must be 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Check if this is an abort signal.
    #[inline]
    pub fn is_abort(&self) -> bool {
        self.method_id == ABORT_METHOD_ID
    }

    /// Check if this belongs to the bind handshake.
    #[inline]
    pub fn is_bind(&self) -> bool {
        self.method_id == BIND_METHOD_ID
    }

    /// Check if this is a response.
    #[inline]
    pub fn is_response(&self) -> bool {
        flags::has_flag(self.flags, flags::IS_RESPONSE)
    }

    /// Check if this is an error response.
    #[inline]
    pub fn is_error(&self) -> bool {
        flags::has_flag(self.flags, flags::IS_ERROR)
    }

    /// Check if this is a stream chunk.
    #[inline]
    pub fn is_stream(&self) -> bool {
        flags::has_flag(self.flags, flags::IS_STREAM)
    }

    /// Check if this is the final stream frame.
    #[inline]
    pub fn is_stream_end(&self) -> bool {
        flags::has_flag(self.flags, flags::STREAM_END)
    }

    /// Check if the frame was sent by the service.
    #[inline]
    pub fn is_from_service(&self) -> bool {
        flags::has_flag(self.flags, flags::FROM_SERVICE)
    }
}

/// Encode a header to bytes (standalone function).
#[inline]
pub fn encode_header(header: &Header) -> [u8; HEADER_SIZE] {
    header.encode()
}

/// Decode a header from bytes (standalone function).
#[inline]
pub fn decode_header(buf: &[u8]) -> Option<Header> {
    Header::decode(buf)
}
