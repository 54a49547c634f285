//! Error types for perfetto-consumer.

use thiserror::Error;

/// Main error type for all consumer operations.
#[derive(Debug, Error)]
pub enum ConsumerError {
    /// I/O error during socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// MsgPack serialization error.
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error.
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    /// Protocol error (invalid frame, wrong flags, etc.).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The service answered a bind or an invocation with an error.
    #[error("Remote error: {0}")]
    Remote(String),

    /// The bound service does not expose the requested method.
    #[error("Remote service doesn't have a {0} method")]
    MethodNotFound(String),

    /// A per-message callback rejected a message and aborted the stream.
    #[error("Stream aborted by callback: {0}")]
    Callback(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// The caller's context was cancelled.
    #[error("Operation cancelled")]
    Cancelled,

    /// The caller's context deadline passed.
    #[error("Deadline exceeded")]
    DeadlineExceeded,

    /// The connection is gone; every outstanding and future call fails.
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// Too many binds/invocations are waiting for replies.
    #[error("Too many pending calls (limit {0})")]
    TooManyPending(usize),

    /// Connection or client configuration is unusable.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Backpressure timeout - write buffer full.
    #[error("Backpressure timeout")]
    BackpressureTimeout,
}

impl ConsumerError {
    /// Wrap an arbitrary error raised by a stream callback.
    pub fn callback<E>(err: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        ConsumerError::Callback(err.into())
    }

    /// True if the caller gave up (cancellation or deadline), as opposed to
    /// the service or the transport failing.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, ConsumerError::Cancelled | ConsumerError::DeadlineExceeded)
    }

    /// True if the error makes the whole connection unusable.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            ConsumerError::ConnectionLost(_) | ConsumerError::Io(_) | ConsumerError::Protocol(_)
        )
    }
}

/// Result type alias using ConsumerError.
pub type Result<T> = std::result::Result<T, ConsumerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancellation_is_distinct_from_remote() {
        assert!(ConsumerError::Cancelled.is_cancellation());
        assert!(ConsumerError::DeadlineExceeded.is_cancellation());
        assert!(!ConsumerError::Remote("no such service".into()).is_cancellation());
        assert!(!ConsumerError::ConnectionLost("eof".into()).is_cancellation());
    }

    #[test]
    fn test_transport_classification() {
        assert!(ConsumerError::ConnectionLost("eof".into()).is_transport());
        assert!(ConsumerError::Protocol("bad".into()).is_transport());
        assert!(!ConsumerError::MethodNotFound("QueryServiceState".into()).is_transport());
    }

    #[test]
    fn test_callback_wraps_source() {
        let err = ConsumerError::callback("enough");
        assert_eq!(err.to_string(), "Stream aborted by callback: enough");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_method_not_found_message() {
        let err = ConsumerError::MethodNotFound("QueryServiceState".into());
        assert_eq!(
            err.to_string(),
            "Remote service doesn't have a QueryServiceState method"
        );
    }
}
