//! Transport module - platform-specific socket dialing.
//!
//! Provides abstraction over:
//! - Unix Domain Sockets (Linux/macOS/Android)
//! - Named Pipes (Windows)

mod socket;

pub use socket::{default_consumer_socket, dial, ConsumerStream, CONSUMER_SOCKET_ENV};
