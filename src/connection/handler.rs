//! Handler traits through which the connection reports replies.
//!
//! Handlers run on the connection's read-loop task, one frame at a time.
//! They must not block for long: every other request on the connection
//! waits behind them.

use std::ops::ControlFlow;

use bytes::Bytes;

use super::MethodTable;
use crate::error::{ConsumerError, Result};

/// Receives the single outcome of a bind request.
pub trait BindHandler: Send + Sync + 'static {
    fn on_bind(&self, outcome: Result<MethodTable>);
}

/// One event of an invocation's reply stream.
#[derive(Debug)]
pub enum InvokeEvent {
    /// An encoded response message.
    Message(Bytes),
    /// The stream finished successfully.
    End,
    /// The stream failed (remote error or connection loss).
    Failed(ConsumerError),
}

/// Receives the reply stream of an invocation.
///
/// Returning `ControlFlow::Break` from a `Message` event asks the
/// connection to stop delivering this stream and to send ABORT to the
/// service. The return value of terminal events is ignored.
///
/// Implementations that guard their state with a blocking lock make every
/// other holder of that lock wait while `on_event` runs. A caller giving up
/// on the stream from an async task blocks its worker thread for that long,
/// so per-message work must stay short.
pub trait InvokeHandler: Send + Sync + 'static {
    fn on_event(&self, event: InvokeEvent) -> ControlFlow<()>;
}
