//! One-shot wait for a bind outcome.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::connection::{BindHandler, MethodTable};
use crate::context::Context;
use crate::error::{ConsumerError, Result};

struct BindState {
    tx: Mutex<Option<oneshot::Sender<Result<MethodTable>>>>,
}

impl BindHandler for BindState {
    fn on_bind(&self, outcome: Result<MethodTable>) {
        let Some(tx) = self.tx.lock().take() else {
            tracing::warn!("bind outcome delivered twice, ignoring");
            return;
        };
        let _ = tx.send(outcome);
    }
}

/// Waits for the outcome of a single bind request.
///
/// ```ignore
/// let bind = BindSync::new();
/// conn.bind("ConsumerPort", bind.handler()).await?;
/// let methods = bind.wait(&ctx).await?;
/// ```
pub struct BindSync {
    state: Arc<BindState>,
    rx: oneshot::Receiver<Result<MethodTable>>,
}

impl BindSync {
    pub fn new() -> Self {
        let (tx, rx) = oneshot::channel();
        Self {
            state: Arc::new(BindState {
                tx: Mutex::new(Some(tx)),
            }),
            rx,
        }
    }

    /// Handler to pass to `Connection::bind`.
    ///
    /// Only the first outcome it receives is kept.
    pub fn handler(&self) -> Arc<dyn BindHandler> {
        self.state.clone()
    }

    /// Wait for the method table, the bind error, or the end of `ctx`.
    pub async fn wait(self, ctx: &Context) -> Result<MethodTable> {
        let BindSync { state, rx } = self;
        drop(state);

        tokio::select! {
            biased;
            outcome = rx => outcome.unwrap_or_else(|_| {
                Err(ConsumerError::ConnectionLost(
                    "bind handler dropped without an outcome".into(),
                ))
            }),
            reason = ctx.done() => Err(reason),
        }
    }
}

impl Default for BindSync {
    fn default() -> Self {
        Self::new()
    }
}
