//! Callback delivery plus completion wait for a streamed invocation.

use std::marker::PhantomData;
use std::ops::ControlFlow;
use std::sync::{Arc, Weak};

use bytes::Bytes;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use tokio::sync::oneshot;

use crate::codec::MsgPackCodec;
use crate::connection::{InvokeEvent, InvokeHandler};
use crate::context::Context;
use crate::error::{ConsumerError, Result};

struct Slot<F> {
    callback: Option<F>,
    done: Option<oneshot::Sender<Result<()>>>,
}

impl<F> Slot<F> {
    /// Record the terminal outcome and drop the callback.
    fn finish(&mut self, outcome: Result<()>) {
        self.callback = None;
        if let Some(done) = self.done.take() {
            let _ = done.send(outcome);
        }
    }
}

struct QueryState<T, F> {
    ctx: Context,
    slot: Mutex<Slot<F>>,
    _message: PhantomData<fn(T)>,
}

impl<T, F> QueryState<T, F>
where
    T: DeserializeOwned,
    F: FnMut(T) -> Result<()>,
{
    fn deliver(&self, slot: &mut Slot<F>, bytes: &Bytes) -> Result<()> {
        if let Some(reason) = self.ctx.err() {
            return Err(reason);
        }
        let message: T = MsgPackCodec::decode(bytes)?;
        match slot.callback.as_mut() {
            Some(callback) => callback(message),
            None => Ok(()),
        }
    }
}

impl<T, F> QueryState<T, F> {
    fn abandon(&self) {
        let mut slot = self.slot.lock();
        slot.done = None;
        slot.callback = None;
    }
}

/// Abandons the stream when the waiter goes away, however it leaves.
struct AbandonOnDrop<T, F>(Weak<QueryState<T, F>>);

impl<T, F> Drop for AbandonOnDrop<T, F> {
    fn drop(&mut self) {
        if let Some(state) = self.0.upgrade() {
            state.abandon();
        }
    }
}

impl<T, F> InvokeHandler for QueryState<T, F>
where
    T: DeserializeOwned + Send + 'static,
    F: FnMut(T) -> Result<()> + Send + 'static,
{
    fn on_event(&self, event: InvokeEvent) -> ControlFlow<()> {
        // Held across the callback: at most one callback runs at a time and
        // none starts once the outcome is recorded.
        let mut slot = self.slot.lock();

        if slot.done.is_none() {
            match event {
                InvokeEvent::Message(_) => tracing::debug!("dropping message after completion"),
                _ => tracing::warn!("stream terminated twice, ignoring"),
            }
            return ControlFlow::Break(());
        }

        match event {
            InvokeEvent::Message(bytes) => match self.deliver(&mut slot, &bytes) {
                Ok(()) => ControlFlow::Continue(()),
                Err(e) => {
                    tracing::debug!(error = %e, "stopping stream");
                    slot.finish(Err(e));
                    ControlFlow::Break(())
                }
            },
            InvokeEvent::End => {
                slot.finish(Ok(()));
                ControlFlow::Continue(())
            }
            InvokeEvent::Failed(e) => {
                slot.finish(Err(e));
                ControlFlow::Continue(())
            }
        }
    }
}

/// Forwards each message of a streamed reply to a callback and waits for
/// the stream to finish.
///
/// Messages are decoded as `T` and passed to the callback in arrival order,
/// one at a time. The first error (from the callback, from decoding, or
/// from the service) ends the stream. The callback never runs after
/// [`QuerySync::wait`] returns.
///
/// ```ignore
/// let query = QuerySync::new(&ctx, |state: TracingServiceState| {
///     println!("{} producers", state.producers.len());
///     Ok(())
/// });
/// conn.invoke(&method, &QueryServiceStateRequest::default(), query.handler()).await?;
/// query.wait(&ctx).await?;
/// ```
pub struct QuerySync<T, F> {
    state: Arc<QueryState<T, F>>,
    rx: oneshot::Receiver<Result<()>>,
}

impl<T, F> QuerySync<T, F>
where
    T: DeserializeOwned + Send + 'static,
    F: FnMut(T) -> Result<()> + Send + 'static,
{
    /// Bind `callback` to a new stream.
    ///
    /// Once `ctx` ends, incoming messages stop reaching the callback.
    pub fn new(ctx: &Context, callback: F) -> Self {
        let (tx, rx) = oneshot::channel();
        Self {
            state: Arc::new(QueryState {
                ctx: ctx.clone(),
                slot: Mutex::new(Slot {
                    callback: Some(callback),
                    done: Some(tx),
                }),
                _message: PhantomData,
            }),
            rx,
        }
    }

    /// Handler to pass to `Connection::invoke`.
    pub fn handler(&self) -> Arc<dyn InvokeHandler> {
        self.state.clone()
    }

    /// Wait until the stream finishes or `ctx` ends.
    ///
    /// When `ctx` ends first, or the returned future is dropped, the stream
    /// is abandoned: the callback is dropped and later events are discarded.
    /// Abandoning takes the stream's lock, so it waits for a callback that
    /// is running on the read loop to return.
    pub async fn wait(self, ctx: &Context) -> Result<()> {
        let QuerySync { state, rx } = self;
        let _abandon = AbandonOnDrop(Arc::downgrade(&state));
        drop(state);

        tokio::select! {
            biased;
            outcome = rx => outcome.unwrap_or_else(|_| {
                Err(ConsumerError::ConnectionLost(
                    "stream handler dropped without an outcome".into(),
                ))
            }),
            reason = ctx.done() => Err(reason),
        }
    }

    /// Give up on the stream without waiting.
    ///
    /// Blocks until a callback already running finishes; no callback starts
    /// afterwards.
    pub fn abandon(self) {
        self.state.abandon();
    }
}
