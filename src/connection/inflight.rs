//! Table of requests waiting for a reply, keyed by request ID.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::handler::{BindHandler, InvokeEvent, InvokeHandler};
use crate::error::{ConsumerError, Result};

/// What a request ID is waiting for.
pub(crate) enum Pending {
    Bind(Arc<dyn BindHandler>),
    Invoke {
        method_id: u16,
        handler: Arc<dyn InvokeHandler>,
    },
}

struct State {
    entries: HashMap<u32, Pending>,
    /// Set once the connection is gone; no new entries are accepted after.
    lost: Option<String>,
}

pub(crate) struct Inflight {
    state: Mutex<State>,
    next_id: AtomicU32,
    max_pending: usize,
}

impl Inflight {
    pub(crate) fn new(max_pending: usize) -> Self {
        Self {
            state: Mutex::new(State {
                entries: HashMap::new(),
                lost: None,
            }),
            next_id: AtomicU32::new(1),
            max_pending,
        }
    }

    /// Allocate a request ID, skipping 0.
    fn next_request_id(&self) -> u32 {
        loop {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            if id != 0 {
                return id;
            }
        }
    }

    /// Register a pending request and return its ID.
    pub(crate) fn register(&self, pending: Pending) -> Result<u32> {
        let mut state = self.state.lock();

        if let Some(reason) = &state.lost {
            return Err(ConsumerError::ConnectionLost(reason.clone()));
        }
        if state.entries.len() >= self.max_pending {
            return Err(ConsumerError::TooManyPending(self.max_pending));
        }

        // After wraparound an old request may still hold the next ID.
        let id = loop {
            let id = self.next_request_id();
            if !state.entries.contains_key(&id) {
                break id;
            }
        };
        state.entries.insert(id, pending);
        Ok(id)
    }

    pub(crate) fn remove(&self, request_id: u32) -> Option<Pending> {
        self.state.lock().entries.remove(&request_id)
    }

    /// Handler of a still-open invocation, without removing it.
    pub(crate) fn invoke_handler(&self, request_id: u32) -> Option<(u16, Arc<dyn InvokeHandler>)> {
        match self.state.lock().entries.get(&request_id) {
            Some(Pending::Invoke { method_id, handler }) => Some((*method_id, handler.clone())),
            _ => None,
        }
    }

    /// Remove and return a pending bind; other entries are left alone.
    pub(crate) fn take_bind(&self, request_id: u32) -> Option<Arc<dyn BindHandler>> {
        let mut state = self.state.lock();
        match state.entries.get(&request_id) {
            Some(Pending::Bind(_)) => match state.entries.remove(&request_id) {
                Some(Pending::Bind(handler)) => Some(handler),
                _ => None,
            },
            _ => None,
        }
    }

    /// Mark the connection lost and fail every pending request.
    ///
    /// The first reason sticks. Handlers run outside the lock.
    pub(crate) fn fail_all(&self, reason: &str) {
        let drained: Vec<(u32, Pending)> = {
            let mut state = self.state.lock();
            if state.lost.is_none() {
                state.lost = Some(reason.to_string());
            }
            state.entries.drain().collect()
        };

        if !drained.is_empty() {
            tracing::debug!(count = drained.len(), reason, "failing pending requests");
        }

        for (_, pending) in drained {
            let err = ConsumerError::ConnectionLost(reason.to_string());
            match pending {
                Pending::Bind(handler) => handler.on_bind(Err(err)),
                Pending::Invoke { handler, .. } => {
                    let _ = handler.on_event(InvokeEvent::Failed(err));
                }
            }
        }
    }

    pub(crate) fn lost_reason(&self) -> Option<String> {
        self.state.lock().lost.clone()
    }

    pub(crate) fn len(&self) -> usize {
        self.state.lock().entries.len()
    }
}
