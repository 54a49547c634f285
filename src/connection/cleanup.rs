//! Deferred release actions.
//!
//! A [`Cleanup`] holds one release step (remove a socket file, stop a
//! helper process, ...) that must run exactly once. It runs either when
//! [`Cleanup::invoke`] is called or, failing that, when it is dropped.

use std::fmt;

type Action = Box<dyn FnOnce() + Send + 'static>;

/// A release action that runs exactly once.
#[must_use = "a Cleanup runs on drop; bind it to keep the resource alive"]
pub struct Cleanup {
    actions: Vec<Action>,
}

impl Cleanup {
    /// Create a cleanup that runs `action`.
    pub fn new<F>(action: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            actions: vec![Box::new(action)],
        }
    }

    /// A cleanup with nothing to do.
    pub fn noop() -> Self {
        Self {
            actions: Vec::new(),
        }
    }

    /// Chain another cleanup to run after this one.
    pub fn then(mut self, mut next: Cleanup) -> Self {
        self.actions.append(&mut next.actions);
        self
    }

    /// Run the actions now, in the order they were chained.
    ///
    /// Later calls (and the eventual drop) do nothing.
    pub fn invoke(&mut self) {
        for action in self.actions.drain(..) {
            action();
        }
    }

    /// True once the actions have run (or if there were none).
    pub fn is_done(&self) -> bool {
        self.actions.is_empty()
    }
}

impl Drop for Cleanup {
    fn drop(&mut self) {
        self.invoke();
    }
}

impl Default for Cleanup {
    fn default() -> Self {
        Self::noop()
    }
}

impl fmt::Debug for Cleanup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cleanup")
            .field("pending_actions", &self.actions.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    fn counting() -> (Cleanup, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        (
            Cleanup::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
            }),
            count,
        )
    }

    #[test]
    fn test_invoke_runs_once() {
        let (mut cleanup, count) = counting();

        cleanup.invoke();
        cleanup.invoke();
        drop(cleanup);

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_runs_if_never_invoked() {
        let (cleanup, count) = counting();
        drop(cleanup);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_then_preserves_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let (a, b) = (log.clone(), log.clone());

        let mut cleanup = Cleanup::new(move || a.lock().unwrap().push("socket"))
            .then(Cleanup::new(move || b.lock().unwrap().push("tempdir")));
        assert!(!cleanup.is_done());

        cleanup.invoke();

        assert!(cleanup.is_done());
        assert_eq!(*log.lock().unwrap(), vec!["socket", "tempdir"]);
    }

    #[test]
    fn test_noop() {
        let mut cleanup = Cleanup::noop();
        assert!(cleanup.is_done());
        cleanup.invoke();
    }
}
