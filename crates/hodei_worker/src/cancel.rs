//! Cooperative cancellation for in-flight executions.
//!
//! A CancelJob from the orchestrator carries a reason and a force flag, and
//! both have to reach the runner: the reason ends up in the terminal
//! StatusUpdate, and force decides whether the running child is killed
//! outright or allowed to finish its current command while the rest of the
//! job is skipped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Why, and how hard, an execution was asked to stop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancelRequest {
    pub reason: String,
    pub force: bool,
}

/// Shared cancellation state between the socket loop and a job task.
/// Clone is cheap; all clones observe the same request.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    cancelled: AtomicBool,
    request: Mutex<Option<CancelRequest>>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fast-path check, cheap enough for the runner's poll loop.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Whether the stop must kill the running child immediately.
    pub fn is_forced(&self) -> bool {
        self.request().is_some_and(|r| r.force)
    }

    /// Request cancellation. The first reason sticks; a later forced request
    /// still escalates, so a CancelJob retry with `force` set upgrades a
    /// graceful stop into a kill.
    pub fn cancel(&self, reason: impl Into<String>, force: bool) {
        {
            let mut request = self.inner.request.lock().expect("cancel lock poisoned");
            match request.as_mut() {
                Some(existing) => existing.force = existing.force || force,
                None => {
                    *request = Some(CancelRequest {
                        reason: reason.into(),
                        force,
                    });
                }
            }
        }
        self.inner.cancelled.store(true, Ordering::SeqCst);
    }

    /// The recorded request, if cancellation was asked for.
    pub fn request(&self) -> Option<CancelRequest> {
        self.inner
            .request
            .lock()
            .expect("cancel lock poisoned")
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_shared_across_clones() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        assert!(clone.request().is_none());

        token.cancel("operator asked", false);
        assert!(clone.is_cancelled());
        assert_eq!(clone.request().unwrap().reason, "operator asked");
    }

    #[test]
    fn test_first_reason_sticks_force_escalates() {
        let token = CancellationToken::new();
        token.cancel("first", false);
        assert!(!token.is_forced());

        token.cancel("second", true);
        let request = token.request().unwrap();
        assert_eq!(request.reason, "first");
        assert!(request.force);
    }

    #[test]
    fn test_force_never_downgrades() {
        let token = CancellationToken::new();
        token.cancel("kill it", true);
        token.cancel("gently now", false);
        assert!(token.is_forced());
    }
}
