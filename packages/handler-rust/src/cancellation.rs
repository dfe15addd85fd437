//! Cooperative cancellation tokens handed to operation handlers.
//!
//! Cancellation is advisory. The dispatcher never interrupts handler code; it
//! passes a [`CancellationToken`] through the start context and the handler
//! polls it or waits on it.

use std::fmt;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::{Condvar, Mutex};

// ---------------------------------------------------------------------------
// CancellationToken trait
// ---------------------------------------------------------------------------

/// Cancellation signal observed by a running operation.
#[async_trait]
pub trait CancellationToken: Send + Sync + fmt::Debug {
    /// Whether cancellation has been requested.
    fn is_cancelled(&self) -> bool;

    /// Details supplied with the cancellation request, if any.
    fn details(&self) -> Option<String>;

    /// Blocks the current thread until cancelled or until `timeout` elapses.
    ///
    /// `None` waits without a bound. Returns whether the token is cancelled.
    /// Must not be called from an async task; use [`wait_async`](Self::wait_async).
    fn wait(&self, timeout: Option<Duration>) -> bool;

    /// Resolves once cancellation has been requested.
    async fn wait_async(&self);
}

// ---------------------------------------------------------------------------
// Uncancellable
// ---------------------------------------------------------------------------

/// Token for callers that never cancel.
///
/// `wait(Some(d))` sleeps for `d` and returns `false`; `wait(None)` and a zero
/// timeout return `false` immediately. `wait_async` never resolves: handlers
/// awaiting it must race it against their own work or a timeout.
#[derive(Debug, Clone, Copy, Default)]
pub struct Uncancellable;

#[async_trait]
impl CancellationToken for Uncancellable {
    fn is_cancelled(&self) -> bool {
        false
    }

    fn details(&self) -> Option<String> {
        None
    }

    fn wait(&self, timeout: Option<Duration>) -> bool {
        if let Some(timeout) = timeout.filter(|t| !t.is_zero()) {
            std::thread::sleep(timeout);
        }
        false
    }

    async fn wait_async(&self) {
        std::future::pending::<()>().await;
    }
}

// ---------------------------------------------------------------------------
// TaskCancellation
// ---------------------------------------------------------------------------

/// A token that can be cancelled once, from any thread or task.
///
/// Blocking waiters park on a condition variable; async waiters await a
/// `tokio_util` token. Both are released by the first [`cancel`](Self::cancel).
#[derive(Debug, Default)]
pub struct TaskCancellation {
    /// `Some` once cancelled, holding the details from the first request.
    state: Mutex<Option<String>>,
    cancelled: Condvar,
    notify: tokio_util::sync::CancellationToken,
}

impl TaskCancellation {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. Returns `true` for the first request only; later
    /// requests do not replace the recorded details.
    pub fn cancel(&self, details: impl Into<String>) -> bool {
        let mut state = self.state.lock();
        if state.is_some() {
            return false;
        }
        *state = Some(details.into());
        drop(state);

        self.cancelled.notify_all();
        self.notify.cancel();
        true
    }
}

#[async_trait]
impl CancellationToken for TaskCancellation {
    fn is_cancelled(&self) -> bool {
        self.state.lock().is_some()
    }

    fn details(&self) -> Option<String> {
        self.state.lock().clone()
    }

    fn wait(&self, timeout: Option<Duration>) -> bool {
        let mut state = self.state.lock();
        // A timeout too large to represent as an instant waits without bound.
        match timeout.and_then(|t| Instant::now().checked_add(t)) {
            None => {
                while state.is_none() {
                    self.cancelled.wait(&mut state);
                }
            }
            Some(deadline) => {
                while state.is_none() {
                    if self.cancelled.wait_until(&mut state, deadline).timed_out() {
                        break;
                    }
                }
            }
        }
        state.is_some()
    }

    async fn wait_async(&self) {
        self.notify.cancelled().await;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn uncancellable_reports_nothing() {
        let token = Uncancellable;
        assert!(!token.is_cancelled());
        assert!(token.details().is_none());
        assert!(!token.wait(None));
        assert!(!token.wait(Some(Duration::ZERO)));
    }

    #[test]
    fn uncancellable_wait_sleeps_for_timeout() {
        let started = Instant::now();
        assert!(!Uncancellable.wait(Some(Duration::from_millis(30))));
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[tokio::test]
    async fn uncancellable_wait_async_never_resolves() {
        let waited =
            tokio::time::timeout(Duration::from_millis(50), Uncancellable.wait_async()).await;
        assert!(waited.is_err());
    }

    #[test]
    fn first_cancel_wins() {
        let token = TaskCancellation::new();
        assert!(token.cancel("first"));
        assert!(!token.cancel("second"));
        assert!(token.is_cancelled());
        assert_eq!(token.details().as_deref(), Some("first"));
    }

    #[test]
    fn wait_times_out_when_not_cancelled() {
        let token = TaskCancellation::new();
        assert!(!token.wait(Some(Duration::from_millis(20))));
    }

    #[test]
    fn blocking_wait_released_by_other_thread() {
        let token = Arc::new(TaskCancellation::new());
        let canceller = Arc::clone(&token);
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            canceller.cancel("stop");
        });

        assert!(token.wait(None));
        assert_eq!(token.details().as_deref(), Some("stop"));
        handle.join().unwrap();
    }

    #[test]
    fn unrepresentable_timeout_waits_until_cancelled() {
        let token = Arc::new(TaskCancellation::new());
        let canceller = Arc::clone(&token);
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            canceller.cancel("stop");
        });

        assert!(token.wait(Some(Duration::MAX)));
        assert_eq!(token.details().as_deref(), Some("stop"));
        handle.join().unwrap();
    }

    #[tokio::test]
    async fn async_wait_released_by_cancel() {
        let token = Arc::new(TaskCancellation::new());
        let waiter = {
            let token = Arc::clone(&token);
            tokio::spawn(async move { token.wait_async().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        token.cancel("done");

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter released")
            .unwrap();
    }

    #[tokio::test]
    async fn wait_async_after_cancel_returns_immediately() {
        let token = TaskCancellation::new();
        token.cancel("early");
        tokio::time::timeout(Duration::from_millis(50), token.wait_async())
            .await
            .unwrap();
    }
}
