//! Cooperative cancellation tokens
//!
//! Long-running operations (inference runs, agent executions, pipeline
//! walks) take a token and check it at their suspension points. Tokens can
//! be cloned freely and form parent/child chains: cancelling a parent
//! cancels every child. A token may also carry a deadline
//! ([`CancelToken::with_timeout`]); expiry trips the same cancellation
//! machinery but is reported as [`CoreError::DeadlineExceeded`] rather
//! than [`CoreError::Cancelled`].

use crate::error::CoreError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::Notify;

/// A token for cooperative cancellation, optionally deadline-armed.
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

struct Inner {
    cancelled: AtomicBool,
    deadline_expired: AtomicBool,
    notify: Notify,
    parent: Option<CancelToken>,
    children: RwLock<Vec<Weak<Inner>>>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                deadline_expired: AtomicBool::new(false),
                notify: Notify::new(),
                parent: None,
                children: RwLock::new(Vec::new()),
            }),
        }
    }

    /// Create a token that cancels itself after `deadline`. Expiry is
    /// remembered so waiters observe it as a deadline, not an explicit
    /// cancellation.
    pub fn with_timeout(deadline: Duration) -> Self {
        let token = Self::new();
        token.arm_deadline(deadline);
        token
    }

    /// Create a child token. Cancelling the parent cancels the child; the
    /// child can be cancelled on its own without affecting the parent.
    pub fn child_token(&self) -> Self {
        let child = Self {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                deadline_expired: AtomicBool::new(false),
                notify: Notify::new(),
                parent: Some(self.clone()),
                children: RwLock::new(Vec::new()),
            }),
        };
        let mut children = self.inner.children.write();
        children.retain(|c| c.strong_count() > 0);
        children.push(Arc::downgrade(&child.inner));
        child
    }

    /// Create a deadline-armed child: it cancels with the parent or on
    /// its own expiry, whichever comes first.
    pub fn child_with_timeout(&self, deadline: Duration) -> Self {
        let child = self.child_token();
        child.arm_deadline(deadline);
        child
    }

    fn arm_deadline(&self, deadline: Duration) {
        let timer = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = timer.cancelled() => {}
                _ = tokio::time::sleep(deadline) => {
                    // Mark expiry before waking waiters so they classify
                    // the cancellation correctly.
                    timer.inner.deadline_expired.store(true, Ordering::SeqCst);
                    timer.cancel();
                }
            }
        });
    }

    /// Cancel this token and every live child.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
        let children: Vec<Arc<Inner>> = self
            .inner
            .children
            .read()
            .iter()
            .filter_map(|child| child.upgrade())
            .collect();
        for inner in children {
            CancelToken { inner }.cancel();
        }
    }

    /// True when this token or any ancestor has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        if self.inner.cancelled.load(Ordering::SeqCst) {
            return true;
        }
        match &self.inner.parent {
            Some(parent) => parent.is_cancelled(),
            None => false,
        }
    }

    /// True when this token or any ancestor was cancelled by its own
    /// deadline rather than an explicit `cancel()`.
    pub fn deadline_expired(&self) -> bool {
        if self.inner.deadline_expired.load(Ordering::SeqCst) {
            return true;
        }
        match &self.inner.parent {
            Some(parent) => parent.deadline_expired(),
            None => false,
        }
    }

    /// Error corresponding to the cancellation cause. Callers that
    /// observed `is_cancelled()` use this to report `DeadlineExceeded`
    /// for expired deadlines and `Cancelled` otherwise.
    pub fn cancel_error(&self) -> CoreError {
        if self.deadline_expired() {
            CoreError::DeadlineExceeded
        } else {
            CoreError::Cancelled
        }
    }

    /// Wait until cancelled. Returns immediately if already cancelled.
    pub async fn cancelled(&self) {
        loop {
            if self.is_cancelled() {
                return;
            }
            let notified = self.inner.notify.notified();
            // Re-check after registering the waiter to close the race with
            // a concurrent cancel().
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}
