//! Hierarchical cancellation tokens.
//!
//! Every long-running dispatcher (poller, scheduler, APM sampler, DR
//! supervisor) hands a child token to each worker it spawns. Cancelling the
//! parent cancels every descendant; workers poll `cancelled()` at their
//! suspension points rather than being torn down by exception.

use parking_lot::RwLock;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::Notify;

#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<CancelTokenInner>,
}

struct CancelTokenInner {
    cancelled: RwLock<bool>,
    notify: Notify,
    parent: Option<CancelToken>,
    children: RwLock<Vec<CancelToken>>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(CancelTokenInner {
                cancelled: RwLock::new(false),
                notify: Notify::new(),
                parent: None,
                children: RwLock::new(Vec::new()),
            }),
        }
    }

    /// Create a child token. Cancelling the parent cancels this child too.
    pub fn child_token(&self) -> Self {
        let child = Self {
            inner: Arc::new(CancelTokenInner {
                cancelled: RwLock::new(false),
                notify: Notify::new(),
                parent: Some(self.clone()),
                children: RwLock::new(Vec::new()),
            }),
        };
        self.inner.children.write().push(child.clone());
        child
    }

    pub fn cancel(&self) {
        *self.inner.cancelled.write() = true;
        self.inner.notify.notify_waiters();
        let children = self.inner.children.read().clone();
        for child in children {
            child.cancel();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        if *self.inner.cancelled.read() {
            return true;
        }
        if let Some(parent) = &self.inner.parent {
            return parent.is_cancelled();
        }
        false
    }

    /// Resolves immediately if already cancelled; otherwise waits.
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        let notified = self.inner.notify.notified();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }

    pub fn cancelled_owned(self) -> CancelledFuture {
        CancelledFuture { token: self }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

pub struct CancelledFuture {
    token: CancelToken,
}

impl Future for CancelledFuture {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.token.is_cancelled() {
            Poll::Ready(())
        } else {
            let notified = self.token.inner.notify.notified();
            tokio::pin!(notified);
            notified.poll(cx)
        }
    }
}

/// RAII scope: cancels its token (and all children) on drop unless leaked.
pub struct CancelScope {
    token: CancelToken,
    cancel_on_drop: bool,
}

impl CancelScope {
    pub fn new() -> Self {
        Self {
            token: CancelToken::new(),
            cancel_on_drop: true,
        }
    }

    pub fn with_parent(parent: &CancelToken) -> Self {
        Self {
            token: parent.child_token(),
            cancel_on_drop: true,
        }
    }

    pub fn token(&self) -> &CancelToken {
        &self.token
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Detach the token so it survives the scope's drop uncancelled.
    pub fn leak(mut self) -> CancelToken {
        self.cancel_on_drop = false;
        self.token.clone()
    }
}

impl Default for CancelScope {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for CancelScope {
    fn drop(&mut self) {
        if self.cancel_on_drop {
            self.token.cancel();
        }
    }
}
