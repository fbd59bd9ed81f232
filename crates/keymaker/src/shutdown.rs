//! Cooperative shutdown shared between producer and reporter tasks.
//!
//! A [`ShutdownToken`] starts out running. The first [`touch`] flips it to
//! stopping and every clone observes the change. Loops consult
//! [`is_running`] at each iteration boundary; tasks parked on I/O can
//! additionally `select!` on [`stopped`] so a full buffer or a backoff sleep
//! does not delay exit.
//!
//! [`touch`]: ShutdownToken::touch
//! [`is_running`]: ShutdownToken::is_running
//! [`stopped`]: ShutdownToken::stopped

use portable_atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// A shared, monotonic running/stopping flag.
#[derive(Debug, Clone, Default)]
pub struct ShutdownToken {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    // 0 while running; counts touches afterwards.
    touches: AtomicU32,
    cancel: CancellationToken,
}

impl ShutdownToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests shutdown. Safe to call from any task, any number of times.
    ///
    /// Returns `true` for the call that performed the transition.
    pub fn touch(&self) -> bool {
        let first = self.inner.touches.fetch_add(1, Ordering::AcqRel) == 0;
        self.inner.cancel.cancel();
        first
    }

    /// Non-blocking check used as a loop continuation condition.
    #[inline]
    pub fn is_running(&self) -> bool {
        self.inner.touches.load(Ordering::Acquire) == 0
    }

    /// Completes once [`touch`](Self::touch) has been called.
    pub async fn stopped(&self) {
        self.inner.cancel.cancelled().await;
    }
}
