//! Supervised fire-and-forget work.
//!
//! # Responsibilities
//! - Run side effects (notification delivery) off the request path
//! - Contain panics per task so they never reach the runtime or another request
//! - Provide a drain barrier that shutdown awaits before the process exits
//!
//! # Design Decisions
//! - Tasks are tracked by an in-flight counter plus `Notify`, not by handles,
//!   so spawning stays O(1) and nothing accumulates
//! - A panic is logged with the task label and counted as finished

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct Inner {
    in_flight: AtomicUsize,
    idle: Notify,
}

/// Decrements the counter even if the task future is dropped mid-flight.
struct InFlight(Arc<Inner>);

impl Drop for InFlight {
    fn drop(&mut self) {
        if self.0.in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct BackgroundTasks {
    inner: Arc<Inner>,
}

impl BackgroundTasks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::Acquire)
    }

    /// Run `task` on the runtime. Errors are the task's to log; panics are
    /// caught here.
    pub fn spawn<F>(&self, label: &'static str, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.inner.in_flight.fetch_add(1, Ordering::AcqRel);
        let guard = InFlight(Arc::clone(&self.inner));
        tokio::spawn(async move {
            let _guard = guard;
            if let Err(payload) = AssertUnwindSafe(task).catch_unwind().await {
                let detail = payload
                    .downcast_ref::<&str>()
                    .map(|s| (*s).to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic payload".to_string());
                tracing::error!(task = label, panic = %detail, "Background task panicked");
            }
        });
    }

    /// Wait until no task is in flight or `timeout` elapses. Returns `true`
    /// when fully drained.
    pub async fn drain(&self, timeout: Duration) -> bool {
        let wait = async {
            loop {
                let idle = self.inner.idle.notified();
                if self.in_flight() == 0 {
                    return;
                }
                idle.await;
            }
        };
        match tokio::time::timeout(timeout, wait).await {
            Ok(()) => true,
            Err(_) => {
                tracing::warn!(remaining = self.in_flight(), "Background drain timed out");
                false
            }
        }
    }
}
