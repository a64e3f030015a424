//! The serialized execution context a connection runs on.
//!
//! Each logical connection owns one [`WorkQueue`]. Timers, connect attempts
//! and link watchers run as tokio tasks that post their result back into the
//! queue, and a single consumer drains it. Everything that touches connection
//! state therefore happens on one logical thread of control.
//!
//! # Example
//!
//! ```rust
//! use relink_core::{Schedule, WorkQueue};
//! use std::time::Duration;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let (queue, mut rx) = WorkQueue::channel();
//! let timer = queue.schedule(Duration::from_millis(5), "retry");
//! queue.post("command");
//!
//! assert_eq!(rx.recv().await, Some("command"));
//! assert_eq!(rx.recv().await, Some("retry"));
//! timer.cancel(); // already fired: no-op
//! # }
//! ```

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

/// Something that can run a work item after a delay.
pub trait Schedule<W>: Send + Sync {
    /// Arranges for `work` to be delivered after `delay`.
    ///
    /// The returned handle cancels delivery; cancelling twice, or after the
    /// work was delivered, is a no-op.
    fn schedule(&self, delay: Duration, work: W) -> TimerHandle;
}

/// Handle to a scheduled work item.
#[derive(Debug, Clone)]
pub struct TimerHandle {
    cancelled: Arc<AtomicBool>,
    task: AbortHandle,
}

impl TimerHandle {
    /// Cancels delivery. Idempotent.
    pub fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::AcqRel) {
            self.task.abort();
        }
    }

    /// Returns true once [`cancel`](Self::cancel) was called.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Handle to a task spawned through [`WorkQueue::spawn`].
#[derive(Debug)]
pub struct TaskHandle {
    task: AbortHandle,
}

impl TaskHandle {
    /// Stops the task; its output is never posted. Idempotent.
    pub fn abort(&self) {
        self.task.abort();
    }

    /// Returns true if the task completed or was aborted.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Sending side of a connection's serialized work queue.
pub struct WorkQueue<W> {
    tx: mpsc::UnboundedSender<W>,
}

impl<W> Clone for WorkQueue<W> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<W> std::fmt::Debug for WorkQueue<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkQueue")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

impl<W: Send + 'static> WorkQueue<W> {
    /// Creates a queue and the receiver its single consumer drains.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<W>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Posts work for immediate processing.
    ///
    /// Returns false if the consumer is gone.
    pub fn post(&self, work: W) -> bool {
        self.tx.send(work).is_ok()
    }

    /// Runs `future` on the runtime and posts its output to the queue.
    ///
    /// # Panics
    ///
    /// Panics if called from outside a tokio runtime.
    pub fn spawn<F>(&self, future: F) -> TaskHandle
    where
        F: Future<Output = W> + Send + 'static,
    {
        let tx = self.tx.clone();
        let task = tokio::spawn(async move {
            let work = future.await;
            let _ = tx.send(work);
        });
        TaskHandle {
            task: task.abort_handle(),
        }
    }

    /// Returns true once the consumer dropped its receiver.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl<W: Send + 'static> Schedule<W> for WorkQueue<W> {
    fn schedule(&self, delay: Duration, work: W) -> TimerHandle {
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancelled);
        let tx = self.tx.clone();

        #[cfg(feature = "tracing")]
        tracing::trace!(delay_ms = delay.as_millis() as u64, "scheduling work item");

        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if !flag.load(Ordering::Acquire) {
                let _ = tx.send(work);
            }
        });

        TimerHandle {
            cancelled,
            task: task.abort_handle(),
        }
    }
}
