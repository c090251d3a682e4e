//! Single-lane send queue for the mesh transport.
//!
//! Every outbound mesh transmission goes through here. Tasks run strictly in
//! FIFO order on one worker, one at a time. A failing task is logged at the
//! worker and never reaches the submitter or blocks the tasks behind it. A
//! panicking task is caught and logged the same way.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::{mpsc, oneshot};

use crate::error::{Error, Result};

/// A deferred unit of mesh work.
pub type SendTask = Pin<Box<dyn Future<Output = Result<()>> + Send + 'static>>;

struct QueuedTask {
    label: String,
    task: SendTask,
    done: oneshot::Sender<()>,
}

/// Completes once its task, and therefore everything queued before it, has
/// finished (successfully or not).
#[derive(Debug)]
pub struct SendHandle {
    done: oneshot::Receiver<()>,
}

impl SendHandle {
    /// Wait for the task to leave the queue.
    ///
    /// Errors only when the worker is gone; the task's own outcome is not
    /// reported here.
    pub async fn wait(self) -> Result<()> {
        self.done.await.map_err(|_| Error::QueueClosed)
    }
}

/// Cloneable front of the queue. The worker is spawned by [`SendQueue::start`].
#[derive(Clone)]
pub struct SendQueue {
    tx: mpsc::UnboundedSender<QueuedTask>,
    depth: Arc<AtomicUsize>,
}

impl SendQueue {
    /// Create the queue and spawn its single consumer on the current runtime.
    pub fn start() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let depth = Arc::new(AtomicUsize::new(0));
        tokio::spawn(run_worker(rx, depth.clone()));
        Self { tx, depth }
    }

    /// Append a task to the tail of the queue.
    pub fn enqueue<F>(&self, label: impl Into<String>, task: F) -> SendHandle
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let (done_tx, done_rx) = oneshot::channel();
        let queued = QueuedTask {
            label: label.into(),
            task: Box::pin(task),
            done: done_tx,
        };

        self.depth.fetch_add(1, Ordering::SeqCst);
        if let Err(mpsc::error::SendError(rejected)) = self.tx.send(queued) {
            self.depth.fetch_sub(1, Ordering::SeqCst);
            tracing::error!(task = rejected.label.as_str(), "Send queue closed, dropping task");
            // `rejected.done` drops here, so the handle resolves to QueueClosed.
        }

        SendHandle { done: done_rx }
    }

    /// Number of tasks waiting or in flight.
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }
}

async fn run_worker(mut rx: mpsc::UnboundedReceiver<QueuedTask>, depth: Arc<AtomicUsize>) {
    while let Some(queued) = rx.recv().await {
        tracing::debug!(task = queued.label.as_str(), "Mesh send task started");

        match AssertUnwindSafe(queued.task).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::error!(
                    task = queued.label.as_str(),
                    error = %e,
                    "Mesh send task error"
                );
            }
            Err(panic) => {
                tracing::error!(
                    task = queued.label.as_str(),
                    panic = panic_message(&*panic),
                    "Mesh send task panicked"
                );
            }
        }

        depth.fetch_sub(1, Ordering::SeqCst);
        let _ = queued.done.send(());
    }

    tracing::info!("Send queue worker stopped");
}

/// Best-effort text of a caught panic payload.
pub fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}
