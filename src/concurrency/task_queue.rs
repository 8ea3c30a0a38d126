//! Bounded-concurrency task dispatcher (section 4.5).
//!
//! Runs a fixed-size pool of futures over a stream of producers via
//! `futures::stream::buffer_unordered`, with pause/resume, a clear-queue
//! escape hatch, and cooperative cancellation through a
//! `CancellationToken` shared with the rest of a run.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

pub type BoxedTask<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Returned in place of a task's real output when the queue was
/// cancelled before the task ever started running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Aborted;

pub struct TaskQueue {
    concurrency: usize,
    paused: Arc<AtomicBool>,
    resume_notify: Arc<Notify>,
    cancel: CancellationToken,
}

impl TaskQueue {
    pub fn new(concurrency: usize, cancel: CancellationToken) -> Self {
        Self {
            concurrency: concurrency.max(1),
            paused: Arc::new(AtomicBool::new(false)),
            resume_notify: Arc::new(Notify::new()),
            cancel,
        }
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        self.resume_notify.notify_waiters();
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    async fn wait_while_paused(&self) {
        while self.is_paused() && !self.cancel.is_cancelled() {
            self.resume_notify.notified().await;
        }
    }

    /// Runs every producer with bounded concurrency, honoring pause and
    /// cancellation. Tasks not yet started when cancellation fires
    /// resolve to `Err(Aborted)` instead of running; tasks already in
    /// flight are allowed to finish.
    pub async fn run_all<T, F, I>(&self, producers: I) -> Vec<Result<T, Aborted>>
    where
        T: Send + 'static,
        F: Future<Output = T> + Send + 'static,
        I: IntoIterator<Item = F>,
    {
        let paused_gate = self;
        let cancel = self.cancel.clone();
        let tasks = producers.into_iter().map(move |fut| {
            let cancel = cancel.clone();
            async move {
                if cancel.is_cancelled() {
                    return Err(Aborted);
                }
                Ok(fut.await)
            }
        });

        stream::iter(tasks)
            .map(|task| async {
                paused_gate.wait_while_paused().await;
                task.await
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
