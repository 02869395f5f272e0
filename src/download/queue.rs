//! Shared task queue for the worker pool.
//!
//! Tasks may be pushed back with a not-before instant after a transient
//! failure, so the queue can't finish when it is merely empty: it tracks
//! outstanding tasks and signals `done` once every task has reached a
//! final outcome.

use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{mpsc, Mutex};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::DownloadTask;

#[derive(Debug)]
pub(crate) struct QueuedTask {
    pub task: DownloadTask,
    /// Earliest time the task may be attempted again.
    pub ready_at: Option<Instant>,
}

pub(crate) struct TaskQueue {
    tx: mpsc::UnboundedSender<QueuedTask>,
    rx: Mutex<mpsc::UnboundedReceiver<QueuedTask>>,
    outstanding: AtomicUsize,
    done: CancellationToken,
}

impl TaskQueue {
    pub fn new(tasks: Vec<DownloadTask>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let outstanding = tasks.len();
        for task in tasks {
            // The receiver lives in `self`, so sending can't fail here.
            let _ = tx.send(QueuedTask {
                task,
                ready_at: None,
            });
        }
        let done = CancellationToken::new();
        if outstanding == 0 {
            done.cancel();
        }
        Self {
            tx,
            rx: Mutex::new(rx),
            outstanding: AtomicUsize::new(outstanding),
            done,
        }
    }

    /// Wait for the next task. Returns `None` once every task is finished
    /// or the stop signal fires.
    pub async fn next(&self, shutdown: &CancellationToken) -> Option<QueuedTask> {
        let mut rx = tokio::select! {
            biased;
            _ = shutdown.cancelled() => return None,
            _ = self.done.cancelled() => return None,
            guard = self.rx.lock() => guard,
        };
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => None,
            _ = self.done.cancelled() => None,
            task = rx.recv() => task,
        }
    }

    /// Put a task back without finishing it.
    pub fn requeue(&self, task: DownloadTask, ready_at: Option<Instant>) {
        let _ = self.tx.send(QueuedTask { task, ready_at });
    }

    /// Mark one task as finished.
    pub fn complete(&self) {
        if self.outstanding.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.done.cancel();
        }
    }

    #[cfg(test)]
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }

    /// Take every task still waiting in the queue.
    pub async fn drain(&self) -> Vec<DownloadTask> {
        let mut rx = self.rx.lock().await;
        let mut left = Vec::new();
        while let Ok(queued) = rx.try_recv() {
            left.push(queued.task);
        }
        left
    }
}
