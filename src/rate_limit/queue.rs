//! Bounded-concurrency dispatch queue with minimum spacing.
//!
//! # Design Decisions
//! - A FIFO-fair semaphore bounds how many operations run at once
//! - A mutex-guarded gate spaces dispatch starts by at least `min_time`
//! - Admission is FIFO; completion order is not guaranteed
//! - A paused queue holds new dispatches until resumed

use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{watch, Mutex, Semaphore};
use tokio::time::Instant;

use crate::observability::metrics;

/// The queue was closed and accepts no more work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("dispatch queue is closed")]
pub struct QueueClosed;

/// Snapshot of queue occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    /// Operations waiting to be dispatched.
    pub size: usize,
    /// Operations currently running.
    pub pending: usize,
    pub paused: bool,
}

/// Decrements a counter when dropped, so cancelled callers leave the stats accurate.
struct CountGuard<'a>(&'a AtomicUsize);

impl<'a> CountGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for CountGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug)]
pub struct DispatchQueue {
    permits: Semaphore,
    last_dispatch: Mutex<Option<Instant>>,
    min_time: Duration,
    queued: AtomicUsize,
    running: AtomicUsize,
    paused: watch::Sender<bool>,
}

impl DispatchQueue {
    pub fn new(max_concurrent: usize, min_time: Duration) -> Self {
        let (paused, _) = watch::channel(false);
        Self {
            permits: Semaphore::new(max_concurrent.max(1)),
            last_dispatch: Mutex::new(None),
            min_time,
            queued: AtomicUsize::new(0),
            running: AtomicUsize::new(0),
            paused,
        }
    }

    /// Run `task` once a slot is free and the spacing gate allows it.
    pub async fn schedule<F, T>(&self, task: F) -> Result<T, QueueClosed>
    where
        F: Future<Output = T>,
    {
        let waiting = CountGuard::enter(&self.queued);
        metrics::record_queue_depth(self.queued.load(Ordering::SeqCst));

        let mut resumed = self.paused.subscribe();
        // The sender lives in `self`, so waiting only ends once the queue is resumed.
        let _ = resumed.wait_for(|paused| !*paused).await;

        let _permit = self.permits.acquire().await.map_err(|_| QueueClosed)?;

        {
            let mut last = self.last_dispatch.lock().await;
            if let Some(previous) = *last {
                tokio::time::sleep_until(previous + self.min_time).await;
            }
            *last = Some(Instant::now());
        }

        drop(waiting);
        let _running = CountGuard::enter(&self.running);
        Ok(task.await)
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            size: self.queued.load(Ordering::SeqCst),
            pending: self.running.load(Ordering::SeqCst),
            paused: *self.paused.borrow(),
        }
    }

    pub fn pause(&self) {
        self.paused.send_replace(true);
    }

    pub fn resume(&self) {
        self.paused.send_replace(false);
    }

    /// Reject all queued and future work.
    pub fn close(&self) {
        self.permits.close();
    }

    pub fn is_closed(&self) -> bool {
        self.permits.is_closed()
    }
}
