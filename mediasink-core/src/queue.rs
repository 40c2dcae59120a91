use std::collections::VecDeque;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::Notify;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue closed")]
    Closed,
}

pub type QueueResult<T> = Result<T, QueueError>;

/// Handle to a finalized upload, created only after the file has been
/// renamed into place. Plain data; identity is the finalized path.
#[derive(Debug, Clone)]
pub struct VideoHandle {
    path: PathBuf,
    hash: String,
    received_at: DateTime<Utc>,
}

impl VideoHandle {
    pub fn new(path: PathBuf, hash: String) -> Self {
        Self {
            path,
            hash,
            received_at: Utc::now(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }
}

impl PartialEq for VideoHandle {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
    }
}

impl Eq for VideoHandle {}

impl fmt::Display for VideoHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.path.file_name() {
            Some(name) => write!(f, "{}", name.to_string_lossy()),
            None => write!(f, "{}", self.path.display()),
        }
    }
}

/// Fixed-capacity FIFO hand-off between connection handlers and the
/// display consumer. `offer` never blocks; `take` blocks until an
/// element arrives or the queue is closed.
#[derive(Debug)]
pub struct VideoQueue {
    items: Mutex<VecDeque<VideoHandle>>,
    capacity: usize,
    notify: Notify,
    closed: AtomicBool,
}

impl VideoQueue {
    pub fn new(capacity: usize) -> Self {
        debug_assert!(capacity >= 1);
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Appends `handle` if there is room. The size check and the append
    /// happen under one lock, so concurrent offers never overshoot the
    /// capacity.
    pub fn offer(&self, handle: VideoHandle) -> bool {
        let mut items = self.items.lock().unwrap();
        if items.len() >= self.capacity {
            return false;
        }
        items.push_back(handle);
        drop(items);
        self.notify.notify_one();
        true
    }

    /// Removes and returns the head, waiting for one to arrive. Fails
    /// with [`QueueError::Closed`] once [`close`](Self::close) has been
    /// called.
    pub async fn take(&self) -> QueueResult<VideoHandle> {
        loop {
            // Register interest before checking so an offer landing
            // between the check and the await still wakes us.
            let notified = self.notify.notified();
            if self.closed.load(Ordering::Acquire) {
                return Err(QueueError::Closed);
            }
            if let Some(handle) = self.items.lock().unwrap().pop_front() {
                return Ok(handle);
            }
            notified.await;
        }
    }

    /// Cancels pending and future `take` calls.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub fn size(&self) -> usize {
        self.items.lock().unwrap().len()
    }

    pub fn is_full(&self) -> bool {
        self.size() >= self.capacity
    }

    pub fn remaining_capacity(&self) -> usize {
        self.capacity - self.size()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
