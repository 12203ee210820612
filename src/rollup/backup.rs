use crate::core::ErrorRecord;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::warn;

/// Bounded FIFO of errors that could not reach the backend.
///
/// Once `capacity` is exceeded the oldest entry is evicted. A capacity of 0
/// means nothing is buffered.
pub struct BackupQueue {
    entries: Mutex<VecDeque<ErrorRecord>>,
    capacity: usize,
}

impl BackupQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append `error`, returning whatever got evicted to stay within bounds
    pub fn push(&self, error: ErrorRecord) -> Vec<ErrorRecord> {
        let mut entries = self.entries();
        entries.push_back(error);

        let mut evicted = Vec::new();
        while entries.len() > self.capacity {
            if let Some(oldest) = entries.pop_front() {
                warn!(guid = %oldest.guid, "backup queue full, dropping oldest error");
                evicted.push(oldest);
            }
        }
        evicted
    }

    /// Take everything, oldest first
    pub fn drain(&self) -> Vec<ErrorRecord> {
        self.entries().drain(..).collect()
    }

    /// Put back entries that could not be flushed, ahead of anything queued
    /// in the meantime. The bound still applies; the oldest go first.
    pub fn requeue_front(&self, pending: Vec<ErrorRecord>) {
        let mut entries = self.entries();
        for error in pending.into_iter().rev() {
            entries.push_front(error);
        }
        while entries.len() > self.capacity {
            entries.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> Vec<ErrorRecord> {
        self.entries().iter().cloned().collect()
    }

    // Every mutation leaves the deque whole, so a poisoned lock still
    // guards valid entries
    fn entries(&self) -> MutexGuard<'_, VecDeque<ErrorRecord>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
