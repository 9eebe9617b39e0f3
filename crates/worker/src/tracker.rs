// Path: crates/worker/src/tracker.rs
//! In-memory map of pending deliveries, defending against double-submit
//! across retries and restarts of the delivery state machine.

use alloy_primitives::B256;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingEntry {
    pub tx_hash: B256,
    pub recorded_at: u64,
}

pub struct TransactionTracker {
    stale_after: Duration,
    inner: Mutex<HashMap<B256, PendingEntry>>,
}

impl TransactionTracker {
    pub fn new(stale_after: Duration) -> Self {
        Self {
            stale_after,
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Records a submission. At most one entry per request id; a second
    /// record for the same id replaces the first (the engine refuses to get
    /// that far while a live entry exists).
    pub fn record(&self, request_id: B256, tx_hash: B256, now: u64) {
        self.inner.lock().insert(
            request_id,
            PendingEntry {
                tx_hash,
                recorded_at: now,
            },
        );
    }

    pub fn get(&self, request_id: B256) -> Option<PendingEntry> {
        self.inner.lock().get(&request_id).copied()
    }

    pub fn clear(&self, request_id: B256) {
        self.inner.lock().remove(&request_id);
    }

    /// Drops entries older than the staleness horizon; returns how many.
    pub fn sweep_stale(&self, now: u64) -> usize {
        let horizon = self.stale_after.as_secs();
        let mut inner = self.inner.lock();
        let before = inner.len();
        inner.retain(|_, entry| now.saturating_sub(entry.recorded_at) < horizon);
        before - inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }
}
