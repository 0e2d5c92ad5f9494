//! Time-bounded storage for completed traces.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use crate::timing::Trace;
use crate::types::{now_millis, TraceId};

/// Periodic eviction worker.
pub mod sweeper;

pub use sweeper::Sweeper;

/// Published trace. The write lock guards the one-time annotation on first view.
pub type SharedTrace = Arc<RwLock<Trace>>;

struct Entry {
    started_at_ms: u64,
    trace: SharedTrace,
}

/// Concurrent map from trace id to published trace.
///
/// A single mutex covers the map structure; lookups clone the `Arc` and
/// release it before any per-trace locking happens.
#[derive(Default)]
pub struct ResultStore {
    entries: Mutex<HashMap<TraceId, Entry>>,
}

impl ResultStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `trace`, replacing any entry with the same id.
    pub fn put(&self, trace: Trace) -> TraceId {
        let id = trace.id().clone();
        let entry = Entry {
            started_at_ms: trace.absolute_start_ms(),
            trace: Arc::new(RwLock::new(trace)),
        };
        let size = {
            let mut entries = self.entries.lock();
            entries.insert(id.clone(), entry);
            entries.len()
        };
        debug!(trace_id = %id, size, "store.put");
        id
    }

    /// Shared handle to a stored trace.
    pub fn get(&self, id: &str) -> Option<SharedTrace> {
        self.entries
            .lock()
            .get(id)
            .map(|entry| Arc::clone(&entry.trace))
    }

    /// Removes a trace, returning it if present.
    pub fn remove(&self, id: &str) -> Option<SharedTrace> {
        self.entries.lock().remove(id).map(|entry| entry.trace)
    }

    /// Evicts every trace whose root started before `now_ms - retention`.
    /// Returns the number of evicted entries.
    pub fn sweep(&self, retention: Duration, now_ms: u64) -> usize {
        let retention_ms = retention.as_millis().min(u64::MAX as u128) as u64;
        let cutoff = now_ms.saturating_sub(retention_ms);
        let (evicted, remaining) = {
            let mut entries = self.entries.lock();
            let before = entries.len();
            entries.retain(|_, entry| entry.started_at_ms >= cutoff);
            (before - entries.len(), entries.len())
        };
        info!(evicted, remaining, cutoff, "store.sweep.complete");
        evicted
    }

    /// [`sweep`](Self::sweep) against the current wall clock.
    pub fn sweep_expired(&self, retention: Duration) -> usize {
        self.sweep(retention, now_millis())
    }

    /// Number of stored traces.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// True when nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Snapshot of stored ids, in no particular order.
    pub fn ids(&self) -> Vec<TraceId> {
        self.entries.lock().keys().cloned().collect()
    }

    /// Drops every stored trace.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}
