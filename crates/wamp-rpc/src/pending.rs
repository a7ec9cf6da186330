//! Correlation table for outbound calls awaiting a response.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde_json::Value;

use crate::errors::CallError;

/// Completion invoked exactly once with the outcome of a call.
pub type Completion = Box<dyn FnOnce(Result<Value, CallError>) + Send + 'static>;

/// Outstanding calls keyed by correlation id.
///
/// Ids start at 1 and grow by one per allocation. Completions always run
/// after the table lock is released, so a completion may issue new calls.
pub struct PendingCalls {
    next_id: AtomicU64,
    entries: Mutex<HashMap<u64, Completion>>,
}

impl PendingCalls {
    /// Create an empty table.
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(0),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Reserve the next id and store its completion.
    pub fn allocate(&self, completion: Completion) -> u64 {
        let mut entries = self.entries.lock();
        loop {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
            if id == 0 || entries.contains_key(&id) {
                continue;
            }
            let _ = entries.insert(id, completion);
            return id;
        }
    }

    /// Remove the entry for `id` and run its completion.
    ///
    /// Returns `false` without side effects when no entry exists, which is
    /// the normal case for duplicate or stale responses.
    pub fn resolve(&self, id: u64, outcome: Result<Value, CallError>) -> bool {
        let completion = self.entries.lock().remove(&id);
        match completion {
            Some(completion) => {
                completion(outcome);
                true
            }
            None => false,
        }
    }

    /// Fail every outstanding call with `error`. Returns how many were failed.
    pub fn fail_all(&self, error: &CallError) -> usize {
        let drained: Vec<Completion> = {
            let mut entries = self.entries.lock();
            entries.drain().map(|(_, completion)| completion).collect()
        };
        let count = drained.len();
        for completion in drained {
            completion(Err(error.clone()));
        }
        count
    }

    /// Whether a call with `id` is still outstanding.
    pub fn contains(&self, id: u64) -> bool {
        self.entries.lock().contains_key(&id)
    }

    /// Number of outstanding calls.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether no calls are outstanding.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl Default for PendingCalls {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PendingCalls {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingCalls")
            .field("next_id", &self.next_id.load(Ordering::Relaxed))
            .field("outstanding", &self.len())
            .finish()
    }
}
