//! Keyed mutual exclusion for content hashes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::Mutex as AsyncMutex;

/// Process-wide table mapping a content hash to its mutex. Entries are
/// materialized on first use and retained for the process lifetime;
/// the set is bounded by the number of distinct hashes observed.
#[derive(Debug, Default)]
pub struct HashLocks {
    entries: StdMutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl HashLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomic lookup-or-insert. The returned mutex serializes the
    /// critical section of every handler working on the same hash.
    pub fn lock_for(&self, hash: &str) -> Arc<AsyncMutex<()>> {
        let mut entries = self.entries.lock().unwrap();
        entries
            .entry(hash.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
