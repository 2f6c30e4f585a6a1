//! Per-key mutual exclusion.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::Mutex;

/// Serializes work per key while letting different keys proceed in parallel.
///
/// Lock entries exist only while someone holds or waits on them.
pub(crate) struct KeyedLocks<K> {
    locks: Mutex<HashMap<K, Arc<Mutex<()>>>>,
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    pub(crate) fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Run `f` while holding the lock for `key`.
    pub(crate) fn with_lock<R>(&self, key: &K, f: impl FnOnce() -> R) -> R {
        let entry = self.locks.lock().entry(key.clone()).or_default().clone();

        let result = {
            let _guard = entry.lock();
            f()
        };

        let mut locks = self.locks.lock();
        // One reference in the map, one here: nobody else is waiting.
        if Arc::strong_count(&entry) == 2 {
            locks.remove(key);
        }
        result
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.locks.lock().len()
    }
}
