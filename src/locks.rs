//! Keyed asynchronous locks.
//!
//! Each key gets its own mutex so that unrelated owners (or unrelated paths)
//! never wait on each other. Entries are held weakly and pruned once no
//! guard refers to them.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, Weak};

use tokio::sync::{Mutex, OwnedMutexGuard};

/// Guard returned by [`KeyedLocks::lock`]; the key is unlocked on drop.
pub type KeyGuard = OwnedMutexGuard<()>;

/// Map of per-key mutexes.
#[derive(Debug, Default)]
pub struct KeyedLocks {
    slots: RwLock<HashMap<String, Weak<Mutex<()>>>>,
}

impl KeyedLocks {
    /// Create an empty lock map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for `key`, waiting for any current holder.
    pub async fn lock(&self, key: &str) -> KeyGuard {
        self.slot(key).lock_owned().await
    }

    /// Number of keys currently tracked (live or not yet pruned).
    pub fn tracked(&self) -> usize {
        self.slots.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn slot(&self, key: &str) -> Arc<Mutex<()>> {
        // Try read lock first
        {
            let slots = self.slots.read().unwrap_or_else(|e| e.into_inner());
            if let Some(slot) = slots.get(key).and_then(Weak::upgrade) {
                return slot;
            }
        }

        let mut slots = self.slots.write().unwrap_or_else(|e| e.into_inner());

        // Double-check after acquiring write lock
        if let Some(slot) = slots.get(key).and_then(Weak::upgrade) {
            return slot;
        }

        slots.retain(|_, weak| weak.strong_count() > 0);

        let slot = Arc::new(Mutex::new(()));
        slots.insert(key.to_string(), Arc::downgrade(&slot));
        slot
    }
}
