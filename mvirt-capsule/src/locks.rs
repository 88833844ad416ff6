//! Per-capsule mutual exclusion.
//!
//! Create, delete, purge and status sync of one capsule never interleave.
//! Different capsules proceed in parallel.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type LockMap = Mutex<HashMap<String, Arc<AsyncMutex<()>>>>;

/// Lock table keyed by capsule uuid. Holds an entry only while some caller
/// owns or waits on it.
#[derive(Default)]
pub struct CapsuleLocks {
    locks: Arc<LockMap>,
}

/// Exclusive access to one capsule. Dropping it unlocks the capsule and
/// forgets the entry once nobody else is waiting.
pub struct CapsuleGuard {
    uuid: String,
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<LockMap>,
}

impl CapsuleLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, uuid: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(locks.entry(uuid.to_string()).or_default())
    }

    /// Wait for exclusive access to the capsule. Held until the guard drops.
    pub async fn acquire(&self, uuid: &str) -> CapsuleGuard {
        let guard = self.entry(uuid).lock_owned().await;
        CapsuleGuard {
            uuid: uuid.to_string(),
            guard: Some(guard),
            locks: Arc::clone(&self.locks),
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl Drop for CapsuleGuard {
    fn drop(&mut self) {
        // Unlock first so our own clone no longer counts.
        self.guard.take();

        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        if locks
            .get(&self.uuid)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.uuid);
        }
    }
}
