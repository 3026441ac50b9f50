use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::OwnedMutexGuard;

type Slot = Arc<tokio::sync::Mutex<()>>;

/// Per-key async mutual exclusion. Operations on different keys never wait
/// on each other; entries are dropped once no guard or waiter holds them.
#[derive(Debug, Clone, Default)]
pub struct KeyedLocks {
    slots: Arc<Mutex<HashMap<String, Slot>>>,
}

impl KeyedLocks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, key: &str) -> KeyGuard {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(slots.entry(key.to_owned()).or_default())
        };
        let guard = Arc::clone(&slot).lock_owned().await;
        KeyGuard {
            key: key.to_owned(),
            slot,
            guard: Some(guard),
            slots: Arc::clone(&self.slots),
        }
    }

    /// Takes the lock only when nobody holds it.
    #[must_use]
    pub fn try_lock(&self, key: &str) -> Option<KeyGuard> {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(slots.entry(key.to_owned()).or_default())
        };
        let guard = Arc::clone(&slot).try_lock_owned().ok()?;
        Some(KeyGuard {
            key: key.to_owned(),
            slot,
            guard: Some(guard),
            slots: Arc::clone(&self.slots),
        })
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[derive(Debug)]
pub struct KeyGuard {
    key: String,
    slot: Slot,
    guard: Option<OwnedMutexGuard<()>>,
    slots: Arc<Mutex<HashMap<String, Slot>>>,
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        // Map entry plus our own handle; anything above that is a waiter.
        if Arc::strong_count(&self.slot) == 2 {
            slots.remove(&self.key);
        }
    }
}
