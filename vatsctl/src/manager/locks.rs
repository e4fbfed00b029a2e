use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::types::InstanceId;

type LockMap = DashMap<InstanceId, Arc<Mutex<()>>>;

/// One async mutex per instance, created on first use and dropped once nobody holds
/// or waits on it.
///
/// Holders must re-read the instance after acquiring: the instance may have been
/// deleted while they waited.
#[derive(Clone, Default)]
pub struct InstanceLocks {
    locks: Arc<LockMap>,
}

/// Exclusive access to one instance until dropped.
pub struct InstanceGuard {
    // Declared first so the mutex is released before the entry is reclaimed
    _guard: OwnedMutexGuard<()>,
    _entry: EntryRef,
}

/// Reclaims the map entry when the last user of an instance's mutex goes away,
/// including callers cancelled while waiting.
struct EntryRef {
    id: InstanceId,
    locks: Arc<LockMap>,
}

impl Drop for EntryRef {
    fn drop(&mut self) {
        // The map's own handle is the only one left
        self.locks.remove_if(&self.id, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

impl InstanceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, id: InstanceId) -> InstanceGuard {
        let entry = EntryRef {
            id,
            locks: self.locks.clone(),
        };
        let mutex = self.locks.entry(id).or_default().clone();
        let guard = mutex.lock_owned().await;
        InstanceGuard {
            _guard: guard,
            _entry: entry,
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.locks.len()
    }
}
