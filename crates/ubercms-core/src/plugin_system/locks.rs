use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::plugin_system::descriptor::PluginId;

/// One async lock per plugin id.
///
/// Transitions on the same plugin are serialized; transitions on different
/// plugins never contend.
#[derive(Debug, Default)]
pub struct PluginLocks {
    locks: Mutex<HashMap<PluginId, Arc<AsyncMutex<()>>>>,
}

impl PluginLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, id: PluginId) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.entry(id).or_default().clone()
    }

    /// Wait for exclusive use of `id`.
    pub async fn acquire(&self, id: PluginId) -> OwnedMutexGuard<()> {
        self.lock_for(id).lock_owned().await
    }

    /// Number of plugins with a lock entry.
    pub fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop the lock entry for a removed plugin when nobody holds or awaits it.
    /// Call only after the caller's own guard is dropped.
    pub fn forget(&self, id: PluginId) {
        let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if locks.get(&id).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(&id);
        }
    }
}
