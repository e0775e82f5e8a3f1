use std::sync::RwLock;

use crate::storage::error::PersistenceError;
use crate::storage::store::{ChangeSet, CommitOutcome, PluginStore, Tables};

/// Plugin tables held only in memory.
#[derive(Debug, Default)]
pub struct MemoryPluginStore {
    tables: RwLock<Tables>,
}

impl MemoryPluginStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tables(tables: Tables) -> Self {
        Self { tables: RwLock::new(tables) }
    }
}

fn poisoned() -> PersistenceError {
    PersistenceError::Corrupt("plugin table lock poisoned".to_string())
}

impl PluginStore for MemoryPluginStore {
    fn name(&self) -> &str {
        "memory"
    }

    fn tables(&self) -> Result<Tables, PersistenceError> {
        self.tables.read().map(|t| t.clone()).map_err(|_| poisoned())
    }

    fn commit(&self, changes: ChangeSet) -> Result<CommitOutcome, PersistenceError> {
        let mut guard = self.tables.write().map_err(|_| poisoned())?;
        let mut next = guard.clone();
        let outcome = next.apply(&changes)?;
        *guard = next;
        Ok(outcome)
    }
}
