use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use crate::storage::error::{PersistenceError, StorageSystemError};
use crate::storage::provider::StorageProvider;
use crate::storage::store::{ChangeSet, CommitOutcome, PluginStore, Tables};

/// Plugin tables persisted as one JSON document.
///
/// Every commit rewrites the whole document through the provider's atomic
/// write, so a crash leaves either the old or the new tables on disk.
#[derive(Debug)]
pub struct FilePluginStore {
    provider: Arc<dyn StorageProvider>,
    path: PathBuf,
    tables: Mutex<Tables>,
}

impl FilePluginStore {
    /// Open the document at `path`, starting empty if it does not exist.
    pub fn open(provider: Arc<dyn StorageProvider>, path: impl Into<PathBuf>) -> Result<Self, PersistenceError> {
        let path = path.into();
        let tables = match provider.read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content)
                .map_err(|e| PersistenceError::Corrupt(format!("{}: {}", path.display(), e)))?,
            Err(StorageSystemError::FileNotFound(_)) => {
                log::info!("Plugin store {} does not exist yet, starting empty", path.display());
                Tables::default()
            }
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            provider,
            path,
            tables: Mutex::new(tables),
        })
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    fn write(&self, tables: &Tables) -> Result<(), PersistenceError> {
        let content = serde_json::to_string_pretty(tables).map_err(|e| StorageSystemError::SerializationError {
            format: "json".to_string(),
            source: Box::new(e),
        })?;
        self.provider.write_string(&self.path, &content)?;
        Ok(())
    }
}

fn poisoned() -> PersistenceError {
    PersistenceError::Corrupt("plugin table lock poisoned".to_string())
}

impl PluginStore for FilePluginStore {
    fn name(&self) -> &str {
        "file"
    }

    fn tables(&self) -> Result<Tables, PersistenceError> {
        self.tables.lock().map(|t| t.clone()).map_err(|_| poisoned())
    }

    fn commit(&self, changes: ChangeSet) -> Result<CommitOutcome, PersistenceError> {
        let mut guard = self.tables.lock().map_err(|_| poisoned())?;
        let mut next = guard.clone();
        let outcome = next.apply(&changes)?;
        if outcome.rows_affected > 0 {
            self.write(&next)?;
        }
        *guard = next;
        Ok(outcome)
    }
}
