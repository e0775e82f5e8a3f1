pub mod config;
pub mod error;
pub mod file;
pub mod local;
pub mod manager;
pub mod memory;
pub mod provider;
pub mod store;

pub use config::{ConfigData, ConfigFormat, ConfigManager, RuntimeConfig};
pub use error::{PersistenceError, StorageSystemError};
pub use file::FilePluginStore;
pub use local::LocalStorageProvider;
pub use manager::DefaultStorageManager;
pub use memory::MemoryPluginStore;
pub use provider::{StorageProvider, StorageResult};
pub use store::{Change, ChangeSet, CommitOutcome, PluginStore, Tables};
