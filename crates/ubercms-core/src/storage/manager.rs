use std::fmt::Debug;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use crate::kernel::component::KernelComponent;
use crate::kernel::constants;
use crate::kernel::error::Result;
use crate::storage::config::{ConfigFormat, ConfigManager, RuntimeConfig};
use crate::storage::file::FilePluginStore;
use crate::storage::local::LocalStorageProvider;
use crate::storage::provider::StorageProvider;
use crate::storage::store::PluginStore;

/// Owns the data directory: file access, configuration and the plugin tables.
#[derive(Clone)]
pub struct DefaultStorageManager {
    name: &'static str,
    provider: Arc<dyn StorageProvider>,
    config_manager: Arc<ConfigManager>,
    runtime_config: RuntimeConfig,
    store: Arc<dyn PluginStore>,
}

impl DefaultStorageManager {
    /// Open the data directory at `base_path` with a local provider.
    pub fn new(base_path: PathBuf) -> Result<Self> {
        let provider: Arc<dyn StorageProvider> = Arc::new(LocalStorageProvider::new(base_path));
        Self::with_provider(provider)
    }

    /// Open storage on a custom provider; the plugin store file comes from
    /// the `runtime` configuration.
    pub fn with_provider(provider: Arc<dyn StorageProvider>) -> Result<Self> {
        let config_manager = Arc::new(ConfigManager::new(
            provider.clone(),
            PathBuf::from(constants::CONFIG_DIR),
            ConfigFormat::Json,
        ));
        let runtime_config = config_manager.runtime_config()?;
        let store: Arc<dyn PluginStore> =
            Arc::new(FilePluginStore::open(provider.clone(), runtime_config.store_file.clone())?);
        Ok(Self::from_parts(provider, config_manager, runtime_config, store))
    }

    /// Assemble from already-built parts, e.g. an in-memory store in tests.
    pub fn from_parts(
        provider: Arc<dyn StorageProvider>,
        config_manager: Arc<ConfigManager>,
        runtime_config: RuntimeConfig,
        store: Arc<dyn PluginStore>,
    ) -> Self {
        Self {
            name: "DefaultStorageManager",
            provider,
            config_manager,
            runtime_config,
            store,
        }
    }

    pub fn provider(&self) -> &Arc<dyn StorageProvider> {
        &self.provider
    }

    pub fn config_manager(&self) -> &Arc<ConfigManager> {
        &self.config_manager
    }

    pub fn runtime_config(&self) -> &RuntimeConfig {
        &self.runtime_config
    }

    pub fn store(&self) -> &Arc<dyn PluginStore> {
        &self.store
    }

    pub fn base_path(&self) -> &Path {
        self.provider.base_path()
    }

    /// Per-plugin private data directory, relative to the data dir.
    pub fn plugin_data_path(plugin_id: &impl ToString) -> PathBuf {
        Path::new(constants::PLUGIN_DATA_DIR).join(plugin_id.to_string())
    }

    /// Ensure all required directories exist
    pub fn ensure_directories(&self) -> Result<()> {
        self.provider.create_dir_all(self.config_manager.config_path())?;
        self.provider.create_dir_all(Path::new(constants::PLUGIN_DATA_DIR))?;
        for dir in &self.runtime_config.plugin_dirs {
            self.provider.create_dir_all(dir)?;
        }
        Ok(())
    }
}

impl Debug for DefaultStorageManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DefaultStorageManager")
            .field("name", &self.name)
            .field("provider", &self.provider.name())
            .field("store", &self.store.name())
            .finish()
    }
}

#[async_trait]
impl KernelComponent for DefaultStorageManager {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn initialize(&self) -> Result<()> {
        self.ensure_directories()?;
        log::debug!("Storage ready at {}", self.base_path().display());
        Ok(())
    }

    async fn start(&self) -> Result<()> {
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        Ok(())
    }
}
