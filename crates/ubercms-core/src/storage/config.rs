//! Runtime configuration files.
//!
//! Configuration lives under `<data dir>/config/` as `<name>.json`, `.yaml`
//! or `.toml`. [`ConfigManager`] reads and caches [`ConfigData`];
//! [`RuntimeConfig`] is the typed view of the `runtime` document.
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::kernel::constants;
use crate::storage::error::StorageSystemError;
use crate::storage::provider::{StorageProvider, StorageResult};

/// Supported configuration file formats
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConfigFormat {
    /// JSON format (.json)
    Json,
    /// YAML format (.yaml, .yml) - requires "yaml-config" feature
    #[cfg(feature = "yaml-config")]
    Yaml,
    /// TOML format (.toml) - requires "toml-config" feature
    #[cfg(feature = "toml-config")]
    Toml,
}

impl ConfigFormat {
    /// Get the file extension for this format
    pub fn extension(&self) -> &'static str {
        match self {
            ConfigFormat::Json => "json",
            #[cfg(feature = "yaml-config")]
            ConfigFormat::Yaml => "yaml",
            #[cfg(feature = "toml-config")]
            ConfigFormat::Toml => "toml",
        }
    }

    /// Determine format from file extension
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(|ext| match ext.to_lowercase().as_str() {
                "json" => Some(ConfigFormat::Json),
                #[cfg(feature = "yaml-config")]
                "yaml" | "yml" => Some(ConfigFormat::Yaml),
                #[cfg(feature = "toml-config")]
                "toml" => Some(ConfigFormat::Toml),
                _ => None,
            })
    }

    /// Every format compiled in, in lookup order.
    pub fn all() -> Vec<ConfigFormat> {
        vec![
            ConfigFormat::Json,
            #[cfg(feature = "yaml-config")]
            ConfigFormat::Yaml,
            #[cfg(feature = "toml-config")]
            ConfigFormat::Toml,
        ]
    }
}

fn serialization_error(format: &str, e: impl std::error::Error + Send + Sync + 'static) -> StorageSystemError {
    StorageSystemError::SerializationError {
        format: format.to_string(),
        source: Box::new(e),
    }
}

fn deserialization_error(format: &str, e: impl std::error::Error + Send + Sync + 'static) -> StorageSystemError {
    StorageSystemError::DeserializationError {
        format: format.to_string(),
        source: Box::new(e),
    }
}

/// In-memory representation of configuration data
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigData {
    #[serde(flatten)]
    values: HashMap<String, serde_json::Value>,
}

impl ConfigData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a configuration value; `None` if absent or of the wrong shape.
    pub fn get<T: for<'de> Deserialize<'de>>(&self, key: &str) -> Option<T> {
        self.values
            .get(key)
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    /// Get a value, failing if the key exists but has the wrong shape.
    pub fn get_checked<T: for<'de> Deserialize<'de>>(&self, key: &str) -> StorageResult<Option<T>> {
        match self.values.get(key) {
            None => Ok(None),
            Some(value) => serde_json::from_value(value.clone())
                .map(Some)
                .map_err(|e| StorageSystemError::InvalidConfigValue {
                    key: key.to_string(),
                    reason: e.to_string(),
                }),
        }
    }

    pub fn get_or<T: for<'de> Deserialize<'de>>(&self, key: &str, default: T) -> T {
        self.get(key).unwrap_or(default)
    }

    pub fn set<T: Serialize>(&mut self, key: &str, value: T) -> StorageResult<()> {
        let json_value = serde_json::to_value(value).map_err(|e| serialization_error("json", e))?;
        self.values.insert(key.to_string(), json_value);
        Ok(())
    }

    pub fn remove(&mut self, key: &str) -> Option<serde_json::Value> {
        self.values.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Merge with another config, overriding existing values
    pub fn merge(&mut self, other: &ConfigData) {
        for (key, value) in &other.values {
            self.values.insert(key.clone(), value.clone());
        }
    }

    pub fn serialize(&self, format: ConfigFormat) -> StorageResult<String> {
        match format {
            ConfigFormat::Json => serde_json::to_string_pretty(&self).map_err(|e| serialization_error("json", e)),
            #[cfg(feature = "yaml-config")]
            ConfigFormat::Yaml => serde_yaml::to_string(&self).map_err(|e| serialization_error("yaml", e)),
            #[cfg(feature = "toml-config")]
            ConfigFormat::Toml => toml::to_string_pretty(&self).map_err(|e| serialization_error("toml", e)),
        }
    }

    pub fn deserialize(data: &str, format: ConfigFormat) -> StorageResult<Self> {
        match format {
            ConfigFormat::Json => serde_json::from_str(data).map_err(|e| deserialization_error("json", e)),
            #[cfg(feature = "yaml-config")]
            ConfigFormat::Yaml => serde_yaml::from_str(data).map_err(|e| deserialization_error("yaml", e)),
            #[cfg(feature = "toml-config")]
            ConfigFormat::Toml => toml::from_str(data).map_err(|e| deserialization_error("toml", e)),
        }
    }
}

/// Loads, saves and caches named configuration documents.
#[derive(Debug)]
pub struct ConfigManager {
    provider: Arc<dyn StorageProvider>,
    config_path: PathBuf,
    default_format: ConfigFormat,
    cache: RwLock<HashMap<String, ConfigData>>,
}

impl ConfigManager {
    pub fn new(provider: Arc<dyn StorageProvider>, config_path: PathBuf, default_format: ConfigFormat) -> Self {
        Self {
            provider,
            config_path,
            default_format,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// First existing file for `name` across the compiled-in formats,
    /// or the default-format path when none exists yet.
    pub fn resolve_config_path(&self, name: &str) -> PathBuf {
        if Path::new(name).extension().is_some() {
            return self.config_path.join(name);
        }
        ConfigFormat::all()
            .into_iter()
            .map(|format| self.config_path.join(format!("{}.{}", name, format.extension())))
            .find(|path| self.provider.is_file(path))
            .unwrap_or_else(|| {
                self.config_path
                    .join(format!("{}.{}", name, self.default_format.extension()))
            })
    }

    /// Load a configuration; a missing file yields an empty document.
    pub fn load_config(&self, name: &str) -> StorageResult<ConfigData> {
        if let Ok(cache) = self.cache.read() {
            if let Some(config) = cache.get(name) {
                return Ok(config.clone());
            }
        }

        let path = self.resolve_config_path(name);
        let config = if self.provider.is_file(&path) {
            let format = ConfigFormat::from_path(&path)
                .ok_or_else(|| StorageSystemError::UnsupportedConfigFormat(path.display().to_string()))?;
            let content = self.provider.read_to_string(&path)?;
            ConfigData::deserialize(&content, format)?
        } else {
            log::debug!("No configuration file at {}, using defaults", path.display());
            ConfigData::new()
        };

        if let Ok(mut cache) = self.cache.write() {
            cache.insert(name.to_string(), config.clone());
        }
        Ok(config)
    }

    pub fn save_config(&self, name: &str, config: &ConfigData) -> StorageResult<()> {
        let path = self.resolve_config_path(name);
        let format = ConfigFormat::from_path(&path).unwrap_or(self.default_format);
        let content = config.serialize(format)?;
        self.provider.write_string(&path, &content)?;

        if let Ok(mut cache) = self.cache.write() {
            cache.insert(name.to_string(), config.clone());
        }
        Ok(())
    }

    pub fn invalidate_cache(&self, name: &str) {
        if let Ok(mut cache) = self.cache.write() {
            cache.remove(name);
        }
    }

    /// Typed runtime settings from the `runtime` document.
    pub fn runtime_config(&self) -> StorageResult<RuntimeConfig> {
        RuntimeConfig::from_config_data(&self.load_config(constants::RUNTIME_CONFIG_NAME)?)
    }
}

/// Settings that shape the plugin runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Directories scanned for plugin manifests, relative to the data dir.
    pub plugin_dirs: Vec<PathBuf>,
    /// Module used when a request path has no first segment.
    pub default_module: String,
    pub cycle_tick_ms: u64,
    /// Upper bound on a single lifecycle hook; 0 disables the timeout.
    pub hook_timeout_ms: u64,
    /// Plugin table document, relative to the data dir.
    pub store_file: PathBuf,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            plugin_dirs: vec![PathBuf::from(constants::DEFAULT_PLUGINS_DIR)],
            default_module: constants::DEFAULT_MODULE.to_string(),
            cycle_tick_ms: constants::DEFAULT_CYCLE_TICK_MS,
            hook_timeout_ms: constants::DEFAULT_HOOK_TIMEOUT_MS,
            store_file: PathBuf::from(constants::DEFAULT_STORE_FILE),
        }
    }
}

impl RuntimeConfig {
    /// Overlay the keys present in `data` onto the defaults.
    pub fn from_config_data(data: &ConfigData) -> StorageResult<Self> {
        let mut config = Self::default();
        if let Some(dirs) = data.get_checked("plugin_dirs")? {
            config.plugin_dirs = dirs;
        }
        if let Some(module) = data.get_checked::<String>("default_module")? {
            config.default_module = module.trim().to_lowercase();
        }
        if let Some(tick) = data.get_checked::<u64>("cycle_tick_ms")? {
            if tick == 0 {
                return Err(StorageSystemError::InvalidConfigValue {
                    key: "cycle_tick_ms".to_string(),
                    reason: "must be greater than zero".to_string(),
                });
            }
            config.cycle_tick_ms = tick;
        }
        if let Some(timeout) = data.get_checked("hook_timeout_ms")? {
            config.hook_timeout_ms = timeout;
        }
        if let Some(store_file) = data.get_checked("store_file")? {
            config.store_file = store_file;
        }
        Ok(config)
    }

    pub fn hook_timeout(&self) -> Option<Duration> {
        (self.hook_timeout_ms > 0).then(|| Duration::from_millis(self.hook_timeout_ms))
    }

    pub fn cycle_tick(&self) -> Duration {
        Duration::from_millis(self.cycle_tick_ms)
    }
}
