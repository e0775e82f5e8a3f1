use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use tokio::fs;

use crate::kernel::constants;
use crate::kernel::error::{Error as KernelError, Result as KernelResult};
use crate::plugin_system::descriptor::{PluginDescriptor, PluginId};
use crate::plugin_system::error::{LoadError, panic_message};
use crate::plugin_system::manifest::PluginManifest;
use crate::plugin_system::traits::Plugin;
use crate::plugin_system::version::ApiVersion;

/// Arguments handed to a plugin factory.
#[derive(Debug, Clone)]
pub struct PluginArgs {
    pub id: PluginId,
    pub title: String,
    pub directory: PathBuf,
}

impl From<&PluginDescriptor> for PluginArgs {
    fn from(descriptor: &PluginDescriptor) -> Self {
        Self {
            id: descriptor.id(),
            title: descriptor.title.clone(),
            directory: descriptor.directory.clone(),
        }
    }
}

/// Builds one plugin instance. `Err` carries the constructor's message.
pub type PluginFactory = Arc<dyn Fn(&PluginArgs) -> Result<Box<dyn Plugin>, String> + Send + Sync>;

/// Class path to factory mapping, filled in at link time by the plugin crates.
#[derive(Clone, Default)]
pub struct PluginFactories {
    factories: HashMap<String, PluginFactory>,
}

impl PluginFactories {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `factory` under `class_path`, replacing any earlier one.
    pub fn register<F>(&mut self, class_path: &str, factory: F)
    where
        F: Fn(&PluginArgs) -> Result<Box<dyn Plugin>, String> + Send + Sync + 'static,
    {
        if self
            .factories
            .insert(class_path.to_string(), Arc::new(factory))
            .is_some()
        {
            log::warn!("Plugin factory for '{}' was replaced", class_path);
        }
    }

    pub fn contains(&self, class_path: &str) -> bool {
        self.factories.contains_key(class_path)
    }

    pub fn class_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.factories.keys().cloned().collect();
        paths.sort();
        paths
    }

    fn get(&self, class_path: &str) -> Option<PluginFactory> {
        self.factories.get(class_path).cloned()
    }
}

impl fmt::Debug for PluginFactories {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginFactories")
            .field("class_paths", &self.class_paths())
            .finish()
    }
}

/// Turns class paths into live instances and finds manifests on disk.
///
/// This is the only place a class path is resolved; everything else works
/// against `dyn Plugin`.
#[derive(Debug, Clone)]
pub struct PluginLoader {
    factories: Arc<PluginFactories>,
    api_version: ApiVersion,
}

impl PluginLoader {
    pub fn new(factories: PluginFactories, api_version: ApiVersion) -> Self {
        Self {
            factories: Arc::new(factories),
            api_version,
        }
    }

    pub fn api_version(&self) -> &ApiVersion {
        &self.api_version
    }

    pub fn factories(&self) -> &PluginFactories {
        &self.factories
    }

    /// Construct the implementation registered under `class_path`.
    ///
    /// Never touches persisted state. Constructor panics are contained.
    pub fn instantiate(&self, class_path: &str, args: &PluginArgs) -> Result<Arc<dyn Plugin>, LoadError> {
        let factory = self.factories.get(class_path).ok_or_else(|| LoadError::ClassNotFound {
            class_path: class_path.to_string(),
        })?;

        let constructed = panic::catch_unwind(AssertUnwindSafe(|| factory(args))).map_err(|payload| {
            LoadError::ConstructionFailed {
                class_path: class_path.to_string(),
                message: format!("constructor panicked: {}", panic_message(payload.as_ref())),
            }
        })?;
        let instance = constructed.map_err(|message| LoadError::ConstructionFailed {
            class_path: class_path.to_string(),
            message,
        })?;

        let ranges = instance.compatible_api_versions();
        if ranges.is_empty() {
            return Err(LoadError::InvalidImplementation {
                class_path: class_path.to_string(),
                reason: "declares no compatible API versions".to_string(),
            });
        }
        if !ranges.iter().any(|range| range.includes_api(&self.api_version)) {
            let declared: Vec<&str> = ranges.iter().map(|r| r.constraint_string()).collect();
            return Err(LoadError::InvalidImplementation {
                class_path: class_path.to_string(),
                reason: format!(
                    "supports API {} but the runtime provides {}",
                    declared.join(" || "),
                    self.api_version
                ),
            });
        }

        Ok(Arc::from(instance))
    }

    /// Instantiate the implementation a descriptor points at.
    pub fn load(&self, descriptor: &PluginDescriptor) -> Result<Arc<dyn Plugin>, LoadError> {
        self.instantiate(&descriptor.class_path, &PluginArgs::from(descriptor))
    }

    /// Find every `plugin.json` under `dirs`. Unreadable or malformed
    /// manifests are logged and skipped; a missing root directory is empty.
    pub async fn scan_for_manifests(&self, dirs: &[PathBuf]) -> KernelResult<Vec<PluginManifest>> {
        let mut manifests = Vec::new();
        for dir in dirs {
            match fs::metadata(dir).await {
                Ok(metadata) if metadata.is_dir() => {}
                Ok(_) => {
                    log::warn!("Plugin path {} is not a directory, skipping", dir.display());
                    continue;
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    log::debug!("Plugin directory {} does not exist", dir.display());
                    continue;
                }
                Err(e) => return Err(KernelError::io(e, "metadata", dir.clone())),
            }
            self.scan_directory_boxed(dir.clone(), &mut manifests).await?;
        }
        manifests.sort_by(|a, b| a.plugin_base_dir.cmp(&b.plugin_base_dir));
        Ok(manifests)
    }

    fn scan_directory_boxed<'a>(
        &'a self,
        dir: PathBuf,
        manifests: &'a mut Vec<PluginManifest>,
    ) -> Pin<Box<dyn Future<Output = KernelResult<()>> + Send + 'a>> {
        Box::pin(self.scan_directory_inner(dir, manifests))
    }

    async fn scan_directory_inner(&self, dir: PathBuf, manifests: &mut Vec<PluginManifest>) -> KernelResult<()> {
        let mut entries = fs::read_dir(&dir)
            .await
            .map_err(|e| KernelError::io(e, "read_dir", dir.clone()))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| KernelError::io(e, "read_dir_entry", dir.clone()))?
        {
            let entry_path = entry.path();
            let is_dir = match fs::metadata(&entry_path).await {
                Ok(meta) => meta.is_dir(),
                Err(e) => {
                    log::warn!("Failed to get metadata for {}: {}", entry_path.display(), e);
                    continue;
                }
            };
            if !is_dir {
                continue;
            }

            let manifest_path = entry_path.join(constants::MANIFEST_FILE);
            if fs::metadata(&manifest_path).await.is_ok_and(|m| m.is_file()) {
                match self.load_manifest(&manifest_path).await {
                    Ok(manifest) => manifests.push(manifest),
                    Err(e) => log::warn!("Error loading manifest from {}: {}", manifest_path.display(), e),
                }
                // A plugin directory's own subdirectories are its private files.
                continue;
            }

            if let Err(e) = self.scan_directory_boxed(entry_path.clone(), manifests).await {
                log::warn!("Error scanning subdirectory {}: {}", entry_path.display(), e);
            }
        }

        Ok(())
    }

    /// Read and parse one manifest file.
    pub async fn load_manifest(&self, path: &Path) -> KernelResult<PluginManifest> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| KernelError::io(e, "read_manifest", path.to_path_buf()))?;
        Ok(PluginManifest::from_json(&content, path)?)
    }

    /// Load the manifest of a single plugin directory.
    pub async fn load_plugin_directory(&self, dir: &Path) -> KernelResult<PluginManifest> {
        self.load_manifest(&dir.join(constants::MANIFEST_FILE)).await
    }
}
