use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Deserialize;

use crate::plugin_system::descriptor::{PluginDescriptor, PluginId};
use crate::plugin_system::error::PluginSystemError;
use crate::plugin_system::version::{ApiVersion, PluginVersion, VersionRange};

/// On-disk shape of `plugin.json`.
#[derive(Deserialize, Debug)]
struct RawPluginManifest {
    id: String,
    title: String,
    class_path: String,
    version: String,
    #[serde(default)]
    priority: i32,
    #[serde(default)]
    api_versions: Vec<String>,
    #[serde(default)]
    description: Option<String>,
}

/// Parsed plugin manifest
#[derive(Debug, Clone)]
pub struct PluginManifest {
    pub id: PluginId,
    pub title: String,
    /// Key into the factory registry.
    pub class_path: String,
    pub version: PluginVersion,
    pub priority: i32,
    /// Runtime API ranges this plugin was built against; empty means any.
    pub api_versions: Vec<VersionRange>,
    pub description: Option<String>,
    /// Directory containing the manifest file.
    pub plugin_base_dir: PathBuf,
}

impl PluginManifest {
    /// Parse manifest JSON read from `path`.
    pub fn from_json(content: &str, path: &Path) -> Result<Self, PluginSystemError> {
        let manifest_error = |message: String| PluginSystemError::ManifestError {
            path: path.to_path_buf(),
            message,
            source: None,
        };

        let raw: RawPluginManifest = serde_json::from_str(content).map_err(|e| PluginSystemError::ManifestError {
            path: path.to_path_buf(),
            message: format!("Failed to parse manifest JSON: {}", e),
            source: Some(Box::new(e)),
        })?;

        let id = PluginId::from_str(&raw.id)
            .map_err(|e| manifest_error(format!("Invalid plugin id '{}': {}", raw.id, e)))?;
        let version = PluginVersion::from_str(&raw.version)
            .map_err(|e| manifest_error(format!("Invalid version '{}': {}", raw.version, e)))?;
        if raw.class_path.trim().is_empty() {
            return Err(manifest_error("class_path must not be empty".to_string()));
        }

        let mut api_versions = Vec::with_capacity(raw.api_versions.len());
        for constraint in &raw.api_versions {
            let range = VersionRange::from_str(constraint).map_err(|e| {
                manifest_error(format!("Failed to parse API version range '{}': {}", constraint, e))
            })?;
            api_versions.push(range);
        }

        Ok(Self {
            id,
            title: raw.title,
            class_path: raw.class_path.trim().to_string(),
            version,
            priority: raw.priority,
            api_versions,
            description: raw.description,
            plugin_base_dir: path.parent().unwrap_or_else(|| Path::new("")).to_path_buf(),
        })
    }

    /// True when no range is declared or one of them includes `api`.
    pub fn supports_api(&self, api: &ApiVersion) -> bool {
        self.api_versions.is_empty() || self.api_versions.iter().any(|r| r.includes_api(api))
    }

    /// A fresh `NotInstalled` descriptor for this manifest.
    pub fn to_descriptor(&self) -> PluginDescriptor {
        PluginDescriptor::new(
            self.id,
            self.title.clone(),
            self.plugin_base_dir.clone(),
            self.class_path.clone(),
            self.version,
            self.priority,
        )
    }
}
