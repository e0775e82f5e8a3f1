//! Plugin-owned sub-resources persisted next to the descriptor.
//!
//! Every row here names its owning plugin; removing the owner removes the
//! rows through the cascade rules in [`cascade`](crate::plugin_system::cascade).
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::plugin_system::descriptor::PluginId;

/// A URL module prefix routed to one plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteClaim {
    /// Lower-cased first path segment, e.g. `articles` for `/articles/2024`.
    pub module: String,
    pub plugin_id: PluginId,
}

impl RouteClaim {
    pub fn new(module: &str, plugin_id: PluginId) -> Self {
        Self {
            module: normalize_module(module),
            plugin_id,
        }
    }
}

pub(crate) fn normalize_module(module: &str) -> String {
    module.trim().trim_matches('/').to_lowercase()
}

/// A text-transformation rule registered by a rendering plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderProvider {
    pub id: Uuid,
    pub owner: PluginId,
    pub title: String,
    pub enabled: bool,
    /// Higher runs first.
    pub priority: i32,
}

impl RenderProvider {
    pub fn new(owner: PluginId, title: impl Into<String>, priority: i32) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner,
            title: title.into(),
            enabled: true,
            priority,
        }
    }
}

/// Plugin-scoped key/value row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Setting {
    pub owner: PluginId,
    pub key: String,
    pub value: serde_json::Value,
}
