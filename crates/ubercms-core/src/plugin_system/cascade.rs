//! Explicit ownership cascade run by the `remove` transition.
use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;

use crate::plugin_system::descriptor::PluginDescriptor;
use crate::storage::manager::DefaultStorageManager;
use crate::storage::provider::StorageProvider;
use crate::storage::store::{Change, ChangeSet};

/// One kind of data owned by a plugin.
///
/// `cleanup` runs for every rule before anything is committed; the first
/// failure aborts the removal. `stage` then adds row deletions to the same
/// change set that deletes the descriptor.
#[async_trait]
pub trait CascadeRule: Send + Sync + Debug {
    fn name(&self) -> &'static str;

    fn stage(&self, descriptor: &PluginDescriptor, changes: &mut ChangeSet);

    /// Cleanup outside the plugin tables. Must tolerate being run again.
    async fn cleanup(&self, _descriptor: &PluginDescriptor) -> Result<(), String> {
        Ok(())
    }
}

#[derive(Debug)]
pub struct HandlerInfoRule;

impl CascadeRule for HandlerInfoRule {
    fn name(&self) -> &'static str {
        "handler_info"
    }

    fn stage(&self, descriptor: &PluginDescriptor, changes: &mut ChangeSet) {
        changes.push(Change::DeleteHandlerInfo(descriptor.id()));
    }
}

#[derive(Debug)]
pub struct RoutesRule;

impl CascadeRule for RoutesRule {
    fn name(&self) -> &'static str {
        "routes"
    }

    fn stage(&self, descriptor: &PluginDescriptor, changes: &mut ChangeSet) {
        changes.push(Change::ReleaseRoutes(descriptor.id()));
    }
}

#[derive(Debug)]
pub struct RenderProvidersRule;

impl CascadeRule for RenderProvidersRule {
    fn name(&self) -> &'static str {
        "render_providers"
    }

    fn stage(&self, descriptor: &PluginDescriptor, changes: &mut ChangeSet) {
        changes.push(Change::DeleteRenderProviders(descriptor.id()));
    }
}

#[derive(Debug)]
pub struct SettingsRule;

impl CascadeRule for SettingsRule {
    fn name(&self) -> &'static str {
        "settings"
    }

    fn stage(&self, descriptor: &PluginDescriptor, changes: &mut ChangeSet) {
        changes.push(Change::DeleteSettings(descriptor.id()));
    }
}

/// Deletes `data/plugins/<id>` from the data directory.
#[derive(Debug)]
pub struct DataDirectoryRule {
    provider: Arc<dyn StorageProvider>,
}

impl DataDirectoryRule {
    pub fn new(provider: Arc<dyn StorageProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl CascadeRule for DataDirectoryRule {
    fn name(&self) -> &'static str {
        "data_directory"
    }

    fn stage(&self, _descriptor: &PluginDescriptor, _changes: &mut ChangeSet) {}

    async fn cleanup(&self, descriptor: &PluginDescriptor) -> Result<(), String> {
        let path = DefaultStorageManager::plugin_data_path(&descriptor.id());
        if !self.provider.exists(&path) {
            return Ok(());
        }
        self.provider.remove_dir_all(&path).map_err(|e| e.to_string())
    }
}

/// The rules every runtime applies, in order.
pub fn default_rules(provider: Arc<dyn StorageProvider>) -> Vec<Arc<dyn CascadeRule>> {
    vec![
        Arc::new(HandlerInfoRule),
        Arc::new(RoutesRule),
        Arc::new(RenderProvidersRule),
        Arc::new(SettingsRule),
        Arc::new(DataDirectoryRule::new(provider)),
    ]
}
