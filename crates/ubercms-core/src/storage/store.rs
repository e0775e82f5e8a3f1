//! Durable plugin tables and the change sets that mutate them.
//!
//! A [`PluginStore`] is the "database connection" the runtime and plugin hooks
//! share. Reads return owned rows. The only write path is
//! [`PluginStore::commit`], which applies a whole [`ChangeSet`] or nothing.
use std::collections::BTreeMap;
use std::fmt::Debug;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::plugin_system::descriptor::{DescriptorField, PluginDescriptor, PluginId, PluginState, SaveOutcome};
use crate::plugin_system::handler_info::HandlerInfo;
use crate::plugin_system::resources::{RenderProvider, RouteClaim, Setting};
use crate::storage::error::PersistenceError;

pub const PLUGINS_TABLE: &str = "plugins";
pub const HANDLERS_TABLE: &str = "handlers";
pub const ROUTES_TABLE: &str = "routes";
pub const RENDER_PROVIDERS_TABLE: &str = "render_providers";
pub const SETTINGS_TABLE: &str = "settings";

/// A single row-level mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    InsertDescriptor(PluginDescriptor),
    /// Writes only the listed columns.
    UpdateDescriptor { id: PluginId, fields: Vec<DescriptorField> },
    DeleteDescriptor(PluginId),
    /// Flag every `NotInstalled` descriptor as stale.
    MarkUninstalledStale,
    /// Delete `NotInstalled` descriptors still flagged stale.
    PurgeStale,
    PutHandlerInfo { plugin_id: PluginId, info: HandlerInfo },
    DeleteHandlerInfo(PluginId),
    ClaimRoute(RouteClaim),
    ReleaseRoutes(PluginId),
    InsertRenderProvider(RenderProvider),
    SetRenderProviderEnabled { id: Uuid, enabled: bool },
    DeleteRenderProviders(PluginId),
    PutSetting(Setting),
    DeleteSettings(PluginId),
}

/// Ordered batch of changes committed atomically.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    changes: Vec<Change>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, change: Change) {
        self.changes.push(change);
    }

    pub fn extend(&mut self, other: ChangeSet) {
        self.changes.extend(other.changes);
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Change> {
        self.changes.iter()
    }
}

impl From<Vec<Change>> for ChangeSet {
    fn from(changes: Vec<Change>) -> Self {
        Self { changes }
    }
}

/// Rows touched by a commit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitOutcome {
    pub changes: usize,
    pub rows_affected: usize,
}

/// In-memory image of every plugin table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Tables {
    /// Creation order is preserved; it is the arrival order used on rebuild.
    #[serde(default)]
    pub plugins: Vec<PluginDescriptor>,
    #[serde(default)]
    pub handlers: BTreeMap<PluginId, HandlerInfo>,
    #[serde(default)]
    pub routes: Vec<RouteClaim>,
    #[serde(default)]
    pub render_providers: Vec<RenderProvider>,
    #[serde(default)]
    pub settings: Vec<Setting>,
}

impl Tables {
    pub fn descriptor(&self, id: PluginId) -> Option<&PluginDescriptor> {
        self.plugins.iter().find(|d| d.id() == id)
    }

    fn descriptor_mut(&mut self, id: PluginId) -> Option<&mut PluginDescriptor> {
        self.plugins.iter_mut().find(|d| d.id() == id)
    }

    /// Apply every change in order. Callers apply to a copy and swap on success.
    pub fn apply(&mut self, changes: &ChangeSet) -> Result<CommitOutcome, PersistenceError> {
        let mut outcome = CommitOutcome { changes: changes.len(), rows_affected: 0 };
        for change in changes.iter() {
            outcome.rows_affected += self.apply_one(change)?;
        }
        Ok(outcome)
    }

    fn apply_one(&mut self, change: &Change) -> Result<usize, PersistenceError> {
        match change {
            Change::InsertDescriptor(descriptor) => {
                if self.descriptor(descriptor.id()).is_some() {
                    return Err(PersistenceError::duplicate(PLUGINS_TABLE, descriptor.id()));
                }
                self.plugins.push(descriptor.clone());
                Ok(1)
            }
            Change::UpdateDescriptor { id, fields } => {
                let row = self
                    .descriptor_mut(*id)
                    .ok_or_else(|| PersistenceError::not_found(PLUGINS_TABLE, id))?;
                for field in fields {
                    row.apply(field);
                }
                Ok(1)
            }
            Change::DeleteDescriptor(id) => {
                let before = self.plugins.len();
                self.plugins.retain(|d| d.id() != *id);
                if self.plugins.len() == before {
                    return Err(PersistenceError::not_found(PLUGINS_TABLE, id));
                }
                Ok(1)
            }
            Change::MarkUninstalledStale => {
                let mut rows = 0;
                for row in self.plugins.iter_mut().filter(|d| d.state == PluginState::NotInstalled) {
                    row.stale = true;
                    rows += 1;
                }
                Ok(rows)
            }
            Change::PurgeStale => {
                let purged: Vec<PluginId> = self
                    .plugins
                    .iter()
                    .filter(|d| d.stale && d.state == PluginState::NotInstalled)
                    .map(|d| d.id())
                    .collect();
                self.plugins.retain(|d| !purged.contains(&d.id()));
                for id in &purged {
                    self.handlers.remove(id);
                }
                Ok(purged.len())
            }
            Change::PutHandlerInfo { plugin_id, info } => {
                if self.descriptor(*plugin_id).is_none() {
                    return Err(PersistenceError::not_found(PLUGINS_TABLE, plugin_id));
                }
                self.handlers.insert(*plugin_id, *info);
                Ok(1)
            }
            Change::DeleteHandlerInfo(plugin_id) => Ok(self.handlers.remove(plugin_id).map_or(0, |_| 1)),
            Change::ClaimRoute(claim) => {
                match self.routes.iter().find(|r| r.module == claim.module) {
                    Some(existing) if existing.plugin_id == claim.plugin_id => Ok(0),
                    Some(_) => Err(PersistenceError::duplicate(ROUTES_TABLE, &claim.module)),
                    None => {
                        self.routes.push(claim.clone());
                        Ok(1)
                    }
                }
            }
            Change::ReleaseRoutes(plugin_id) => {
                let before = self.routes.len();
                self.routes.retain(|r| r.plugin_id != *plugin_id);
                Ok(before - self.routes.len())
            }
            Change::InsertRenderProvider(provider) => {
                if self.render_providers.iter().any(|p| p.id == provider.id) {
                    return Err(PersistenceError::duplicate(RENDER_PROVIDERS_TABLE, provider.id));
                }
                self.render_providers.push(provider.clone());
                Ok(1)
            }
            Change::SetRenderProviderEnabled { id, enabled } => {
                let row = self
                    .render_providers
                    .iter_mut()
                    .find(|p| p.id == *id)
                    .ok_or_else(|| PersistenceError::not_found(RENDER_PROVIDERS_TABLE, id))?;
                row.enabled = *enabled;
                Ok(1)
            }
            Change::DeleteRenderProviders(owner) => {
                let before = self.render_providers.len();
                self.render_providers.retain(|p| p.owner != *owner);
                Ok(before - self.render_providers.len())
            }
            Change::PutSetting(setting) => {
                match self
                    .settings
                    .iter_mut()
                    .find(|s| s.owner == setting.owner && s.key == setting.key)
                {
                    Some(row) => row.value = setting.value.clone(),
                    None => self.settings.push(setting.clone()),
                }
                Ok(1)
            }
            Change::DeleteSettings(owner) => {
                let before = self.settings.len();
                self.settings.retain(|s| s.owner != *owner);
                Ok(before - self.settings.len())
            }
        }
    }
}

/// Durable storage for the plugin tables.
pub trait PluginStore: Send + Sync + Debug {
    /// Get the name of this store
    fn name(&self) -> &str;

    /// A consistent copy of every table.
    fn tables(&self) -> Result<Tables, PersistenceError>;

    /// Apply all changes atomically; on error nothing is written.
    fn commit(&self, changes: ChangeSet) -> Result<CommitOutcome, PersistenceError>;

    fn load_descriptor(&self, id: PluginId) -> Result<PluginDescriptor, PersistenceError> {
        self.tables()?
            .descriptor(id)
            .cloned()
            .ok_or_else(|| PersistenceError::not_found(PLUGINS_TABLE, id))
    }

    /// All descriptors in creation order.
    fn descriptors(&self) -> Result<Vec<PluginDescriptor>, PersistenceError> {
        Ok(self.tables()?.plugins)
    }

    fn handler_info(&self, id: PluginId) -> Result<Option<HandlerInfo>, PersistenceError> {
        Ok(self.tables()?.handlers.get(&id).copied())
    }

    fn routes(&self) -> Result<Vec<RouteClaim>, PersistenceError> {
        Ok(self.tables()?.routes)
    }

    /// Providers, optionally filtered by owner, highest priority first.
    fn render_providers(&self, owner: Option<PluginId>) -> Result<Vec<RenderProvider>, PersistenceError> {
        let mut providers: Vec<RenderProvider> = self
            .tables()?
            .render_providers
            .into_iter()
            .filter(|p| owner.is_none_or(|o| p.owner == o))
            .collect();
        providers.sort_by(|a, b| b.priority.cmp(&a.priority));
        Ok(providers)
    }

    fn setting(&self, owner: PluginId, key: &str) -> Result<Option<serde_json::Value>, PersistenceError> {
        Ok(self
            .tables()?
            .settings
            .into_iter()
            .find(|s| s.owner == owner && s.key == key)
            .map(|s| s.value))
    }

    fn insert_descriptor(&self, descriptor: PluginDescriptor) -> Result<CommitOutcome, PersistenceError> {
        self.commit(vec![Change::InsertDescriptor(descriptor)].into())
    }

    /// Persist only the columns of `updated` that differ from `baseline`.
    fn save_descriptor(
        &self,
        baseline: &PluginDescriptor,
        updated: &PluginDescriptor,
    ) -> Result<SaveOutcome, PersistenceError> {
        let fields = updated.changes_since(baseline);
        if fields.is_empty() {
            return Ok(SaveOutcome::NoOp);
        }
        let columns = fields.iter().map(DescriptorField::column).collect();
        self.commit(vec![Change::UpdateDescriptor { id: updated.id(), fields }].into())?;
        Ok(SaveOutcome::Saved { columns })
    }
}
