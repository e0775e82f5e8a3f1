use serde::Serialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::plugin_system::descriptor::PluginDescriptor;
use crate::plugin_system::error::HookError;
use crate::plugin_system::handler_info::HandlerInfo;
use crate::plugin_system::resources::{RenderProvider, RouteClaim, Setting};
use crate::storage::store::{Change, ChangeSet, PluginStore};

/// What a lifecycle hook sees and may stage.
///
/// Nothing staged here touches storage directly. The lifecycle controller
/// commits the staged changes together with the state change, and only when
/// the hook succeeded.
pub struct LifecycleContext<'a> {
    descriptor: &'a PluginDescriptor,
    store: &'a dyn PluginStore,
    handlers: HandlerInfo,
    changes: ChangeSet,
    messages: Vec<String>,
    cancel: CancellationToken,
}

impl<'a> LifecycleContext<'a> {
    pub fn new(
        descriptor: &'a PluginDescriptor,
        store: &'a dyn PluginStore,
        handlers: HandlerInfo,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            descriptor,
            store,
            handlers,
            changes: ChangeSet::new(),
            messages: Vec::new(),
            cancel,
        }
    }

    pub fn descriptor(&self) -> &PluginDescriptor {
        self.descriptor
    }

    /// Read access to every plugin table.
    pub fn store(&self) -> &dyn PluginStore {
        self.store
    }

    pub fn handlers(&self) -> &HandlerInfo {
        &self.handlers
    }

    /// Declare which optional hooks the plugin participates in.
    pub fn handlers_mut(&mut self) -> &mut HandlerInfo {
        &mut self.handlers
    }

    /// Route requests whose first path segment is `module` to this plugin.
    pub fn claim_route(&mut self, module: &str) {
        self.changes
            .push(Change::ClaimRoute(RouteClaim::new(module, self.descriptor.id())));
    }

    /// Register a render provider owned by this plugin; returns its id.
    pub fn add_render_provider(&mut self, title: impl Into<String>, priority: i32) -> Uuid {
        let provider = RenderProvider::new(self.descriptor.id(), title, priority);
        let id = provider.id;
        self.changes.push(Change::InsertRenderProvider(provider));
        id
    }

    /// Delete every render provider this plugin owns.
    pub fn remove_render_providers(&mut self) {
        self.changes
            .push(Change::DeleteRenderProviders(self.descriptor.id()));
    }

    pub fn set_render_provider_enabled(&mut self, id: Uuid, enabled: bool) {
        self.changes.push(Change::SetRenderProviderEnabled { id, enabled });
    }

    pub fn put_setting<T: Serialize>(&mut self, key: &str, value: T) -> Result<(), HookError> {
        let value = serde_json::to_value(value).map_err(HookError::from_error)?;
        self.changes.push(Change::PutSetting(Setting {
            owner: self.descriptor.id(),
            key: key.to_string(),
            value,
        }));
        Ok(())
    }

    /// Append a line to the transition's message log.
    pub fn note(&mut self, message: impl Into<String>) {
        self.messages.push(message.into());
    }

    /// Fires when the caller gives up on this transition.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub(crate) fn into_parts(self) -> (HandlerInfo, ChangeSet, Vec<String>) {
        (self.handlers, self.changes, self.messages)
    }
}
