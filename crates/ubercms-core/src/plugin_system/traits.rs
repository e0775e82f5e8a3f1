use async_trait::async_trait;

use crate::dispatch::context::RequestContext;
use crate::dispatch::error::DispatchError;
use crate::plugin_system::context::LifecycleContext;
use crate::plugin_system::descriptor::{PluginDescriptor, Transition};
use crate::plugin_system::error::HookError;
use crate::plugin_system::version::VersionRange;
use crate::scheduler::CycleContext;
use crate::storage::store::PluginStore;

/// Outcome of a lifecycle hook: a human-readable message on success.
pub type HookResult = Result<String, HookError>;

/// Capability interface every plugin implements.
///
/// Only `name` and `compatible_api_versions` are required. Every hook has a
/// default that succeeds without doing anything, and the optional hooks only
/// run when the matching [`HandlerInfo`](crate::plugin_system::HandlerInfo)
/// flag is set.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    /// Runtime API versions this implementation supports
    fn compatible_api_versions(&self) -> Vec<VersionRange>;

    /// Create tables, copy files, declare hooks. Runs on `NotInstalled -> Disabled`.
    async fn install(&self, _ctx: &mut LifecycleContext<'_>) -> HookResult {
        Ok(String::new())
    }

    async fn uninstall(&self, _ctx: &mut LifecycleContext<'_>) -> HookResult {
        Ok(String::new())
    }

    async fn enable(&self, _ctx: &mut LifecycleContext<'_>) -> HookResult {
        Ok(String::new())
    }

    async fn disable(&self, _ctx: &mut LifecycleContext<'_>) -> HookResult {
        Ok(String::new())
    }

    /// Serve a request routed to this plugin. `Ok(false)` declines it.
    async fn handle_request(&self, _request: &mut RequestContext) -> Result<bool, HookError> {
        Ok(false)
    }

    /// Claim a request nobody handled by returning `Ok(true)`.
    async fn handle_page_not_found(&self, _request: &mut RequestContext) -> Result<bool, HookError> {
        Ok(false)
    }

    /// Claim a failed request by returning `Ok(true)`.
    async fn handle_page_error(&self, _request: &mut RequestContext, _error: &DispatchError) -> Result<bool, HookError> {
        Ok(false)
    }

    /// `Ok(false)` reports that the plugin could not start; it stays registered.
    async fn on_runtime_start(&self, _store: &dyn PluginStore) -> Result<bool, HookError> {
        Ok(true)
    }

    async fn on_runtime_stop(&self, _store: &dyn PluginStore) -> Result<(), HookError> {
        Ok(())
    }

    async fn on_request_start(&self, _request: &mut RequestContext) -> Result<(), HookError> {
        Ok(())
    }

    async fn on_request_end(&self, _request: &mut RequestContext) -> Result<(), HookError> {
        Ok(())
    }

    async fn on_cycle(&self, _ctx: &CycleContext) -> Result<(), HookError> {
        Ok(())
    }

    /// Another plugin completed a lifecycle transition.
    async fn on_plugin_action(&self, _action: Transition, _subject: &PluginDescriptor) -> Result<(), HookError> {
        Ok(())
    }
}
