//! Per-plugin state machine: install, enable, disable, uninstall, remove.
//!
//! Every transition runs under the plugin's own lock and follows the same
//! order: check the current state, run the plugin's hook behind the
//! panic/timeout/cancel boundary, then commit the state change and all
//! staged rows in one change set, then update the registry. A failing hook
//! leaves storage and registry untouched.
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::plugin_system::cascade::CascadeRule;
use crate::plugin_system::context::LifecycleContext;
use crate::plugin_system::descriptor::{PluginDescriptor, PluginId, PluginState, Transition};
use crate::plugin_system::error::{HookError, PluginSystemError};
use crate::plugin_system::handler_info::{HandlerInfo, Hook};
use crate::plugin_system::invoke::guarded;
use crate::plugin_system::loader::PluginLoader;
use crate::plugin_system::locks::PluginLocks;
use crate::plugin_system::maintenance::MaintenanceGate;
use crate::plugin_system::registry::{PluginRegistry, RegisteredPlugin};
use crate::plugin_system::traits::Plugin;
use crate::storage::error::PersistenceError;
use crate::storage::store::{Change, ChangeSet, PluginStore};

/// Structured result of one lifecycle verb.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionReport {
    pub plugin_id: PluginId,
    pub title: String,
    pub transition: Transition,
    pub from: PluginState,
    /// `None` after `remove`.
    pub to: Option<PluginState>,
    /// Messages from the hook and the runtime, in order.
    pub messages: Vec<String>,
}

pub struct LifecycleController {
    store: Arc<dyn PluginStore>,
    registry: Arc<PluginRegistry>,
    loader: Arc<PluginLoader>,
    gate: Arc<MaintenanceGate>,
    locks: PluginLocks,
    cascade: Vec<Arc<dyn CascadeRule>>,
    hook_timeout: Option<Duration>,
}

impl std::fmt::Debug for LifecycleController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleController")
            .field("store", &self.store.name())
            .field("locked_plugins", &self.locks.len())
            .field("cascade", &self.cascade)
            .field("hook_timeout", &self.hook_timeout)
            .finish()
    }
}

fn not_found(id: PluginId) -> impl FnOnce(PersistenceError) -> PluginSystemError {
    move |e| match e {
        PersistenceError::NotFound { .. } => PluginSystemError::NotFound(id),
        other => PluginSystemError::Persistence(other),
    }
}

impl LifecycleController {
    pub fn new(
        store: Arc<dyn PluginStore>,
        registry: Arc<PluginRegistry>,
        loader: Arc<PluginLoader>,
        gate: Arc<MaintenanceGate>,
        cascade: Vec<Arc<dyn CascadeRule>>,
        hook_timeout: Option<Duration>,
    ) -> Self {
        Self {
            store,
            registry,
            loader,
            gate,
            locks: PluginLocks::new(),
            cascade,
            hook_timeout,
        }
    }

    pub fn locks(&self) -> &PluginLocks {
        &self.locks
    }

    pub fn cascade(&self) -> &[Arc<dyn CascadeRule>] {
        &self.cascade
    }

    pub async fn install(&self, id: PluginId, cancel: &CancellationToken) -> Result<TransitionReport, PluginSystemError> {
        self.run(id, Transition::Install, cancel).await
    }

    pub async fn enable(&self, id: PluginId, cancel: &CancellationToken) -> Result<TransitionReport, PluginSystemError> {
        self.run(id, Transition::Enable, cancel).await
    }

    pub async fn disable(&self, id: PluginId, cancel: &CancellationToken) -> Result<TransitionReport, PluginSystemError> {
        self.run(id, Transition::Disable, cancel).await
    }

    pub async fn uninstall(&self, id: PluginId, cancel: &CancellationToken) -> Result<TransitionReport, PluginSystemError> {
        self.run(id, Transition::Uninstall, cancel).await
    }

    pub async fn remove(&self, id: PluginId, cancel: &CancellationToken) -> Result<TransitionReport, PluginSystemError> {
        self.run(id, Transition::Remove, cancel).await
    }

    /// Run `transition` on `id` under its plugin lock.
    pub async fn run(
        &self,
        id: PluginId,
        transition: Transition,
        cancel: &CancellationToken,
    ) -> Result<TransitionReport, PluginSystemError> {
        let result = async {
            let _pass = self.gate.enter().await?;
            let _lock = self.locks.acquire(id).await;

            let baseline = self.store.load_descriptor(id).map_err(not_found(id))?;
            transition.check(id, baseline.state)?;

            let report = match transition {
                Transition::Remove => self.remove_locked(&baseline, cancel).await?,
                _ => self.transition_locked(&baseline, transition, cancel).await?,
            };
            let mut subject = baseline;
            if let Some(state) = report.to {
                subject.state = state;
            }
            Ok::<_, PluginSystemError>((report, subject))
        }
        .await;

        // The plugin is gone: its lock entry goes too, once our guard is released.
        let gone = match &result {
            Ok((report, _)) => report.to.is_none(),
            Err(e) => matches!(e, PluginSystemError::NotFound(_)),
        };
        if gone {
            self.locks.forget(id);
        }
        let (report, subject) = result?;

        for message in &report.messages {
            log::info!("[{}] {}", report.title, message);
        }
        self.notify(transition, &subject, cancel).await;
        Ok(report)
    }

    async fn transition_locked(
        &self,
        baseline: &PluginDescriptor,
        transition: Transition,
        cancel: &CancellationToken,
    ) -> Result<TransitionReport, PluginSystemError> {
        let id = baseline.id();
        let hook_name = transition.hook_name();
        let instance = self.instance_for(baseline, transition)?;
        let handlers = self.store.handler_info(id)?.unwrap_or_default();

        let mut ctx = LifecycleContext::new(baseline, self.store.as_ref(), handlers, cancel.child_token());
        let outcome = {
            let hook = match transition {
                Transition::Install => instance.install(&mut ctx),
                Transition::Enable => instance.enable(&mut ctx),
                Transition::Disable => instance.disable(&mut ctx),
                Transition::Uninstall => instance.uninstall(&mut ctx),
                Transition::Remove => {
                    return Err(PluginSystemError::InvalidStateTransition {
                        plugin_id: id,
                        transition,
                        state: baseline.state,
                    });
                }
            };
            guarded(hook, Some(cancel), self.hook_timeout).await
        };
        let hook_message = outcome.map_err(|source| match source {
            HookError::Cancelled => PluginSystemError::Cancelled {
                operation: hook_name.to_string(),
            },
            source => {
                log::warn!("Plugin '{}' {} hook failed: {}", baseline.title, hook_name, source);
                PluginSystemError::HookFailure {
                    plugin_id: id,
                    hook: hook_name,
                    source,
                }
            }
        })?;
        let (handlers, staged, notes) = ctx.into_parts();

        if cancel.is_cancelled() {
            return Err(PluginSystemError::Cancelled {
                operation: hook_name.to_string(),
            });
        }

        let target = transition
            .target_state()
            .ok_or_else(|| PluginSystemError::InvalidStateTransition {
                plugin_id: id,
                transition,
                state: baseline.state,
            })?;
        let mut updated = baseline.clone();
        updated.state = target;

        let mut changes = ChangeSet::new();
        let handlers = if transition == Transition::Uninstall {
            changes.push(Change::ReleaseRoutes(id));
            HandlerInfo::default()
        } else {
            handlers
        };
        changes.extend(staged);
        changes.push(Change::PutHandlerInfo { plugin_id: id, info: handlers });
        changes.push(Change::UpdateDescriptor {
            id,
            fields: updated.changes_since(baseline),
        });
        self.store.commit(changes)?;

        match transition {
            Transition::Enable => {
                let routes = self
                    .store
                    .routes()?
                    .into_iter()
                    .filter(|r| r.plugin_id == id)
                    .map(|r| r.module)
                    .collect();
                self.registry
                    .register(RegisteredPlugin::new(updated.clone(), handlers, routes, instance));
            }
            Transition::Disable => {
                self.registry.unregister(id);
            }
            _ => {}
        }

        let mut messages = Vec::new();
        if !hook_message.is_empty() {
            messages.push(hook_message);
        }
        messages.extend(notes);
        messages.push(format!("Plugin '{}' is now {}", updated.title, target));

        Ok(TransitionReport {
            plugin_id: id,
            title: updated.title,
            transition,
            from: baseline.state,
            to: Some(target),
            messages,
        })
    }

    /// Disable talks to the live instance; every other hook gets a fresh one.
    fn instance_for(
        &self,
        descriptor: &PluginDescriptor,
        transition: Transition,
    ) -> Result<Arc<dyn Plugin>, PluginSystemError> {
        if transition == Transition::Disable {
            if let Some(instance) = self.registry.get(descriptor.id()) {
                return Ok(instance);
            }
        }
        self.loader
            .load(descriptor)
            .map_err(|source| PluginSystemError::LoadingError {
                plugin_id: descriptor.id(),
                source,
            })
    }

    async fn remove_locked(
        &self,
        descriptor: &PluginDescriptor,
        cancel: &CancellationToken,
    ) -> Result<TransitionReport, PluginSystemError> {
        let id = descriptor.id();
        let mut messages = Vec::new();

        for rule in &self.cascade {
            if cancel.is_cancelled() {
                return Err(PluginSystemError::Cancelled {
                    operation: "remove".to_string(),
                });
            }
            rule.cleanup(descriptor)
                .await
                .map_err(|message| PluginSystemError::CleanupFailed {
                    plugin_id: id,
                    rule: rule.name(),
                    message,
                })?;
        }

        let mut changes = ChangeSet::new();
        for rule in &self.cascade {
            rule.stage(descriptor, &mut changes);
        }
        changes.push(Change::DeleteDescriptor(id));
        let outcome = self.store.commit(changes)?;

        self.registry.unregister(id);

        messages.push(format!(
            "Plugin '{}' removed ({} rows deleted)",
            descriptor.title, outcome.rows_affected
        ));
        Ok(TransitionReport {
            plugin_id: id,
            title: descriptor.title.clone(),
            transition: Transition::Remove,
            from: descriptor.state,
            to: None,
            messages,
        })
    }

    /// Tell every other registered plugin that asked for it. Failures are logged.
    async fn notify(&self, action: Transition, descriptor: &PluginDescriptor, cancel: &CancellationToken) {
        let snapshot = self.registry.snapshot();
        for entry in snapshot.with_hook(Hook::PluginAction) {
            if entry.id() == descriptor.id() {
                continue;
            }
            let hook = entry.instance.on_plugin_action(action, descriptor);
            if let Err(e) = guarded(hook, Some(cancel), self.hook_timeout).await {
                log::warn!(
                    "Plugin '{}' failed handling {} of '{}': {}",
                    entry.descriptor.title,
                    action,
                    descriptor.title,
                    e
                );
            }
        }
    }
}
