use std::fmt::Debug;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::kernel::component::KernelComponent;
use crate::kernel::error::{Error, Result};
use crate::plugin_system::cascade::CascadeRule;
use crate::plugin_system::descriptor::{PluginDescriptor, PluginId, Transition};
use crate::plugin_system::error::PluginSystemError;
use crate::plugin_system::handler_info::Hook;
use crate::plugin_system::invoke::guarded;
use crate::plugin_system::lifecycle::{LifecycleController, TransitionReport};
use crate::plugin_system::loader::PluginLoader;
use crate::plugin_system::maintenance::MaintenanceGate;
use crate::plugin_system::reconcile::{ReloadReport, reconcile};
use crate::plugin_system::registry::{PluginRegistry, RebuildReport};
use crate::storage::store::PluginStore;

/// Administrative surface of the plugin runtime.
#[async_trait]
pub trait PluginManager: KernelComponent {
    /// Register the plugin in `dir` (which holds a `plugin.json`) as `NotInstalled`.
    async fn add_plugin_directory(&self, dir: &Path) -> Result<PluginDescriptor>;

    /// Run one lifecycle verb.
    async fn transition(
        &self,
        id: PluginId,
        transition: Transition,
        cancel: &CancellationToken,
    ) -> Result<TransitionReport>;

    async fn rebuild_handler_cache(&self, cancel: &CancellationToken) -> Result<RebuildReport>;

    /// Reconcile the configured plugin directories with the stored descriptors.
    async fn reload_plugins(&self, cancel: &CancellationToken) -> Result<ReloadReport>;

    /// Every stored descriptor, in creation order.
    async fn descriptors(&self) -> Result<Vec<PluginDescriptor>>;

    async fn install(&self, id: PluginId) -> Result<TransitionReport> {
        self.transition(id, Transition::Install, &CancellationToken::new()).await
    }

    async fn enable(&self, id: PluginId) -> Result<TransitionReport> {
        self.transition(id, Transition::Enable, &CancellationToken::new()).await
    }

    async fn disable(&self, id: PluginId) -> Result<TransitionReport> {
        self.transition(id, Transition::Disable, &CancellationToken::new()).await
    }

    async fn uninstall(&self, id: PluginId) -> Result<TransitionReport> {
        self.transition(id, Transition::Uninstall, &CancellationToken::new()).await
    }

    async fn remove(&self, id: PluginId) -> Result<TransitionReport> {
        self.transition(id, Transition::Remove, &CancellationToken::new()).await
    }
}

/// Default implementation of plugin manager
pub struct DefaultPluginManager {
    name: &'static str,
    store: Arc<dyn PluginStore>,
    registry: Arc<PluginRegistry>,
    loader: Arc<PluginLoader>,
    gate: Arc<MaintenanceGate>,
    lifecycle: LifecycleController,
    plugin_dirs: Vec<PathBuf>,
    hook_timeout: Option<Duration>,
    /// Cancelled on `stop`; every transition and rebuild races against a child.
    shutdown: CancellationToken,
}

impl DefaultPluginManager {
    pub fn new(
        store: Arc<dyn PluginStore>,
        loader: PluginLoader,
        cascade: Vec<Arc<dyn CascadeRule>>,
        plugin_dirs: Vec<PathBuf>,
        hook_timeout: Option<Duration>,
    ) -> Self {
        let registry = Arc::new(PluginRegistry::new());
        let loader = Arc::new(loader);
        let gate = Arc::new(MaintenanceGate::new());
        let lifecycle = LifecycleController::new(
            store.clone(),
            registry.clone(),
            loader.clone(),
            gate.clone(),
            cascade,
            hook_timeout,
        );
        Self {
            name: "DefaultPluginManager",
            store,
            registry,
            loader,
            gate,
            lifecycle,
            plugin_dirs,
            hook_timeout,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn PluginStore> {
        &self.store
    }

    pub fn loader(&self) -> &Arc<PluginLoader> {
        &self.loader
    }

    pub fn gate(&self) -> &Arc<MaintenanceGate> {
        &self.gate
    }

    pub fn lifecycle(&self) -> &LifecycleController {
        &self.lifecycle
    }

    pub fn plugin_dirs(&self) -> &[PathBuf] {
        &self.plugin_dirs
    }

    /// Token cancelled when the manager stops.
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Fires when either the caller's token or the manager's shutdown fires.
    fn linked(&self, cancel: &CancellationToken) -> CancellationToken {
        let linked = self.shutdown.child_token();
        if cancel.is_cancelled() {
            linked.cancel();
            return linked;
        }
        let caller = cancel.clone();
        let forward = linked.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = caller.cancelled() => forward.cancel(),
                _ = forward.cancelled() => {}
            }
        });
        linked
    }

    async fn run_runtime_start(&self) {
        let snapshot = self.registry.snapshot();
        for entry in snapshot.with_hook(Hook::RuntimeStart) {
            let hook = entry.instance.on_runtime_start(self.store.as_ref());
            match guarded(hook, Some(&self.shutdown), self.hook_timeout).await {
                Ok(true) => log::debug!("Plugin '{}' started", entry.descriptor.title),
                Ok(false) => log::warn!("Plugin '{}' reported it could not start", entry.descriptor.title),
                Err(e) => log::error!("Plugin '{}' runtime start hook failed: {}", entry.descriptor.title, e),
            }
        }
    }

    async fn run_runtime_stop(&self) {
        let snapshot = self.registry.snapshot();
        for entry in snapshot.with_hook(Hook::RuntimeStop) {
            let hook = entry.instance.on_runtime_stop(self.store.as_ref());
            // Shutdown is already cancelled here; only the timeout bounds the hook.
            if let Err(e) = guarded(hook, None, self.hook_timeout).await {
                log::error!("Plugin '{}' runtime stop hook failed: {}", entry.descriptor.title, e);
            }
        }
    }
}

impl Debug for DefaultPluginManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DefaultPluginManager")
            .field("name", &self.name)
            .field("registry", &self.registry)
            .field("plugin_dirs", &self.plugin_dirs)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl KernelComponent for DefaultPluginManager {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn initialize(&self) -> Result<()> {
        let report = self.registry.rebuild_handler_cache(
            self.store.as_ref(),
            self.loader.as_ref(),
            &self.shutdown,
        )?;
        for skipped in &report.skipped {
            log::warn!("Plugin '{}' not loaded: {}", skipped.title, skipped.reason);
        }
        Ok(())
    }

    async fn start(&self) -> Result<()> {
        self.run_runtime_start().await;
        log::info!("Plugin runtime started with {} plugins", self.registry.snapshot().len());
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.shutdown.cancel();
        self.run_runtime_stop().await;
        log::info!("Plugin runtime stopped");
        Ok(())
    }
}

#[async_trait]
impl PluginManager for DefaultPluginManager {
    async fn add_plugin_directory(&self, dir: &Path) -> Result<PluginDescriptor> {
        self.gate.ensure_writable()?;
        let manifest = self.loader.load_plugin_directory(dir).await?;
        if !manifest.supports_api(self.loader.api_version()) {
            return Err(PluginSystemError::ManifestError {
                path: dir.to_path_buf(),
                message: format!("plugin does not support runtime API {}", self.loader.api_version()),
                source: None,
            }
            .into());
        }
        let descriptor = manifest.to_descriptor();
        self.store
            .insert_descriptor(descriptor.clone())
            .map_err(PluginSystemError::from)?;
        log::info!("Added plugin '{}' ({}) from {}", descriptor.title, descriptor.id(), dir.display());
        Ok(descriptor)
    }

    async fn transition(
        &self,
        id: PluginId,
        transition: Transition,
        cancel: &CancellationToken,
    ) -> Result<TransitionReport> {
        let linked = self.linked(cancel);
        let result = self.lifecycle.run(id, transition, &linked).await;
        linked.cancel();
        Ok(result?)
    }

    async fn rebuild_handler_cache(&self, cancel: &CancellationToken) -> Result<RebuildReport> {
        let _pass = self.gate.enter().await?;
        let linked = self.linked(cancel);
        let result = self
            .registry
            .rebuild_handler_cache(self.store.as_ref(), self.loader.as_ref(), &linked);
        linked.cancel();
        Ok(result?)
    }

    async fn reload_plugins(&self, cancel: &CancellationToken) -> Result<ReloadReport> {
        let _maintenance = self.gate.begin("reload_plugins").await?;
        let linked = self.linked(cancel);

        let result: Result<ReloadReport> = async {
            let manifests = self.loader.scan_for_manifests(&self.plugin_dirs).await?;
            if linked.is_cancelled() {
                return Err(Error::from(PluginSystemError::Cancelled {
                    operation: "reload_plugins".to_string(),
                }));
            }
            let mut report = reconcile(
                self.store.as_ref(),
                &manifests,
                self.loader.api_version(),
                self.lifecycle.cascade(),
                &linked,
            )
            .await?;
            report.rebuild = self.registry.rebuild_handler_cache(
                self.store.as_ref(),
                self.loader.as_ref(),
                &linked,
            )?;
            Ok(report)
        }
        .await;

        linked.cancel();
        result
    }

    async fn descriptors(&self) -> Result<Vec<PluginDescriptor>> {
        Ok(self.store.descriptors()?)
    }
}
