use std::any::TypeId;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::dispatch::{DispatchOutcome, RequestContext, RequestDispatcher};
use crate::kernel::component::{DependencyRegistry, KernelComponent};
use crate::kernel::constants;
use crate::kernel::error::{Error, KernelLifecyclePhase, Result};
use crate::plugin_system::cascade::default_rules;
use crate::plugin_system::error::PluginSystemError;
use crate::plugin_system::loader::{PluginFactories, PluginLoader};
use crate::plugin_system::manager::DefaultPluginManager;
use crate::plugin_system::version::ApiVersion;
use crate::scheduler::CycleScheduler;
use crate::storage::manager::DefaultStorageManager;

/// Wires the kernel components together and drives their lifecycle.
///
/// Components are initialized and started in registration order (storage,
/// plugin manager, cycle scheduler) and stopped in reverse.
pub struct Application {
    initialized: bool,
    started: bool,
    dependencies: Arc<Mutex<DependencyRegistry>>,
    component_init_order: Vec<TypeId>,
    storage: Arc<DefaultStorageManager>,
    plugin_manager: Arc<DefaultPluginManager>,
    scheduler: Arc<CycleScheduler>,
    dispatcher: RequestDispatcher,
}

impl Application {
    /// Open the data directory at `base_path` and build every component.
    pub fn new(base_path: impl Into<PathBuf>, factories: PluginFactories) -> Result<Self> {
        let storage = DefaultStorageManager::new(base_path.into())?;
        Self::with_storage(storage, factories)
    }

    /// Build on an already-opened storage manager.
    pub fn with_storage(storage: DefaultStorageManager, factories: PluginFactories) -> Result<Self> {
        log::info!("Initializing {} v{}", constants::APP_NAME, constants::APP_VERSION);
        let runtime = storage.runtime_config().clone();
        let api_version: ApiVersion = constants::API_VERSION.parse().map_err(PluginSystemError::from)?;

        let plugin_dirs = runtime
            .plugin_dirs
            .iter()
            .map(|dir| storage.base_path().join(dir))
            .collect();
        let loader = PluginLoader::new(factories, api_version);
        let cascade = default_rules(storage.provider().clone());
        let storage = Arc::new(storage);
        let plugin_manager = Arc::new(DefaultPluginManager::new(
            storage.store().clone(),
            loader,
            cascade,
            plugin_dirs,
            runtime.hook_timeout(),
        ));
        let scheduler = Arc::new(CycleScheduler::new(
            plugin_manager.registry().clone(),
            storage.store().clone(),
            runtime.cycle_tick(),
        ));
        let dispatcher = RequestDispatcher::new(plugin_manager.registry().clone());

        let mut registry = DependencyRegistry::new();
        let mut init_order = Vec::new();
        registry.register_instance(storage.clone());
        init_order.push(TypeId::of::<DefaultStorageManager>());
        registry.register_instance(plugin_manager.clone());
        init_order.push(TypeId::of::<DefaultPluginManager>());
        registry.register_instance(scheduler.clone());
        init_order.push(TypeId::of::<CycleScheduler>());

        log::info!("Using data directory: {}", storage.base_path().display());
        Ok(Application {
            initialized: false,
            started: false,
            dependencies: Arc::new(Mutex::new(registry)),
            component_init_order: init_order,
            storage,
            plugin_manager,
            scheduler,
            dispatcher,
        })
    }

    /// Look up a component by concrete type.
    pub async fn get_component<T: KernelComponent + 'static>(&self) -> Option<Arc<T>> {
        self.dependencies.lock().await.get_concrete::<T>()
    }

    async fn components(&self) -> Result<Vec<Arc<dyn KernelComponent>>> {
        let registry = self.dependencies.lock().await;
        self.component_init_order
            .iter()
            .map(|type_id| {
                registry.get_component_by_id(type_id).ok_or_else(|| Error::ComponentRegistryError {
                    operation: "lookup".to_string(),
                    component_name: None,
                    message: format!("no instance registered for {:?}", type_id),
                })
            })
            .collect()
    }

    /// Initialize every component in registration order.
    pub async fn initialize(&mut self) -> Result<()> {
        if self.initialized {
            return Err(Error::KernelLifecycleError {
                phase: KernelLifecyclePhase::Initialize,
                component_name: None,
                message: "Application already initialized".to_string(),
                source: None,
            });
        }
        for component in self.components().await? {
            log::debug!("Initializing component: {}", component.name());
            component.initialize().await.map_err(|e| Error::KernelLifecycleError {
                phase: KernelLifecyclePhase::Initialize,
                component_name: Some(component.name().to_string()),
                message: "Component failed to initialize".to_string(),
                source: Some(Box::new(e)),
            })?;
        }
        self.initialized = true;
        Ok(())
    }

    /// Start every component; initializes first if needed.
    pub async fn start(&mut self) -> Result<()> {
        if !self.initialized {
            self.initialize().await?;
        }
        if self.started {
            return Ok(());
        }
        for component in self.components().await? {
            log::debug!("Starting component: {}", component.name());
            component.start().await.map_err(|e| Error::KernelLifecycleError {
                phase: KernelLifecyclePhase::Start,
                component_name: Some(component.name().to_string()),
                message: "Component failed to start".to_string(),
                source: Some(Box::new(e)),
            })?;
        }
        self.started = true;
        log::info!("Application started");
        Ok(())
    }

    /// Stop components in reverse order. Every component is asked to stop;
    /// the first failure is returned.
    pub async fn shutdown(&mut self) -> Result<()> {
        if !self.started {
            return Ok(());
        }
        let mut first_error = None;
        for component in self.components().await?.into_iter().rev() {
            log::debug!("Stopping component: {}", component.name());
            if let Err(e) = component.stop().await {
                log::error!("Error stopping component {}: {}", component.name(), e);
                first_error.get_or_insert(Error::KernelLifecycleError {
                    phase: KernelLifecyclePhase::Shutdown,
                    component_name: Some(component.name().to_string()),
                    message: "Component failed to stop".to_string(),
                    source: Some(Box::new(e)),
                });
            }
        }
        self.started = false;
        log::info!("Application stopped");
        first_error.map_or(Ok(()), Err)
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn storage(&self) -> &Arc<DefaultStorageManager> {
        &self.storage
    }

    pub fn plugin_manager(&self) -> &Arc<DefaultPluginManager> {
        &self.plugin_manager
    }

    pub fn scheduler(&self) -> &Arc<CycleScheduler> {
        &self.scheduler
    }

    pub fn dispatcher(&self) -> &RequestDispatcher {
        &self.dispatcher
    }

    /// Dispatch a GET for `target`, resolving `/` to the configured default module.
    pub async fn dispatch(&self, target: &str) -> (RequestContext, DispatchOutcome) {
        let mut request = RequestContext::get(target, &self.storage.runtime_config().default_module);
        let outcome = self.dispatcher.dispatch(&mut request).await;
        (request, outcome)
    }
}

impl std::fmt::Debug for Application {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Application")
            .field("initialized", &self.initialized)
            .field("started", &self.started)
            .field("storage", &self.storage)
            .field("plugin_manager", &self.plugin_manager)
            .finish_non_exhaustive()
    }
}
