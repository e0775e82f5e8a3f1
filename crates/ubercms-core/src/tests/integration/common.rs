#![cfg(test)]

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::dispatch::{DispatchError, RequestContext, RequestDispatcher};
use crate::plugin_system::cascade::{CascadeRule, HandlerInfoRule, RenderProvidersRule, RoutesRule, SettingsRule};
use crate::plugin_system::context::LifecycleContext;
use crate::plugin_system::descriptor::{PluginDescriptor, PluginId, Transition};
use crate::plugin_system::error::HookError;
use crate::plugin_system::handler_info::HandlerInfo;
use crate::plugin_system::loader::{PluginFactories, PluginLoader};
use crate::plugin_system::manager::{DefaultPluginManager, PluginManager};
use crate::plugin_system::traits::{HookResult, Plugin};
use crate::plugin_system::version::{ApiVersion, PluginVersion, VersionRange};
use crate::scheduler::CycleContext;
use crate::storage::memory::MemoryPluginStore;
use crate::storage::store::PluginStore;

// ===== MOCK PLUGINS =====

/// Shared record of hook calls, as `"<name>:<hook>"`.
pub type CallLog = Arc<Mutex<Vec<String>>>;

pub fn call_log() -> CallLog {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn calls(log: &CallLog) -> Vec<String> {
    log.lock().unwrap().clone()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestBehavior {
    Claim,
    Decline,
    Fail,
}

/// Configurable plugin used across the test suites.
#[derive(Clone)]
pub struct MockPlugin {
    name: String,
    log: CallLog,
    handlers: HandlerInfo,
    route: Option<String>,
    failing: HashSet<&'static str>,
    panicking: HashSet<&'static str>,
    delay: Option<Duration>,
    request: RequestBehavior,
    claims_not_found: bool,
    claims_errors: bool,
    api: &'static str,
    errors_seen: Arc<Mutex<Vec<String>>>,
    actions_seen: Arc<Mutex<Vec<(Transition, PluginId)>>>,
}

impl MockPlugin {
    pub fn new(name: &str, log: &CallLog) -> Self {
        Self {
            name: name.to_string(),
            log: log.clone(),
            handlers: HandlerInfo::default(),
            route: None,
            failing: HashSet::new(),
            panicking: HashSet::new(),
            delay: None,
            request: RequestBehavior::Decline,
            claims_not_found: false,
            claims_errors: false,
            api: ">=0.1.0",
            errors_seen: Arc::new(Mutex::new(Vec::new())),
            actions_seen: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Flags declared from `install` and `enable`.
    pub fn with_handlers(mut self, handlers: HandlerInfo) -> Self {
        self.handlers = handlers;
        self
    }

    /// Module claimed from `enable`.
    pub fn with_route(mut self, module: &str) -> Self {
        self.route = Some(module.to_string());
        self
    }

    pub fn failing(mut self, hook: &'static str) -> Self {
        self.failing.insert(hook);
        self
    }

    pub fn panicking(mut self, hook: &'static str) -> Self {
        self.panicking.insert(hook);
        self
    }

    /// Sleep inside lifecycle hooks and cycles.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn on_request(mut self, behavior: RequestBehavior) -> Self {
        self.request = behavior;
        self
    }

    pub fn claiming_not_found(mut self) -> Self {
        self.claims_not_found = true;
        self
    }

    pub fn claiming_errors(mut self) -> Self {
        self.claims_errors = true;
        self
    }

    pub fn with_api(mut self, api: &'static str) -> Self {
        self.api = api;
        self
    }

    /// Messages of every `DispatchError` this plugin was handed.
    pub fn errors_seen(&self) -> Vec<String> {
        self.errors_seen.lock().unwrap().clone()
    }

    pub fn actions_seen(&self) -> Vec<(Transition, PluginId)> {
        self.actions_seen.lock().unwrap().clone()
    }

    fn record(&self, hook: &'static str) -> Result<(), HookError> {
        self.log.lock().unwrap().push(format!("{}:{}", self.name, hook));
        if self.panicking.contains(hook) {
            panic!("{} {} exploded", self.name, hook);
        }
        if self.failing.contains(hook) {
            return Err(HookError::failed(format!("{} {} failed", self.name, hook)));
        }
        Ok(())
    }

    async fn pause(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl Plugin for MockPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn compatible_api_versions(&self) -> Vec<VersionRange> {
        vec![self.api.parse().unwrap()]
    }

    async fn install(&self, ctx: &mut LifecycleContext<'_>) -> HookResult {
        self.pause().await;
        self.record("install")?;
        *ctx.handlers_mut() = self.handlers;
        Ok(format!("{} installed", self.name))
    }

    async fn uninstall(&self, _ctx: &mut LifecycleContext<'_>) -> HookResult {
        self.pause().await;
        self.record("uninstall")?;
        Ok(String::new())
    }

    async fn enable(&self, ctx: &mut LifecycleContext<'_>) -> HookResult {
        self.pause().await;
        self.record("enable")?;
        *ctx.handlers_mut() = self.handlers;
        if let Some(module) = &self.route {
            ctx.claim_route(module);
        }
        Ok(String::new())
    }

    async fn disable(&self, _ctx: &mut LifecycleContext<'_>) -> HookResult {
        self.pause().await;
        self.record("disable")?;
        Ok(String::new())
    }

    async fn handle_request(&self, request: &mut RequestContext) -> Result<bool, HookError> {
        self.record("handle_request")?;
        match self.request {
            RequestBehavior::Claim => {
                request.response.body = format!("{} served {}", self.name, request.path());
                Ok(true)
            }
            RequestBehavior::Decline => Ok(false),
            RequestBehavior::Fail => Err(HookError::failed(format!("{} could not render", self.name))),
        }
    }

    async fn handle_page_not_found(&self, request: &mut RequestContext) -> Result<bool, HookError> {
        self.record("page_not_found")?;
        if self.claims_not_found {
            request.response.body = format!("{} not found page", self.name);
        }
        Ok(self.claims_not_found)
    }

    async fn handle_page_error(&self, request: &mut RequestContext, error: &DispatchError) -> Result<bool, HookError> {
        self.errors_seen.lock().unwrap().push(error.message());
        self.record("page_error")?;
        if self.claims_errors {
            request.response.body = format!("{} error page", self.name);
        }
        Ok(self.claims_errors)
    }

    async fn on_runtime_start(&self, _store: &dyn PluginStore) -> Result<bool, HookError> {
        self.record("runtime_start")?;
        Ok(true)
    }

    async fn on_runtime_stop(&self, _store: &dyn PluginStore) -> Result<(), HookError> {
        self.record("runtime_stop")
    }

    async fn on_request_start(&self, _request: &mut RequestContext) -> Result<(), HookError> {
        self.record("request_start")
    }

    async fn on_request_end(&self, _request: &mut RequestContext) -> Result<(), HookError> {
        self.record("request_end")
    }

    async fn on_cycle(&self, _ctx: &CycleContext) -> Result<(), HookError> {
        self.record("cycle")?;
        self.pause().await;
        Ok(())
    }

    async fn on_plugin_action(&self, action: Transition, subject: &PluginDescriptor) -> Result<(), HookError> {
        self.actions_seen.lock().unwrap().push((action, subject.id()));
        self.record("plugin_action")
    }
}

pub fn register_mock(factories: &mut PluginFactories, class_path: &str, plugin: MockPlugin) {
    factories.register(class_path, move |_args| Ok(Box::new(plugin.clone()) as Box<dyn Plugin>));
}

// ===== HARNESS =====

pub fn api() -> ApiVersion {
    ApiVersion::new(0, 1, 0)
}

pub fn descriptor(title: &str, class_path: &str, priority: i32) -> PluginDescriptor {
    PluginDescriptor::new(
        PluginId::new_v4(),
        title,
        PathBuf::from("plugins").join(title),
        class_path,
        PluginVersion::new(1, 0, 0),
        priority,
    )
}

/// Cascade rules that need no filesystem.
pub fn table_rules() -> Vec<Arc<dyn CascadeRule>> {
    vec![
        Arc::new(HandlerInfoRule),
        Arc::new(RoutesRule),
        Arc::new(RenderProvidersRule),
        Arc::new(SettingsRule),
    ]
}

/// A plugin manager on an in-memory store.
pub struct Harness {
    pub store: Arc<MemoryPluginStore>,
    pub manager: DefaultPluginManager,
    pub dispatcher: RequestDispatcher,
}

pub fn harness(factories: PluginFactories) -> Harness {
    harness_with(factories, table_rules(), Vec::new(), None)
}

pub fn harness_with(
    factories: PluginFactories,
    cascade: Vec<Arc<dyn CascadeRule>>,
    plugin_dirs: Vec<PathBuf>,
    hook_timeout: Option<Duration>,
) -> Harness {
    let store = Arc::new(MemoryPluginStore::new());
    let manager = DefaultPluginManager::new(
        store.clone(),
        PluginLoader::new(factories, api()),
        cascade,
        plugin_dirs,
        hook_timeout,
    );
    let dispatcher = RequestDispatcher::new(manager.registry().clone());
    Harness { store, manager, dispatcher }
}

impl Harness {
    /// Store a fresh `NotInstalled` descriptor.
    pub fn add(&self, title: &str, class_path: &str, priority: i32) -> PluginId {
        let descriptor = descriptor(title, class_path, priority);
        let id = descriptor.id();
        self.store.insert_descriptor(descriptor).unwrap();
        id
    }

    /// Store, install and enable a plugin.
    pub async fn add_enabled(&self, title: &str, class_path: &str, priority: i32) -> PluginId {
        let id = self.add(title, class_path, priority);
        self.manager.install(id).await.unwrap();
        self.manager.enable(id).await.unwrap();
        id
    }

    pub async fn get(&self, target: &str) -> (RequestContext, crate::dispatch::DispatchOutcome) {
        let mut request = RequestContext::get(target, "home");
        let outcome = self.dispatcher.dispatch(&mut request).await;
        (request, outcome)
    }
}

pub fn all_handlers() -> HandlerInfo {
    HandlerInfo {
        request_start: true,
        request_end: true,
        page_error: true,
        page_not_found: true,
        runtime_start: true,
        runtime_stop: true,
        plugin_action: true,
        cycle_interval_ms: 0,
    }
}

/// Write a `plugin.json` into `<root>/<dir_name>` and return that directory.
pub fn write_manifest(root: &Path, dir_name: &str, id: Uuid, title: &str, class_path: &str, api: &[&str]) -> PathBuf {
    let dir = root.join(dir_name);
    std::fs::create_dir_all(&dir).unwrap();
    let manifest = serde_json::json!({
        "id": id.to_string(),
        "title": title,
        "class_path": class_path,
        "version": "1.0.0",
        "priority": 0,
        "api_versions": api,
    });
    std::fs::write(dir.join("plugin.json"), serde_json::to_string_pretty(&manifest).unwrap()).unwrap();
    dir
}
