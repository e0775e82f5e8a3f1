//! Access log and traffic summary.
//!
//! `on_request_start` stamps the request with a start time, `on_request_end`
//! logs method, path, status and latency. The cycle hook logs how many
//! requests were served since the previous cycle when the `summary`
//! setting is on.
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use async_trait::async_trait;
use log::{debug, info};
use ubercms_core::dispatch::RequestContext;
use ubercms_core::plugin_system::error::HookError;
use ubercms_core::plugin_system::loader::PluginFactories;
use ubercms_core::plugin_system::traits::{HookResult, Plugin};
use ubercms_core::plugin_system::version::VersionRange;
use ubercms_core::plugin_system::LifecycleContext;
use ubercms_core::scheduler::CycleContext;
use ubercms_core::storage::PluginStore;

pub const CLASS_PATH: &str = "ubercms.request_log";
const COMPATIBLE_API_REQ: &str = "^0.1";
pub const SUMMARY_INTERVAL_MS: u64 = 60_000;
pub const SUMMARY_SETTING: &str = "summary";
const STARTED_ITEM: &str = "request_log.started_us";

/// Counters since the last summary.
#[derive(Debug, Default)]
pub struct Traffic {
    pub requests: AtomicU64,
    pub client_errors: AtomicU64,
    pub server_errors: AtomicU64,
}

impl Traffic {
    fn record(&self, status: u16) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        match status {
            400..=499 => self.client_errors.fetch_add(1, Ordering::Relaxed),
            500..=599 => self.server_errors.fetch_add(1, Ordering::Relaxed),
            _ => 0,
        };
    }

    /// Read and reset every counter.
    fn take(&self) -> (u64, u64, u64) {
        (
            self.requests.swap(0, Ordering::Relaxed),
            self.client_errors.swap(0, Ordering::Relaxed),
            self.server_errors.swap(0, Ordering::Relaxed),
        )
    }
}

#[derive(Debug)]
pub struct RequestLogPlugin {
    epoch: Instant,
    traffic: Traffic,
}

impl Default for RequestLogPlugin {
    fn default() -> Self {
        Self {
            epoch: Instant::now(),
            traffic: Traffic::default(),
        }
    }
}

impl RequestLogPlugin {
    pub fn traffic(&self) -> &Traffic {
        &self.traffic
    }

    fn now_us(&self) -> u64 {
        self.epoch.elapsed().as_micros() as u64
    }
}

pub fn register(factories: &mut PluginFactories) {
    factories.register(CLASS_PATH, |_args| Ok(Box::new(RequestLogPlugin::default()) as Box<dyn Plugin>));
}

#[async_trait]
impl Plugin for RequestLogPlugin {
    fn name(&self) -> &str {
        "request-log"
    }

    fn compatible_api_versions(&self) -> Vec<VersionRange> {
        match VersionRange::from_constraint(COMPATIBLE_API_REQ) {
            Ok(range) => vec![range],
            Err(e) => {
                log::error!("Failed to parse API requirement '{}': {}", COMPATIBLE_API_REQ, e);
                vec![]
            }
        }
    }

    async fn install(&self, ctx: &mut LifecycleContext<'_>) -> HookResult {
        let handlers = ctx.handlers_mut();
        handlers.request_start = true;
        handlers.request_end = true;
        handlers.runtime_stop = true;
        handlers.cycle_interval_ms = SUMMARY_INTERVAL_MS;
        ctx.put_setting(SUMMARY_SETTING, true)?;
        Ok("Request logging installed".to_string())
    }

    async fn on_request_start(&self, request: &mut RequestContext) -> Result<(), HookError> {
        request
            .items
            .insert(STARTED_ITEM.to_string(), serde_json::json!(self.now_us()));
        Ok(())
    }

    async fn on_request_end(&self, request: &mut RequestContext) -> Result<(), HookError> {
        let elapsed_us = request
            .items
            .get(STARTED_ITEM)
            .and_then(|v| v.as_u64())
            .map(|started| self.now_us().saturating_sub(started));
        self.traffic.record(request.response.status);
        match elapsed_us {
            Some(us) => info!(
                "{} {} -> {} ({}us)",
                request.method,
                request.path(),
                request.response.status,
                us
            ),
            None => info!("{} {} -> {}", request.method, request.path(), request.response.status),
        }
        Ok(())
    }

    async fn on_cycle(&self, ctx: &CycleContext) -> Result<(), HookError> {
        let enabled = ctx
            .store
            .setting(ctx.plugin_id, SUMMARY_SETTING)
            .map_err(HookError::from_error)?
            .and_then(|v| v.as_bool())
            .unwrap_or(true);
        let (requests, client_errors, server_errors) = self.traffic.take();
        if enabled {
            info!(
                "Traffic summary: {} requests, {} client errors, {} server errors",
                requests, client_errors, server_errors
            );
        } else {
            debug!("Traffic summary disabled; discarded {} request counts", requests);
        }
        Ok(())
    }

    async fn on_runtime_stop(&self, _store: &dyn PluginStore) -> Result<(), HookError> {
        let requests = self.traffic.requests.load(Ordering::Relaxed);
        info!("Request log stopping; {} requests since the last summary", requests);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::Arc;
    use std::time::Duration;

    use tokio_util::sync::CancellationToken;
    use ubercms_core::plugin_system::manifest::PluginManifest;
    use ubercms_core::plugin_system::resources::Setting;
    use ubercms_core::plugin_system::version::ApiVersion;
    use ubercms_core::plugin_system::loader::PluginLoader;
    use ubercms_core::plugin_system::manager::{DefaultPluginManager, PluginManager};
    use ubercms_core::storage::{Change, MemoryPluginStore};

    fn manifest() -> PluginManifest {
        PluginManifest::from_json(include_str!("../plugin.json"), Path::new("plugin.json")).unwrap()
    }

    fn cycle_context(store: Arc<MemoryPluginStore>) -> CycleContext {
        CycleContext {
            plugin_id: manifest().id,
            store,
            cancel: CancellationToken::new(),
            due: std::time::Instant::now(),
        }
    }

    #[test]
    fn test_manifest_matches_factory() {
        let manifest = manifest();
        assert_eq!(manifest.class_path, CLASS_PATH);
        assert!(manifest.supports_api(&ApiVersion::new(0, 1, 0)));
    }

    #[tokio::test]
    async fn test_request_end_counts_status_classes() {
        let plugin = RequestLogPlugin::default();
        for (target, status) in [("/a", 200), ("/b", 404), ("/c", 500)] {
            let mut request = RequestContext::get(target, "home");
            plugin.on_request_start(&mut request).await.unwrap();
            assert!(request.items.contains_key(STARTED_ITEM));
            request.response.status = status;
            plugin.on_request_end(&mut request).await.unwrap();
        }
        let traffic = plugin.traffic();
        assert_eq!(traffic.requests.load(Ordering::Relaxed), 3);
        assert_eq!(traffic.client_errors.load(Ordering::Relaxed), 1);
        assert_eq!(traffic.server_errors.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_cycle_resets_counters() {
        let store = Arc::new(MemoryPluginStore::new());
        let plugin = RequestLogPlugin::default();
        let mut request = RequestContext::get("/", "home");
        plugin.on_request_end(&mut request).await.unwrap();

        plugin.on_cycle(&cycle_context(store)).await.unwrap();
        assert_eq!(plugin.traffic().requests.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_cycle_honours_disabled_summary() {
        let store = Arc::new(MemoryPluginStore::new());
        store.insert_descriptor(manifest().to_descriptor()).unwrap();
        store
            .commit(
                vec![Change::PutSetting(Setting {
                    owner: manifest().id,
                    key: SUMMARY_SETTING.to_string(),
                    value: serde_json::json!(false),
                })]
                .into(),
            )
            .unwrap();
        let plugin = RequestLogPlugin::default();
        plugin.traffic().record(200);
        plugin.on_cycle(&cycle_context(store)).await.unwrap();
        assert_eq!(plugin.traffic().requests.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_install_schedules_summary_cycle() {
        let store = Arc::new(MemoryPluginStore::new());
        let mut factories = PluginFactories::new();
        register(&mut factories);
        let manager = DefaultPluginManager::new(
            store.clone(),
            PluginLoader::new(factories, ApiVersion::new(0, 1, 0)),
            Vec::new(),
            Vec::new(),
            None,
        );
        let id = manifest().id;
        store.insert_descriptor(manifest().to_descriptor()).unwrap();
        manager.install(id).await.unwrap();

        let handlers = store.handler_info(id).unwrap().unwrap();
        assert!(handlers.request_start && handlers.request_end);
        assert_eq!(handlers.cycle_interval(), Some(Duration::from_secs(60)));
        assert_eq!(store.setting(id, SUMMARY_SETTING).unwrap(), Some(serde_json::json!(true)));
    }
}
