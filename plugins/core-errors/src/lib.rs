//! Fallback pages for requests no other plugin could serve.
//!
//! Installed at a low priority so that any site plugin declaring its own
//! not-found or error handler is asked first.
//!
//! Error pages stay generic unless the plugin's `show_details` setting is
//! true. The setting is read when the plugin is enabled and at runtime start.
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use log::{debug, warn};
use ubercms_core::dispatch::{DispatchError, RequestContext};
use ubercms_core::plugin_system::error::HookError;
use ubercms_core::plugin_system::loader::PluginFactories;
use ubercms_core::plugin_system::traits::{HookResult, Plugin};
use ubercms_core::plugin_system::version::VersionRange;
use ubercms_core::plugin_system::LifecycleContext;
use ubercms_core::plugin_system::descriptor::PluginId;
use ubercms_core::storage::{PersistenceError, PluginStore};

pub const CLASS_PATH: &str = "ubercms.core_errors";
const COMPATIBLE_API_REQ: &str = "^0.1";
const SHOW_DETAILS: &str = "show_details";

#[derive(Debug)]
pub struct ErrorPagesPlugin {
    id: PluginId,
    show_details: AtomicBool,
}

impl ErrorPagesPlugin {
    pub fn new(id: PluginId) -> Self {
        Self {
            id,
            show_details: AtomicBool::new(false),
        }
    }

    fn load_settings(&self, store: &dyn PluginStore) -> Result<bool, PersistenceError> {
        let show = store
            .setting(self.id, SHOW_DETAILS)?
            .and_then(|value| value.as_bool())
            .unwrap_or(false);
        self.show_details.store(show, Ordering::SeqCst);
        Ok(show)
    }
}

/// Make the plugin constructible from its stored descriptor.
pub fn register(factories: &mut PluginFactories) {
    factories.register(CLASS_PATH, |args| Ok(Box::new(ErrorPagesPlugin::new(args.id)) as Box<dyn Plugin>));
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            c => escaped.push(c),
        }
    }
    escaped
}

fn page(title: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html><head><title>{title}</title></head>\n<body><h1>{title}</h1>\n{body}\n</body></html>\n"
    )
}

#[async_trait]
impl Plugin for ErrorPagesPlugin {
    fn name(&self) -> &str {
        "core-errors"
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
        handlers.page_not_found = true;
        handlers.page_error = true;
        handlers.runtime_start = true;
        ctx.put_setting(SHOW_DETAILS, false)?;
        Ok("Fallback error pages installed".to_string())
    }

    async fn enable(&self, ctx: &mut LifecycleContext<'_>) -> HookResult {
        let show = self.load_settings(ctx.store()).map_err(HookError::from_error)?;
        Ok(format!("Error details {}", if show { "shown" } else { "hidden" }))
    }

    async fn on_runtime_start(&self, store: &dyn PluginStore) -> Result<bool, HookError> {
        self.load_settings(store).map_err(HookError::from_error)?;
        Ok(true)
    }

    async fn handle_page_not_found(&self, request: &mut RequestContext) -> Result<bool, HookError> {
        debug!("Serving not-found page for {}", request.path());
        let body = format!(
            "<p>No page exists at <code>{}</code>.</p>",
            escape_html(request.path())
        );
        request.response.set(404, "text/html; charset=utf-8", page("Page Not Found", &body));
        Ok(true)
    }

    async fn handle_page_error(&self, request: &mut RequestContext, error: &DispatchError) -> Result<bool, HookError> {
        warn!("Serving error page for {}: {}", request.path(), error);
        let mut body = format!(
            "<p>The page at <code>{}</code> could not be rendered.</p>",
            escape_html(request.path())
        );
        if self.show_details.load(Ordering::SeqCst) {
            body.push_str(&format!("\n<pre>{}</pre>", escape_html(&error.message())));
        }
        request.response.set(500, "text/html; charset=utf-8", page("Server Error", &body));
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::Arc;

    use ubercms_core::dispatch::{DispatchStatus, RequestDispatcher};
    use ubercms_core::plugin_system::descriptor::{PluginDescriptor, PluginId};
    use ubercms_core::plugin_system::loader::PluginLoader;
    use ubercms_core::plugin_system::manager::{DefaultPluginManager, PluginManager};
    use ubercms_core::plugin_system::manifest::PluginManifest;
    use ubercms_core::plugin_system::version::{ApiVersion, PluginVersion};
    use ubercms_core::storage::{Change, MemoryPluginStore};
    use ubercms_core::plugin_system::resources::Setting;

    /// Claims `/broken` and always fails to render it.
    struct Broken;

    #[async_trait]
    impl Plugin for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        fn compatible_api_versions(&self) -> Vec<VersionRange> {
            vec![VersionRange::from_constraint(COMPATIBLE_API_REQ).unwrap()]
        }

        async fn enable(&self, ctx: &mut LifecycleContext<'_>) -> HookResult {
            ctx.claim_route("broken");
            Ok(String::new())
        }

        async fn handle_request(&self, _request: &mut RequestContext) -> Result<bool, HookError> {
            Err(HookError::failed("template <missing>"))
        }
    }

    struct Site {
        store: Arc<MemoryPluginStore>,
        manager: DefaultPluginManager,
        errors_id: PluginId,
    }

    fn manifest() -> PluginManifest {
        PluginManifest::from_json(include_str!("../plugin.json"), Path::new("plugin.json")).unwrap()
    }

    async fn site() -> Site {
        let store = Arc::new(MemoryPluginStore::new());
        let mut factories = PluginFactories::new();
        register(&mut factories);
        factories.register("test.broken", |_args| Ok(Box::new(Broken) as Box<dyn Plugin>));
        let manager = DefaultPluginManager::new(
            store.clone(),
            PluginLoader::new(factories, ApiVersion::new(0, 1, 0)),
            Vec::new(),
            Vec::new(),
            None,
        );
        let manifest = manifest();
        store.insert_descriptor(manifest.to_descriptor()).unwrap();
        manager.install(manifest.id).await.unwrap();
        manager.enable(manifest.id).await.unwrap();
        Site { store, manager, errors_id: manifest.id }
    }

    #[test]
    fn test_manifest_matches_factory() {
        let manifest = manifest();
        assert_eq!(manifest.class_path, CLASS_PATH);
        assert!(manifest.priority < 0);
        assert!(manifest.supports_api(&ApiVersion::new(0, 1, 0)));
    }

    #[tokio::test]
    async fn test_install_declares_fallback_handlers() {
        let site = site().await;
        let handlers = site.store.handler_info(site.errors_id).unwrap().unwrap();
        assert!(handlers.page_not_found && handlers.page_error);
        assert!(!handlers.request_start);
        assert_eq!(
            site.store.setting(site.errors_id, SHOW_DETAILS).unwrap(),
            Some(serde_json::json!(false))
        );
    }

    #[tokio::test]
    async fn test_unrouted_request_gets_escaped_not_found_page() {
        let site = site().await;
        let dispatcher = RequestDispatcher::new(site.manager.registry().clone());
        let mut request = RequestContext::get("/<script>", "home");
        let outcome = dispatcher.dispatch(&mut request).await;

        assert_eq!(outcome.status, DispatchStatus::NotFoundHandled(site.errors_id));
        assert_eq!(request.response.status, 404);
        assert!(request.response.body.contains("&lt;script&gt;"));
        assert!(!request.response.body.contains("<script>"));
    }

    async fn break_site(site: &Site) -> String {
        let broken = PluginDescriptor::new(
            PluginId::new_v4(),
            "Broken",
            "plugins/broken",
            "test.broken",
            PluginVersion::new(1, 0, 0),
            0,
        );
        let broken_id = broken.id();
        site.store.insert_descriptor(broken).unwrap();
        site.manager.install(broken_id).await.unwrap();
        site.manager.enable(broken_id).await.unwrap();

        let dispatcher = RequestDispatcher::new(site.manager.registry().clone());
        let mut request = RequestContext::get("/broken", "home");
        let outcome = dispatcher.dispatch(&mut request).await;

        assert_eq!(outcome.status, DispatchStatus::ErrorHandled(site.errors_id));
        assert_eq!(request.response.status, 500);
        request.response.body
    }

    #[tokio::test]
    async fn test_handler_failure_renders_generic_error_page() {
        let site = site().await;
        let body = break_site(&site).await;
        assert!(body.contains("Server Error"));
        assert!(!body.contains("missing"));
    }

    #[tokio::test]
    async fn test_error_details_shown_when_enabled() {
        let site = site().await;
        site.store
            .commit(
                vec![Change::PutSetting(Setting {
                    owner: site.errors_id,
                    key: SHOW_DETAILS.to_string(),
                    value: serde_json::json!(true),
                })]
                .into(),
            )
            .unwrap();
        site.manager.disable(site.errors_id).await.unwrap();
        site.manager.enable(site.errors_id).await.unwrap();

        let body = break_site(&site).await;
        assert!(body.contains("template &lt;missing&gt;"));
    }
}
