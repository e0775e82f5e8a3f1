#![cfg(test)]

use std::path::Path;

use tempfile::tempdir;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::common::{MockPlugin, RequestBehavior, call_log, calls, register_mock, write_manifest};
use crate::dispatch::DispatchStatus;
use crate::kernel::Application;
use crate::plugin_system::descriptor::{PluginId, PluginState};
use crate::plugin_system::loader::PluginFactories;
use crate::plugin_system::manager::PluginManager;

fn blog_factories(log: &super::common::CallLog) -> PluginFactories {
    let mut factories = PluginFactories::new();
    register_mock(
        &mut factories,
        "test.blog",
        MockPlugin::new("blog", log).with_route("blog").on_request(RequestBehavior::Claim),
    );
    factories
}

async fn add_blog(app: &Application, root: &Path) -> PluginId {
    let uuid = Uuid::new_v4();
    write_manifest(&root.join("plugins"), "blog", uuid, "Blog", "test.blog", &[">=0.1.0"]);
    let report = app.plugin_manager().reload_plugins(&CancellationToken::new()).await.unwrap();
    let id = PluginId::from_uuid(uuid);
    assert_eq!(report.added, vec![id]);
    id
}

#[tokio::test]
async fn test_enabled_plugin_survives_restart() {
    let temp = tempdir().unwrap();
    let log = call_log();

    let mut app = Application::new(temp.path(), blog_factories(&log)).unwrap();
    app.start().await.unwrap();
    let id = add_blog(&app, temp.path()).await;
    app.plugin_manager().install(id).await.unwrap();
    app.plugin_manager().enable(id).await.unwrap();

    let (request, outcome) = app.dispatch("/blog/2024").await;
    assert_eq!(outcome.status, DispatchStatus::Handled(id));
    assert_eq!(request.response.body, "blog served /blog/2024");
    app.shutdown().await.unwrap();
    drop(app);

    let mut app = Application::new(temp.path(), blog_factories(&log)).unwrap();
    app.start().await.unwrap();
    let stored = app.plugin_manager().descriptors().await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].state, PluginState::Enabled);

    let (request, outcome) = app.dispatch("/Blog").await;
    assert_eq!(outcome.status, DispatchStatus::Handled(id));
    assert_eq!(request.response.body, "blog served /Blog");
    app.shutdown().await.unwrap();

    // enable ran once; the restart rebuilt from storage
    assert_eq!(calls(&log).iter().filter(|c| *c == "blog:enable").count(), 1);
}

#[tokio::test]
async fn test_full_lifecycle_removes_plugin_data() {
    let temp = tempdir().unwrap();
    let log = call_log();
    let mut app = Application::new(temp.path(), blog_factories(&log)).unwrap();
    app.start().await.unwrap();
    let id = add_blog(&app, temp.path()).await;

    let manager = app.plugin_manager().clone();
    manager.install(id).await.unwrap();
    manager.enable(id).await.unwrap();
    let data_dir = temp.path().join("data/plugins").join(id.to_string());
    std::fs::create_dir_all(&data_dir).unwrap();
    std::fs::write(data_dir.join("cache.txt"), "cached").unwrap();

    manager.disable(id).await.unwrap();
    let (_, outcome) = app.dispatch("/blog").await;
    assert_eq!(outcome.status, DispatchStatus::GenericNotFound);

    manager.uninstall(id).await.unwrap();
    assert!(app.storage().store().routes().unwrap().is_empty());
    let report = manager.remove(id).await.unwrap();
    assert_eq!(report.to, None);

    assert!(!data_dir.exists());
    assert!(manager.descriptors().await.unwrap().is_empty());
    assert_eq!(
        calls(&log),
        vec!["blog:install", "blog:enable", "blog:disable", "blog:uninstall"]
    );
    app.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_runtime_config_shapes_store_and_routing() {
    let temp = tempdir().unwrap();
    std::fs::create_dir_all(temp.path().join("config")).unwrap();
    std::fs::write(
        temp.path().join("config/runtime.json"),
        r#"{"default_module": "blog", "store_file": "state/tables.json"}"#,
    )
    .unwrap();

    let log = call_log();
    let mut app = Application::new(temp.path(), blog_factories(&log)).unwrap();
    app.start().await.unwrap();
    let id = add_blog(&app, temp.path()).await;
    app.plugin_manager().install(id).await.unwrap();
    app.plugin_manager().enable(id).await.unwrap();

    assert!(temp.path().join("state/tables.json").is_file());
    let (request, outcome) = app.dispatch("/").await;
    assert_eq!(outcome.status, DispatchStatus::Handled(id));
    assert_eq!(request.module(), "blog");
    app.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_install_with_unknown_class_path_fails() {
    let temp = tempdir().unwrap();
    let mut app = Application::new(temp.path(), PluginFactories::new()).unwrap();
    app.start().await.unwrap();
    let uuid = Uuid::new_v4();
    write_manifest(&temp.path().join("plugins"), "ghost", uuid, "Ghost", "test.ghost", &[]);
    app.plugin_manager().reload_plugins(&CancellationToken::new()).await.unwrap();

    let id = PluginId::from_uuid(uuid);
    assert!(app.plugin_manager().install(id).await.is_err());
    let stored = app.storage().store().load_descriptor(id).unwrap();
    assert_eq!(stored.state, PluginState::NotInstalled);
    app.shutdown().await.unwrap();
}
