use std::path::PathBuf;
use std::sync::Arc;

use tempfile::{TempDir, tempdir};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::plugin_system::cascade::default_rules;
use crate::plugin_system::descriptor::{PluginId, PluginState};
use crate::plugin_system::loader::PluginFactories;
use crate::plugin_system::manager::PluginManager;
use crate::plugin_system::resources::{RenderProvider, Setting};
use crate::storage::local::LocalStorageProvider;
use crate::storage::store::{Change, PluginStore};
use crate::tests::integration::common::{
    Harness, MockPlugin, call_log, harness_with, register_mock, table_rules, write_manifest,
};

fn setup() -> (TempDir, PathBuf, Harness) {
    let temp = tempdir().unwrap();
    let root = temp.path().join("plugins");
    std::fs::create_dir_all(&root).unwrap();
    let mut factories = PluginFactories::new();
    register_mock(&mut factories, "demo::Blog", MockPlugin::new("blog", &call_log()));
    let h = harness_with(factories, table_rules(), vec![root.clone()], None);
    (temp, root, h)
}

fn pid(uuid: Uuid) -> PluginId {
    PluginId::from_uuid(uuid)
}

#[tokio::test]
async fn test_reload_adds_new_manifests_as_not_installed() {
    let (_temp, root, h) = setup();
    let blog = Uuid::new_v4();
    let news = Uuid::new_v4();
    write_manifest(&root, "blog", blog, "Blog", "demo::Blog", &["^0.1"]);
    write_manifest(&root, "news", news, "News", "demo::Blog", &[]);

    let report = h.manager.reload_plugins(&CancellationToken::new()).await.unwrap();
    assert_eq!(report.added, vec![pid(blog), pid(news)]);
    assert!(report.updated.is_empty() && report.purged.is_empty() && report.ignored.is_empty());
    assert!(report.rebuild.loaded.is_empty());

    let descriptors = h.manager.descriptors().await.unwrap();
    assert_eq!(descriptors.len(), 2);
    assert!(descriptors.iter().all(|d| d.state == PluginState::NotInstalled && !d.stale));
    assert!(!h.manager.gate().is_read_only());
}

#[tokio::test]
async fn test_reload_purges_only_uninstalled_plugins_that_vanished() {
    let (_temp, root, h) = setup();
    let kept = Uuid::new_v4();
    let gone = Uuid::new_v4();
    let kept_dir = write_manifest(&root, "kept", kept, "Kept", "demo::Blog", &[]);
    let gone_dir = write_manifest(&root, "gone", gone, "Gone", "demo::Blog", &[]);
    h.manager.reload_plugins(&CancellationToken::new()).await.unwrap();
    h.manager.install(pid(kept)).await.unwrap();

    std::fs::remove_dir_all(kept_dir).unwrap();
    std::fs::remove_dir_all(gone_dir).unwrap();
    let report = h.manager.reload_plugins(&CancellationToken::new()).await.unwrap();

    assert_eq!(report.purged, vec![pid(gone)]);
    assert!(h.store.load_descriptor(pid(gone)).is_err());
    let kept = h.store.load_descriptor(pid(kept)).unwrap();
    assert_eq!(kept.state, PluginState::Disabled);
    assert!(!kept.stale);
}

#[tokio::test]
async fn test_purged_plugin_leaves_no_owned_data_behind() {
    let temp = tempdir().unwrap();
    let root = temp.path().join("plugins");
    std::fs::create_dir_all(&root).unwrap();
    let mut factories = PluginFactories::new();
    register_mock(&mut factories, "demo::Blog", MockPlugin::new("blog", &call_log()));
    let provider = Arc::new(LocalStorageProvider::new(temp.path().to_path_buf()));
    let h = harness_with(factories, default_rules(provider), vec![root.clone()], None);

    let gone = Uuid::new_v4();
    let kept = Uuid::new_v4();
    let gone_dir = write_manifest(&root, "gone", gone, "Gone", "demo::Blog", &[]);
    write_manifest(&root, "kept", kept, "Kept", "demo::Blog", &[]);
    h.manager.reload_plugins(&CancellationToken::new()).await.unwrap();
    h.manager.install(pid(gone)).await.unwrap();
    h.manager.uninstall(pid(gone)).await.unwrap();

    let mut rows = Vec::new();
    for owner in [pid(gone), pid(kept)] {
        rows.push(Change::InsertRenderProvider(RenderProvider::new(owner, "escape", 10)));
        rows.push(Change::PutSetting(Setting {
            owner,
            key: "mode".to_string(),
            value: serde_json::json!("full"),
        }));
    }
    h.store.commit(rows.into()).unwrap();
    let data_dir = temp.path().join("data/plugins").join(pid(gone).to_string());
    std::fs::create_dir_all(&data_dir).unwrap();
    std::fs::write(data_dir.join("cache.txt"), "cached").unwrap();

    std::fs::remove_dir_all(gone_dir).unwrap();
    let report = h.manager.reload_plugins(&CancellationToken::new()).await.unwrap();
    assert_eq!(report.purged, vec![pid(gone)]);

    let tables = h.store.tables().unwrap();
    assert!(tables.descriptor(pid(gone)).is_none());
    assert!(!tables.handlers.contains_key(&pid(gone)));
    assert!(tables.render_providers.iter().all(|p| p.owner == pid(kept)));
    assert!(tables.settings.iter().all(|s| s.owner == pid(kept)));
    assert_eq!(tables.render_providers.len(), 1);
    assert_eq!(tables.settings.len(), 1);
    assert!(!data_dir.exists());
}

#[tokio::test]
async fn test_reload_ignores_incompatible_and_duplicate_manifests() {
    let (_temp, root, h) = setup();
    let shared = Uuid::new_v4();
    write_manifest(&root, "a_first", shared, "First", "demo::Blog", &[]);
    write_manifest(&root, "b_copy", shared, "Copy", "demo::Blog", &[]);
    write_manifest(&root, "c_future", Uuid::new_v4(), "Future", "demo::Blog", &["^9.0"]);

    let report = h.manager.reload_plugins(&CancellationToken::new()).await.unwrap();
    assert_eq!(report.added, vec![pid(shared)]);
    assert_eq!(report.ignored.len(), 2);
    assert!(report.ignored[0].0.ends_with("b_copy"));
    assert!(report.ignored[1].1.contains("incompatible"));
    assert_eq!(h.store.load_descriptor(pid(shared)).unwrap().title, "First");
}

#[tokio::test]
async fn test_reload_updates_changed_manifests_and_is_idempotent() {
    let (_temp, root, h) = setup();
    let blog = Uuid::new_v4();
    write_manifest(&root, "blog", blog, "Blog", "demo::Blog", &[]);
    h.manager.reload_plugins(&CancellationToken::new()).await.unwrap();

    write_manifest(&root, "blog", blog, "Weblog", "demo::Blog", &[]);
    let report = h.manager.reload_plugins(&CancellationToken::new()).await.unwrap();
    assert_eq!(report.updated, vec![pid(blog)]);
    assert_eq!(h.store.load_descriptor(pid(blog)).unwrap().title, "Weblog");

    let again = h.manager.reload_plugins(&CancellationToken::new()).await.unwrap();
    assert!(again.added.is_empty() && again.updated.is_empty() && again.purged.is_empty());
    assert_eq!(h.store.descriptors().unwrap().len(), 1);
}

#[tokio::test]
async fn test_reload_keeps_enabled_plugins_live() {
    let (_temp, root, h) = setup();
    let blog = Uuid::new_v4();
    write_manifest(&root, "blog", blog, "Blog", "demo::Blog", &[]);
    h.manager.reload_plugins(&CancellationToken::new()).await.unwrap();
    h.manager.install(pid(blog)).await.unwrap();
    h.manager.enable(pid(blog)).await.unwrap();
    let instance = h.manager.registry().get(pid(blog)).unwrap();

    let report = h.manager.reload_plugins(&CancellationToken::new()).await.unwrap();
    assert_eq!(report.rebuild.loaded, vec![pid(blog)]);
    assert!(std::sync::Arc::ptr_eq(&instance, &h.manager.registry().get(pid(blog)).unwrap()));
}

#[tokio::test]
async fn test_cancelled_reload_writes_nothing() {
    let (_temp, root, h) = setup();
    write_manifest(&root, "blog", Uuid::new_v4(), "Blog", "demo::Blog", &[]);
    let token = CancellationToken::new();
    token.cancel();

    assert!(h.manager.reload_plugins(&token).await.is_err());
    assert!(h.store.descriptors().unwrap().is_empty());
    assert!(!h.manager.gate().is_read_only());
}
