#![cfg(test)]

use tempfile::tempdir;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::common::{MockPlugin, call_log, harness_with, register_mock, table_rules, write_manifest};
use crate::plugin_system::descriptor::{PluginId, PluginState};
use crate::plugin_system::loader::PluginFactories;
use crate::plugin_system::manager::PluginManager;

#[tokio::test]
async fn test_reload_keeps_installed_and_purges_missing() {
    let temp = tempdir().unwrap();
    let log = call_log();
    let mut factories = PluginFactories::new();
    register_mock(&mut factories, "test.kept", MockPlugin::new("kept", &log));
    register_mock(&mut factories, "test.gone", MockPlugin::new("gone", &log));
    let h = harness_with(factories, table_rules(), vec![temp.path().to_path_buf()], None);

    let kept = Uuid::new_v4();
    let gone = Uuid::new_v4();
    let kept_dir = write_manifest(temp.path(), "kept", kept, "Kept", "test.kept", &[]);
    let gone_dir = write_manifest(temp.path(), "gone", gone, "Gone", "test.gone", &[]);

    let first = h.manager.reload_plugins(&CancellationToken::new()).await.unwrap();
    assert_eq!(first.added.len(), 2);
    h.manager.install(PluginId::from_uuid(kept)).await.unwrap();

    std::fs::remove_dir_all(kept_dir).unwrap();
    std::fs::remove_dir_all(gone_dir).unwrap();
    let second = h.manager.reload_plugins(&CancellationToken::new()).await.unwrap();
    assert_eq!(second.purged, vec![PluginId::from_uuid(gone)]);

    let stored = h.manager.descriptors().await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].id(), PluginId::from_uuid(kept));
    assert_eq!(stored[0].state, PluginState::Disabled);
}

#[tokio::test]
async fn test_reload_ignores_incompatible_manifests() {
    let temp = tempdir().unwrap();
    let h = harness_with(PluginFactories::new(), table_rules(), vec![temp.path().to_path_buf()], None);
    write_manifest(temp.path(), "future", Uuid::new_v4(), "Future", "test.future", &[">=2.0.0"]);

    let report = h.manager.reload_plugins(&CancellationToken::new()).await.unwrap();
    assert!(report.added.is_empty());
    assert_eq!(report.ignored.len(), 1);
    assert!(report.ignored[0].0.ends_with("future"));
    assert!(h.manager.descriptors().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_cancelled_reload_changes_nothing() {
    let temp = tempdir().unwrap();
    let h = harness_with(PluginFactories::new(), table_rules(), vec![temp.path().to_path_buf()], None);
    write_manifest(temp.path(), "one", Uuid::new_v4(), "One", "test.one", &[]);

    let cancel = CancellationToken::new();
    cancel.cancel();
    assert!(h.manager.reload_plugins(&cancel).await.is_err());
    assert!(h.manager.descriptors().await.unwrap().is_empty());
}
