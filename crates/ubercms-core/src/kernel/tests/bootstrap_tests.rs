use std::sync::Arc;

use tempfile::tempdir;

use crate::kernel::bootstrap::Application;
use crate::kernel::component::{DependencyRegistry, KernelComponent};
use crate::kernel::constants;
use crate::kernel::error::{Error, KernelLifecyclePhase};
use crate::plugin_system::DefaultPluginManager;
use crate::plugin_system::loader::PluginFactories;
use crate::scheduler::CycleScheduler;
use crate::storage::DefaultStorageManager;
use crate::storage::error::StorageSystemError;

#[tokio::test]
async fn test_new_registers_every_component() {
    let temp = tempdir().unwrap();
    let app = Application::new(temp.path(), PluginFactories::new()).unwrap();

    assert!(app.get_component::<DefaultStorageManager>().await.is_some());
    assert!(app.get_component::<DefaultPluginManager>().await.is_some());
    assert!(app.get_component::<CycleScheduler>().await.is_some());
    assert!(!app.is_initialized());
    assert_eq!(app.storage().base_path(), temp.path());
}

#[tokio::test]
async fn test_initialize_creates_data_layout() {
    let temp = tempdir().unwrap();
    let mut app = Application::new(temp.path(), PluginFactories::new()).unwrap();
    app.initialize().await.unwrap();

    assert!(app.is_initialized());
    assert!(temp.path().join(constants::CONFIG_DIR).is_dir());
    assert!(temp.path().join(constants::PLUGIN_DATA_DIR).is_dir());
    assert!(temp.path().join(constants::DEFAULT_PLUGINS_DIR).is_dir());

    match app.initialize().await {
        Err(Error::KernelLifecycleError { phase, .. }) => assert_eq!(phase, KernelLifecyclePhase::Initialize),
        other => panic!("expected lifecycle error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_start_then_shutdown() {
    let temp = tempdir().unwrap();
    let mut app = Application::new(temp.path(), PluginFactories::new()).unwrap();

    app.start().await.unwrap();
    assert!(app.is_initialized() && app.is_started());

    app.shutdown().await.unwrap();
    assert!(!app.is_started());
    assert!(app.plugin_manager().shutdown_token().is_cancelled());
    // A second shutdown is a no-op.
    app.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_runtime_config_is_read_from_data_dir() {
    let temp = tempdir().unwrap();
    std::fs::create_dir_all(temp.path().join("config")).unwrap();
    std::fs::write(
        temp.path().join("config/runtime.json"),
        r#"{"default_module": "Blog", "plugin_dirs": ["extensions"], "hook_timeout_ms": 0}"#,
    )
    .unwrap();

    let app = Application::new(temp.path(), PluginFactories::new()).unwrap();
    let config = app.storage().runtime_config();
    assert_eq!(config.default_module, "blog");
    assert_eq!(config.hook_timeout(), None);
    assert_eq!(app.plugin_manager().plugin_dirs(), &[temp.path().join("extensions")]);
}

#[tokio::test]
async fn test_invalid_runtime_config_is_rejected() {
    let temp = tempdir().unwrap();
    std::fs::create_dir_all(temp.path().join("config")).unwrap();
    std::fs::write(temp.path().join("config/runtime.json"), r#"{"cycle_tick_ms": 0}"#).unwrap();

    match Application::new(temp.path(), PluginFactories::new()) {
        Err(Error::StorageSystem(StorageSystemError::InvalidConfigValue { key, .. })) => {
            assert_eq!(key, "cycle_tick_ms")
        }
        other => panic!("expected invalid config, got {:?}", other.map(|_| ())),
    }
}

#[tokio::test]
async fn test_dependency_registry_lookup_by_type() {
    let temp = tempdir().unwrap();
    let storage = Arc::new(DefaultStorageManager::new(temp.path().to_path_buf()).unwrap());
    let mut registry = DependencyRegistry::new();
    assert!(registry.is_empty());
    registry.register_instance(storage.clone());

    let found = registry.get_concrete::<DefaultStorageManager>().unwrap();
    assert!(Arc::ptr_eq(&found, &storage));
    assert_eq!(found.name(), "DefaultStorageManager");
    assert!(registry.get_concrete::<CycleScheduler>().is_none());
    assert_eq!(registry.len(), 1);
}
