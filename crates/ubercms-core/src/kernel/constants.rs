/// Application name
pub const APP_NAME: &str = "UberCMS";

/// Application version
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Plugin runtime API version plugins declare compatibility with
pub const API_VERSION: &str = "0.1.0";

/// Manifest file marking a plugin directory
pub const MANIFEST_FILE: &str = "plugin.json";

/// Name of the runtime configuration document under `CONFIG_DIR`
pub const RUNTIME_CONFIG_NAME: &str = "runtime";

/// Configuration directory, relative to the data dir
pub const CONFIG_DIR: &str = "config";

/// Parent of every plugin's private data directory
pub const PLUGIN_DATA_DIR: &str = "data/plugins";

/// Default plugins directory
pub const DEFAULT_PLUGINS_DIR: &str = "plugins";

/// Module used for requests to `/`
pub const DEFAULT_MODULE: &str = "home";

pub const DEFAULT_CYCLE_TICK_MS: u64 = 250;

pub const DEFAULT_HOOK_TIMEOUT_MS: u64 = 30_000;

/// Plugin table document, relative to the data dir
pub const DEFAULT_STORE_FILE: &str = "data/plugins.json";
