pub mod dispatch;
pub mod kernel;
pub mod plugin_system;
pub mod scheduler;
pub mod storage;

// Re-export key public types for the binary and plugins
pub use dispatch::{DispatchOutcome, RequestContext, RequestDispatcher};
pub use kernel::Application;
pub use kernel::error::Error as KernelError;
pub use plugin_system::{Plugin, PluginFactories, PluginManager, PluginManifest};
pub use scheduler::{CycleContext, CycleScheduler};
pub use storage::{PluginStore, StorageProvider};

#[cfg(test)]
mod tests;
