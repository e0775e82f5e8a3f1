//! # UberCMS Plugin System
//!
//! The plugin runtime: what a plugin is, how it is persisted, how it is
//! brought to life and how it moves through its lifecycle.
//!
//! ## Key Submodules and Responsibilities:
//!
//! - **[`descriptor`]**: the persisted [`PluginDescriptor`], its
//!   [`PluginState`] and the legal [`Transition`]s between states.
//! - **[`handler_info`]**: per-plugin [`HandlerInfo`] flags naming the
//!   optional hooks a plugin takes part in.
//! - **[`loader`]**: the [`PluginLoader`] resolving class paths through
//!   [`PluginFactories`], and manifest discovery on disk.
//! - **[`registry`]**: the copy-on-write [`PluginRegistry`] of enabled plugins.
//! - **[`lifecycle`]**: the [`LifecycleController`] driving install, enable,
//!   disable, uninstall and remove under per-plugin locks.
//! - **[`cascade`]**: the ownership rules executed by `remove`.
//! - **[`manager`]**: the [`PluginManager`] kernel component tying it together.
//! - **[`traits`]**: the [`Plugin`] capability interface.
//! - **[`error`]**: [`LoadError`], [`HookError`] and [`PluginSystemError`].
pub mod cascade;
pub mod context;
pub mod descriptor;
pub mod error;
pub mod handler_info;
pub mod invoke;
pub mod lifecycle;
pub mod loader;
pub mod locks;
pub mod maintenance;
pub mod manager;
pub mod manifest;
pub mod reconcile;
pub mod registry;
pub mod resources;
pub mod traits;
pub mod version;

pub use cascade::{CascadeRule, default_rules};
pub use context::LifecycleContext;
pub use descriptor::{DescriptorField, PluginDescriptor, PluginId, PluginState, SaveOutcome, Transition};
pub use error::{HookError, LoadError, PluginSystemError};
pub use handler_info::{HandlerInfo, Hook};
pub use lifecycle::{LifecycleController, TransitionReport};
pub use loader::{PluginArgs, PluginFactories, PluginLoader};
pub use maintenance::MaintenanceGate;
pub use manager::{DefaultPluginManager, PluginManager};
pub use manifest::PluginManifest;
pub use reconcile::ReloadReport;
pub use registry::{PluginRegistry, RebuildReport, RegisteredPlugin, RegistrySnapshot, SkippedPlugin};
pub use resources::{RenderProvider, RouteClaim, Setting};
pub use traits::{HookResult, Plugin};
pub use version::{ApiVersion, PluginVersion, VersionRange};

#[cfg(test)]
mod tests;
