//! # UberCMS Kernel
//!
//! Bootstraps the runtime and owns the lifecycle of its core components.
//!
//! ## Key Responsibilities & Components:
//!
//! - **Application Bootstrapping**: [`Application`](bootstrap::Application)
//!   builds storage, the plugin manager, the cycle scheduler and the request
//!   dispatcher from a data directory and a set of plugin factories.
//! - **Component Lifecycle**: the [`KernelComponent`](component::KernelComponent)
//!   trait and the [`DependencyRegistry`](component::DependencyRegistry).
//! - **Core Constants**: directory names, defaults and the runtime API version.
//! - **Error Handling**: the crate-wide [`Error`](error::Error) and `Result`.
pub mod bootstrap;
pub mod component;
pub mod constants;
pub mod error;

pub use bootstrap::Application;
pub use component::{DependencyRegistry, KernelComponent};
pub use error::{Error, Result};

#[cfg(test)]
mod tests;
