//! # UberCMS Plugin System Errors
//!
//! Defines error types specific to the plugin runtime.
//!
//! - [`LoadError`]: a class path could not be turned into a live instance.
//!   Fatal for that one plugin only.
//! - [`HookError`]: a plugin's own hook reported failure, panicked, timed out
//!   or was cancelled. Always caught at the lifecycle / dispatch boundary.
//! - [`PluginSystemError`]: everything the lifecycle controller, registry and
//!   manager report to administrative callers.
use std::any::Any;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::plugin_system::descriptor::{PluginId, PluginState, Transition};
use crate::plugin_system::version::VersionError;
use crate::storage::error::PersistenceError;

/// Failure to materialize a plugin instance from its class path.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoadError {
    #[error("No plugin implementation registered for class path '{class_path}'")]
    ClassNotFound { class_path: String },

    #[error("'{class_path}' is not a usable plugin implementation: {reason}")]
    InvalidImplementation { class_path: String, reason: String },

    #[error("Constructing '{class_path}' failed: {message}")]
    ConstructionFailed { class_path: String, message: String },
}

/// Failure raised by (or around) a plugin hook.
#[derive(Clone, thiserror::Error)]
pub enum HookError {
    /// The plugin reported failure. The message is surfaced verbatim.
    #[error("{message}")]
    Failed {
        message: String,
        #[source]
        source: Option<Arc<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Hook panicked: {message}")]
    Panicked { message: String },

    #[error("Hook timed out after {timeout_ms}ms")]
    TimedOut { timeout_ms: u64 },

    #[error("Hook was cancelled")]
    Cancelled,
}

impl HookError {
    pub fn failed(message: impl Into<String>) -> Self {
        HookError::Failed { message: message.into(), source: None }
    }

    /// Keep the original error object so handlers further down the chain can inspect it.
    pub fn from_error<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        HookError::Failed {
            message: error.to_string(),
            source: Some(Arc::new(error)),
        }
    }

    /// The message as the plugin produced it (no prefix for `Failed`).
    pub fn message(&self) -> String {
        self.to_string()
    }
}

impl fmt::Debug for HookError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HookError::Failed { message, source } => f
                .debug_struct("Failed")
                .field("message", message)
                .field("source", &source.as_ref().map(|s| s.to_string()))
                .finish(),
            HookError::Panicked { message } => f.debug_struct("Panicked").field("message", message).finish(),
            HookError::TimedOut { timeout_ms } => f.debug_struct("TimedOut").field("timeout_ms", timeout_ms).finish(),
            HookError::Cancelled => f.write_str("Cancelled"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PluginSystemError {
    #[error("Plugin loading failed for '{plugin_id}': {source}")]
    LoadingError {
        plugin_id: PluginId,
        #[source]
        source: LoadError,
    },

    #[error("Plugin not found: {0}")]
    NotFound(PluginId),

    #[error("Cannot {transition} plugin '{plugin_id}' while it is {state}")]
    InvalidStateTransition {
        plugin_id: PluginId,
        transition: Transition,
        state: PluginState,
    },

    #[error("Plugin '{plugin_id}' {hook} hook failed: {source}")]
    HookFailure {
        plugin_id: PluginId,
        hook: &'static str,
        #[source]
        source: HookError,
    },

    #[error("Cleanup rule '{rule}' failed while removing plugin '{plugin_id}': {message}")]
    CleanupFailed {
        plugin_id: PluginId,
        rule: &'static str,
        message: String,
    },

    #[error("Plugin manifest error for '{path}': {message}")]
    ManifestError {
        path: PathBuf,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Plugin system is read-only while '{operation}' is running")]
    ReadOnly { operation: String },

    #[error("Operation '{operation}' was cancelled")]
    Cancelled { operation: String },

    #[error("Persistence failed: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("Version parsing error: {0}")]
    VersionParsing(#[from] VersionError),
}

impl PluginSystemError {
    /// True when the plugin's own hook rejected the transition.
    pub fn is_hook_failure(&self) -> bool {
        matches!(self, PluginSystemError::HookFailure { .. })
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
