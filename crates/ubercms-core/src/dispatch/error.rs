//! # UberCMS Dispatch Errors
//!
//! [`DispatchError`] is a handler failure caught at the dispatcher boundary.
//! It is handed to every `handle_page_error` hook with the original
//! [`HookError`] intact, then logged. It never escapes `dispatch`.
use std::fmt;

use crate::plugin_system::descriptor::PluginId;
use crate::plugin_system::error::HookError;

/// Where in the request pipeline a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchStage {
    HandlerInvocation,
    NotFoundHandling,
}

impl fmt::Display for DispatchStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchStage::HandlerInvocation => f.write_str("handler invocation"),
            DispatchStage::NotFoundHandling => f.write_str("not-found handling"),
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("Request '{path}' failed during {stage}: {source}")]
pub struct DispatchError {
    pub path: String,
    /// Plugin whose hook failed.
    pub plugin_id: PluginId,
    pub stage: DispatchStage,
    #[source]
    pub source: HookError,
}

impl DispatchError {
    /// The failing hook's own message, unchanged.
    pub fn message(&self) -> String {
        self.source.message()
    }

    pub fn hook_error(&self) -> &HookError {
        &self.source
    }
}
