//! Per-plugin handler registration flags.
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Which optional hooks a plugin participates in.
///
/// One record exists per installed plugin. A plugin fills it in from its own
/// `install`/`enable` hooks; the lifecycle controller persists it in the same
/// commit as the state change.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandlerInfo {
    #[serde(default)]
    pub request_start: bool,
    #[serde(default)]
    pub request_end: bool,
    #[serde(default)]
    pub page_error: bool,
    #[serde(default)]
    pub page_not_found: bool,
    #[serde(default)]
    pub runtime_start: bool,
    #[serde(default)]
    pub runtime_stop: bool,
    #[serde(default)]
    pub plugin_action: bool,
    /// 0 = never cycled, otherwise the minimum milliseconds between cycles.
    #[serde(default)]
    pub cycle_interval_ms: u64,
}

/// Optional hook points gated by [`HandlerInfo`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Hook {
    RequestStart,
    RequestEnd,
    PageError,
    PageNotFound,
    RuntimeStart,
    RuntimeStop,
    PluginAction,
    Cycle,
}

impl HandlerInfo {
    pub fn handles(&self, hook: Hook) -> bool {
        match hook {
            Hook::RequestStart => self.request_start,
            Hook::RequestEnd => self.request_end,
            Hook::PageError => self.page_error,
            Hook::PageNotFound => self.page_not_found,
            Hook::RuntimeStart => self.runtime_start,
            Hook::RuntimeStop => self.runtime_stop,
            Hook::PluginAction => self.plugin_action,
            Hook::Cycle => self.cycle_interval_ms > 0,
        }
    }

    pub fn cycle_interval(&self) -> Option<Duration> {
        (self.cycle_interval_ms > 0).then(|| Duration::from_millis(self.cycle_interval_ms))
    }
}
