use std::sync::Mutex;

use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::plugin_system::error::PluginSystemError;

/// Read-only flag raised while a reconciliation rewrites the plugin tables.
///
/// Lifecycle transitions hold a [`WritePass`] for their whole duration;
/// [`MaintenanceGate::begin`] raises the flag, then waits for passes already
/// handed out to finish.
#[derive(Debug, Default)]
pub struct MaintenanceGate {
    operation: Mutex<Option<String>>,
    activity: RwLock<()>,
}

/// Held by a mutating operation while it runs.
#[derive(Debug)]
pub struct WritePass<'a> {
    _activity: RwLockReadGuard<'a, ()>,
}

/// Held by the maintenance worker; clears the flag on drop, success or failure.
#[derive(Debug)]
pub struct MaintenanceGuard<'a> {
    _activity: RwLockWriteGuard<'a, ()>,
    _flag: FlagReset<'a>,
}

#[derive(Debug)]
struct FlagReset<'a> {
    gate: &'a MaintenanceGate,
}

impl MaintenanceGate {
    pub fn new() -> Self {
        Self::default()
    }

    fn current(&self) -> Option<String> {
        self.operation
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn is_read_only(&self) -> bool {
        self.current().is_some()
    }

    /// Fail with `ReadOnly` while maintenance is running.
    pub fn ensure_writable(&self) -> Result<(), PluginSystemError> {
        match self.current() {
            Some(operation) => Err(PluginSystemError::ReadOnly { operation }),
            None => Ok(()),
        }
    }

    /// Admit one mutating operation.
    pub async fn enter(&self) -> Result<WritePass<'_>, PluginSystemError> {
        self.ensure_writable()?;
        let activity = self.activity.read().await;
        // The flag may have been raised while we waited.
        self.ensure_writable()?;
        Ok(WritePass { _activity: activity })
    }

    /// Raise the flag for `operation` and wait for running transitions.
    pub async fn begin(&self, operation: &str) -> Result<MaintenanceGuard<'_>, PluginSystemError> {
        {
            let mut current = self.operation.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            if let Some(running) = current.as_ref() {
                return Err(PluginSystemError::ReadOnly {
                    operation: running.clone(),
                });
            }
            *current = Some(operation.to_string());
        }
        // Cleared even if this future is dropped while waiting.
        let flag = FlagReset { gate: self };
        log::info!("Plugin system is read-only for '{}'", operation);
        let activity = self.activity.write().await;
        Ok(MaintenanceGuard {
            _activity: activity,
            _flag: flag,
        })
    }
}

impl Drop for FlagReset<'_> {
    fn drop(&mut self) {
        let mut current = self
            .gate
            .operation
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(operation) = current.take() {
            log::info!("Plugin system is writable again after '{}'", operation);
        }
    }
}
