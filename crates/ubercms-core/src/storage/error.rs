//! # UberCMS Storage Errors
//!
//! Defines error types for the storage layer.
//!
//! [`StorageSystemError`] covers file I/O and configuration (de)serialization
//! performed through a [`StorageProvider`](crate::storage::StorageProvider).
//! [`PersistenceError`] covers the plugin tables behind a
//! [`PluginStore`](crate::storage::PluginStore) and separates uniqueness
//! violations from generic failures.
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageSystemError {
    #[error("I/O error during operation '{operation}' on path '{path}': {source}")]
    Io {
        path: PathBuf,
        operation: String,
        #[source]
        source: std::io::Error,
    },

    #[error("File not found at path: {0}")]
    FileNotFound(PathBuf),

    #[error("Serialization to '{format}' failed: {source}")]
    SerializationError {
        format: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },

    #[error("Deserialization from '{format}' failed: {source}")]
    DeserializationError {
        format: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },

    #[error("Unsupported configuration format: {0}")]
    UnsupportedConfigFormat(String),

    #[error("Configuration not found for name '{name}'")]
    ConfigNotFound { name: String },

    #[error("Invalid configuration value for '{key}': {reason}")]
    InvalidConfigValue { key: String, reason: String },

    #[error("Invalid path provided: '{path}': {reason}")]
    InvalidPath { path: PathBuf, reason: String },
}

// Helper for creating Io errors, ensuring path is always included.
impl StorageSystemError {
    pub fn io(source: std::io::Error, operation: impl Into<String>, path: PathBuf) -> Self {
        StorageSystemError::Io {
            source,
            operation: operation.into(),
            path,
        }
    }
}

/// Failure while reading or committing the plugin tables.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// A uniqueness constraint was violated (plugin id, route module, provider id).
    #[error("Duplicate key '{key}' in table '{table}'")]
    Duplicate { table: &'static str, key: String },

    #[error("No row with key '{key}' in table '{table}'")]
    NotFound { table: &'static str, key: String },

    /// The backing storage could not be read or written.
    #[error("Plugin store unavailable: {source}")]
    Unavailable {
        #[source]
        source: StorageSystemError,
    },

    #[error("Plugin store document is corrupt: {0}")]
    Corrupt(String),
}

impl PersistenceError {
    pub fn duplicate(table: &'static str, key: impl ToString) -> Self {
        PersistenceError::Duplicate { table, key: key.to_string() }
    }

    pub fn not_found(table: &'static str, key: impl ToString) -> Self {
        PersistenceError::NotFound { table, key: key.to_string() }
    }

    /// True when the failure was caused by a uniqueness violation.
    pub fn is_duplicate(&self) -> bool {
        matches!(self, PersistenceError::Duplicate { .. })
    }
}

impl From<StorageSystemError> for PersistenceError {
    fn from(source: StorageSystemError) -> Self {
        PersistenceError::Unavailable { source }
    }
}
