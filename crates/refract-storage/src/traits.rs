//! Storage abstraction trait
//!
//! This module defines the Storage trait that all artifact store backends
//! must implement.

use crate::StorageBackend;
use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

/// Storage operation errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Read failed: {0}")]
    ReadFailed(String),

    #[error("Delete failed: {0}")]
    DeleteFailed(String),

    #[error("Artifact not found: {0}")]
    NotFound(String),

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("Storage backend error: {0}")]
    BackendError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Key/value store for transformed artifacts
///
/// Writes overwrite; concurrent writers of the same key resolve as
/// last-writer-wins.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Check if an artifact exists
    async fn exists(&self, key: &str) -> StorageResult<bool>;

    /// Read an artifact. Missing keys yield `StorageError::NotFound`.
    async fn read(&self, key: &str) -> StorageResult<Bytes>;

    /// Store an artifact under `key`, replacing any previous content
    async fn write(&self, key: &str, data: Bytes, content_type: &str) -> StorageResult<()>;

    /// Delete an artifact. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// Get the storage backend type
    fn backend_type(&self) -> StorageBackend;
}

impl From<StorageError> for refract_core::AppError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(key) => {
                refract_core::AppError::NotFound(format!("Artifact not found: {}", key))
            }
            StorageError::InvalidKey(msg) => refract_core::AppError::InvalidInput(msg),
            other => refract_core::AppError::Storage(other.to_string()),
        }
    }
}
