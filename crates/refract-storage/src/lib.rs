//! Refract Storage Library
//!
//! Artifact store abstraction for transformed images, with implementations
//! for the local filesystem and S3-compatible object storage.
//!
//! # Key format
//!
//! Keys are produced by the cache key deriver: `<sha256 hex>.<extension>`.
//! Backends accept any relative key but reject `..` and a leading `/`.

pub mod factory;
#[cfg(feature = "storage-local")]
pub mod local;
#[cfg(feature = "storage-s3")]
pub mod s3;
pub mod traits;

// Re-export commonly used types
pub use factory::create_storage;
#[cfg(feature = "storage-local")]
pub use local::LocalStorage;
pub use refract_core::StorageBackend;
#[cfg(feature = "storage-s3")]
pub use s3::S3Storage;
pub use traits::{Storage, StorageError, StorageResult};
