//! Refract Core Library
//!
//! This crate provides configuration, error types and shared enums used by
//! every Refract component.

pub mod config;
pub mod error;
pub mod storage_types;

// Re-export commonly used types
pub use config::{BaseConfig, Config, TransformServiceConfig};
pub use error::{AppError, ErrorMetadata, LogLevel};
pub use storage_types::StorageBackend;
