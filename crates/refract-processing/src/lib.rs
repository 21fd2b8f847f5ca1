//! Refract Processing Library
//!
//! The transformation pipeline: option parsing, cache key derivation,
//! ImageMagick command construction, face-region operations, external
//! process execution and the cache-fill orchestration around them.

pub mod cache_key;
pub mod command;
pub mod domain;
pub mod error;
pub mod face;
pub mod fetch;
pub mod format;
pub mod geometry;
pub mod options;
pub mod orchestrator;
pub mod runner;
pub mod ssrf;

// Re-export commonly used types
pub use cache_key::derive_cache_key;
pub use command::{BuildTarget, CommandBuilder, CommandPipeline, ExternalCommand};
pub use domain::DomainPolicy;
pub use error::TransformError;
pub use face::{parse_regions, FaceRegion, FaceRegionProcessor};
pub use fetch::{HttpSourceFetcher, SourceFetchError, SourceFetcher};
pub use format::{accepts_webp, ImageFormat};
pub use geometry::{ExtentClause, Geometry};
pub use options::{OptionClaims, OptionSet};
pub use orchestrator::{
    TransformConfig, TransformRequest, TransformationOrchestrator, TransformedImage,
};
pub use runner::{ProcessFailure, ProcessRunner, TokioProcessRunner};
