use crate::fetch::SourceFetchError;
use crate::runner::ProcessFailure;
use refract_core::AppError;
use refract_storage::StorageError;

/// Errors raised while serving a transformation request
#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    #[error("Source domain is not allowed: {0}")]
    ForbiddenSource(String),

    #[error("Failed to fetch source image: {0}")]
    SourceFetchFailure(#[source] SourceFetchError),

    /// Failure of a face-detection or face-region command
    #[error("Face region processing failed: {0}")]
    Process(#[source] ProcessFailure),

    /// Failure of the main conversion pipeline
    #[error("Image conversion failed: {0}")]
    ProcessingFailure(#[source] ProcessFailure),

    #[error("Invalid options: {0}")]
    InvalidOptions(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<TransformError> for AppError {
    fn from(err: TransformError) -> Self {
        match err {
            TransformError::ForbiddenSource(host) => AppError::Forbidden(host),
            TransformError::SourceFetchFailure(SourceFetchError::NotFound(source)) => {
                AppError::NotFound(format!("Source image not found: {}", source))
            }
            TransformError::SourceFetchFailure(SourceFetchError::Blocked(reason)) => {
                AppError::Forbidden(reason)
            }
            TransformError::SourceFetchFailure(e) => AppError::BadGateway(e.to_string()),
            TransformError::Process(failure) | TransformError::ProcessingFailure(failure) => {
                AppError::ImageProcessing(failure.to_string())
            }
            TransformError::InvalidOptions(msg) => AppError::InvalidInput(msg),
            TransformError::Storage(e) => AppError::from(e),
            TransformError::Io(e) => AppError::from(e),
        }
    }
}
