//! Service-level errors
//!
//! Every failure that reaches the HTTP edge becomes an `AppError`. How a
//! variant is presented (status, code, retry hint, log level, whether its
//! details may be shown) is looked up in one `ErrorProfile` per variant and
//! exposed through `ErrorMetadata`.

use std::io;

/// Level at which a failed request is logged
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Caller mistakes: bad options, unknown sources
    Debug,
    /// Refused or upstream-caused failures
    Warn,
    /// Failures of this service or its binaries
    Error,
}

/// Presentation of an error to HTTP clients and to the log
pub trait ErrorMetadata {
    fn http_status_code(&self) -> u16;

    /// Stable machine-readable code, e.g. `FORBIDDEN_SOURCE`
    fn error_code(&self) -> &'static str;

    /// Whether the same request may succeed later
    fn is_recoverable(&self) -> bool;

    fn suggested_action(&self) -> Option<&'static str>;

    /// Message safe to show to any client
    fn client_message(&self) -> String;

    /// Sensitive errors never expose their details (paths, command lines)
    fn is_sensitive(&self) -> bool;

    fn log_level(&self) -> LogLevel;
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Image processing error: {0}")]
    ImageProcessing(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Upstream error: {0}")]
    BadGateway(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Internal error: {message}")]
    InternalWithSource {
        message: String,
        #[source]
        source: anyhow::Error,
    },
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::InternalWithSource {
            message: err.to_string(),
            source: err,
        }
    }
}

impl From<io::Error> for AppError {
    fn from(err: io::Error) -> Self {
        AppError::Internal(format!("IO error: {}", err))
    }
}

#[derive(Debug, Clone, Copy)]
struct ErrorProfile {
    status: u16,
    code: &'static str,
    recoverable: bool,
    action: Option<&'static str>,
    sensitive: bool,
    level: LogLevel,
}

const RETRY_LATER: Option<&str> = Some("Retry after a short delay");

impl AppError {
    fn profile(&self) -> ErrorProfile {
        match self {
            AppError::Storage(_) => ErrorProfile {
                status: 500,
                code: "STORAGE_ERROR",
                recoverable: true,
                action: RETRY_LATER,
                sensitive: true,
                level: LogLevel::Error,
            },
            AppError::ImageProcessing(_) => ErrorProfile {
                status: 500,
                code: "IMAGE_PROCESSING_ERROR",
                recoverable: false,
                action: Some("Check the source image and transformation options"),
                sensitive: true,
                level: LogLevel::Error,
            },
            AppError::InvalidInput(_) => ErrorProfile {
                status: 400,
                code: "INVALID_INPUT",
                recoverable: false,
                action: Some("Check transformation options and try again"),
                sensitive: false,
                level: LogLevel::Debug,
            },
            AppError::Forbidden(_) => ErrorProfile {
                status: 403,
                code: "FORBIDDEN_SOURCE",
                recoverable: false,
                action: Some("Use a source from an allowed domain"),
                sensitive: false,
                level: LogLevel::Warn,
            },
            AppError::NotFound(_) => ErrorProfile {
                status: 404,
                code: "NOT_FOUND",
                recoverable: false,
                action: Some("Verify the source image exists"),
                sensitive: false,
                level: LogLevel::Debug,
            },
            AppError::BadGateway(_) => ErrorProfile {
                status: 502,
                code: "SOURCE_FETCH_FAILED",
                recoverable: true,
                action: RETRY_LATER,
                sensitive: false,
                level: LogLevel::Warn,
            },
            AppError::Internal(_) | AppError::InternalWithSource { .. } => ErrorProfile {
                status: 500,
                code: "INTERNAL_ERROR",
                recoverable: true,
                action: RETRY_LATER,
                sensitive: true,
                level: LogLevel::Error,
            },
        }
    }

    /// Variant name, shown in non-production error bodies
    pub fn error_type(&self) -> &'static str {
        match self {
            AppError::Storage(_) => "Storage",
            AppError::ImageProcessing(_) => "ImageProcessing",
            AppError::InvalidInput(_) => "InvalidInput",
            AppError::Forbidden(_) => "Forbidden",
            AppError::NotFound(_) => "NotFound",
            AppError::BadGateway(_) => "BadGateway",
            AppError::Internal(_) | AppError::InternalWithSource { .. } => "Internal",
        }
    }

    /// The error and up to five levels of its source chain, one per line.
    pub fn detailed_message(&self) -> String {
        const MAX_DEPTH: usize = 5;

        let mut details = self.to_string();
        let mut chain = std::iter::successors(std::error::Error::source(self), |err| err.source());
        for err in chain.by_ref().take(MAX_DEPTH) {
            details.push_str(&format!("\n  Caused by: {}", err));
        }
        if chain.next().is_some() {
            details.push_str("\n  ... (truncated)");
        }
        details
    }
}

impl ErrorMetadata for AppError {
    fn http_status_code(&self) -> u16 {
        self.profile().status
    }

    fn error_code(&self) -> &'static str {
        self.profile().code
    }

    fn is_recoverable(&self) -> bool {
        self.profile().recoverable
    }

    fn suggested_action(&self) -> Option<&'static str> {
        self.profile().action
    }

    fn is_sensitive(&self) -> bool {
        self.profile().sensitive
    }

    fn log_level(&self) -> LogLevel {
        self.profile().level
    }

    fn client_message(&self) -> String {
        match self {
            AppError::Storage(_) => "Failed to access storage".to_string(),
            AppError::ImageProcessing(_) => "Failed to transform image".to_string(),
            AppError::Forbidden(host) => format!("Source domain is not allowed: {}", host),
            AppError::InvalidInput(msg) | AppError::NotFound(msg) | AppError::BadGateway(msg) => {
                msg.clone()
            }
            AppError::Internal(_) | AppError::InternalWithSource { .. } => {
                "Internal server error".to_string()
            }
        }
    }
}
