//! HTTP error response conversion
//!
//! Handlers return `Result<impl IntoResponse, HttpAppError>` and build the
//! error through `AppState::error`, which carries the configured environment.
//! Every failure renders the same way: status from `ErrorMetadata`, a JSON
//! `ErrorResponse` body, and a log line at the error's level.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use refract_core::{AppError, ErrorMetadata, LogLevel};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    /// Machine-readable error code
    pub code: String,
    /// Whether retrying the same request may succeed
    pub recoverable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_action: Option<String>,
}

fn log_error(error: &AppError) {
    let error_type = error.error_type();
    match error.log_level() {
        LogLevel::Debug => {
            tracing::debug!(error = %error, error_type = error_type, "Request failed");
        }
        LogLevel::Warn => {
            tracing::warn!(error = %error, error_type = error_type, "Request failed");
        }
        LogLevel::Error => {
            tracing::error!(error = %error, error_type = error_type, "Request failed");
        }
    }
}

/// `IntoResponse` wrapper for `AppError`, which lives in another crate.
#[derive(Debug)]
pub struct HttpAppError {
    pub error: AppError,
    /// From `Config::is_production`; production responses carry no details
    pub production: bool,
}

impl HttpAppError {
    pub fn new(error: impl Into<AppError>, production: bool) -> Self {
        Self {
            error: error.into(),
            production,
        }
    }

    fn body(&self, expose_details: bool) -> ErrorResponse {
        let app_error = &self.error;
        ErrorResponse {
            error: app_error.client_message(),
            details: expose_details.then(|| app_error.detailed_message()),
            error_type: expose_details.then(|| app_error.error_type().to_string()),
            code: app_error.error_code().to_string(),
            recoverable: app_error.is_recoverable(),
            suggested_action: app_error.suggested_action().map(String::from),
        }
    }

    fn exposes_details(&self) -> bool {
        !self.production && !self.error.is_sensitive()
    }
}

impl IntoResponse for HttpAppError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.error.http_status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        log_error(&self.error);

        (status, Json(self.body(self.exposes_details()))).into_response()
    }
}
