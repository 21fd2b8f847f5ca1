use crate::state::AppState;
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

const STORAGE_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Serialize)]
pub struct HealthCheckResponse {
    pub status: &'static str,
    pub storage: String,
}

/// `GET /health`. Probes the artifact store with an `exists` call on a key
/// that is never written.
pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let check = tokio::time::timeout(
        STORAGE_CHECK_TIMEOUT,
        state.storage.exists("health-check-non-existent-key"),
    )
    .await;

    let (status, storage) = match check {
        Ok(Ok(_)) => (StatusCode::OK, "healthy".to_string()),
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "Storage health check failed");
            (StatusCode::SERVICE_UNAVAILABLE, format!("unhealthy: {}", e))
        }
        Err(_) => {
            tracing::warn!("Storage health check timed out");
            (StatusCode::SERVICE_UNAVAILABLE, "timeout".to_string())
        }
    };

    let body = HealthCheckResponse {
        status: if status == StatusCode::OK { "ok" } else { "degraded" },
        storage,
    };
    (status, Json(body))
}
