//! Shared application state

use crate::error::HttpAppError;
use refract_core::AppError;
use refract_processing::TransformationOrchestrator;
use refract_storage::Storage;
use std::sync::Arc;

const SECONDS_PER_DAY: u64 = 86_400;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<TransformationOrchestrator>,
    /// The orchestrator's artifact store, checked by the health check
    pub storage: Arc<dyn Storage>,
    /// `max-age` of served artifacts
    pub cache_max_age_secs: u64,
    /// Hides error details from clients
    pub production: bool,
}

impl AppState {
    pub fn new(
        orchestrator: Arc<TransformationOrchestrator>,
        storage: Arc<dyn Storage>,
        header_cache_days: u64,
        production: bool,
    ) -> Self {
        Self {
            orchestrator,
            storage,
            cache_max_age_secs: header_cache_days.saturating_mul(SECONDS_PER_DAY),
            production,
        }
    }

    pub fn error(&self, error: impl Into<AppError>) -> HttpAppError {
        HttpAppError::new(error, self.production)
    }

    pub fn cache_control(&self) -> String {
        format!("public, max-age={}", self.cache_max_age_secs)
    }
}
