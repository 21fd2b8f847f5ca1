//! Route configuration

use crate::handlers;
use crate::state::AppState;
use axum::{http::Method, routing::get, Router};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub fn setup_routes(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::HEAD]);

    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route(
            "/upload/{options}/{*source}",
            get(handlers::transform::serve_image),
        )
        .route(
            "/path/{options}/{*source}",
            get(handlers::transform::artifact_path),
        )
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
