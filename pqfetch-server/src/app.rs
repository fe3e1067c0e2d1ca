use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Extension},
    routing::{any, get},
    Router,
};

use crate::handlers::health::{health_handler, ready_handler};
use crate::handlers::passthrough::passthrough;
use crate::state::AppState;

// Pass-through bodies are small JSON documents or forms.
const DEFAULT_BODY_LIMIT: usize = 10 * 1024 * 1024;

/// Build the axum router with the provided shared application state.
pub fn build_router(state: Arc<AppState>) -> Router {
    let api = Router::new().route("/{*path}", any(passthrough));

    Router::new()
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .nest("/api", api)
        .layer(DefaultBodyLimit::max(DEFAULT_BODY_LIMIT))
        .layer(Extension(state))
}
