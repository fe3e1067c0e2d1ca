use std::sync::Arc;

use axum::{extract::Extension, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

use crate::state::AppState;

/// Liveness: always 200 while the process is up.
pub async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// Readiness: 200 once the notification channel is subscribed.
pub async fn ready_handler(Extension(state): Extension<Arc<AppState>>) -> impl IntoResponse {
    let ready = state.is_ready();
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let mut body = json!({ "ready": ready });
    if let Some(stats) = state.dispatcher_stats() {
        body["dispatcher"] = json!({
            "queued": stats.queued,
            "in_flight": stats.in_flight,
            "ceiling": stats.ceiling,
            "completed": stats.completed,
            "failed": stats.failed,
            "write_back_errors": stats.write_back_errors,
            "malformed": stats.malformed,
        });
    }
    (status, Json(body))
}
