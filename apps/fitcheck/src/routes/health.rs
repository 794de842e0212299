use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::state::AppState;

/// GET /health
/// Returns service status, version and the configured backends.
pub async fn health_handler(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "fitcheck",
        "completion_backend": state.analyzer.llm.backend(),
        "extractor": state.analyzer.extractor.name(),
        "model": state.config.model_id,
    }))
}
