use std::sync::Arc;

use axum::extract::State;
use axum::response::Json;
use serde_json::{json, Value};

use crate::state::AppState;

/// Health check handler.
/// Returns JSON with status and a short config summary.
pub fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let config = &state.config;
    Json(json!({
        "status": "lmbridge is running",
        "upstream": state.upstream.base_url(),
        "config": {
            "upstream_timeout_secs": config.upstream.timeout_secs,
            "write_timeout_secs": config.server.write_timeout_secs,
            "model_aliases": config.model_aliases.len(),
            "log_level": config.features.log_level,
        }
    }))
}
