use axum::{extract::State, http::StatusCode, response::Json};
use chrono::Utc;
use serde_json::json;

use crate::state::AppState;

pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "timestamp": Utc::now().to_rfc3339(),
            "connections": state.hub.connection_count(),
            "modelConfigured": state.model_configured(),
        })),
    )
}
