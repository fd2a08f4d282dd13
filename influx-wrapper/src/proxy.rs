pub use crate::last_values::last_values_handler;

use axum::{response::IntoResponse, Json};
use serde_json::json;

pub async fn health_handler() -> impl IntoResponse {
    // Liveness only, InfluxDB is not contacted.
    Json(json!({ "status": "ok" }))
}
