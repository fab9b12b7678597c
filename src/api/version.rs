//! Version and health endpoints

use axum::Json;
use serde_json::{json, Value};

/// GET /version
pub async fn version() -> Json<Value> {
    Json(json!({ "version": crate::VERSION }))
}

/// GET /health
pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "version": crate::VERSION }))
}
