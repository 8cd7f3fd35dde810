//! Liveness endpoint.

use crate::error::ok;
use axum::Json;
use serde_json::Value;

/// `GET /api/health` — always returns success once the server has bound its port.
pub async fn health() -> Json<Value> {
    ok(serde_json::json!({ "status": "ok" }))
}
