//! Liveness probe.

use axum::Json;

/// GET /health
pub async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "osduth-gateway",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
