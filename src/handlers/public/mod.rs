// handlers/public/mod.rs - Public handlers (no authentication required)
//
// Service descriptor and liveness only; nothing here touches task data.
use axum::response::Json;
use chrono::Utc;
use serde_json::{json, Value};

/// GET / - service descriptor
pub async fn root() -> Json<Value> {
    Json(json!({
        "name": "Todo API",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Multi-tenant task list service",
        "endpoints": {
            "home": "/ (public)",
            "health": "/health (public)",
            "todos": "/todos[?status=] (protected: GET, POST)",
            "todo": "/todos/:id (protected: GET, PUT, DELETE)",
        }
    }))
}

/// GET /health - liveness; does not probe the store
pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "timestamp": Utc::now(),
    }))
}
