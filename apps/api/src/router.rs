use axum::{routing::get, Json, Router};
use serde_json::{json, Value};

use appointment_cell::router::appointment_routes;
use appointment_cell::AppState;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(|| async { "Amae scheduling API is running!" }))
        .route("/health", get(health))
        .merge(appointment_routes(state))
}

async fn health() -> Json<Value> {
    Json(json!({ "ok": true, "status": "healthy" }))
}
