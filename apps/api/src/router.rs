use axum::{routing::get, Json, Router};
use serde_json::json;

use shared_models::AppState;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .nest("/api/appointments", appointment_cell::router::appointment_routes(state.clone()))
        .nest("/api/doctors", doctor_cell::router::doctor_routes(state.clone()))
        .nest("/api/queue", queue_cell::router::queue_routes(state.clone()))
        .nest(
            "/api/notifications",
            notification_cell::router::notification_routes(state),
        )
}

async fn health_check() -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "service": "clinic-token-api",
    }))
}
