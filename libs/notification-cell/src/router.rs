use axum::{routing::post, Router};

use shared_models::AppState;

use crate::handlers;

pub fn notification_routes(state: AppState) -> Router {
    Router::new()
        .route(
            "/consultation-started",
            post(handlers::consultation_started),
        )
        .route(
            "/consultation-completed",
            post(handlers::consultation_completed),
        )
        .route("/reminders/run", post(handlers::run_reminder_batches))
        .with_state(state)
}
