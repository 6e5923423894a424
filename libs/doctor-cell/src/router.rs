use axum::{
    routing::{get, patch},
    Router,
};

use shared_models::AppState;

use crate::handlers;

pub fn doctor_routes(state: AppState) -> Router {
    Router::new()
        .route("/{doctor_id}/slots", get(handlers::get_doctor_slots))
        .route("/{doctor_id}/delay", get(handlers::get_doctor_delay))
        .route(
            "/{doctor_id}/status",
            patch(handlers::update_consultation_status),
        )
        .with_state(state)
}
