use axum::{
    routing::{delete, patch, post},
    Router,
};

use shared_models::AppState;

use crate::handlers;

pub fn appointment_routes(state: AppState) -> Router {
    Router::new()
        .route("/advance", post(handlers::book_advance))
        .route("/walk-in", post(handlers::book_walk_in))
        .route("/walk-in/preview", post(handlers::preview_walk_in))
        .route("/rebalance", post(handlers::rebalance))
        .route("/{appointment_id}/cancel", post(handlers::cancel_appointment))
        .route("/{appointment_id}/status", patch(handlers::update_appointment_status))
        .route("/{appointment_id}/buffer", patch(handlers::set_in_buffer))
        .route("/breaks", post(handlers::add_break))
        .route("/breaks/{break_id}", delete(handlers::remove_break))
        .with_state(state)
}
