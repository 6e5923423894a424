use axum::{routing::get, Router};

use shared_models::AppState;

use crate::handlers;

pub fn queue_routes(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::get_queue))
        .with_state(state)
}
