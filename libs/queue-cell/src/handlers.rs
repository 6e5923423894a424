use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;

use shared_models::{AppError, AppState};

use crate::models::QueueState;
use crate::services::projector::{QueueError, QueueProjectionService};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueQuery {
    pub clinic_id: String,
    pub doctor_id: String,
    #[serde(default)]
    pub session_index: usize,
}

impl From<QueueError> for AppError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::DoctorNotFound(id) => AppError::NotFound(format!("doctor {}", id)),
            QueueError::ClinicNotFound(id) => AppError::NotFound(format!("clinic {}", id)),
            other => AppError::Internal(other.to_string()),
        }
    }
}

#[axum::debug_handler]
pub async fn get_queue(
    State(state): State<AppState>,
    Query(query): Query<QueueQuery>,
) -> Result<Json<QueueState>, AppError> {
    let projector = QueueProjectionService::new(state.store.clone(), state.clock.clone());
    let queue = projector
        .queue_state(&query.clinic_id, &query.doctor_id, query.session_index)
        .await?;
    Ok(Json(queue))
}
