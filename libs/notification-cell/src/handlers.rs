use axum::{extract::State, Json};
use serde::Deserialize;
use serde_json::{json, Value};

use shared_models::{AppError, AppState};

use crate::services::dispatcher::NotificationDispatcher;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsultationStartedBody {
    pub clinic_id: String,
    pub doctor_id: String,
    #[serde(default)]
    pub session_index: usize,
}

/// Staff tools call this when the doctor flips Out → In.
#[axum::debug_handler]
pub async fn consultation_started(
    State(state): State<AppState>,
    Json(body): Json<ConsultationStartedBody>,
) -> Result<Json<Value>, AppError> {
    let dispatcher =
        NotificationDispatcher::new(&state.config, state.store.clone(), state.clock.clone());
    let sent = dispatcher
        .consultation_started_fanout(&body.clinic_id, &body.doctor_id, body.session_index)
        .await;
    Ok(Json(json!({ "sent": sent })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsultationCompletedBody {
    pub clinic_id: String,
    pub doctor_id: String,
    pub appointment_id: String,
}

#[axum::debug_handler]
pub async fn consultation_completed(
    State(state): State<AppState>,
    Json(body): Json<ConsultationCompletedBody>,
) -> Result<Json<Value>, AppError> {
    let dispatcher =
        NotificationDispatcher::new(&state.config, state.store.clone(), state.clock.clone());
    let sent = dispatcher
        .people_ahead_fanout(&body.clinic_id, &body.doctor_id, &body.appointment_id)
        .await;
    Ok(Json(json!({ "sent": sent })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReminderBatchBody {
    pub clinic_id: String,
    pub doctor_id: String,
}

/// Periodic trigger for the batch reminder windows.
#[axum::debug_handler]
pub async fn run_reminder_batches(
    State(state): State<AppState>,
    Json(body): Json<ReminderBatchBody>,
) -> Result<Json<Value>, AppError> {
    let dispatcher =
        NotificationDispatcher::new(&state.config, state.store.clone(), state.clock.clone());
    let sent = dispatcher
        .run_reminder_batches(&body.clinic_id, &body.doctor_id)
        .await;
    Ok(Json(json!({ "sent": sent })))
}
