use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;

use shared_models::{AppError, AppState};
use shared_utils::clock::parse_time;

use crate::models::{
    BookAdvanceRequest, BookWalkInRequest, BookingError, BookingResult, WalkInPreview,
};
use crate::services::allocator::SlotAllocatorService;
use crate::services::breaks::{AddBreakRequest, BreakService};

impl From<BookingError> for AppError {
    fn from(err: BookingError) -> Self {
        match err {
            BookingError::NoWalkInSlots
            | BookingError::NoCandidate
            | BookingError::ReservationConflict
            | BookingError::DuplicateAppointment => AppError::Conflict(err.to_string()),
            BookingError::CapacityReached => AppError::CapacityReached(err.to_string()),
            BookingError::NotAvailable => AppError::NotFound(err.to_string()),
            BookingError::InvalidBreak(_) | BookingError::InvalidInput(_) => {
                AppError::BadRequest(err.to_string())
            }
            BookingError::Timeout => AppError::Timeout(err.to_string()),
            BookingError::PermissionDenied(msg) => AppError::PermissionDenied(msg),
            BookingError::Unknown(msg) => AppError::Internal(msg),
        }
    }
}

#[axum::debug_handler]
pub async fn book_advance(
    State(state): State<AppState>,
    Json(request): Json<BookAdvanceRequest>,
) -> Result<Json<BookingResult>, AppError> {
    let allocator = SlotAllocatorService::new(state.store.clone(), state.clock.clone());
    let result = allocator.book_advance(request).await?;
    Ok(Json(result))
}

#[axum::debug_handler]
pub async fn book_walk_in(
    State(state): State<AppState>,
    Json(request): Json<BookWalkInRequest>,
) -> Result<Json<BookingResult>, AppError> {
    let allocator = SlotAllocatorService::new(state.store.clone(), state.clock.clone());
    let result = allocator.book_walk_in(request).await?;
    Ok(Json(result))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewWalkInRequest {
    pub clinic_id: String,
    pub doctor_id: String,
    #[serde(default)]
    pub force_book: bool,
}

#[axum::debug_handler]
pub async fn preview_walk_in(
    State(state): State<AppState>,
    Json(request): Json<PreviewWalkInRequest>,
) -> Result<Json<WalkInPreview>, AppError> {
    let allocator = SlotAllocatorService::new(state.store.clone(), state.clock.clone());
    let preview = allocator
        .preview_walk_in_placement(&request.clinic_id, &request.doctor_id, request.force_book)
        .await?;
    Ok(Json(preview))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RebalanceRequest {
    pub clinic_id: String,
    pub doctor_id: String,
    pub date: NaiveDate,
}

#[axum::debug_handler]
pub async fn rebalance(
    State(state): State<AppState>,
    Json(request): Json<RebalanceRequest>,
) -> Result<Json<Value>, AppError> {
    let allocator = SlotAllocatorService::new(state.store.clone(), state.clock.clone());
    let updates = allocator
        .rebalance_walk_ins(&request.clinic_id, &request.doctor_id, request.date)
        .await?;
    Ok(Json(json!({ "updatedRows": updates })))
}

#[axum::debug_handler]
pub async fn cancel_appointment(
    State(state): State<AppState>,
    Path(appointment_id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let allocator = SlotAllocatorService::new(state.store.clone(), state.clock.clone());
    allocator.cancel_appointment(&appointment_id).await?;
    Ok(Json(json!({ "appointmentId": appointment_id, "status": "cancelled" })))
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusBody {
    pub status: crate::models::AppointmentStatus,
}

#[axum::debug_handler]
pub async fn update_appointment_status(
    State(state): State<AppState>,
    Path(appointment_id): Path<String>,
    Json(body): Json<UpdateStatusBody>,
) -> Result<Json<Value>, AppError> {
    let allocator = SlotAllocatorService::new(state.store.clone(), state.clock.clone());
    let appointment = allocator
        .update_appointment_status(&appointment_id, body.status)
        .await?;
    Ok(Json(json!(appointment)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BufferBody {
    pub in_buffer: bool,
}

#[axum::debug_handler]
pub async fn set_in_buffer(
    State(state): State<AppState>,
    Path(appointment_id): Path<String>,
    Json(body): Json<BufferBody>,
) -> Result<Json<Value>, AppError> {
    let allocator = SlotAllocatorService::new(state.store.clone(), state.clock.clone());
    allocator
        .set_in_buffer(&appointment_id, body.in_buffer)
        .await?;
    Ok(Json(json!({ "appointmentId": appointment_id, "inBuffer": body.in_buffer })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddBreakBody {
    pub clinic_id: String,
    pub doctor_id: String,
    pub date: NaiveDate,
    pub session_index: usize,
    /// Slot start times, `hh:mm AM/PM` or `HH:MM`.
    pub slot_times: Vec<String>,
}

#[axum::debug_handler]
pub async fn add_break(
    State(state): State<AppState>,
    Json(body): Json<AddBreakBody>,
) -> Result<Json<Value>, AppError> {
    let mut slot_times = Vec::with_capacity(body.slot_times.len());
    for raw in &body.slot_times {
        let time = parse_time(raw).map_err(|e| AppError::BadRequest(e.to_string()))?;
        slot_times.push(body.date.and_time(time));
    }

    let breaks = BreakService::new(state.store.clone(), state.clock.clone());
    let outcome = breaks
        .add_break(AddBreakRequest {
            clinic_id: body.clinic_id.clone(),
            doctor_id: body.doctor_id.clone(),
            date: body.date,
            session_index: body.session_index,
            slot_times,
        })
        .await?;

    if outcome.rebalance_needed {
        let allocator = SlotAllocatorService::new(state.store.clone(), state.clock.clone());
        if let Err(e) = allocator
            .rebalance_walk_ins(&body.clinic_id, &body.doctor_id, body.date)
            .await
        {
            warn!(error = %e, "rebalance after break failed; queue will settle on next pass");
        }
    }

    Ok(Json(json!({
        "break": outcome.break_period,
        "extensionMinutes": outcome.extension_minutes,
        "rebalanced": outcome.rebalance_needed,
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveBreakQuery {
    pub clinic_id: String,
    pub doctor_id: String,
    pub date: NaiveDate,
}

#[axum::debug_handler]
pub async fn remove_break(
    State(state): State<AppState>,
    Path(break_id): Path<String>,
    Query(query): Query<RemoveBreakQuery>,
) -> Result<Json<Value>, AppError> {
    let breaks = BreakService::new(state.store.clone(), state.clock.clone());
    let outcome = breaks
        .remove_break(&query.clinic_id, &query.doctor_id, query.date, &break_id)
        .await?;

    let allocator = SlotAllocatorService::new(state.store.clone(), state.clock.clone());
    if let Err(e) = allocator
        .rebalance_walk_ins(&query.clinic_id, &query.doctor_id, query.date)
        .await
    {
        warn!(error = %e, "rebalance after break removal failed");
    }

    Ok(Json(json!({
        "removed": break_id,
        "extensionMinutesReturned": outcome.extension_minutes,
    })))
}
