use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::{json, Value};

use shared_models::{AppError, AppState};
use shared_utils::clock::{format_time, iso_date, Clock};
use shared_utils::sanitize_doc_id;

use crate::models::{DaySlotsResponse, DoctorDelayResponse, SlotView, UpdateConsultationStatusRequest};
use crate::services::capacity::{advance_capacity_total, reserved_indices, session_capacities};
use crate::services::delay::{doctor_delay_minutes, effective_session_start, BreakInterval};
use crate::services::directory::{DirectoryError, DoctorDirectoryService};
use crate::services::slots::{generate_day_slots, SlotError};

#[derive(Debug, Deserialize)]
pub struct SlotsQuery {
    pub date: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
pub struct DelayQuery {
    pub clinic_id: String,
}

impl From<DirectoryError> for AppError {
    fn from(err: DirectoryError) -> Self {
        match err {
            DirectoryError::DoctorNotFound(id) => AppError::NotFound(format!("doctor {}", id)),
            DirectoryError::ClinicNotFound(id) => AppError::NotFound(format!("clinic {}", id)),
            other => AppError::Internal(other.to_string()),
        }
    }
}

#[axum::debug_handler]
pub async fn get_doctor_slots(
    State(state): State<AppState>,
    Path(doctor_id): Path<String>,
    Query(query): Query<SlotsQuery>,
) -> Result<Json<DaySlotsResponse>, AppError> {
    let directory = DoctorDirectoryService::new(state.store.clone());
    let doctor = directory.get_doctor(&doctor_id).await?;

    let date = query.date.unwrap_or_else(|| state.clock.today());
    let day = generate_day_slots(&doctor, date).map_err(|e| match e {
        SlotError::NotAvailable(d) => AppError::NotFound(format!("no availability on {}", d)),
    })?;

    let now = state.clock.now();
    let capacities = session_capacities(&day, now);
    let reserved = reserved_indices(&capacities);

    let slots = day
        .slots
        .iter()
        .map(|slot| SlotView {
            absolute_index: slot.absolute_index,
            session_index: slot.session_index,
            time: format_time(slot.time.time()),
            reserved_for_walk_in: reserved.contains(&slot.absolute_index),
        })
        .collect();

    Ok(Json(DaySlotsResponse {
        date: iso_date(date),
        slot_minutes: day.slot_minutes,
        slots,
        advance_capacity: advance_capacity_total(&capacities),
        walk_in_capacity: capacities.iter().map(|c| c.walk_in_capacity).sum(),
    }))
}

#[axum::debug_handler]
pub async fn get_doctor_delay(
    State(state): State<AppState>,
    Path(doctor_id): Path<String>,
    Query(query): Query<DelayQuery>,
) -> Result<Json<DoctorDelayResponse>, AppError> {
    let directory = DoctorDirectoryService::new(state.store.clone());
    let doctor = directory.get_doctor(&doctor_id).await?;

    let now = state.clock.now();
    let date = now.date();
    let date_iso = iso_date(date);

    let day = match generate_day_slots(&doctor, date) {
        Ok(day) => day,
        Err(SlotError::NotAvailable(_)) => {
            return Ok(Json(DoctorDelayResponse {
                doctor_id,
                delay_minutes: 0,
                session_index: None,
            }));
        }
    };

    let active = day.sessions.iter().find(|session| {
        now <= session.effective_end && now >= session.start - chrono::Duration::minutes(30)
    });
    let Some(session) = active else {
        return Ok(Json(DoctorDelayResponse {
            doctor_id,
            delay_minutes: 0,
            session_index: None,
        }));
    };

    let breaks: Vec<BreakInterval> = doctor
        .breaks_for(&date_iso)
        .iter()
        .filter(|b| b.session_index == session.index)
        .map(|b| BreakInterval {
            start: date.and_time(b.start_time),
            end: date.and_time(b.end_time),
        })
        .collect();

    let counter_id = format!(
        "{}_{}",
        sanitize_doc_id(&format!(
            "{}_{}_{}",
            query.clinic_id, doctor.name, date_iso
        )),
        session.index
    );
    let completed = state
        .store
        .get(&format!("consultationCounters/{}", counter_id))
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?
        .and_then(|doc| doc.data.get("count").and_then(Value::as_u64))
        .unwrap_or(0) as u32;

    let effective_start = effective_session_start(session.start, &breaks);
    let delay_minutes = doctor_delay_minutes(
        now,
        effective_start,
        doctor.consultation_status,
        completed,
        doctor.average_consultation_minutes,
        &breaks,
    );

    Ok(Json(DoctorDelayResponse {
        doctor_id,
        delay_minutes,
        session_index: Some(session.index),
    }))
}

#[axum::debug_handler]
pub async fn update_consultation_status(
    State(state): State<AppState>,
    Path(doctor_id): Path<String>,
    Json(request): Json<UpdateConsultationStatusRequest>,
) -> Result<Json<Value>, AppError> {
    let directory = DoctorDirectoryService::new(state.store.clone());
    directory
        .set_consultation_status(&doctor_id, request.status)
        .await?;
    Ok(Json(json!({ "doctorId": doctor_id, "status": request.status })))
}
