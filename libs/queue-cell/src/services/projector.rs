use std::cmp::Ordering;
use std::sync::Arc;

use chrono::{Duration, NaiveDateTime};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::debug;

use shared_store::{DocumentStore, Filter, Query, SortDirection, StoreError};
use shared_utils::clock::{iso_date, parse_date, parse_time, Clock};

use appointment_cell::models::{
    consultation_counter_path, Appointment, AppointmentStatus,
};
use doctor_cell::models::{Clinic, ConsultationStatus, Doctor};

use crate::models::{QueueOrdering, QueueState};

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("doctor not found: {0}")]
    DoctorNotFound(String),

    #[error("clinic not found: {0}")]
    ClinicNotFound(String),

    #[error("malformed record: {0}")]
    Malformed(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Total order for queue views. Both modes end on the row id so equal keys
/// cannot reorder between refreshes.
pub fn compare_queue(a: &Appointment, b: &Appointment, ordering: QueueOrdering) -> Ordering {
    match ordering {
        QueueOrdering::Advanced => (a.session_index, a.slot_index, a.numeric_token, &a.id).cmp(&(
            b.session_index,
            b.slot_index,
            b.numeric_token,
            &b.id,
        )),
        QueueOrdering::Classic => {
            let left = (a.classic_token_number.is_none(), &a.classic_token_number);
            let right = (b.classic_token_number.is_none(), &b.classic_token_number);
            left.cmp(&right)
                .then_with(|| a.slot_index.cmp(&b.slot_index))
                .then_with(|| a.id.cmp(&b.id))
        }
    }
}

pub fn sort_queue(appointments: &mut [Appointment], ordering: QueueOrdering) {
    appointments.sort_by(|a, b| compare_queue(a, b, ordering));
}

/// Project the live queue for one session out of the day's appointment rows.
pub fn project_queue(
    appointments: &[Appointment],
    session_index: usize,
    ordering: QueueOrdering,
    doctor_status: ConsultationStatus,
    consultation_count: u32,
    now: NaiveDateTime,
    slot_minutes: u32,
) -> QueueState {
    let session_rows: Vec<&Appointment> = appointments
        .iter()
        .filter(|a| a.session_index == session_index)
        .collect();

    let mut arrived: Vec<Appointment> = session_rows
        .iter()
        .filter(|a| a.status == AppointmentStatus::Confirmed && !a.is_break_block())
        .map(|a| (*a).clone())
        .collect();
    sort_queue(&mut arrived, ordering);

    let mut buffer: Vec<Appointment> = session_rows
        .iter()
        .filter(|a| a.is_in_buffer && a.is_active() && !a.is_break_block())
        .map(|a| (*a).clone())
        .collect();
    sort_queue(&mut buffer, ordering);

    let mut skipped: Vec<Appointment> = session_rows
        .iter()
        .filter(|a| a.status == AppointmentStatus::Skipped)
        .map(|a| (*a).clone())
        .collect();
    sort_queue(&mut skipped, ordering);

    let next_break_duration_minutes = match doctor_status {
        ConsultationStatus::In => None,
        ConsultationStatus::Out => remaining_break_minutes(&session_rows, now, slot_minutes),
    };

    QueueState {
        current_consultation: buffer.first().cloned(),
        arrived,
        buffer,
        skipped,
        consultation_count,
        next_break_duration_minutes,
    }
}

/// Minutes until the end of the contiguous BreakBlock run overlapping `now`,
/// rounded up. `None` when no break is in progress.
fn remaining_break_minutes(
    session_rows: &[&Appointment],
    now: NaiveDateTime,
    slot_minutes: u32,
) -> Option<i64> {
    let mut starts: Vec<NaiveDateTime> = session_rows
        .iter()
        .filter(|a| a.is_break_block())
        .filter_map(|a| {
            let date = parse_date(&a.date).ok()?;
            let time = parse_time(&a.time).ok()?;
            Some(date.and_time(time))
        })
        .collect();
    if starts.is_empty() {
        return None;
    }
    starts.sort();
    starts.dedup();

    let step = Duration::minutes(slot_minutes as i64);
    let mut run_start = starts[0];
    let mut run_end = starts[0] + step;
    for start in &starts[1..] {
        if *start == run_end {
            run_end += step;
            continue;
        }
        if run_start <= now && now < run_end {
            break;
        }
        run_start = *start;
        run_end = *start + step;
    }

    if run_start <= now && now < run_end {
        let seconds = (run_end - now).num_seconds();
        Some((seconds + 59) / 60)
    } else {
        None
    }
}

pub struct QueueProjectionService {
    store: Arc<dyn DocumentStore>,
    clock: Arc<dyn Clock>,
}

impl QueueProjectionService {
    pub fn new(store: Arc<dyn DocumentStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub async fn queue_state(
        &self,
        clinic_id: &str,
        doctor_id: &str,
        session_index: usize,
    ) -> Result<QueueState, QueueError> {
        let clinic_doc = self
            .store
            .get(&format!("clinics/{}", clinic_id))
            .await?
            .ok_or_else(|| QueueError::ClinicNotFound(clinic_id.to_string()))?;
        let clinic: Clinic = serde_json::from_value(clinic_doc.data)
            .map_err(|e| QueueError::Malformed(e.to_string()))?;

        let doctor_doc = self
            .store
            .get(&format!("doctors/{}", doctor_id))
            .await?
            .ok_or_else(|| QueueError::DoctorNotFound(doctor_id.to_string()))?;
        let doctor: Doctor = serde_json::from_value(doctor_doc.data)
            .map_err(|e| QueueError::Malformed(e.to_string()))?;

        let date_iso = self.clock.today_iso();
        let docs = self
            .store
            .query(
                &Query::collection("appointments")
                    .filter(Filter::Eq("clinicId".into(), json!(clinic_id)))
                    .filter(Filter::Eq("doctorId".into(), json!(doctor_id)))
                    .filter(Filter::Eq("date".into(), json!(date_iso)))
                    .order("slotIndex", SortDirection::Asc),
            )
            .await?;
        let appointments: Vec<Appointment> = docs
            .into_iter()
            .filter_map(|doc| serde_json::from_value(doc.data).ok())
            .collect();

        let counter_path =
            consultation_counter_path(clinic_id, &doctor.name, &iso_date(self.clock.today()), session_index);
        let consultation_count = self
            .store
            .get(&counter_path)
            .await?
            .and_then(|doc| doc.data.get("count").and_then(Value::as_u64))
            .unwrap_or(0) as u32;

        debug!(
            clinic = clinic_id,
            doctor = doctor_id,
            session = session_index,
            rows = appointments.len(),
            "projecting queue"
        );

        Ok(project_queue(
            &appointments,
            session_index,
            clinic.token_distribution.into(),
            doctor.consultation_status,
            consultation_count,
            self.clock.now(),
            doctor.average_consultation_minutes,
        ))
    }
}
