//! Doctor breaks over the day's slot grid.
//!
//! A break is stored twice: as a `BreakPeriod` on the doctor document and as
//! dummy BreakBlock appointment rows occupying the covered slots, so the
//! scheduler and the queue view treat break time exactly like consumed
//! consultation time. Empty slots absorb a break for free; only displaced
//! appointments extend the session.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{Duration, NaiveDate, NaiveDateTime};
use serde_json::json;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use shared_store::{DocumentStore, StoreTransaction};
use shared_utils::clock::{format_time, iso_date, Clock};

use doctor_cell::models::{AvailabilityExtension, BreakPeriod, Doctor, SessionExtension};
use doctor_cell::services::delay::BreakInterval;
use doctor_cell::services::slots::{generate_day_slots, DaySlots, PhysicalSlot};

use crate::models::{
    Appointment, AppointmentStatus, BookedVia, BookingError, BREAK_PATIENT_ID,
};
use crate::services::allocator::fmt_ts;

const MAX_BREAKS_PER_SESSION: usize = 3;

#[derive(Debug, Clone)]
pub struct AddBreakRequest {
    pub clinic_id: String,
    pub doctor_id: String,
    pub date: NaiveDate,
    pub session_index: usize,
    /// Start times of the physical slots the break covers.
    pub slot_times: Vec<NaiveDateTime>,
}

#[derive(Debug, Clone)]
pub struct BreakOutcome {
    pub break_period: BreakPeriod,
    pub extension_minutes: u32,
    /// The caller should re-run the walk-in rebalance when true.
    pub rebalance_needed: bool,
}

pub struct BreakService {
    store: Arc<dyn DocumentStore>,
    clock: Arc<dyn Clock>,
}

impl BreakService {
    pub fn new(store: Arc<dyn DocumentStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    #[instrument(skip(self), fields(doctor = %request.doctor_id, session = request.session_index))]
    pub async fn add_break(&self, request: AddBreakRequest) -> Result<BreakOutcome, BookingError> {
        let date_iso = iso_date(request.date);
        let doctor_path = format!("doctors/{}", request.doctor_id);

        let mut tx = self.store.begin().await?;
        let doctor_doc = tx.get(&doctor_path).await?.ok_or_else(|| {
            BookingError::InvalidInput(format!("unknown doctor {}", request.doctor_id))
        })?;
        let mut doctor: Doctor = serde_json::from_value(doctor_doc.data)
            .map_err(|e| BookingError::Unknown(format!("malformed doctor: {}", e)))?;

        let day = generate_day_slots(&doctor, request.date)?;
        let session = *day
            .session(request.session_index)
            .ok_or_else(|| BookingError::InvalidInput("unknown session".into()))?;

        let covered = resolve_covered_slots(&day, request.session_index, &request.slot_times)?;
        let start = covered[0].time;
        let end = covered[covered.len() - 1].time + Duration::minutes(day.slot_minutes as i64);

        if start < session.start || end > session.effective_end {
            return Err(BookingError::InvalidBreak(
                "break must lie inside the session window".into(),
            ));
        }

        let existing: Vec<BreakPeriod> = doctor
            .breaks_for(&date_iso)
            .iter()
            .filter(|b| b.session_index == request.session_index)
            .cloned()
            .collect();
        for other in &existing {
            let other_start = request.date.and_time(other.start_time);
            let other_end = request.date.and_time(other.end_time);
            if start < other_end && end > other_start {
                return Err(BookingError::InvalidBreak(
                    "break overlaps an existing break".into(),
                ));
            }
        }
        // The cap bounds the record count after the request lands: a request
        // that merges into an adjacent break never adds a record, so it stays
        // legal even when the session is already at the cap.
        if existing.len() >= MAX_BREAKS_PER_SESSION
            && !merges_into_existing(&existing, request.date, start, end)
        {
            return Err(BookingError::InvalidBreak(format!(
                "a session allows at most {} breaks",
                MAX_BREAKS_PER_SESSION
            )));
        }

        // Count displaced appointments: active rows sitting on covered slots.
        let appointments = self
            .read_day_appointments(&mut tx, &request.clinic_id, &request.doctor_id, &date_iso)
            .await?;
        let covered_indices: HashSet<usize> =
            covered.iter().map(|slot| slot.absolute_index).collect();
        let displaced = appointments
            .iter()
            .filter(|a| a.is_active() && covered_indices.contains(&a.slot_index))
            .count();
        let extension_minutes = displaced as u32 * day.slot_minutes;

        // Merge with an adjacent break of the same session, else mint a new one.
        let slot_time_strings: Vec<String> = covered.iter().map(|s| fmt_ts(s.time)).collect();
        let (break_period, absorbed_id) = merge_or_create(
            &existing,
            request.date,
            request.session_index,
            start,
            end,
            slot_time_strings,
            extension_minutes,
        );

        // Materialise the BreakBlock dummies.
        let now = self.clock.now();
        for slot in &covered {
            let block = break_block_row(
                &request.clinic_id,
                &request.doctor_id,
                &date_iso,
                slot,
                &break_period.id,
                now,
            );
            tx.set(&block.doc_path(), json!(block));
        }

        // Update the doctor document: break list and session extension.
        let day_breaks = doctor
            .break_periods
            .entry(date_iso.clone())
            .or_default();
        day_breaks.retain(|b| Some(&b.id) != absorbed_id.as_ref());
        day_breaks.push(break_period.clone());
        day_breaks.sort_by_key(|b| b.start_time);

        if extension_minutes > 0 || doctor.extension_for(&date_iso, session.index).is_none() {
            let base_end = doctor
                .extension_for(&date_iso, session.index)
                .map(|t| request.date.and_time(t))
                .unwrap_or(session.scheduled_end);
            let new_end = base_end + Duration::minutes(extension_minutes as i64);
            doctor
                .availability_extensions
                .entry(date_iso.clone())
                .or_insert_with(AvailabilityExtension::default)
                .sessions
                .insert(
                    session.index.to_string(),
                    SessionExtension { new_end_time: new_end.time() },
                );
        }

        tx.set(&doctor_path, json!(doctor));
        tx.commit().await?;

        info!(
            break_id = %break_period.id,
            displaced,
            extension_minutes,
            "break added"
        );

        Ok(BreakOutcome {
            break_period,
            extension_minutes,
            rebalance_needed: extension_minutes > 0,
        })
    }

    #[instrument(skip(self))]
    pub async fn remove_break(
        &self,
        clinic_id: &str,
        doctor_id: &str,
        date: NaiveDate,
        break_id: &str,
    ) -> Result<BreakOutcome, BookingError> {
        let date_iso = iso_date(date);
        let doctor_path = format!("doctors/{}", doctor_id);

        let mut tx = self.store.begin().await?;
        let doctor_doc = tx
            .get(&doctor_path)
            .await?
            .ok_or_else(|| BookingError::InvalidInput(format!("unknown doctor {}", doctor_id)))?;
        let mut doctor: Doctor = serde_json::from_value(doctor_doc.data)
            .map_err(|e| BookingError::Unknown(format!("malformed doctor: {}", e)))?;

        let day_breaks = doctor.break_periods.get_mut(&date_iso).ok_or_else(|| {
            BookingError::InvalidBreak(format!("no breaks recorded on {}", date_iso))
        })?;
        let position = day_breaks
            .iter()
            .position(|b| b.id == break_id)
            .ok_or_else(|| BookingError::InvalidBreak(format!("unknown break {}", break_id)))?;
        let removed = day_breaks.remove(position);

        // Delete the dummies belonging to this break.
        let appointments = self
            .read_day_appointments(&mut tx, clinic_id, doctor_id, &date_iso)
            .await?;
        for block in appointments
            .iter()
            .filter(|a| a.is_break_block() && a.break_id.as_deref() == Some(break_id))
        {
            tx.delete(&block.doc_path());
        }

        // Give back the extension this break took.
        if removed.extension_minutes > 0 {
            if let Some(extension) = doctor.availability_extensions.get_mut(&date_iso) {
                let key = removed.session_index.to_string();
                if let Some(session_ext) = extension.sessions.get_mut(&key) {
                    let rolled_back = date
                        .and_time(session_ext.new_end_time)
                        - Duration::minutes(removed.extension_minutes as i64);
                    session_ext.new_end_time = rolled_back.time();
                }
            }
        }

        tx.set(&doctor_path, json!(doctor));
        tx.commit().await?;

        debug!(break_id, "break removed");

        Ok(BreakOutcome {
            extension_minutes: removed.extension_minutes,
            rebalance_needed: true,
            break_period: removed,
        })
    }

    async fn read_day_appointments(
        &self,
        tx: &mut Box<dyn StoreTransaction>,
        clinic_id: &str,
        doctor_id: &str,
        date_iso: &str,
    ) -> Result<Vec<Appointment>, BookingError> {
        use shared_store::{Filter, Query};
        let docs = tx
            .query(
                &Query::collection("appointments")
                    .filter(Filter::Eq("clinicId".into(), json!(clinic_id)))
                    .filter(Filter::Eq("doctorId".into(), json!(doctor_id)))
                    .filter(Filter::Eq("date".into(), json!(date_iso))),
            )
            .await?;
        Ok(docs
            .into_iter()
            .filter_map(|doc| serde_json::from_value(doc.data).ok())
            .collect())
    }
}

/// Display helper: push a wall-clock time later by every break interval that
/// starts at or before the accumulating time.
pub fn apply_break_offsets(
    original: NaiveDateTime,
    intervals: &[BreakInterval],
) -> NaiveDateTime {
    let mut sorted: Vec<BreakInterval> = intervals.to_vec();
    sorted.sort_by_key(|interval| interval.start);

    let mut time = original;
    for interval in sorted {
        if interval.start <= time {
            time += Duration::minutes(interval.duration_minutes());
        }
    }
    time
}

fn resolve_covered_slots<'a>(
    day: &'a DaySlots,
    session_index: usize,
    slot_times: &[NaiveDateTime],
) -> Result<Vec<&'a PhysicalSlot>, BookingError> {
    if slot_times.is_empty() {
        return Err(BookingError::InvalidBreak(
            "a break must cover at least one slot".into(),
        ));
    }

    let mut covered = Vec::with_capacity(slot_times.len());
    for time in slot_times {
        let slot = day
            .slots
            .iter()
            .find(|slot| slot.session_index == session_index && slot.time == *time)
            .ok_or_else(|| {
                BookingError::InvalidBreak(format!(
                    "{} is not a slot of session {}",
                    format_time(time.time()),
                    session_index
                ))
            })?;
        covered.push(slot);
    }
    covered.sort_by_key(|slot| slot.absolute_index);
    covered.dedup_by_key(|slot| slot.absolute_index);

    let contiguous = covered
        .windows(2)
        .all(|pair| pair[1].absolute_index == pair[0].absolute_index + 1);
    if !contiguous {
        return Err(BookingError::InvalidBreak(
            "break slots must be contiguous".into(),
        ));
    }

    Ok(covered)
}

fn is_adjacent(other: &BreakPeriod, date: NaiveDate, start: NaiveDateTime, end: NaiveDateTime) -> bool {
    let other_start = date.and_time(other.start_time);
    let other_end = date.and_time(other.end_time);
    other_end == start || end == other_start
}

/// Would this interval be absorbed into an existing break instead of adding
/// a record? Shares the adjacency rule with `merge_or_create`.
fn merges_into_existing(
    existing: &[BreakPeriod],
    date: NaiveDate,
    start: NaiveDateTime,
    end: NaiveDateTime,
) -> bool {
    existing.iter().any(|other| is_adjacent(other, date, start, end))
}

/// A new interval touching an existing break (`a.end == b.start`) merges into
/// it instead of creating a fourth record.
fn merge_or_create(
    existing: &[BreakPeriod],
    date: NaiveDate,
    session_index: usize,
    start: NaiveDateTime,
    end: NaiveDateTime,
    mut slot_times: Vec<String>,
    extension_minutes: u32,
) -> (BreakPeriod, Option<String>) {
    let duration = (end - start).num_minutes() as u32;

    for other in existing {
        if is_adjacent(other, date, start, end) {
            let other_start = date.and_time(other.start_time);
            let other_end = date.and_time(other.end_time);
            let mut merged = other.clone();
            merged.start_time = other_start.min(start).time();
            merged.end_time = other_end.max(end).time();
            merged.duration_minutes = other.duration_minutes + duration;
            merged.extension_minutes = other.extension_minutes + extension_minutes;
            merged.slot_times.append(&mut slot_times);
            merged.slot_times.sort();
            return (merged.clone(), Some(other.id.clone()));
        }
    }

    (
        BreakPeriod {
            id: Uuid::new_v4().to_string(),
            session_index,
            start_time: start.time(),
            end_time: end.time(),
            duration_minutes: duration,
            slot_times,
            extension_minutes,
        },
        None,
    )
}

fn break_block_row(
    clinic_id: &str,
    doctor_id: &str,
    date_iso: &str,
    slot: &PhysicalSlot,
    break_id: &str,
    now: NaiveDateTime,
) -> Appointment {
    Appointment {
        id: Uuid::new_v4().to_string(),
        clinic_id: clinic_id.to_string(),
        doctor_id: doctor_id.to_string(),
        patient_id: BREAK_PATIENT_ID.to_string(),
        date: date_iso.to_string(),
        time: format_time(slot.time.time()),
        arrive_by_time: None,
        booked_via: BookedVia::BreakBlock,
        status: AppointmentStatus::Completed,
        slot_index: slot.absolute_index,
        session_index: slot.session_index,
        numeric_token: 0,
        token_number: String::new(),
        classic_token_number: None,
        cancelled_by_break: true,
        is_in_buffer: false,
        is_force_booked: false,
        cut_off_time: None,
        no_show_time: None,
        break_id: Some(break_id.to_string()),
        reminder_evening_sent: false,
        reminder_morning_sent: false,
        booked_notification_sent: false,
        created_at: Some(fmt_ts(now)),
    }
}
