//! Transactional slot allocation: the single logical writer per
//! `(clinic, doctor, date)`.
//!
//! Every booking runs the same shape: parallel pre-reads, then a transaction
//! that re-reads the day under the store's snapshot, reserves the chosen slot
//! through its reservation document, and commits appointment + counter +
//! patient-profile writes atomically. Reservation contention aborts the
//! transaction and is retried with backoff.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, NaiveDate, NaiveDateTime};
use rand::Rng;
use serde_json::{json, Value};
use tokio::time::{sleep, timeout};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use shared_store::{Document, DocumentStore, FieldValue, Filter, Query, SortDirection,
    StoreTransaction};
use shared_utils::clock::{format_time, iso_date, Clock};

use doctor_cell::models::{Clinic, Doctor, TokenDistribution};
use doctor_cell::services::capacity::{advance_capacity_total, reserved_indices, session_capacities};
use doctor_cell::services::slots::{generate_day_slots, DaySlots, EffectiveSession};

use crate::models::{
    consultation_counter_path, counter_doc_path, reservation_doc_path, Appointment,
    AppointmentStatus, BookAdvanceRequest, BookWalkInRequest, BookedVia, BookingError,
    BookingResult, CounterKind, PlannedShift, ReservationStatus, SlotReservation, WalkInPreview,
    STALE_RESERVATION_SECS,
};
use crate::services::scheduler::{
    schedule_walk_ins, Occupant, ScheduleRequest, SlotShift, WalkInCandidate,
};
use crate::services::tokens::{format_advance_token, format_classic_token, format_walk_in_token};

const MAX_BOOKING_ATTEMPTS: u32 = 5;
const BOOKING_TIMEOUT_SECS: u64 = 30;
const RETRY_BASE_DELAY_MS: u64 = 100;
/// Advance bookings must land at least this far out.
const ADVANCE_LEAD_MINUTES: i64 = 60;
/// A session accepts walk-ins from this long before it starts.
const WALK_IN_EARLY_MINUTES: i64 = 30;
/// Persisted namespace for walk-ins pushed past a session's physical slots,
/// kept for compatibility with stored rows.
pub const OVERFLOW_BAND: usize = 10_000;
/// Walk-in numeric tokens start past the slot range by this offset.
const WALK_IN_TOKEN_BASE: u32 = 100;
const CUT_OFF_MINUTES: i64 = 15;
const NO_SHOW_MINUTES: i64 = 15;

pub struct SlotAllocatorService {
    store: Arc<dyn DocumentStore>,
    clock: Arc<dyn Clock>,
}

struct BookingContext {
    clinic: Clinic,
    doctor: Doctor,
}

impl SlotAllocatorService {
    pub fn new(store: Arc<dyn DocumentStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    // ==========================================================================
    // ADVANCE BOOKING
    // ==========================================================================

    #[instrument(skip(self), fields(clinic = %request.clinic_id, doctor = %request.doctor_id))]
    pub async fn book_advance(
        &self,
        request: BookAdvanceRequest,
    ) -> Result<BookingResult, BookingError> {
        match timeout(
            StdDuration::from_secs(BOOKING_TIMEOUT_SECS),
            self.book_advance_inner(request),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(BookingError::Timeout),
        }
    }

    async fn book_advance_inner(
        &self,
        request: BookAdvanceRequest,
    ) -> Result<BookingResult, BookingError> {
        let context = self
            .load_context(&request.clinic_id, &request.doctor_id, &request.patient_id)
            .await?;
        let day = generate_day_slots(&context.doctor, request.date)?;

        if let Some(preferred) = request.preferred_slot_index {
            if preferred >= day.slot_count() {
                return Err(BookingError::InvalidInput(format!(
                    "preferred slot {} out of range",
                    preferred
                )));
            }
        }

        for attempt in 1..=MAX_BOOKING_ATTEMPTS {
            match self.try_book_advance(&request, &context, &day).await {
                Err(BookingError::ReservationConflict) if attempt < MAX_BOOKING_ATTEMPTS => {
                    self.backoff(attempt).await;
                    continue;
                }
                other => return other,
            }
        }
        Err(BookingError::ReservationConflict)
    }

    async fn try_book_advance(
        &self,
        request: &BookAdvanceRequest,
        context: &BookingContext,
        day: &DaySlots,
    ) -> Result<BookingResult, BookingError> {
        let now = self.clock.now();
        let date_iso = iso_date(request.date);

        let mut tx = self.store.begin().await?;
        let appointments = self
            .read_day_appointments(&mut tx, &request.clinic_id, &request.doctor_id, &date_iso)
            .await?;

        self.check_duplicate(&appointments, &request.patient_id)?;

        let capacities = session_capacities(day, now);
        let advance_capacity = advance_capacity_total(&capacities);
        let active_future_advances = appointments
            .iter()
            .filter(|a| {
                a.booked_via == BookedVia::Advance
                    && a.is_active()
                    && a.slot_index < day.slot_count()
                    && day.slot_time(a.slot_index) >= now
            })
            .count();
        if active_future_advances >= advance_capacity {
            return Err(BookingError::CapacityReached);
        }

        let occupied: std::collections::HashSet<usize> = appointments
            .iter()
            .filter(|a| !matches!(a.status, AppointmentStatus::Cancelled))
            .map(|a| a.slot_index)
            .collect();
        let reserved = reserved_indices(&capacities);
        let lead = now + Duration::minutes(ADVANCE_LEAD_MINUTES);
        let preferred_session = request
            .preferred_slot_index
            .and_then(|i| day.session_of_slot(i));

        let mut candidates: Vec<usize> = day
            .slots
            .iter()
            .filter(|slot| {
                slot.time > lead
                    && !occupied.contains(&slot.absolute_index)
                    && !reserved.contains(&slot.absolute_index)
                    && preferred_session
                        .map(|session| slot.session_index == session)
                        .unwrap_or(true)
            })
            .map(|slot| slot.absolute_index)
            .collect();
        if let Some(preferred) = request.preferred_slot_index {
            candidates.sort_by_key(|&i| (i < preferred, i));
        }
        if candidates.is_empty() {
            return Err(BookingError::NoCandidate);
        }

        // Reads-before-writes: scan reservations first, stage writes after.
        let mut chosen = None;
        let mut stale_reservations = Vec::new();
        for index in candidates {
            let path =
                reservation_doc_path(&request.clinic_id, &context.doctor.name, &date_iso, index);
            match tx.get(&path).await? {
                Some(doc) => {
                    let reservation: SlotReservation = serde_json::from_value(doc.data)
                        .map_err(|e| BookingError::Unknown(e.to_string()))?;
                    if self.reservation_blocks(&reservation, now) {
                        continue;
                    }
                    stale_reservations.push(path.clone());
                }
                None => {}
            }
            chosen = Some((index, path));
            break;
        }
        let Some((slot_index, reservation_path)) = chosen else {
            return Err(BookingError::NoCandidate);
        };

        let slot = &day.slots[slot_index];
        let slot_time = slot.time;
        let numeric_token = slot_index as u32 + 1;
        let token_number = format_advance_token(slot.session_index, numeric_token);

        let (status, classic_token_number, classic_counter) =
            if context.clinic.token_distribution == TokenDistribution::Classic {
                let counter_path = counter_doc_path(
                    &request.clinic_id,
                    &context.doctor.name,
                    &date_iso,
                    CounterKind::ClassicSession(slot.session_index),
                );
                let current = self.read_counter(&mut tx, &counter_path).await?;
                let next = current + 1;
                (
                    AppointmentStatus::Confirmed,
                    Some(format_classic_token(next as u32)),
                    Some((counter_path, next)),
                )
            } else {
                (AppointmentStatus::Pending, None, None)
            };

        let appointment = Appointment {
            id: Uuid::new_v4().to_string(),
            clinic_id: request.clinic_id.clone(),
            doctor_id: request.doctor_id.clone(),
            patient_id: request.patient_id.clone(),
            date: date_iso.clone(),
            time: format_time(slot_time.time()),
            arrive_by_time: Some(format_time(slot_time.time())),
            booked_via: BookedVia::Advance,
            status,
            slot_index,
            session_index: slot.session_index,
            numeric_token,
            token_number,
            classic_token_number,
            cancelled_by_break: false,
            is_in_buffer: false,
            is_force_booked: false,
            cut_off_time: Some(format_time(
                (slot_time - Duration::minutes(CUT_OFF_MINUTES)).time(),
            )),
            no_show_time: Some(format_time(
                (slot_time + Duration::minutes(NO_SHOW_MINUTES)).time(),
            )),
            break_id: None,
            reminder_evening_sent: false,
            reminder_morning_sent: false,
            booked_notification_sent: false,
            created_at: Some(fmt_ts(now)),
        };

        for path in stale_reservations {
            tx.delete(&path);
        }
        tx.set(
            &reservation_path,
            json!(SlotReservation {
                reserved_at: fmt_ts(now),
                reserved_by: request.patient_id.clone(),
                status: ReservationStatus::Booked,
                appointment_id: Some(appointment.id.clone()),
                clinic_id: request.clinic_id.clone(),
                doctor_id: request.doctor_id.clone(),
                date: date_iso.clone(),
                slot_index,
            }),
        );
        tx.set(&appointment.doc_path(), json!(appointment));
        if let Some((counter_path, next)) = classic_counter {
            tx.set(&counter_path, json!({ "count": next }));
        }
        self.stage_patient_profile_update(&mut tx, request.patient_id.as_str(), &appointment);

        tx.commit().await?;

        info!(
            appointment_id = %appointment.id,
            token = %appointment.token_number,
            slot_index,
            "advance booking committed"
        );

        Ok(BookingResult {
            appointment,
            patients_ahead: None,
            estimated_time: None,
        })
    }

    // ==========================================================================
    // WALK-IN BOOKING
    // ==========================================================================

    #[instrument(skip(self), fields(clinic = %request.clinic_id, doctor = %request.doctor_id))]
    pub async fn book_walk_in(
        &self,
        request: BookWalkInRequest,
    ) -> Result<BookingResult, BookingError> {
        match timeout(
            StdDuration::from_secs(BOOKING_TIMEOUT_SECS),
            self.book_walk_in_inner(request),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(BookingError::Timeout),
        }
    }

    async fn book_walk_in_inner(
        &self,
        request: BookWalkInRequest,
    ) -> Result<BookingResult, BookingError> {
        let context = self
            .load_context(&request.clinic_id, &request.doctor_id, &request.patient_id)
            .await?;
        let now = self.clock.now();
        let date = now.date();
        let day = generate_day_slots(&context.doctor, date)?;

        let session_index = self.resolve_walk_in_session(&day, now, request.force_book)?;

        for attempt in 1..=MAX_BOOKING_ATTEMPTS {
            match self
                .try_book_walk_in(&request, &context, &day, session_index)
                .await
            {
                Err(BookingError::ReservationConflict) if attempt < MAX_BOOKING_ATTEMPTS => {
                    self.backoff(attempt).await;
                    continue;
                }
                other => return other,
            }
        }
        Err(BookingError::ReservationConflict)
    }

    fn resolve_walk_in_session(
        &self,
        day: &DaySlots,
        now: NaiveDateTime,
        force_book: bool,
    ) -> Result<usize, BookingError> {
        let active = day.sessions.iter().find(|session| {
            now <= session.effective_end
                && now >= session.start - Duration::minutes(WALK_IN_EARLY_MINUTES)
        });
        if let Some(session) = active {
            return Ok(session.index);
        }
        if force_book {
            // No live session: force into the next one to start, else overtime
            // on the last.
            let target = day
                .sessions
                .iter()
                .find(|session| session.start > now)
                .or_else(|| day.sessions.last())
                .expect("an available day always has at least one session");
            return Ok(target.index);
        }
        Err(BookingError::NoWalkInSlots)
    }

    async fn try_book_walk_in(
        &self,
        request: &BookWalkInRequest,
        context: &BookingContext,
        day: &DaySlots,
        session_index: usize,
    ) -> Result<BookingResult, BookingError> {
        let now = self.clock.now();
        let date_iso = iso_date(day.date);
        let session = *day
            .session(session_index)
            .ok_or_else(|| BookingError::InvalidInput("unknown session".into()))?;

        let mut tx = self.store.begin().await?;

        let counter_path = counter_doc_path(
            &request.clinic_id,
            &context.doctor.name,
            &date_iso,
            CounterKind::WalkIn,
        );
        let counter = self.read_counter(&mut tx, &counter_path).await?;

        let appointments = self
            .read_day_appointments(&mut tx, &request.clinic_id, &request.doctor_id, &date_iso)
            .await?;
        self.check_duplicate(&appointments, &request.patient_id)?;

        let reservations = self
            .read_day_reservations(&mut tx, &request.clinic_id, &request.doctor_id, &date_iso)
            .await?;

        let mut occupancy = build_session_occupancy(&appointments, &reservations, &session, now);

        let new_counter = counter + 1;
        let numeric_token = day.slot_count() as u32 + new_counter as u32 + WALK_IN_TOKEN_BASE;
        let appointment_id = Uuid::new_v4().to_string();

        let candidate = WalkInCandidate {
            id: appointment_id.clone(),
            numeric_token,
            created_at: fmt_ts(now),
            preferred_slot_index: None,
        };

        let slot_times: Vec<NaiveDateTime> = (0..session.slot_count)
            .map(|i| day.session_slot_time(session.index, i))
            .collect();

        grow_for_overflow(&mut occupancy, session.slot_count);
        let outcome = schedule_walk_ins(ScheduleRequest {
            now,
            spacing: context.clinic.walk_in_token_allotment as usize,
            slot_minutes: day.slot_minutes,
            slot_times,
            occupancy: occupancy.clone(),
            candidates: vec![candidate],
        })
        .map_err(|_| BookingError::NoWalkInSlots)?;

        let local_index = outcome.assignments[&appointment_id];
        let slot_time = day.session_slot_time(session.index, local_index);
        let persisted_index = persisted_slot_index(local_index, &session, day);
        let is_overflow = local_index >= session.slot_count;

        // Remaining reads, before any write is staged: the reservation on the
        // chosen slot and (for classic clinics) the per-session counter.
        let reservation_path = reservation_doc_path(
            &request.clinic_id,
            &context.doctor.name,
            &date_iso,
            persisted_index,
        );
        let mut stale_reservation = false;
        if let Some(doc) = tx.get(&reservation_path).await? {
            let reservation: SlotReservation = serde_json::from_value(doc.data)
                .map_err(|e| BookingError::Unknown(e.to_string()))?;
            if self.reservation_blocks(&reservation, now)
                && reservation.appointment_id.is_none()
            {
                return Err(BookingError::ReservationConflict);
            }
            stale_reservation = true;
        }

        let (status, classic_token_number, classic_counter) =
            if context.clinic.token_distribution == TokenDistribution::Classic {
                let classic_path = counter_doc_path(
                    &request.clinic_id,
                    &context.doctor.name,
                    &date_iso,
                    CounterKind::ClassicSession(session.index),
                );
                let current = self.read_counter(&mut tx, &classic_path).await?;
                let next = current + 1;
                (
                    AppointmentStatus::Confirmed,
                    Some(format_classic_token(next as u32)),
                    Some((classic_path, next)),
                )
            } else {
                (AppointmentStatus::Confirmed, None, None)
            };

        if stale_reservation {
            tx.delete(&reservation_path);
        }

        let appointment = Appointment {
            id: appointment_id.clone(),
            clinic_id: request.clinic_id.clone(),
            doctor_id: request.doctor_id.clone(),
            patient_id: request.patient_id.clone(),
            date: date_iso.clone(),
            time: format_time(slot_time.time()),
            arrive_by_time: Some(format_time(slot_time.time())),
            booked_via: BookedVia::WalkIn,
            status,
            slot_index: persisted_index,
            session_index: session.index,
            numeric_token,
            token_number: format_walk_in_token(session.index, numeric_token),
            classic_token_number,
            cancelled_by_break: false,
            is_in_buffer: false,
            is_force_booked: request.force_book && is_overflow,
            cut_off_time: Some(format_time(
                (slot_time - Duration::minutes(CUT_OFF_MINUTES)).time(),
            )),
            no_show_time: Some(format_time(
                (slot_time + Duration::minutes(NO_SHOW_MINUTES)).time(),
            )),
            break_id: None,
            reminder_evening_sent: false,
            reminder_morning_sent: false,
            booked_notification_sent: false,
            created_at: Some(fmt_ts(now)),
        };

        tx.set(
            &reservation_path,
            json!(SlotReservation {
                reserved_at: fmt_ts(now),
                reserved_by: request.patient_id.clone(),
                status: ReservationStatus::Booked,
                appointment_id: Some(appointment.id.clone()),
                clinic_id: request.clinic_id.clone(),
                doctor_id: request.doctor_id.clone(),
                date: date_iso.clone(),
                slot_index: persisted_index,
            }),
        );
        tx.set(&appointment.doc_path(), json!(appointment));

        // Cascading advance shifts produced by the placement.
        let shift_updates =
            self.stage_shift_updates(&mut tx, &appointments, &outcome.shifts, &session, day, false);

        tx.set(&counter_path, json!({ "count": new_counter }));
        if let Some((classic_path, next)) = classic_counter {
            tx.set(&classic_path, json!({ "count": next }));
        }
        self.stage_patient_profile_update(&mut tx, &request.patient_id, &appointment);

        tx.commit().await?;

        let patients_ahead = occupancy[..local_index.min(occupancy.len())]
            .iter()
            .filter(|cell| cell.is_shiftable() || cell.is_walk_in())
            .count();

        info!(
            appointment_id = %appointment.id,
            token = %appointment.token_number,
            slot_index = persisted_index,
            shifted = shift_updates,
            "walk-in booking committed"
        );

        Ok(BookingResult {
            estimated_time: Some(appointment.time.clone()),
            appointment,
            patients_ahead: Some(patients_ahead),
        })
    }

    // ==========================================================================
    // PREVIEW & REBALANCE
    // ==========================================================================

    /// Dry run of the walk-in placement for the confirmation screen; no writes.
    pub async fn preview_walk_in_placement(
        &self,
        clinic_id: &str,
        doctor_id: &str,
        force_book: bool,
    ) -> Result<WalkInPreview, BookingError> {
        let context = self.load_context(clinic_id, doctor_id, "").await?;
        let now = self.clock.now();
        let date = now.date();
        let day = generate_day_slots(&context.doctor, date)?;
        let date_iso = iso_date(date);

        let session_index = self.resolve_walk_in_session(&day, now, force_book)?;
        let session = *day.session(session_index).expect("resolved session exists");

        let appointments = self
            .query_day_appointments(clinic_id, doctor_id, &date_iso)
            .await?;
        let reservations = self
            .query_day_reservations(clinic_id, doctor_id, &date_iso)
            .await?;

        let mut occupancy = build_session_occupancy(&appointments, &reservations, &session, now);

        let counter_path =
            counter_doc_path(clinic_id, &context.doctor.name, &date_iso, CounterKind::WalkIn);
        let counter = self
            .store
            .get(&counter_path)
            .await?
            .and_then(|doc| doc.data.get("count").and_then(Value::as_i64))
            .unwrap_or(0);

        let numeric_token = day.slot_count() as u32 + (counter + 1) as u32 + WALK_IN_TOKEN_BASE;
        let placeholder_id = "walk-in-preview".to_string();

        let slot_times: Vec<NaiveDateTime> = (0..session.slot_count)
            .map(|i| day.session_slot_time(session.index, i))
            .collect();
        grow_for_overflow(&mut occupancy, session.slot_count);

        let outcome = schedule_walk_ins(ScheduleRequest {
            now,
            spacing: context.clinic.walk_in_token_allotment as usize,
            slot_minutes: day.slot_minutes,
            slot_times,
            occupancy: occupancy.clone(),
            candidates: vec![WalkInCandidate {
                id: placeholder_id.clone(),
                numeric_token,
                created_at: fmt_ts(now),
                preferred_slot_index: None,
            }],
        })
        .map_err(|_| BookingError::NoWalkInSlots)?;

        let local_index = outcome.assignments[&placeholder_id];
        let slot_time = day.session_slot_time(session.index, local_index);
        let patients_ahead = occupancy[..local_index.min(occupancy.len())]
            .iter()
            .filter(|cell| cell.is_shiftable() || cell.is_walk_in())
            .count();

        let advance_shifts = outcome
            .shifts
            .iter()
            .map(|shift| PlannedShift {
                appointment_id: shift.id.clone(),
                from_slot: persisted_slot_index(shift.from, &session, &day),
                to_slot: persisted_slot_index(shift.to, &session, &day),
                new_time: format_time(day.session_slot_time(session.index, shift.to).time()),
            })
            .collect();

        Ok(WalkInPreview {
            session_index: session.index,
            slot_index: persisted_slot_index(local_index, &session, &day),
            estimated_time: format_time(slot_time.time()),
            patients_ahead,
            advance_shifts,
        })
    }

    /// Re-run the walk-in scheduler over the latest committed state and write
    /// back every row whose placement tightened or shifted. Called after
    /// cancellations, status flips, and break edits.
    #[instrument(skip(self))]
    pub async fn rebalance_walk_ins(
        &self,
        clinic_id: &str,
        doctor_id: &str,
        date: NaiveDate,
    ) -> Result<usize, BookingError> {
        let context = self.load_context(clinic_id, doctor_id, "").await?;
        let day = generate_day_slots(&context.doctor, date)?;
        let now = self.clock.now();
        let date_iso = iso_date(date);

        let mut tx = self.store.begin().await?;
        let appointments = self
            .read_day_appointments(&mut tx, clinic_id, doctor_id, &date_iso)
            .await?;
        let reservations = self
            .read_day_reservations(&mut tx, clinic_id, doctor_id, &date_iso)
            .await?;

        let mut updates = 0usize;

        for session in &day.sessions {
            let mut occupancy = vec![Occupant::Empty; session.slot_count];
            let mut displaced: Vec<(usize, String)> = Vec::new();
            let mut walk_ins: Vec<(&Appointment, usize)> = Vec::new();
            let mut original_local: HashMap<String, usize> = HashMap::new();

            let session_rows: Vec<&Appointment> = appointments
                .iter()
                .filter(|a| a.session_index == session.index)
                .filter(|a| !matches!(a.status, AppointmentStatus::Cancelled))
                .collect();

            // Pinned rows claim their cells first; break blocks always win.
            for appointment in &session_rows {
                let local = local_slot_index(appointment.slot_index, session);
                original_local.insert(appointment.id.clone(), local);
                if occupancy.len() <= local {
                    occupancy.resize(local + 1, Occupant::Empty);
                }
                if appointment.is_break_block() {
                    occupancy[local] = Occupant::Break(appointment.id.clone());
                } else if appointment.is_terminal() && occupancy[local].is_empty() {
                    occupancy[local] = Occupant::Blocked(appointment.id.clone());
                }
            }

            for appointment in &session_rows {
                if !appointment.is_active() {
                    continue;
                }
                let local = local_slot_index(appointment.slot_index, session);
                if appointment.booked_via == BookedVia::WalkIn {
                    walk_ins.push((*appointment, local));
                    continue;
                }
                if occupancy[local].is_empty() {
                    occupancy[local] = Occupant::Shiftable(appointment.id.clone());
                } else {
                    // The cell went to a break block; this advance needs a
                    // new home further right.
                    displaced.push((local, appointment.id.clone()));
                }
            }

            mark_fresh_reservations(&mut occupancy, &reservations, session, now);

            // Displaced advances append after their old position, keeping
            // their relative order and never moving earlier.
            displaced.sort();
            let mut displacement_shifts: Vec<SlotShift> = Vec::new();
            for (from, id) in displaced {
                grow_for_overflow(&mut occupancy, session.slot_count);
                if let Some(to) = (from + 1..occupancy.len()).find(|&i| occupancy[i].is_empty()) {
                    occupancy[to] = Occupant::Shiftable(id.clone());
                    displacement_shifts.push(SlotShift { id, from, to });
                }
            }

            walk_ins.sort_by_key(|(appointment, _)| appointment.numeric_token);
            let candidates: Vec<WalkInCandidate> = walk_ins
                .iter()
                .map(|(appointment, local)| WalkInCandidate {
                    id: appointment.id.clone(),
                    numeric_token: appointment.numeric_token,
                    created_at: appointment.created_at.clone().unwrap_or_default(),
                    preferred_slot_index: Some(*local),
                })
                .collect();

            let slot_times: Vec<NaiveDateTime> = (0..session.slot_count)
                .map(|i| day.session_slot_time(session.index, i))
                .collect();
            grow_for_overflow(&mut occupancy, session.slot_count);

            let outcome = schedule_walk_ins(ScheduleRequest {
                now,
                spacing: context.clinic.walk_in_token_allotment as usize,
                slot_minutes: day.slot_minutes,
                slot_times,
                occupancy,
                candidates,
            })
            .map_err(|_| BookingError::NoCandidate)?;

            // Final local position per row: displacements, cascade shifts,
            // then walk-in assignments.
            let mut final_local: HashMap<String, usize> = original_local.clone();
            for shift in displacement_shifts.iter().chain(outcome.shifts.iter()) {
                final_local.insert(shift.id.clone(), shift.to);
            }
            for (id, index) in &outcome.assignments {
                final_local.insert(id.clone(), *index);
            }

            for appointment in appointments
                .iter()
                .filter(|a| a.session_index == session.index && a.is_active())
            {
                let Some(&new_local) = final_local.get(&appointment.id) else {
                    continue;
                };
                let old_local = original_local[&appointment.id];
                if new_local == old_local {
                    continue;
                }
                let new_time = day.session_slot_time(session.index, new_local);
                let new_index = persisted_slot_index(new_local, session, &day);
                tx.update(
                    &appointment.doc_path(),
                    vec![
                        ("slotIndex".into(), FieldValue::Value(json!(new_index))),
                        (
                            "time".into(),
                            FieldValue::Value(json!(format_time(new_time.time()))),
                        ),
                        (
                            "arriveByTime".into(),
                            FieldValue::Value(json!(format_time(new_time.time()))),
                        ),
                        (
                            "cutOffTime".into(),
                            FieldValue::Value(json!(format_time(
                                (new_time - Duration::minutes(CUT_OFF_MINUTES)).time()
                            ))),
                        ),
                        (
                            "noShowTime".into(),
                            FieldValue::Value(json!(format_time(
                                (new_time + Duration::minutes(NO_SHOW_MINUTES)).time()
                            ))),
                        ),
                    ],
                );
                updates += 1;
            }
        }

        tx.commit().await?;
        debug!(updates, "rebalance committed");
        Ok(updates)
    }

    /// Queue state machine: arrival confirmation, skip, completion, no-show.
    /// Completing a consultation bumps the per-session consultation counter
    /// in the same transaction.
    pub async fn update_appointment_status(
        &self,
        appointment_id: &str,
        new_status: AppointmentStatus,
    ) -> Result<Appointment, BookingError> {
        let path = format!("appointments/{}", appointment_id);
        let mut tx = self.store.begin().await?;
        let doc = tx.get(&path).await?.ok_or_else(|| {
            BookingError::InvalidInput(format!("unknown appointment {}", appointment_id))
        })?;
        let mut appointment: Appointment =
            serde_json::from_value(doc.data).map_err(|e| BookingError::Unknown(e.to_string()))?;

        if appointment.is_terminal() {
            return Err(BookingError::InvalidInput(format!(
                "appointment is already {}",
                appointment.status
            )));
        }
        if appointment.is_break_block() {
            return Err(BookingError::InvalidInput(
                "break blocks have no patient lifecycle".into(),
            ));
        }

        let mut fields = vec![(
            "status".to_string(),
            FieldValue::Value(json!(new_status)),
        )];

        if new_status == AppointmentStatus::Completed {
            let doctor_name = tx
                .get(&format!("doctors/{}", appointment.doctor_id))
                .await?
                .and_then(|doc| {
                    doc.data
                        .get("name")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                })
                .ok_or_else(|| {
                    BookingError::InvalidInput(format!("unknown doctor {}", appointment.doctor_id))
                })?;
            let counter_path = consultation_counter_path(
                &appointment.clinic_id,
                &doctor_name,
                &appointment.date,
                appointment.session_index,
            );
            tx.get(&counter_path).await?;
            tx.update(&counter_path, vec![("count".into(), FieldValue::Increment(1))]);
            fields.push(("isInBuffer".into(), FieldValue::Value(json!(false))));
            appointment.is_in_buffer = false;
        }

        tx.update(&path, fields);
        tx.commit().await?;

        appointment.status = new_status;
        info!(appointment_id, status = %new_status, "appointment status updated");
        Ok(appointment)
    }

    /// Staff moved the patient into (or out of) the consultation buffer.
    pub async fn set_in_buffer(
        &self,
        appointment_id: &str,
        in_buffer: bool,
    ) -> Result<(), BookingError> {
        let path = format!("appointments/{}", appointment_id);
        let mut tx = self.store.begin().await?;
        tx.get(&path).await?.ok_or_else(|| {
            BookingError::InvalidInput(format!("unknown appointment {}", appointment_id))
        })?;
        tx.update(
            &path,
            vec![("isInBuffer".into(), FieldValue::Value(json!(in_buffer)))],
        );
        tx.commit().await?;
        Ok(())
    }

    /// Mark an appointment cancelled and release its slot reservation.
    pub async fn cancel_appointment(&self, appointment_id: &str) -> Result<(), BookingError> {
        let path = format!("appointments/{}", appointment_id);
        let mut tx = self.store.begin().await?;
        let doc = tx
            .get(&path)
            .await?
            .ok_or_else(|| BookingError::InvalidInput(format!("unknown appointment {}", appointment_id)))?;
        let appointment: Appointment =
            serde_json::from_value(doc.data).map_err(|e| BookingError::Unknown(e.to_string()))?;
        if appointment.is_terminal() {
            return Ok(());
        }

        // Doctor lookup first; the reservation id carries the doctor name.
        let doctor_name = tx
            .get(&format!("doctors/{}", appointment.doctor_id))
            .await?
            .and_then(|doc| {
                doc.data
                    .get("name")
                    .and_then(Value::as_str)
                    .map(str::to_string)
            });

        tx.update(
            &path,
            vec![(
                "status".into(),
                FieldValue::Value(json!(AppointmentStatus::Cancelled)),
            )],
        );
        if let Some(name) = doctor_name {
            tx.delete(&reservation_doc_path(
                &appointment.clinic_id,
                &name,
                &appointment.date,
                appointment.slot_index,
            ));
        }
        tx.commit().await?;
        info!(appointment_id, "appointment cancelled");
        Ok(())
    }

    // ==========================================================================
    // SHARED HELPERS
    // ==========================================================================

    async fn load_context(
        &self,
        clinic_id: &str,
        doctor_id: &str,
        patient_id: &str,
    ) -> Result<BookingContext, BookingError> {
        let clinic_path = format!("clinics/{}", clinic_id);
        let doctor_path = format!("doctors/{}", doctor_id);
        let patient_path = format!("patients/{}", patient_id);

        let (clinic_doc, doctor_doc, patient_doc) = tokio::join!(
            self.store.get(&clinic_path),
            self.store.get(&doctor_path),
            self.store.get(&patient_path),
        );

        let clinic_doc = clinic_doc?
            .ok_or_else(|| BookingError::InvalidInput(format!("unknown clinic {}", clinic_id)))?;
        let doctor_doc = doctor_doc?
            .ok_or_else(|| BookingError::InvalidInput(format!("unknown doctor {}", doctor_id)))?;
        if patient_doc?.is_none() && !patient_id.is_empty() {
            debug!(patient_id, "patient profile not found yet; will be created on commit");
        }

        let clinic: Clinic = serde_json::from_value(clinic_doc.data)
            .map_err(|e| BookingError::Unknown(format!("malformed clinic: {}", e)))?;
        let doctor: Doctor = serde_json::from_value(doctor_doc.data)
            .map_err(|e| BookingError::Unknown(format!("malformed doctor: {}", e)))?;

        Ok(BookingContext { clinic, doctor })
    }

    async fn read_day_appointments(
        &self,
        tx: &mut Box<dyn StoreTransaction>,
        clinic_id: &str,
        doctor_id: &str,
        date_iso: &str,
    ) -> Result<Vec<Appointment>, BookingError> {
        let docs = tx.query(&day_appointments_query(clinic_id, doctor_id, date_iso)).await?;
        Ok(parse_appointments(docs))
    }

    async fn query_day_appointments(
        &self,
        clinic_id: &str,
        doctor_id: &str,
        date_iso: &str,
    ) -> Result<Vec<Appointment>, BookingError> {
        let docs = self
            .store
            .query(&day_appointments_query(clinic_id, doctor_id, date_iso))
            .await?;
        Ok(parse_appointments(docs))
    }

    async fn read_day_reservations(
        &self,
        tx: &mut Box<dyn StoreTransaction>,
        clinic_id: &str,
        doctor_id: &str,
        date_iso: &str,
    ) -> Result<Vec<SlotReservation>, BookingError> {
        let docs = tx
            .query(&day_reservations_query(clinic_id, doctor_id, date_iso))
            .await?;
        Ok(parse_reservations(docs))
    }

    async fn query_day_reservations(
        &self,
        clinic_id: &str,
        doctor_id: &str,
        date_iso: &str,
    ) -> Result<Vec<SlotReservation>, BookingError> {
        let docs = self
            .store
            .query(&day_reservations_query(clinic_id, doctor_id, date_iso))
            .await?;
        Ok(parse_reservations(docs))
    }

    async fn read_counter(
        &self,
        tx: &mut Box<dyn StoreTransaction>,
        path: &str,
    ) -> Result<i64, BookingError> {
        Ok(tx
            .get(path)
            .await?
            .and_then(|doc| doc.data.get("count").and_then(Value::as_i64))
            .unwrap_or(0))
    }

    fn check_duplicate(
        &self,
        appointments: &[Appointment],
        patient_id: &str,
    ) -> Result<(), BookingError> {
        let duplicate = appointments.iter().any(|a| {
            a.patient_id == patient_id && a.is_active() && !a.cancelled_by_break
        });
        if duplicate {
            return Err(BookingError::DuplicateAppointment);
        }
        Ok(())
    }

    fn reservation_blocks(&self, reservation: &SlotReservation, now: NaiveDateTime) -> bool {
        if reservation.status == ReservationStatus::Booked {
            return true;
        }
        match parse_ts(&reservation.reserved_at) {
            Some(reserved_at) => {
                (now - reserved_at).num_seconds() <= STALE_RESERVATION_SECS
            }
            // Unreadable timestamps are treated as stale.
            None => false,
        }
    }

    fn stage_shift_updates(
        &self,
        tx: &mut Box<dyn StoreTransaction>,
        appointments: &[Appointment],
        shifts: &[SlotShift],
        session: &EffectiveSession,
        day: &DaySlots,
        refresh_cut_off: bool,
    ) -> usize {
        let by_id: HashMap<&str, &Appointment> = appointments
            .iter()
            .map(|a| (a.id.as_str(), a))
            .collect();
        let mut staged = 0;
        for shift in shifts {
            let Some(appointment) = by_id.get(shift.id.as_str()) else {
                warn!(id = %shift.id, "shift references unknown appointment");
                continue;
            };
            let new_time = day.session_slot_time(session.index, shift.to);
            let new_index = persisted_slot_index(shift.to, session, day);
            let mut fields = vec![
                ("slotIndex".into(), FieldValue::Value(json!(new_index))),
                (
                    "time".into(),
                    FieldValue::Value(json!(format_time(new_time.time()))),
                ),
                (
                    "arriveByTime".into(),
                    FieldValue::Value(json!(format_time(new_time.time()))),
                ),
                (
                    "noShowTime".into(),
                    FieldValue::Value(json!(format_time(
                        (new_time + Duration::minutes(NO_SHOW_MINUTES)).time()
                    ))),
                ),
            ];
            if refresh_cut_off {
                fields.push((
                    "cutOffTime".into(),
                    FieldValue::Value(json!(format_time(
                        (new_time - Duration::minutes(CUT_OFF_MINUTES)).time()
                    ))),
                ));
            }
            tx.update(&appointment.doc_path(), fields);
            staged += 1;
        }
        staged
    }

    fn stage_patient_profile_update(
        &self,
        tx: &mut Box<dyn StoreTransaction>,
        patient_id: &str,
        appointment: &Appointment,
    ) {
        if patient_id.is_empty() {
            return;
        }
        tx.update(
            &format!("patients/{}", patient_id),
            vec![
                (
                    "clinics".into(),
                    FieldValue::ArrayUnion(vec![json!(appointment.clinic_id)]),
                ),
                ("totalAppointments".into(), FieldValue::Increment(1)),
                (
                    "visitHistory".into(),
                    FieldValue::ArrayUnion(vec![json!({
                        "appointmentId": appointment.id,
                        "doctorId": appointment.doctor_id,
                        "date": appointment.date,
                        "tokenNumber": appointment.token_number,
                    })]),
                ),
                ("updatedAt".into(), FieldValue::ServerTimestamp),
            ],
        );
    }

    async fn backoff(&self, attempt: u32) {
        let jitter = rand::thread_rng().gen_range(0..25);
        let delay = RETRY_BASE_DELAY_MS * attempt as u64 + jitter;
        debug!(attempt, delay_ms = delay, "retrying after reservation conflict");
        sleep(StdDuration::from_millis(delay)).await;
    }
}

// ==============================================================================
// FREE HELPERS
// ==============================================================================

fn day_appointments_query(clinic_id: &str, doctor_id: &str, date_iso: &str) -> Query {
    Query::collection("appointments")
        .filter(Filter::Eq("clinicId".into(), json!(clinic_id)))
        .filter(Filter::Eq("doctorId".into(), json!(doctor_id)))
        .filter(Filter::Eq("date".into(), json!(date_iso)))
        .order("slotIndex", SortDirection::Asc)
}

fn day_reservations_query(clinic_id: &str, doctor_id: &str, date_iso: &str) -> Query {
    Query::collection("slotReservations")
        .filter(Filter::Eq("clinicId".into(), json!(clinic_id)))
        .filter(Filter::Eq("doctorId".into(), json!(doctor_id)))
        .filter(Filter::Eq("date".into(), json!(date_iso)))
}

fn parse_appointments(docs: Vec<Document>) -> Vec<Appointment> {
    docs.into_iter()
        .filter_map(|doc| match serde_json::from_value(doc.data) {
            Ok(appointment) => Some(appointment),
            Err(e) => {
                warn!(path = %doc.path, error = %e, "skipping malformed appointment row");
                None
            }
        })
        .collect()
}

fn parse_reservations(docs: Vec<Document>) -> Vec<SlotReservation> {
    docs.into_iter()
        .filter_map(|doc| match serde_json::from_value(doc.data) {
            Ok(reservation) => Some(reservation),
            Err(e) => {
                warn!(path = %doc.path, error = %e, "skipping malformed reservation");
                None
            }
        })
        .collect()
}

/// Map a persisted slot index (possibly in the overflow band) to a
/// session-local index.
pub fn local_slot_index(slot_index: usize, session: &EffectiveSession) -> usize {
    let absolute = if slot_index >= OVERFLOW_BAND {
        slot_index - OVERFLOW_BAND
    } else {
        slot_index
    };
    absolute.saturating_sub(session.first_slot)
}

/// Map a session-local index back to the persisted form; indices that run
/// into a later session's physical slots move to the overflow band.
pub fn persisted_slot_index(local: usize, session: &EffectiveSession, day: &DaySlots) -> usize {
    let absolute = session.first_slot + local;
    if local >= session.slot_count && absolute < day.slot_count() {
        OVERFLOW_BAND + absolute
    } else {
        absolute
    }
}

fn grow_for_overflow(occupancy: &mut Vec<Occupant>, physical_count: usize) {
    let max_occupied = occupancy
        .iter()
        .rposition(|cell| !cell.is_empty())
        .map(|i| i + 1)
        .unwrap_or(0);
    let needed = physical_count.max(max_occupied) + 10;
    if occupancy.len() < needed {
        occupancy.resize(needed, Occupant::Empty);
    }
}

/// Build the session-local occupancy array from committed rows.
fn build_session_occupancy(
    appointments: &[Appointment],
    reservations: &[SlotReservation],
    session: &EffectiveSession,
    now: NaiveDateTime,
) -> Vec<Occupant> {
    let mut occupancy = vec![Occupant::Empty; session.slot_count];

    for appointment in appointments
        .iter()
        .filter(|a| a.session_index == session.index)
        .filter(|a| !matches!(a.status, AppointmentStatus::Cancelled))
    {
        let local = local_slot_index(appointment.slot_index, session);
        if occupancy.len() <= local {
            occupancy.resize(local + 1, Occupant::Empty);
        }

        occupancy[local] = if appointment.is_break_block() {
            Occupant::Break(appointment.id.clone())
        } else if appointment.is_terminal() {
            Occupant::Blocked(appointment.id.clone())
        } else if appointment.booked_via == BookedVia::WalkIn {
            Occupant::WalkIn(appointment.id.clone())
        } else {
            Occupant::Shiftable(appointment.id.clone())
        };
    }

    mark_fresh_reservations(&mut occupancy, reservations, session, now);

    occupancy
}

fn mark_fresh_reservations(
    occupancy: &mut Vec<Occupant>,
    reservations: &[SlotReservation],
    session: &EffectiveSession,
    now: NaiveDateTime,
) {
    for reservation in reservations {
        if reservation.status == ReservationStatus::Booked {
            // The appointment row already occupies the cell.
            continue;
        }
        let fresh = parse_ts(&reservation.reserved_at)
            .map(|at| (now - at).num_seconds() <= STALE_RESERVATION_SECS)
            .unwrap_or(false);
        if !fresh {
            continue;
        }
        let local = local_slot_index(reservation.slot_index, session);
        let absolute = if reservation.slot_index >= OVERFLOW_BAND {
            reservation.slot_index - OVERFLOW_BAND
        } else {
            reservation.slot_index
        };
        if !session.contains_slot(absolute) {
            continue;
        }
        if occupancy.len() <= local {
            occupancy.resize(local + 1, Occupant::Empty);
        }
        if occupancy[local].is_empty() {
            occupancy[local] = Occupant::Reserved(format!("rsv-{}", reservation.slot_index));
        }
    }
}

pub(crate) fn fmt_ts(at: NaiveDateTime) -> String {
    shared_utils::clock::format_timestamp(at)
}

fn parse_ts(raw: &str) -> Option<NaiveDateTime> {
    shared_utils::clock::parse_timestamp(raw).ok()
}
