use chrono::{Duration, NaiveDate, NaiveDateTime};
use thiserror::Error;
use tracing::debug;

use shared_utils::clock::iso_date;

use crate::models::Doctor;

#[derive(Error, Debug)]
pub enum SlotError {
    #[error("doctor has no availability on {0}")]
    NotAvailable(String),
}

/// One fixed-width consultation step. `absolute_index` is dense across the
/// whole day, in session order, starting at 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhysicalSlot {
    pub absolute_index: usize,
    pub session_index: usize,
    pub time: NaiveDateTime,
}

#[derive(Debug, Clone, Copy)]
pub struct EffectiveSession {
    pub index: usize,
    pub start: NaiveDateTime,
    /// Configured end before any extension.
    pub scheduled_end: NaiveDateTime,
    /// End after applying a stored extension, when the extension is later.
    pub effective_end: NaiveDateTime,
    pub first_slot: usize,
    pub slot_count: usize,
}

impl EffectiveSession {
    pub fn contains_slot(&self, absolute_index: usize) -> bool {
        absolute_index >= self.first_slot && absolute_index < self.first_slot + self.slot_count
    }
}

#[derive(Debug, Clone)]
pub struct DaySlots {
    pub date: NaiveDate,
    pub slot_minutes: u32,
    pub slots: Vec<PhysicalSlot>,
    pub sessions: Vec<EffectiveSession>,
}

impl DaySlots {
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn session(&self, index: usize) -> Option<&EffectiveSession> {
        self.sessions.get(index)
    }

    pub fn session_of_slot(&self, absolute_index: usize) -> Option<usize> {
        self.slots.get(absolute_index).map(|slot| slot.session_index)
    }

    /// Start time of a slot index, extrapolating past the last physical slot
    /// for overflow placements.
    pub fn slot_time(&self, absolute_index: usize) -> NaiveDateTime {
        if let Some(slot) = self.slots.get(absolute_index) {
            return slot.time;
        }
        let last = self
            .slots
            .last()
            .expect("slot list is never empty for an available day");
        let steps = (absolute_index - last.absolute_index) as i64;
        last.time + Duration::minutes(steps * self.slot_minutes as i64)
    }

    /// Start time of the `local_index`-th slot of a session, extrapolating
    /// into overtime when the index runs past the session's physical slots.
    pub fn session_slot_time(&self, session_index: usize, local_index: usize) -> NaiveDateTime {
        let session = &self.sessions[session_index];
        session.start + Duration::minutes(local_index as i64 * self.slot_minutes as i64)
    }
}

/// Expand a doctor's availability for one date into the ordered physical-slot
/// list. Every step is emitted, including steps covered by a break; breaks are
/// blocked by occupancy, not by holes in the slot sequence, so absolute
/// indexing stays dense across sessions.
pub fn generate_day_slots(doctor: &Doctor, date: NaiveDate) -> Result<DaySlots, SlotError> {
    let date_iso = iso_date(date);
    let windows = doctor
        .sessions_for(date)
        .ok_or_else(|| SlotError::NotAvailable(date_iso.clone()))?;

    let slot_minutes = doctor.average_consultation_minutes.max(1);
    let step = Duration::minutes(slot_minutes as i64);

    let mut slots = Vec::new();
    let mut sessions = Vec::new();

    for (session_index, window) in windows.iter().enumerate() {
        let start = date.and_time(window.from);
        let scheduled_end = date.and_time(window.to);
        let effective_end = match doctor.extension_for(&date_iso, session_index) {
            Some(new_end) if date.and_time(new_end) > scheduled_end => date.and_time(new_end),
            _ => scheduled_end,
        };

        let first_slot = slots.len();
        let mut time = start;
        while time < effective_end {
            slots.push(PhysicalSlot {
                absolute_index: slots.len(),
                session_index,
                time,
            });
            time += step;
        }

        sessions.push(EffectiveSession {
            index: session_index,
            start,
            scheduled_end,
            effective_end,
            first_slot,
            slot_count: slots.len() - first_slot,
        });
    }

    if slots.is_empty() {
        return Err(SlotError::NotAvailable(date_iso));
    }

    debug!(
        doctor_id = %doctor.id,
        date = %date_iso,
        slots = slots.len(),
        sessions = sessions.len(),
        "generated day slots"
    );

    Ok(DaySlots {
        date,
        slot_minutes,
        slots,
        sessions,
    })
}
