use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

use shared_store::StoreError;
use shared_utils::clock::ClockError;
use shared_utils::sanitize_doc_id;

use doctor_cell::services::slots::SlotError;

// ==============================================================================
// CORE APPOINTMENT MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Appointment {
    pub id: String,
    pub clinic_id: String,
    pub doctor_id: String,
    pub patient_id: String,
    /// `yyyy-MM-dd` in the clinic zone.
    pub date: String,
    /// `hh:mm AM/PM` in the clinic zone.
    pub time: String,
    #[serde(default)]
    pub arrive_by_time: Option<String>,
    pub booked_via: BookedVia,
    pub status: AppointmentStatus,
    /// Dense index into the day's physical slots; indices `>= 10000` are the
    /// overflow band for walk-ins pushed past a session's physical slots.
    pub slot_index: usize,
    pub session_index: usize,
    pub numeric_token: u32,
    pub token_number: String,
    #[serde(default)]
    pub classic_token_number: Option<String>,
    #[serde(default)]
    pub cancelled_by_break: bool,
    #[serde(default)]
    pub is_in_buffer: bool,
    #[serde(default)]
    pub is_force_booked: bool,
    #[serde(default)]
    pub cut_off_time: Option<String>,
    #[serde(default)]
    pub no_show_time: Option<String>,
    /// Set on BreakBlock rows so a removed break can find its dummies.
    #[serde(default)]
    pub break_id: Option<String>,
    #[serde(default)]
    pub reminder_evening_sent: bool,
    #[serde(default)]
    pub reminder_morning_sent: bool,
    #[serde(default)]
    pub booked_notification_sent: bool,
    #[serde(default)]
    pub created_at: Option<String>,
}

impl Appointment {
    /// Still holds a place in the queue.
    pub fn is_active(&self) -> bool {
        matches!(
            self.status,
            AppointmentStatus::Pending | AppointmentStatus::Confirmed | AppointmentStatus::Skipped
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            AppointmentStatus::Completed
                | AppointmentStatus::NoShow
                | AppointmentStatus::Cancelled
        )
    }

    pub fn is_break_block(&self) -> bool {
        self.booked_via == BookedVia::BreakBlock
    }

    pub fn doc_path(&self) -> String {
        format!("appointments/{}", self.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    Skipped,
    Completed,
    #[serde(alias = "no-show")]
    NoShow,
    Cancelled,
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppointmentStatus::Pending => write!(f, "pending"),
            AppointmentStatus::Confirmed => write!(f, "confirmed"),
            AppointmentStatus::Skipped => write!(f, "skipped"),
            AppointmentStatus::Completed => write!(f, "completed"),
            AppointmentStatus::NoShow => write!(f, "no_show"),
            AppointmentStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookedVia {
    Advance,
    WalkIn,
    BreakBlock,
}

/// Patient id written on BreakBlock dummies.
pub const BREAK_PATIENT_ID: &str = "dummy-break-patient";

// ==============================================================================
// SLOT RESERVATIONS & COUNTERS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotReservation {
    /// Clinic-local `%Y-%m-%dT%H:%M:%S`; comparisons stay on the injected clock.
    pub reserved_at: String,
    pub reserved_by: String,
    pub status: ReservationStatus,
    #[serde(default)]
    pub appointment_id: Option<String>,
    pub clinic_id: String,
    pub doctor_id: String,
    pub date: String,
    pub slot_index: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReservationStatus {
    Reserved,
    Booked,
}

/// A `reserved` reservation older than this without transitioning to `booked`
/// is garbage and may be deleted by the next transaction touching the slot.
pub const STALE_RESERVATION_SECS: i64 = 30;

/// Token counters come in two kinds; the kind only becomes a doc-id suffix at
/// the store boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterKind {
    WalkIn,
    ClassicSession(usize),
}

impl CounterKind {
    fn suffix(&self) -> String {
        match self {
            CounterKind::WalkIn => "_W".to_string(),
            CounterKind::ClassicSession(session) => format!("_{}", session),
        }
    }
}

/// `clinicId_doctorName_date` with the kind suffix, sanitized to
/// alphanumerics and underscores.
pub fn counter_doc_path(
    clinic_id: &str,
    doctor_name: &str,
    date_iso: &str,
    kind: CounterKind,
) -> String {
    let base = sanitize_doc_id(&format!("{}_{}_{}", clinic_id, doctor_name, date_iso));
    format!("tokenCounters/{}{}", base, kind.suffix())
}

/// `clinicId_doctorName_date_slot_{idx}`, sanitized the same way.
pub fn reservation_doc_path(
    clinic_id: &str,
    doctor_name: &str,
    date_iso: &str,
    slot_index: usize,
) -> String {
    let base = sanitize_doc_id(&format!(
        "{}_{}_{}_slot_{}",
        clinic_id, doctor_name, date_iso, slot_index
    ));
    format!("slotReservations/{}", base)
}

pub fn consultation_counter_path(
    clinic_id: &str,
    doctor_name: &str,
    date_iso: &str,
    session_index: usize,
) -> String {
    let base = sanitize_doc_id(&format!("{}_{}_{}", clinic_id, doctor_name, date_iso));
    format!("consultationCounters/{}_{}", base, session_index)
}

// ==============================================================================
// REQUEST/RESPONSE MODELS
// ==============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookAdvanceRequest {
    pub clinic_id: String,
    pub doctor_id: String,
    pub patient_id: String,
    pub date: NaiveDate,
    #[serde(default)]
    pub preferred_slot_index: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookWalkInRequest {
    pub clinic_id: String,
    pub doctor_id: String,
    pub patient_id: String,
    #[serde(default)]
    pub force_book: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingResult {
    pub appointment: Appointment,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patients_ahead: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_time: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedShift {
    pub appointment_id: String,
    pub from_slot: usize,
    pub to_slot: usize,
    pub new_time: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WalkInPreview {
    pub session_index: usize,
    pub slot_index: usize,
    pub estimated_time: String,
    pub patients_ahead: usize,
    pub advance_shifts: Vec<PlannedShift>,
}

// ==============================================================================
// ERROR TAXONOMY
// ==============================================================================

#[derive(Debug, thiserror::Error)]
pub enum BookingError {
    #[error("no active session accepts walk-ins right now")]
    NoWalkInSlots,

    #[error("advance booking capacity reached")]
    CapacityReached,

    #[error("no bookable slot candidate")]
    NoCandidate,

    #[error("slot reservation contention")]
    ReservationConflict,

    #[error("patient already has an active appointment with this doctor today")]
    DuplicateAppointment,

    #[error("doctor has no availability on the requested day")]
    NotAvailable,

    #[error("invalid break: {0}")]
    InvalidBreak(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("booking timed out")]
    Timeout,

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("unexpected booking failure: {0}")]
    Unknown(String),
}

impl From<StoreError> for BookingError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(_) => BookingError::ReservationConflict,
            StoreError::PermissionDenied(msg) => BookingError::PermissionDenied(msg),
            StoreError::Backend(msg) => BookingError::Unknown(msg),
        }
    }
}

impl From<SlotError> for BookingError {
    fn from(_: SlotError) -> Self {
        BookingError::NotAvailable
    }
}

impl From<ClockError> for BookingError {
    fn from(err: ClockError) -> Self {
        BookingError::InvalidInput(err.to_string())
    }
}
