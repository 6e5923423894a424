use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use std::fmt;

// ==============================================================================
// CLINIC MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Clinic {
    pub id: String,
    pub name: String,
    /// Short booking code shown to patients, e.g. `KQ-4821`.
    pub short_code: String,
    /// Walk-in spacing `S`: how many advance tokens a new walk-in is placed
    /// behind the previous walk-in anchor.
    #[serde(default = "default_walk_in_allotment")]
    pub walk_in_token_allotment: u32,
    #[serde(default)]
    pub token_distribution: TokenDistribution,
}

fn default_walk_in_allotment() -> u32 {
    5
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenDistribution {
    Classic,
    #[default]
    Advanced,
}

// ==============================================================================
// DOCTOR MODELS
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionWindow {
    pub from: NaiveTime,
    pub to: NaiveTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DayAvailability {
    /// 0 = Sunday .. 6 = Saturday.
    pub day_of_week: u8,
    pub sessions: Vec<SessionWindow>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakPeriod {
    pub id: String,
    pub session_index: usize,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub duration_minutes: u32,
    /// ISO timestamps of the physical slot starts this break covers.
    #[serde(default)]
    pub slot_times: Vec<String>,
    /// Minutes of session extension this break required when it was added;
    /// removing the break gives them back.
    #[serde(default)]
    pub extension_minutes: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionExtension {
    pub new_end_time: NaiveTime,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityExtension {
    /// Keyed by session index (JSON object keys are strings).
    #[serde(default)]
    pub sessions: BTreeMap<String, SessionExtension>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsultationStatus {
    In,
    #[default]
    Out,
}

impl fmt::Display for ConsultationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsultationStatus::In => write!(f, "in"),
            ConsultationStatus::Out => write!(f, "out"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Doctor {
    pub id: String,
    pub clinic_id: String,
    pub name: String,
    /// Average consultation minutes `D`; also the physical slot width.
    #[serde(default = "default_consultation_minutes")]
    pub average_consultation_minutes: u32,
    #[serde(default)]
    pub weekly_availability: Vec<DayAvailability>,
    /// ISO date -> breaks taken on that date.
    #[serde(default)]
    pub break_periods: BTreeMap<String, Vec<BreakPeriod>>,
    /// ISO date -> per-session end-time overrides.
    #[serde(default)]
    pub availability_extensions: BTreeMap<String, AvailabilityExtension>,
    #[serde(default)]
    pub consultation_status: ConsultationStatus,
    #[serde(default)]
    pub free_follow_up_days: Option<u32>,
}

fn default_consultation_minutes() -> u32 {
    15
}

impl Doctor {
    /// Sessions configured for the weekday of `date`, in `from` order.
    pub fn sessions_for(&self, date: NaiveDate) -> Option<&[SessionWindow]> {
        let day_of_week = date.weekday().num_days_from_sunday() as u8;
        self.weekly_availability
            .iter()
            .find(|day| day.day_of_week == day_of_week)
            .map(|day| day.sessions.as_slice())
            .filter(|sessions| !sessions.is_empty())
    }

    pub fn breaks_for(&self, date_iso: &str) -> &[BreakPeriod] {
        self.break_periods
            .get(date_iso)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// End-time override for a session, if one is stored for the date.
    pub fn extension_for(&self, date_iso: &str, session_index: usize) -> Option<NaiveTime> {
        self.availability_extensions
            .get(date_iso)
            .and_then(|ext| ext.sessions.get(&session_index.to_string()))
            .map(|session| session.new_end_time)
    }
}

// ==============================================================================
// REQUEST/RESPONSE MODELS
// ==============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateConsultationStatusRequest {
    pub status: ConsultationStatus,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DoctorDelayResponse {
    pub doctor_id: String,
    pub delay_minutes: i64,
    pub session_index: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotView {
    pub absolute_index: usize,
    pub session_index: usize,
    pub time: String,
    pub reserved_for_walk_in: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DaySlotsResponse {
    pub date: String,
    pub slot_minutes: u32,
    pub slots: Vec<SlotView>,
    pub advance_capacity: usize,
    pub walk_in_capacity: usize,
}
