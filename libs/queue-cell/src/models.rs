use serde::Serialize;

use appointment_cell::models::Appointment;
use doctor_cell::models::TokenDistribution;

/// Queue ordering mode; each variant carries its own total order over the
/// day's appointments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueOrdering {
    /// Position tokens: `(session, slot)` order.
    Advanced,
    /// Plain arrival sequence: classic token number order.
    Classic,
}

impl From<TokenDistribution> for QueueOrdering {
    fn from(mode: TokenDistribution) -> Self {
        match mode {
            TokenDistribution::Advanced => QueueOrdering::Advanced,
            TokenDistribution::Classic => QueueOrdering::Classic,
        }
    }
}

/// Live queue view for one `(doctor, date, session)`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueState {
    pub arrived: Vec<Appointment>,
    pub buffer: Vec<Appointment>,
    pub skipped: Vec<Appointment>,
    pub current_consultation: Option<Appointment>,
    pub consultation_count: u32,
    /// Minutes left of the break in progress; only set while the doctor is
    /// out. A doctor walking back in cancels the break.
    pub next_break_duration_minutes: Option<i64>,
}
