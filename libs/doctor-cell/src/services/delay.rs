use chrono::{Duration, NaiveDateTime};

use shared_utils::clock::minutes_between;

use crate::models::ConsultationStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakInterval {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl BreakInterval {
    pub fn duration_minutes(&self) -> i64 {
        minutes_between(self.start, self.end)
    }
}

/// A break that opens the session (starting within a minute of the session
/// start) pushes the effective start to the break's end.
pub fn effective_session_start(
    session_start: NaiveDateTime,
    breaks: &[BreakInterval],
) -> NaiveDateTime {
    let mut sorted: Vec<BreakInterval> = breaks.to_vec();
    sorted.sort_by_key(|b| b.start);

    let mut start = session_start;
    for interval in sorted {
        if interval.start <= start + Duration::minutes(1) && interval.end > start {
            start = interval.end;
        }
    }
    start
}

/// Current running delay of a doctor within the active session.
///
/// A doctor who has not started (`Out`) is behind by the full elapsed time.
/// Once consulting, the delay is the elapsed time minus the work represented
/// by completed consultations and minus breaks already begun. Never negative.
pub fn doctor_delay_minutes(
    now: NaiveDateTime,
    effective_start: NaiveDateTime,
    status: ConsultationStatus,
    completed_count: u32,
    average_minutes: u32,
    breaks: &[BreakInterval],
) -> i64 {
    if now < effective_start {
        return 0;
    }
    if status != ConsultationStatus::In {
        return minutes_between(effective_start, now);
    }

    let elapsed = minutes_between(effective_start, now);
    let passed_break_minutes: i64 = breaks
        .iter()
        .filter(|b| b.start >= effective_start && b.start < now)
        .map(BreakInterval::duration_minutes)
        .sum();

    (elapsed - completed_count as i64 * average_minutes as i64 - passed_break_minutes).max(0)
}
