//! Walk-in placement over a session's occupancy array.
//!
//! Pure: the same inputs always yield the same assignment map, bit for bit.
//! The caller owns session isolation (it hands in one session's slots and
//! occupants) and any persistence-facing index remapping.

use std::collections::BTreeMap;

use chrono::{Duration, NaiveDateTime};
use thiserror::Error;
use tracing::trace;

#[derive(Error, Debug)]
pub enum ScheduleError {
    #[error("occupancy exhausted while placing candidate {0}")]
    Exhausted(String),
}

/// One occupancy cell. Only `Shiftable` occupants (active advance bookings)
/// may be moved; everything else is pinned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Occupant {
    Empty,
    /// Active advance appointment; may slide later to make room.
    Shiftable(String),
    /// Completed or no-show appointment; the consultation happened here.
    Blocked(String),
    /// BreakBlock dummy; not a patient, never counted toward spacing.
    Break(String),
    /// Fresh slot reservation held by a concurrent booker.
    Reserved(String),
    WalkIn(String),
}

impl Occupant {
    pub fn is_empty(&self) -> bool {
        matches!(self, Occupant::Empty)
    }

    pub fn is_shiftable(&self) -> bool {
        matches!(self, Occupant::Shiftable(_))
    }

    pub fn is_walk_in(&self) -> bool {
        matches!(self, Occupant::WalkIn(_))
    }

    pub fn id(&self) -> Option<&str> {
        match self {
            Occupant::Empty => None,
            Occupant::Shiftable(id)
            | Occupant::Blocked(id)
            | Occupant::Break(id)
            | Occupant::Reserved(id)
            | Occupant::WalkIn(id) => Some(id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotShift {
    pub id: String,
    pub from: usize,
    pub to: usize,
}

#[derive(Debug, Clone)]
pub struct WalkInCandidate {
    pub id: String,
    pub numeric_token: u32,
    pub created_at: String,
    /// Existing placement to retain (rebalance runs), if any.
    pub preferred_slot_index: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct ScheduleRequest {
    pub now: NaiveDateTime,
    /// Walk-in spacing `S`: advances allowed between walk-in anchors.
    pub spacing: usize,
    pub slot_minutes: u32,
    /// Start times of the physical slots; indices beyond the list are
    /// extrapolated overtime steps.
    pub slot_times: Vec<NaiveDateTime>,
    pub occupancy: Vec<Occupant>,
    pub candidates: Vec<WalkInCandidate>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScheduleOutcome {
    /// Candidate id -> assigned slot index (may exceed the physical count).
    pub assignments: BTreeMap<String, usize>,
    /// Advance moves required by the placements, in application order.
    pub shifts: Vec<SlotShift>,
}

const GAP_FILL_WINDOW_MINUTES: i64 = 60;
const OVERFLOW_HEADROOM: usize = 10;

pub fn schedule_walk_ins(request: ScheduleRequest) -> Result<ScheduleOutcome, ScheduleError> {
    let ScheduleRequest {
        now,
        spacing,
        slot_minutes,
        slot_times,
        mut occupancy,
        mut candidates,
    } = request;

    candidates.sort_by(|a, b| {
        (a.numeric_token, a.created_at.as_str(), a.id.as_str()).cmp(&(
            b.numeric_token,
            b.created_at.as_str(),
            b.id.as_str(),
        ))
    });

    let slot_time = |index: usize| -> NaiveDateTime {
        if let Some(time) = slot_times.get(index) {
            return *time;
        }
        let last_index = slot_times.len().saturating_sub(1);
        let base = slot_times
            .get(last_index)
            .copied()
            .unwrap_or(now);
        base + Duration::minutes((index - last_index) as i64 * slot_minutes as i64)
    };

    let mut outcome = ScheduleOutcome::default();

    for candidate in candidates {
        grow_overflow(&mut occupancy, slot_times.len());

        let target = resolve_target(
            &occupancy,
            &candidate,
            now,
            spacing,
            slot_times.len(),
            &slot_time,
        );
        trace!(candidate = %candidate.id, ?target, "resolved walk-in target");

        let placed = target
            .and_then(|t| make_space(&mut occupancy, t))
            .or_else(|| {
                // Final fallback: any empty future slot.
                (0..occupancy.len())
                    .find(|&i| {
                        occupancy[i].is_empty()
                            && (slot_time(i) >= now || i >= slot_times.len())
                    })
                    .map(|i| (i, Vec::new()))
            });

        let Some((index, shifts)) = placed else {
            return Err(ScheduleError::Exhausted(candidate.id));
        };

        occupancy[index] = Occupant::WalkIn(candidate.id.clone());
        outcome.assignments.insert(candidate.id, index);
        outcome.shifts.extend(shifts);
    }

    Ok(outcome)
}

/// Extend the array with empty overtime cells so shift logic always has room
/// to push: at least `OVERFLOW_HEADROOM` past the last occupied index.
fn grow_overflow(occupancy: &mut Vec<Occupant>, physical_count: usize) {
    let max_occupied = occupancy
        .iter()
        .rposition(|cell| !cell.is_empty())
        .map(|i| i + 1)
        .unwrap_or(0);
    let needed = physical_count.max(max_occupied) + OVERFLOW_HEADROOM;
    if occupancy.len() < needed {
        occupancy.resize(needed, Occupant::Empty);
    }
}

fn resolve_target(
    occupancy: &[Occupant],
    candidate: &WalkInCandidate,
    now: NaiveDateTime,
    spacing: usize,
    physical_count: usize,
    slot_time: &dyn Fn(usize) -> NaiveDateTime,
) -> Option<usize> {
    let horizon = now + Duration::minutes(GAP_FILL_WINDOW_MINUTES);
    let in_window = |i: usize| {
        let t = slot_time(i);
        t >= now && t <= horizon
    };

    // Gap-fill: an empty near-term slot with somebody after it is a true hole
    // left by a cancellation; take it before anything else.
    for (i, cell) in occupancy.iter().enumerate() {
        if cell.is_empty()
            && in_window(i)
            && occupancy[i + 1..].iter().any(|later| !later.is_empty())
        {
            return Some(i);
        }
    }

    let last_walk_in = occupancy.iter().rposition(Occupant::is_walk_in);

    // Retention: keep an already-placed walk-in where it is, unless an empty
    // slot right after the walk-in block lets the queue tighten.
    if let Some(preferred) = candidate.preferred_slot_index {
        if let Some(anchor) = last_walk_in {
            for i in anchor + 1..=preferred.min(occupancy.len().saturating_sub(1)) {
                if occupancy[i].is_empty() {
                    return Some(i);
                }
            }
        }
        return Some(preferred);
    }

    // Spacing: place one past the advance at ordinal `S` (0-based) among the
    // shiftable advances after the walk-in anchor.
    let scan_from = last_walk_in.map(|i| i + 1).unwrap_or(0);
    let advances: Vec<usize> = (scan_from..occupancy.len())
        .filter(|&i| occupancy[i].is_shiftable())
        .collect();

    if spacing > 0 && advances.len() >= spacing {
        let ordinal = spacing.min(advances.len() - 1);
        return Some(advances[ordinal] + 1);
    }
    if let Some(&last_advance) = advances.last() {
        return Some(last_advance + 1);
    }

    // No advances to space against: take a near-term empty slot, else the
    // first empty future slot at all.
    if let Some(i) = (0..occupancy.len()).find(|&i| occupancy[i].is_empty() && in_window(i)) {
        return Some(i);
    }
    (0..occupancy.len()).find(|&i| {
        occupancy[i].is_empty() && (slot_time(i) >= now || i >= physical_count)
    })
}

/// Free the cell at `target`, walking right as needed: pinned occupants are
/// skipped by restarting beyond them, and a contiguous run of shiftable
/// advances slides one cell right into the next empty slot. Returns the freed
/// index plus the advance moves performed.
fn make_space(
    occupancy: &mut [Occupant],
    mut target: usize,
) -> Option<(usize, Vec<SlotShift>)> {
    let mut shifts = Vec::new();

    while target < occupancy.len() {
        match &occupancy[target] {
            Occupant::Empty => return Some((target, shifts)),
            Occupant::Blocked(_)
            | Occupant::Break(_)
            | Occupant::Reserved(_)
            | Occupant::WalkIn(_) => {
                target += 1;
            }
            Occupant::Shiftable(_) => {
                let mut run_end = target;
                while run_end < occupancy.len() && occupancy[run_end].is_shiftable() {
                    run_end += 1;
                }
                if run_end >= occupancy.len() {
                    return None;
                }
                if !occupancy[run_end].is_empty() {
                    // The run is pinned against an immovable cell; restart
                    // beyond it.
                    target = run_end;
                    continue;
                }
                for k in (target..run_end).rev() {
                    let cell = std::mem::replace(&mut occupancy[k], Occupant::Empty);
                    let id = cell.id().unwrap_or_default().to_string();
                    occupancy[k + 1] = cell;
                    shifts.push(SlotShift { id, from: k, to: k + 1 });
                }
                return Some((target, shifts));
            }
        }
    }

    None
}
