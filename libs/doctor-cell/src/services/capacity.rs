use std::collections::HashSet;

use chrono::NaiveDateTime;

use crate::services::slots::DaySlots;

/// Per-session advance/walk-in split over the slots that are still in the
/// future. Recomputed against wall time on every call: the reserved band
/// shrinks as the session progresses.
#[derive(Debug, Clone)]
pub struct SessionCapacity {
    pub session_index: usize,
    pub future_slot_count: usize,
    pub advance_capacity: usize,
    pub walk_in_capacity: usize,
    /// Absolute indices of the trailing future slots held back for walk-ins.
    pub reserved_walk_in_indices: Vec<usize>,
}

/// Split `future_slots` into advance/walk-in counts: the advance share is the
/// integer closest to 85% (tie goes down), and at least one slot stays with
/// walk-ins whenever the session still has future slots.
pub fn advance_split(future_slots: usize) -> (usize, usize) {
    if future_slots == 0 {
        return (0, 0);
    }
    let target = future_slots as f64 * 0.85;
    let floor = target.floor() as usize;
    let ceil = target.ceil() as usize;
    let mut advance = if target - floor as f64 <= ceil as f64 - target {
        floor
    } else {
        ceil
    };
    if advance >= future_slots {
        advance = future_slots - 1;
    }
    (advance, future_slots - advance)
}

pub fn session_capacities(day: &DaySlots, now: NaiveDateTime) -> Vec<SessionCapacity> {
    day.sessions
        .iter()
        .map(|session| {
            let future: Vec<usize> = day.slots
                [session.first_slot..session.first_slot + session.slot_count]
                .iter()
                .filter(|slot| slot.time >= now)
                .map(|slot| slot.absolute_index)
                .collect();
            let (advance_capacity, walk_in_capacity) = advance_split(future.len());
            let reserved_walk_in_indices =
                future[future.len() - walk_in_capacity..].to_vec();
            SessionCapacity {
                session_index: session.index,
                future_slot_count: future.len(),
                advance_capacity,
                walk_in_capacity,
                reserved_walk_in_indices,
            }
        })
        .collect()
}

pub fn advance_capacity_total(capacities: &[SessionCapacity]) -> usize {
    capacities.iter().map(|c| c.advance_capacity).sum()
}

pub fn reserved_indices(capacities: &[SessionCapacity]) -> HashSet<usize> {
    capacities
        .iter()
        .flat_map(|c| c.reserved_walk_in_indices.iter().copied())
        .collect()
}
