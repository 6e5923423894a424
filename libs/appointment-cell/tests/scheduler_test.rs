use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

use appointment_cell::services::scheduler::{
    schedule_walk_ins, Occupant, ScheduleRequest, SlotShift, WalkInCandidate,
};

fn at(h: u32, m: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2026, 1, 5)
        .unwrap()
        .and_time(NaiveTime::from_hms_opt(h, m, 0).unwrap())
}

fn quarter_hour_slots(start_h: u32, start_m: u32, count: usize) -> Vec<NaiveDateTime> {
    (0..count)
        .map(|i| at(start_h, start_m) + chrono::Duration::minutes(15 * i as i64))
        .collect()
}

fn candidate(id: &str, numeric_token: u32) -> WalkInCandidate {
    WalkInCandidate {
        id: id.into(),
        numeric_token,
        created_at: "2026-01-05T10:00:00".into(),
        preferred_slot_index: None,
    }
}

fn shiftable(id: &str) -> Occupant {
    Occupant::Shiftable(id.into())
}

#[test]
fn gap_from_a_cancellation_is_filled_first() {
    // Slots 10:00..10:45; advances at 0, 2, 3; the hole at 1 is a true gap.
    let request = ScheduleRequest {
        now: at(10, 5),
        spacing: 5,
        slot_minutes: 15,
        slot_times: quarter_hour_slots(10, 0, 4),
        occupancy: vec![
            shiftable("a0"),
            Occupant::Empty,
            shiftable("a2"),
            shiftable("a3"),
        ],
        candidates: vec![candidate("w1", 105)],
    };

    let outcome = schedule_walk_ins(request).unwrap();
    assert_eq!(outcome.assignments["w1"], 1);
    assert!(outcome.shifts.is_empty());
}

#[test]
fn spacing_places_past_the_configured_advance_count_and_cascades() {
    // Eight slots 10:00..11:45, advances on the first six, spacing 2.
    let request = ScheduleRequest {
        now: at(10, 0),
        spacing: 2,
        slot_minutes: 15,
        slot_times: quarter_hour_slots(10, 0, 8),
        occupancy: vec![
            shiftable("a0"),
            shiftable("a1"),
            shiftable("a2"),
            shiftable("a3"),
            shiftable("a4"),
            shiftable("a5"),
            Occupant::Empty,
            Occupant::Empty,
        ],
        candidates: vec![candidate("w1", 109)],
    };

    let outcome = schedule_walk_ins(request).unwrap();
    assert_eq!(outcome.assignments["w1"], 3);
    assert_eq!(
        outcome.shifts,
        vec![
            SlotShift { id: "a5".into(), from: 5, to: 6 },
            SlotShift { id: "a4".into(), from: 4, to: 5 },
            SlotShift { id: "a3".into(), from: 3, to: 4 },
        ]
    );
}

#[test]
fn pinned_occupants_never_move() {
    let request = ScheduleRequest {
        now: at(10, 0),
        spacing: 1,
        slot_minutes: 15,
        slot_times: quarter_hour_slots(10, 0, 6),
        occupancy: vec![
            Occupant::Blocked("done".into()),
            shiftable("a1"),
            Occupant::Break("brk".into()),
            Occupant::Reserved("rsv".into()),
            shiftable("a4"),
            Occupant::Empty,
        ],
        candidates: vec![candidate("w1", 107)],
    };

    let outcome = schedule_walk_ins(request).unwrap();

    // Spacing 1: one past the advance at ordinal 1 (a4, slot 4) → target 5,
    // which is already free. Nothing pinned moved.
    assert_eq!(outcome.assignments["w1"], 5);
    assert!(outcome.shifts.is_empty());
    for shift in &outcome.shifts {
        assert!(!["done", "brk", "rsv"].contains(&shift.id.as_str()));
    }
}

#[test]
fn run_pinned_against_a_break_restarts_beyond_it() {
    // Advances at 1 and 2 sit against a break; the freed cell must come from
    // beyond the break, not by moving it.
    let request = ScheduleRequest {
        now: at(10, 0),
        spacing: 1,
        slot_minutes: 15,
        slot_times: quarter_hour_slots(10, 0, 6),
        occupancy: vec![
            shiftable("a0"),
            shiftable("a1"),
            Occupant::Break("brk".into()),
            shiftable("a3"),
            Occupant::Empty,
            Occupant::Empty,
        ],
        candidates: vec![candidate("w1", 107)],
    };

    let outcome = schedule_walk_ins(request).unwrap();
    // Target lands one past a1 (slot 2, the break); make_space skips to 3,
    // shifts a3 to 4 and frees 3.
    assert_eq!(outcome.assignments["w1"], 3);
    assert_eq!(
        outcome.shifts,
        vec![SlotShift { id: "a3".into(), from: 3, to: 4 }]
    );
}

#[test]
fn retention_keeps_walk_ins_tight_after_cancellations() {
    // w-early holds slot 1; the rebalanced w-late preferred 5, but slot 2
    // opened up right after the walk-in block.
    let request = ScheduleRequest {
        now: at(10, 0),
        spacing: 5,
        slot_minutes: 15,
        slot_times: quarter_hour_slots(10, 0, 8),
        occupancy: vec![
            Occupant::Blocked("done".into()),
            Occupant::WalkIn("w-early".into()),
            Occupant::Empty,
            Occupant::Empty,
            Occupant::Empty,
            Occupant::Empty,
            Occupant::Empty,
            Occupant::Empty,
        ],
        candidates: vec![WalkInCandidate {
            id: "w-late".into(),
            numeric_token: 110,
            created_at: "2026-01-05T09:55:00".into(),
            preferred_slot_index: Some(5),
        }],
    };

    let outcome = schedule_walk_ins(request).unwrap();
    assert_eq!(outcome.assignments["w-late"], 2);
}

#[test]
fn overflow_cells_are_synthesised_when_the_day_is_full() {
    let request = ScheduleRequest {
        now: at(10, 0),
        spacing: 0,
        slot_minutes: 15,
        slot_times: quarter_hour_slots(10, 0, 4),
        occupancy: vec![
            shiftable("a0"),
            shiftable("a1"),
            shiftable("a2"),
            shiftable("a3"),
        ],
        candidates: vec![candidate("w1", 105)],
    };

    let outcome = schedule_walk_ins(request).unwrap();
    // Spacing 0: one past the last advance, into synthesised overtime.
    assert_eq!(outcome.assignments["w1"], 4);
    assert!(outcome.shifts.is_empty());
}

#[test]
fn identical_inputs_schedule_identically() {
    let build = || ScheduleRequest {
        now: at(10, 5),
        spacing: 3,
        slot_minutes: 15,
        slot_times: quarter_hour_slots(10, 0, 10),
        occupancy: vec![
            shiftable("a0"),
            Occupant::Empty,
            shiftable("a2"),
            Occupant::Break("brk".into()),
            shiftable("a4"),
            shiftable("a5"),
            Occupant::Empty,
            Occupant::Empty,
            Occupant::Empty,
            Occupant::Empty,
        ],
        candidates: vec![candidate("w2", 106), candidate("w1", 105)],
    };

    let first = schedule_walk_ins(build()).unwrap();
    let second = schedule_walk_ins(build()).unwrap();
    assert_eq!(first, second);
}

#[test]
fn candidates_are_placed_in_token_order() {
    let request = ScheduleRequest {
        now: at(10, 0),
        spacing: 0,
        slot_minutes: 15,
        slot_times: quarter_hour_slots(10, 0, 6),
        occupancy: vec![Occupant::Empty; 6],
        candidates: vec![candidate("w-second", 106), candidate("w-first", 105)],
    };

    let outcome = schedule_walk_ins(request).unwrap();
    assert!(outcome.assignments["w-first"] < outcome.assignments["w-second"]);
}
