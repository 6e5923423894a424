use chrono::{NaiveDate, NaiveTime};

use doctor_cell::models::ConsultationStatus;
use doctor_cell::services::delay::{
    doctor_delay_minutes, effective_session_start, BreakInterval,
};

fn at(h: u32, m: u32) -> chrono::NaiveDateTime {
    NaiveDate::from_ymd_opt(2026, 1, 5)
        .unwrap()
        .and_time(NaiveTime::from_hms_opt(h, m, 0).unwrap())
}

#[test]
fn mid_session_delay_subtracts_work_and_breaks() {
    let breaks = vec![BreakInterval { start: at(10, 20), end: at(10, 35) }];

    // 45 elapsed − 4 consultations × 5 min − 15 min break = 10.
    let delay = doctor_delay_minutes(
        at(10, 45),
        at(10, 0),
        ConsultationStatus::In,
        4,
        5,
        &breaks,
    );
    assert_eq!(delay, 10);
}

#[test]
fn delay_clamps_at_zero_when_ahead() {
    let breaks = vec![BreakInterval { start: at(10, 20), end: at(10, 35) }];

    for completed in [6, 7] {
        let delay = doctor_delay_minutes(
            at(10, 45),
            at(10, 0),
            ConsultationStatus::In,
            completed,
            5,
            &breaks,
        );
        assert_eq!(delay, 0);
    }
}

#[test]
fn doctor_out_is_behind_by_full_elapsed_time() {
    let delay = doctor_delay_minutes(
        at(10, 30),
        at(10, 0),
        ConsultationStatus::Out,
        0,
        15,
        &[],
    );
    assert_eq!(delay, 30);
}

#[test]
fn before_session_start_there_is_no_delay() {
    let delay = doctor_delay_minutes(
        at(9, 45),
        at(10, 0),
        ConsultationStatus::In,
        0,
        15,
        &[],
    );
    assert_eq!(delay, 0);
}

#[test]
fn opening_break_moves_the_effective_start() {
    let breaks = vec![BreakInterval { start: at(10, 0), end: at(10, 30) }];
    assert_eq!(effective_session_start(at(10, 0), &breaks), at(10, 30));

    // A later break leaves the start untouched.
    let later = vec![BreakInterval { start: at(11, 0), end: at(11, 30) }];
    assert_eq!(effective_session_start(at(10, 0), &later), at(10, 0));
}

#[test]
fn breaks_not_yet_started_do_not_count() {
    let breaks = vec![BreakInterval { start: at(11, 0), end: at(11, 15) }];
    let delay = doctor_delay_minutes(
        at(10, 45),
        at(10, 0),
        ConsultationStatus::In,
        2,
        15,
        &breaks,
    );
    // 45 elapsed − 30 work, upcoming break ignored.
    assert_eq!(delay, 15);
}
