use chrono::{NaiveDate, NaiveTime};

use doctor_cell::models::{
    AvailabilityExtension, DayAvailability, Doctor, SessionExtension, SessionWindow,
};
use doctor_cell::services::slots::{generate_day_slots, SlotError};

fn t(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap()
}

// 2026-01-05 is a Monday.
fn monday() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 1, 5).unwrap()
}

fn doctor_with_sessions(sessions: Vec<SessionWindow>) -> Doctor {
    Doctor {
        id: "doc-1".into(),
        clinic_id: "clinic-1".into(),
        name: "Dr Asha".into(),
        average_consultation_minutes: 15,
        weekly_availability: vec![DayAvailability {
            day_of_week: 1,
            sessions,
        }],
        break_periods: Default::default(),
        availability_extensions: Default::default(),
        consultation_status: Default::default(),
        free_follow_up_days: None,
    }
}

#[test]
fn expands_one_session_into_quarter_hour_steps() {
    let doctor = doctor_with_sessions(vec![SessionWindow {
        from: t(10, 0),
        to: t(13, 0),
    }]);

    let day = generate_day_slots(&doctor, monday()).unwrap();

    assert_eq!(day.slot_count(), 12);
    assert_eq!(day.slots[0].time.time(), t(10, 0));
    assert_eq!(day.slots[3].time.time(), t(10, 45));
    assert_eq!(day.slots[11].time.time(), t(12, 45));
    assert!(day.slots.iter().all(|s| s.session_index == 0));
}

#[test]
fn absolute_indices_stay_dense_across_sessions() {
    let doctor = doctor_with_sessions(vec![
        SessionWindow { from: t(9, 0), to: t(10, 0) },
        SessionWindow { from: t(17, 0), to: t(18, 0) },
    ]);

    let day = generate_day_slots(&doctor, monday()).unwrap();

    assert_eq!(day.slot_count(), 8);
    assert_eq!(day.sessions[0].first_slot, 0);
    assert_eq!(day.sessions[0].slot_count, 4);
    assert_eq!(day.sessions[1].first_slot, 4);
    assert_eq!(day.slots[4].session_index, 1);
    assert_eq!(day.slots[4].time.time(), t(17, 0));
    assert_eq!(day.session_of_slot(3), Some(0));
    assert_eq!(day.session_of_slot(4), Some(1));
}

#[test]
fn extension_lengthens_session_only_when_later() {
    let mut doctor = doctor_with_sessions(vec![SessionWindow {
        from: t(10, 0),
        to: t(11, 0),
    }]);

    let mut extension = AvailabilityExtension::default();
    extension.sessions.insert(
        "0".into(),
        SessionExtension { new_end_time: t(11, 30) },
    );
    doctor
        .availability_extensions
        .insert("2026-01-05".into(), extension);

    let day = generate_day_slots(&doctor, monday()).unwrap();
    assert_eq!(day.slot_count(), 6);
    assert_eq!(day.slots[5].time.time(), t(11, 15));

    // An "extension" earlier than the scheduled end is ignored.
    doctor
        .availability_extensions
        .get_mut("2026-01-05")
        .unwrap()
        .sessions
        .insert("0".into(), SessionExtension { new_end_time: t(10, 30) });
    let day = generate_day_slots(&doctor, monday()).unwrap();
    assert_eq!(day.slot_count(), 4);
}

#[test]
fn missing_weekday_fails_not_available() {
    let doctor = doctor_with_sessions(vec![SessionWindow {
        from: t(10, 0),
        to: t(11, 0),
    }]);

    // 2026-01-06 is a Tuesday; the doctor only sits on Mondays.
    let tuesday = NaiveDate::from_ymd_opt(2026, 1, 6).unwrap();
    assert!(matches!(
        generate_day_slots(&doctor, tuesday),
        Err(SlotError::NotAvailable(_))
    ));
}

#[test]
fn slot_time_extrapolates_past_the_day() {
    let doctor = doctor_with_sessions(vec![SessionWindow {
        from: t(10, 0),
        to: t(11, 0),
    }]);

    let day = generate_day_slots(&doctor, monday()).unwrap();
    assert_eq!(day.slot_time(3).time(), t(10, 45));
    assert_eq!(day.slot_time(5).time(), t(11, 15));
    assert_eq!(day.session_slot_time(0, 6).time(), t(11, 30));
}
