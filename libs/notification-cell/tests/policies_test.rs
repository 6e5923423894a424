use appointment_cell::models::{Appointment, AppointmentStatus, BookedVia};
use doctor_cell::models::TokenDistribution;
use notification_cell::NotificationDispatcher;

fn appointment(via: BookedVia, token: &str, classic: Option<&str>) -> Appointment {
    Appointment {
        id: "appt-1".into(),
        clinic_id: "clinic-1".into(),
        doctor_id: "doc-1".into(),
        patient_id: "p1".into(),
        date: "2026-01-05".into(),
        time: "10:45 AM".into(),
        arrive_by_time: Some("10:45 AM".into()),
        booked_via: via,
        status: AppointmentStatus::Pending,
        slot_index: 3,
        session_index: 0,
        numeric_token: 4,
        token_number: token.into(),
        classic_token_number: classic.map(str::to_string),
        cancelled_by_break: false,
        is_in_buffer: false,
        is_force_booked: false,
        cut_off_time: Some("10:30 AM".into()),
        no_show_time: Some("11:00 AM".into()),
        break_id: None,
        reminder_evening_sent: false,
        reminder_morning_sent: false,
        booked_notification_sent: false,
        created_at: None,
    }
}

#[test]
fn advanced_mode_always_shows_the_position_token() {
    let row = appointment(BookedVia::Advance, "A1-004", None);
    assert_eq!(
        NotificationDispatcher::display_token(&row, TokenDistribution::Advanced),
        Some("A1-004".into())
    );
}

#[test]
fn classic_mode_shows_the_plain_sequence_only() {
    let row = appointment(BookedVia::Advance, "A1-004", Some("007"));
    assert_eq!(
        NotificationDispatcher::display_token(&row, TokenDistribution::Classic),
        Some("007".into())
    );

    // A classic field polluted with a position-style string is suppressed.
    let polluted = appointment(BookedVia::Advance, "A1-004", Some("A1-004"));
    assert_eq!(
        NotificationDispatcher::display_token(&polluted, TokenDistribution::Classic),
        None
    );
}

#[test]
fn classic_mode_still_shows_walk_in_tokens() {
    let row = appointment(BookedVia::WalkIn, "W1-105", None);
    assert_eq!(
        NotificationDispatcher::display_token(&row, TokenDistribution::Classic),
        Some("W1-105".into())
    );
}

#[test]
fn reporting_time_is_fifteen_minutes_before_arrive_by() {
    let row = appointment(BookedVia::Advance, "A1-004", None);
    assert_eq!(
        NotificationDispatcher::reporting_time(&row),
        Some("10:30 AM".into())
    );

    // Without an arrive-by time the slot time anchors the calculation.
    let mut bare = appointment(BookedVia::Advance, "A1-004", None);
    bare.arrive_by_time = None;
    assert_eq!(
        NotificationDispatcher::reporting_time(&bare),
        Some("10:30 AM".into())
    );
}

#[test]
fn walk_ins_see_their_exact_time() {
    let row = appointment(BookedVia::WalkIn, "W1-105", None);
    assert_eq!(
        NotificationDispatcher::reporting_time(&row),
        Some("10:45 AM".into())
    );
}
