use chrono::{NaiveDate, NaiveTime};

use shared_utils::clock::{self, Clock, FixedClock};
use shared_utils::sanitize_doc_id;

#[test]
fn date_renders_without_zero_padding() {
    let date = NaiveDate::from_ymd_opt(2026, 1, 4).unwrap();
    assert_eq!(clock::format_date(date), "4 January 2026");
    assert_eq!(clock::iso_date(date), "2026-01-04");
    assert_eq!(clock::weekday_name(date), "Sunday");
}

#[test]
fn time_renders_with_leading_zero_and_meridiem() {
    let time = NaiveTime::from_hms_opt(14, 30, 0).unwrap();
    assert_eq!(clock::format_time(time), "02:30 PM");

    let morning = NaiveTime::from_hms_opt(9, 5, 0).unwrap();
    assert_eq!(clock::format_time(morning), "09:05 AM");
}

#[test]
fn parses_both_time_formats() {
    let expected = NaiveTime::from_hms_opt(14, 30, 0).unwrap();
    assert_eq!(clock::parse_time("02:30 PM").unwrap(), expected);
    assert_eq!(clock::parse_time("14:30").unwrap(), expected);
    assert_eq!(clock::parse_time("14:30:00").unwrap(), expected);
}

#[test]
fn parses_both_date_formats() {
    let expected = NaiveDate::from_ymd_opt(2026, 1, 4).unwrap();
    assert_eq!(clock::parse_date("2026-01-04").unwrap(), expected);
    assert_eq!(clock::parse_date("4 January 2026").unwrap(), expected);
}

#[test]
fn parse_failures_are_explicit() {
    assert!(clock::parse_time("half past ten").is_err());
    assert!(clock::parse_date("someday").is_err());
}

#[test]
fn fixed_clock_is_settable() {
    let date = NaiveDate::from_ymd_opt(2026, 1, 5).unwrap();
    let clock = FixedClock::at(date, NaiveTime::from_hms_opt(10, 0, 0).unwrap());
    assert_eq!(clock.today_iso(), "2026-01-05");

    clock.set(date.and_time(NaiveTime::from_hms_opt(11, 45, 0).unwrap()));
    assert_eq!(clock.now().time(), NaiveTime::from_hms_opt(11, 45, 0).unwrap());
}

#[test]
fn doc_ids_keep_only_word_characters() {
    assert_eq!(sanitize_doc_id("Dr. Asha K"), "Dr_Asha_K");
    assert_eq!(
        sanitize_doc_id("clinic-1_Dr X_2026-01-05"),
        "clinic1_Dr_X_20260105"
    );
}
