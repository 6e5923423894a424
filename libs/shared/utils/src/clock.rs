use std::sync::Mutex;

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Utc, Weekday};
use chrono_tz::Tz;
use thiserror::Error;

use shared_config::DEFAULT_CLINIC_TIMEZONE;

#[derive(Error, Debug)]
pub enum ClockError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// Wall-clock source for all clinic-local now/date/time decisions.
///
/// Records persist human-readable date/time strings; every comparison against
/// "now" must happen in the same zone, so the core never touches host time
/// directly.
pub trait Clock: Send + Sync {
    /// Current wall time in the clinic zone.
    fn now(&self) -> NaiveDateTime;

    fn today(&self) -> NaiveDate {
        self.now().date()
    }

    fn today_iso(&self) -> String {
        iso_date(self.today())
    }
}

pub struct SystemClock {
    zone: Tz,
}

impl SystemClock {
    pub fn new(zone_name: &str) -> Result<Self, ClockError> {
        let zone: Tz = zone_name
            .parse()
            .map_err(|_| ClockError::InvalidInput(format!("unknown timezone '{}'", zone_name)))?;
        Ok(Self { zone })
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        // The default zone name is a compile-time constant; parsing it cannot fail.
        Self::new(DEFAULT_CLINIC_TIMEZONE).unwrap()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Utc::now().with_timezone(&self.zone).naive_local()
    }
}

/// Deterministic clock for tests; the instant can be advanced mid-test.
pub struct FixedClock {
    now: Mutex<NaiveDateTime>,
}

impl FixedClock {
    pub fn new(now: NaiveDateTime) -> Self {
        Self { now: Mutex::new(now) }
    }

    pub fn at(date: NaiveDate, time: NaiveTime) -> Self {
        Self::new(date.and_time(time))
    }

    pub fn set(&self, now: NaiveDateTime) {
        *self.now.lock().unwrap() = now;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        *self.now.lock().unwrap()
    }
}

/// `d MMMM yyyy`, e.g. `4 January 2026`.
pub fn format_date(date: NaiveDate) -> String {
    date.format("%-d %B %Y").to_string()
}

/// `hh:mm AM/PM` with leading zero, e.g. `02:30 PM`.
pub fn format_time(time: NaiveTime) -> String {
    time.format("%I:%M %p").to_string()
}

/// `yyyy-MM-dd`.
pub fn iso_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

pub fn weekday_name(date: NaiveDate) -> &'static str {
    match date.weekday() {
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
        Weekday::Sun => "Sunday",
    }
}

/// Accepts `hh:mm AM/PM`, `HH:MM` and `HH:MM:SS`.
pub fn parse_time(input: &str) -> Result<NaiveTime, ClockError> {
    let trimmed = input.trim();
    for format in ["%I:%M %p", "%H:%M:%S", "%H:%M"] {
        if let Ok(time) = NaiveTime::parse_from_str(trimmed, format) {
            return Ok(time);
        }
    }
    Err(ClockError::InvalidInput(format!("unparseable time '{}'", input)))
}

/// Accepts `yyyy-MM-dd` and `d MMMM yyyy`.
pub fn parse_date(input: &str) -> Result<NaiveDate, ClockError> {
    let trimmed = input.trim();
    for format in ["%Y-%m-%d", "%d %B %Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, format) {
            return Ok(date);
        }
    }
    Err(ClockError::InvalidInput(format!("unparseable date '{}'", input)))
}

pub fn minutes_between(from: NaiveDateTime, to: NaiveDateTime) -> i64 {
    (to - from).num_minutes()
}

/// Clinic-local `%Y-%m-%dT%H:%M:%S`, the timestamp form stored in records.
pub fn format_timestamp(at: NaiveDateTime) -> String {
    at.format("%Y-%m-%dT%H:%M:%S").to_string()
}

pub fn parse_timestamp(raw: &str) -> Result<NaiveDateTime, ClockError> {
    NaiveDateTime::parse_from_str(raw.trim(), "%Y-%m-%dT%H:%M:%S")
        .map_err(|_| ClockError::InvalidInput(format!("unparseable timestamp '{}'", raw)))
}
