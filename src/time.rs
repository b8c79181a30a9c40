//! Conversions between `HH:MM` strings and minutes since midnight, plus the
//! business-hours and lead-time predicates every booking goes through.

use chrono::{Local, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta};

use crate::model::Minutes;

pub const MINUTES_PER_DAY: Minutes = 24 * 60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimeError {
    Malformed(String),
    MinutesOutOfRange(String),
    BadDate(String),
}

impl std::fmt::Display for TimeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimeError::Malformed(s) => write!(f, "Invalid time format: {s} (expected HH:MM)"),
            TimeError::MinutesOutOfRange(s) => write!(f, "Invalid minutes in time: {s}"),
            TimeError::BadDate(s) => write!(f, "Invalid date: {s} (expected YYYY-MM-DD)"),
        }
    }
}

impl std::error::Error for TimeError {}

fn parse_component(part: &str, whole: &str) -> Result<Minutes, TimeError> {
    // `str::parse` accepts a leading '+', so check digits explicitly.
    if part.is_empty() || part.len() > 4 || !part.bytes().all(|b| b.is_ascii_digit()) {
        return Err(TimeError::Malformed(whole.to_string()));
    }
    part.parse()
        .map_err(|_| TimeError::Malformed(whole.to_string()))
}

/// `"HH:MM"` → `HH * 60 + MM`.
pub fn time_to_minutes(time: &str) -> Result<Minutes, TimeError> {
    let (hours, minutes) = time
        .split_once(':')
        .ok_or_else(|| TimeError::Malformed(time.to_string()))?;
    let hours = parse_component(hours, time)?;
    let minutes = parse_component(minutes, time)?;
    if minutes >= 60 {
        return Err(TimeError::MinutesOutOfRange(time.to_string()));
    }
    Ok(hours * 60 + minutes)
}

/// Minutes since midnight → zero-padded `"HH:MM"`. Hours are not wrapped.
pub fn minutes_to_time(minutes: Minutes) -> String {
    debug_assert!(minutes >= 0, "minutes_to_time on negative value");
    format!("{:02}:{:02}", minutes / 60, minutes % 60)
}

/// Like [`minutes_to_time`] but wrapped onto the 24-hour clock face.
pub fn clock_label(minutes: Minutes) -> String {
    minutes_to_time(minutes.rem_euclid(MINUTES_PER_DAY))
}

/// Inclusive on both ends.
pub fn is_within_business_hours(time: Minutes, opening: Minutes, closing: Minutes) -> bool {
    opening <= time && time <= closing
}

pub fn starts_at(date: NaiveDate, time: Minutes) -> NaiveDateTime {
    date.and_time(NaiveTime::MIN) + TimeDelta::minutes(time as i64)
}

/// True iff `date` at `time` is at least `min_notice` minutes after `now`.
pub fn is_valid_lead_time(
    date: NaiveDate,
    time: Minutes,
    now: NaiveDateTime,
    min_notice: Minutes,
) -> bool {
    starts_at(date, time) - now >= TimeDelta::minutes(min_notice as i64)
}

/// Accepts `YYYY-MM-DD`, or a full timestamp whose time-of-day is ignored.
pub fn parse_date(s: &str) -> Result<NaiveDate, TimeError> {
    let s = s.trim();
    let day = s.get(..10).unwrap_or(s);
    if s.len() > 10 && !matches!(s.as_bytes()[10], b'T' | b' ') {
        return Err(TimeError::BadDate(s.to_string()));
    }
    NaiveDate::parse_from_str(day, "%Y-%m-%d").map_err(|_| TimeError::BadDate(s.to_string()))
}

/// Wall-clock time in the server's local zone; reservation times are local.
pub fn now_local() -> NaiveDateTime {
    Local::now().naive_local()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn parses_times() {
        assert_eq!(time_to_minutes("00:00"), Ok(0));
        assert_eq!(time_to_minutes("10:30"), Ok(630));
        assert_eq!(time_to_minutes("23:59"), Ok(1439));
        assert_eq!(time_to_minutes("9:05"), Ok(545));
    }

    #[test]
    fn rejects_minutes_out_of_range() {
        assert_eq!(
            time_to_minutes("10:60"),
            Err(TimeError::MinutesOutOfRange("10:60".into()))
        );
    }

    #[test]
    fn rejects_signs_and_garbage() {
        for bad in ["-10:30", "10:-30", "+1:00", "10", "", "ab:cd", "10:3x", ":30", "10:", "1:2:3"] {
            assert!(time_to_minutes(bad).is_err(), "{bad} should fail");
        }
    }

    #[test]
    fn round_trips_whole_day() {
        for m in 0..MINUTES_PER_DAY {
            let s = minutes_to_time(m);
            assert_eq!(s.len(), 5);
            assert_eq!(time_to_minutes(&s), Ok(m));
        }
    }

    #[test]
    fn minutes_to_time_does_not_wrap_hours() {
        assert_eq!(minutes_to_time(25 * 60 + 5), "25:05");
        assert_eq!(clock_label(25 * 60 + 5), "01:05");
        assert_eq!(clock_label(-30), "23:30");
    }

    #[test]
    fn business_hours_inclusive() {
        let (open, close) = (600, 1320);
        assert!(is_within_business_hours(600, open, close));
        assert!(is_within_business_hours(1320, open, close));
        assert!(!is_within_business_hours(599, open, close));
        assert!(!is_within_business_hours(1321, open, close));
    }

    #[test]
    fn lead_time_boundary() {
        let now = date("2026-05-01").and_hms_opt(18, 0, 0).unwrap();
        let day = date("2026-05-01");
        assert!(is_valid_lead_time(day, 19 * 60, now, 60));
        assert!(!is_valid_lead_time(day, 19 * 60 - 1, now, 60));
        assert!(!is_valid_lead_time(date("2026-04-30"), 23 * 60, now, 60));
        assert!(is_valid_lead_time(date("2026-05-02"), 0, now, 60));
    }

    #[test]
    fn parse_date_ignores_time_of_day() {
        assert_eq!(parse_date("2026-05-01"), Ok(date("2026-05-01")));
        assert_eq!(parse_date("2026-05-01T23:15:00.000Z"), Ok(date("2026-05-01")));
        assert!(parse_date("2026-13-01").is_err());
        assert!(parse_date("01/05/2026").is_err());
        assert!(parse_date("2026-05-01garbage").is_err());
    }
}
