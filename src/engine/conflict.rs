use chrono::{NaiveDate, NaiveDateTime};

use crate::limits::*;
use crate::model::*;
use crate::time::{MINUTES_PER_DAY, is_valid_lead_time, is_within_business_hours, time_to_minutes};

use super::EngineError;

pub(crate) fn validate_tables(tables: &TableCounts) -> Result<(), EngineError> {
    if TableSize::ALL
        .iter()
        .any(|&s| tables.get(s) > MAX_TABLES_PER_SIZE)
    {
        return Err(EngineError::LimitExceeded("too many tables requested"));
    }
    if tables.is_empty() {
        return Err(EngineError::validation("At least one table must be requested"));
    }
    Ok(())
}

pub(crate) fn validate_capacity(capacity: &TableCounts) -> Result<(), EngineError> {
    if TableSize::ALL
        .iter()
        .any(|&s| capacity.get(s) > MAX_CAPACITY_PER_SIZE)
    {
        return Err(EngineError::LimitExceeded("capacity too large"));
    }
    Ok(())
}

/// Opening must be strictly before closing on the same day; hours that run
/// past midnight are rejected.
pub(crate) fn validate_hours(opening: &str, closing: &str) -> Result<(Minutes, Minutes), EngineError> {
    let open = time_to_minutes(opening)?;
    let close = time_to_minutes(closing)?;
    if close > MINUTES_PER_DAY {
        return Err(EngineError::validation(format!(
            "Closing time {closing} is past midnight"
        )));
    }
    if close <= open {
        return Err(EngineError::validation(
            "Closing time must be after opening time",
        ));
    }
    Ok((open, close))
}

pub(crate) fn validate_restaurant_text(
    name: &str,
    location: Option<&str>,
    contact: Option<&str>,
    cuisines: &[String],
) -> Result<(), EngineError> {
    if name.trim().is_empty() {
        return Err(EngineError::validation("Restaurant name is required"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("restaurant name too long"));
    }
    if location.is_some_and(|s| s.len() > MAX_TEXT_LEN) || contact.is_some_and(|s| s.len() > MAX_TEXT_LEN) {
        return Err(EngineError::LimitExceeded("text field too long"));
    }
    if cuisines.len() > MAX_CUISINES || cuisines.iter().any(|c| c.len() > MAX_NAME_LEN) {
        return Err(EngineError::LimitExceeded("too many cuisines"));
    }
    Ok(())
}

pub(crate) fn check_lead_time(date: NaiveDate, time: Minutes, now: NaiveDateTime) -> Result<(), EngineError> {
    if !is_valid_lead_time(date, time, now, MIN_NOTICE_MINUTES) {
        return Err(EngineError::validation(
            "Reservations must be made at least 1 hour in advance",
        ));
    }
    Ok(())
}

pub(crate) fn check_open(restaurant: &Restaurant, time: Minutes) -> Result<(), EngineError> {
    if !is_within_business_hours(time, restaurant.opening, restaurant.closing) {
        return Err(EngineError::validation(
            "Requested time is outside restaurant business hours",
        ));
    }
    Ok(())
}

pub(crate) fn check_tables_fit(requested: &TableCounts, available: &TableCounts) -> Result<(), EngineError> {
    if let Some(size) = requested.first_shortfall(available) {
        tracing::debug!(
            "short on {}-seat tables: requested {}, available {}",
            size.seats(),
            requested.get(size),
            available.get(size)
        );
        return Err(EngineError::validation("Requested tables are not available"));
    }
    Ok(())
}
