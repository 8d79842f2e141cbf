use chrono::{Datelike, NaiveDate};
use rust_decimal::Decimal;

use crate::limits::*;
use crate::model::*;

use super::EngineError;

pub(crate) fn validate_caller(caller: &UserId) -> Result<(), EngineError> {
    if caller.as_str().trim().is_empty() {
        return Err(EngineError::validation("user_id", "caller identity is required"));
    }
    if caller.as_str().len() > MAX_USER_ID_LEN {
        return Err(EngineError::LimitExceeded("user id too long"));
    }
    Ok(())
}

fn validate_date(path: &'static str, date: NaiveDate) -> Result<(), EngineError> {
    if !(MIN_VALID_YEAR..=MAX_VALID_YEAR).contains(&date.year()) {
        return Err(EngineError::validation(path, format!("date {date} out of range")));
    }
    Ok(())
}

/// Check a candidate interval against its booking type and build the span.
pub(crate) fn booking_span(
    start: NaiveDate,
    end: Option<NaiveDate>,
    kind: BookingType,
) -> Result<DateSpan, EngineError> {
    validate_date("start_date", start)?;
    if let Some(end) = end {
        validate_date("end_date", end)?;
    }
    match (kind, end) {
        (BookingType::Periodic, None) => Err(EngineError::validation(
            "end_date",
            "end_date is required for periodic bookings",
        )),
        (BookingType::Periodic, Some(end)) if end < start => Err(EngineError::validation(
            "end_date",
            "end_date must not be before start_date",
        )),
        (BookingType::Periodic, Some(end)) => {
            let span = DateSpan::closed(start, end);
            if span.day_count().unwrap_or(0) > MAX_PERIODIC_DAYS {
                return Err(EngineError::LimitExceeded("booking period too long"));
            }
            Ok(span)
        }
        (BookingType::Permanent, Some(_)) => Err(EngineError::validation(
            "end_date",
            "permanent bookings have no end_date",
        )),
        (BookingType::Permanent, None) => Ok(DateSpan::open_ended(start)),
    }
}

pub(crate) fn validate_tariff(tariff: &Tariff) -> Result<(), EngineError> {
    if tariff.daily_rate < Decimal::ZERO {
        return Err(EngineError::validation("daily_rate", "must not be negative"));
    }
    if tariff.monthly_rate < Decimal::ZERO {
        return Err(EngineError::validation("monthly_rate", "must not be negative"));
    }
    Ok(())
}

pub(crate) fn validate_name(path: &'static str, name: &str) -> Result<(), EngineError> {
    if name.trim().is_empty() {
        return Err(EngineError::validation(path, "must not be empty"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("name too long"));
    }
    Ok(())
}

pub(crate) fn exception_span(
    start: NaiveDate,
    end: NaiveDate,
    percentage_change: i32,
    description: Option<&str>,
) -> Result<DateSpan, EngineError> {
    validate_date("start_date", start)?;
    validate_date("end_date", end)?;
    if end < start {
        return Err(EngineError::validation(
            "end_date",
            "end_date must not be before start_date",
        ));
    }
    if !(MIN_PERCENTAGE_CHANGE..=MAX_PERCENTAGE_CHANGE).contains(&percentage_change) {
        return Err(EngineError::validation(
            "percentage_change",
            format!("must be between {MIN_PERCENTAGE_CHANGE} and {MAX_PERCENTAGE_CHANGE}"),
        ));
    }
    if description.is_some_and(|d| d.len() > MAX_LABEL_LEN) {
        return Err(EngineError::LimitExceeded("description too long"));
    }
    Ok(DateSpan::closed(start, end))
}

pub(crate) fn query_window(start: NaiveDate, end: NaiveDate) -> Result<DateSpan, EngineError> {
    validate_date("start_date", start)?;
    validate_date("end_date", end)?;
    if end < start {
        return Err(EngineError::validation(
            "end_date",
            "end_date must not be before start_date",
        ));
    }
    let span = DateSpan::closed(start, end);
    if span.day_count().unwrap_or(0) > MAX_QUERY_WINDOW_DAYS {
        return Err(EngineError::LimitExceeded("query window too wide"));
    }
    Ok(span)
}
