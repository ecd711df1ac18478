use chrono::{DateTime, NaiveDate, NaiveDateTime};

use crate::record::{CleanRecord, RawRecord, RejectionReason};
use crate::registry::DedupRegistry;

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S",
];

const OFFSET_DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f%:z", "%Y-%m-%d %H:%M:%S%.f%z"];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d"];

/// Validate a raw record and claim its id.
///
/// Checks run in a fixed order and stop at the first failure: id, value, timestamp,
/// duplicate claim, then the non-negative rule. The claim happens before the sign
/// check, so a record rejected for a negative value still holds its id and any later
/// record with that id is a duplicate.
pub fn validate(raw: &RawRecord, registry: &DedupRegistry) -> Result<CleanRecord, RejectionReason> {
    let id = parse_id(raw.id.as_deref()).ok_or(RejectionReason::InvalidId)?;
    let value = parse_value(raw.value.as_deref()).ok_or(RejectionReason::InvalidValue)?;
    let timestamp =
        parse_timestamp(raw.timestamp.as_deref()).ok_or(RejectionReason::InvalidTimestamp)?;

    if !registry.claim_if_new(id) {
        return Err(RejectionReason::DuplicateId);
    }

    if value < 0.0 {
        return Err(RejectionReason::NegativeValue);
    }

    Ok(CleanRecord {
        id,
        value,
        timestamp,
    })
}

/// Integers, or floats with no fractional part (numeric columns with blanks in them
/// tend to come out as `7.0`).
pub fn parse_id(field: Option<&str>) -> Option<i64> {
    let field = field?.trim();
    if let Ok(id) = field.parse::<i64>() {
        return Some(id);
    }

    let float = field.parse::<f64>().ok()?;
    let in_range = float >= i64::MIN as f64 && float < i64::MAX as f64;
    if float.is_finite() && float.fract() == 0.0 && in_range {
        Some(float as i64)
    } else {
        None
    }
}

/// NaN and infinities are refused, they can't be stored as clean values.
pub fn parse_value(field: Option<&str>) -> Option<f64> {
    let value = field?.trim().parse::<f64>().ok()?;
    value.is_finite().then_some(value)
}

/// Offset-aware inputs are normalized to UTC. Date-only inputs mean midnight.
pub fn parse_timestamp(field: Option<&str>) -> Option<NaiveDateTime> {
    let field = field?.trim();
    if field.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(field) {
        return Some(dt.naive_utc());
    }

    for format in OFFSET_DATETIME_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(field, format) {
            return Some(dt.naive_utc());
        }
    }

    for format in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(field, format) {
            return Some(dt);
        }
    }

    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(field, format).ok())
        .and_then(|date| date.and_hms_opt(0, 0, 0))
}
