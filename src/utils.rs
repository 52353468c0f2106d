use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rand::{Rng, distributions::Alphanumeric, thread_rng};

use crate::database::FieldValue;

const AUTO_ID_LEN: usize = 20;

const OFFSET_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f%:z", "%Y-%m-%dT%H:%M%:z"];

const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M"];

const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, PartialEq)]
pub enum TimestampOrOriginal {
    Parsed(DateTime<Utc>),
    Unparsed(String),
}

impl From<TimestampOrOriginal> for FieldValue {
    fn from(value: TimestampOrOriginal) -> Self {
        match value {
            TimestampOrOriginal::Parsed(timestamp) => FieldValue::Timestamp(timestamp),
            TimestampOrOriginal::Unparsed(original) => FieldValue::String(original),
        }
    }
}

/// Best effort ISO-8601 parse. Never fails, unparseable input comes back untouched.
///
/// Values without an offset are taken as UTC, a bare date as UTC midnight.
/// Any single character may separate date and time, and `,` may stand in
/// for the decimal point.
pub fn parse_optional_timestamp(value: &str) -> TimestampOrOriginal {
    match parse_iso8601(&normalize_iso8601(value)) {
        Some(timestamp) => TimestampOrOriginal::Parsed(timestamp),
        None => TimestampOrOriginal::Unparsed(value.to_string()),
    }
}

/// Rewrites `value` to `YYYY-MM-DDTHH:MM...` so the formats above only need one
/// separator, one decimal mark and at least hour and minute.
fn normalize_iso8601(value: &str) -> String {
    let (Some(date), Some(rest)) = (value.get(..10), value.get(10..)) else {
        return value.to_string();
    };

    let mut rest = rest.chars();
    if rest.next().is_none() {
        return value.to_string();
    }

    let time = rest.as_str().replacen(',', ".", 1);
    let time = match (time.get(..2), time.get(2..)) {
        (Some(hour), Some(tail)) if !tail.starts_with(':') => format!("{hour}:00{tail}"),
        _ => time,
    };

    format!("{date}T{time}")
}

fn parse_iso8601(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(timestamp) = DateTime::parse_from_rfc3339(value) {
        return Some(timestamp.with_timezone(&Utc));
    }

    // chrono's %:z does not take a literal Z
    let with_offset = match value.strip_suffix(['Z', 'z']) {
        Some(base) => format!("{base}+00:00"),
        None => value.to_string(),
    };

    OFFSET_FORMATS
        .iter()
        .find_map(|format| DateTime::parse_from_str(&with_offset, format).ok())
        .map(|timestamp| timestamp.with_timezone(&Utc))
        .or_else(|| {
            NAIVE_FORMATS
                .iter()
                .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
                .map(|naive| naive.and_utc())
        })
        .or_else(|| {
            NaiveDate::parse_from_str(value, DATE_FORMAT)
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
                .map(|naive| naive.and_utc())
        })
}

/// Random document id in the same shape as Firestore auto ids.
pub fn auto_id() -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(AUTO_ID_LEN)
        .map(char::from)
        .collect()
}
