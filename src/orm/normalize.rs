//! Result normalization
//!
//! The backend returns temporal columns as text. Every normalized read path
//! coerces the well-known temporal fields into [`Value::Timestamp`]; all other
//! fields pass through untouched.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use tracing::debug;

use super::value::{Record, Value};

/// Columns coerced to timestamps on read.
pub const TIMESTAMP_FIELDS: [&str; 8] = [
    "created_at",
    "updated_at",
    "due_date",
    "start_date",
    "end_date",
    "completed_at",
    "requested_at",
    "reviewed_at",
];

const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Parse the text forms the backend emits for `timestamptz`, `timestamp`
/// and `date` columns. Zone-less values are taken as UTC.
pub fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Some(ts.with_timezone(&Utc));
    }
    // `2024-05-01 10:00:00+00` is what the service emits for timestamptz casts
    if let Ok(ts) = DateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f%#z") {
        return Some(ts.with_timezone(&Utc));
    }
    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Coerce the temporal fields of one record.
pub fn normalize_record(mut record: Record) -> Record {
    for field in TIMESTAMP_FIELDS {
        let Some(Value::String(text)) = record.get(field) else {
            continue;
        };
        match parse_timestamp(text) {
            Some(ts) => {
                record.insert(field.to_string(), Value::Timestamp(ts));
            }
            None => debug!(field, value = %text, "Leaving unparseable timestamp as text"),
        }
    }
    record
}

/// `None` stays `None`.
pub fn normalize(record: Option<Record>) -> Option<Record> {
    record.map(normalize_record)
}
