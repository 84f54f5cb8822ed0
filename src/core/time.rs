use chrono::{DateTime, NaiveDateTime, Utc};

use crate::core::error::{AicmError, AicmResult};

/// Timestamp input accepted by the tracker: either an instant (formatted by
/// the SDK) or a pre-formatted string (validated and passed through).
#[derive(Debug, Clone)]
pub enum Timestamp {
    Instant(DateTime<Utc>),
    Text(String),
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(value: DateTime<Utc>) -> Self {
        Timestamp::Instant(value)
    }
}

impl From<String> for Timestamp {
    fn from(value: String) -> Self {
        Timestamp::Text(value)
    }
}

impl From<&str> for Timestamp {
    fn from(value: &str) -> Self {
        Timestamp::Text(value.to_owned())
    }
}

/// Format an instant the way the server validator expects: ISO-8601 UTC with
/// microsecond precision and no trailing `Z`.
pub fn format_utc(instant: DateTime<Utc>) -> String {
    instant.format("%Y-%m-%dT%H:%M:%S%.6f").to_string()
}

/// Current time in the canonical wire format.
pub fn now_formatted() -> String {
    format_utc(Utc::now())
}

/// Normalize a caller-supplied timestamp to the wire format.
///
/// Instants are formatted directly. Strings must parse as ISO-8601 (with or
/// without offset); a trailing `Z` is stripped before send because the server
/// validator rejects the `Z` variant.
pub fn normalize(input: Timestamp) -> AicmResult<String> {
    match input {
        Timestamp::Instant(instant) => Ok(format_utc(instant)),
        Timestamp::Text(text) => {
            let trimmed = text.strip_suffix('Z').unwrap_or(&text);
            let valid = DateTime::parse_from_rfc3339(&text).is_ok()
                || NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f").is_ok();
            if !valid {
                return Err(AicmError::InvalidTimestamp(text));
            }
            Ok(trimmed.to_owned())
        }
    }
}

/// Seconds since the Unix epoch as a float, the representation the durable
/// queue stores in its `*_at` columns.
pub fn epoch_seconds() -> f64 {
    let now = Utc::now();
    now.timestamp_micros() as f64 / 1_000_000.0
}
