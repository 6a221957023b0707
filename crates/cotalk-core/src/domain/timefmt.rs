//! Timestamp encoding used in task records.
//!
//! Records store `"%Y-%m-%d %H:%M:%S"` (UTC, second precision). An empty string
//! stands for "no timestamp". RFC 3339 is also accepted on read.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serializer};

pub const FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn format(t: &DateTime<Utc>) -> String {
    t.format(FORMAT).to_string()
}

/// Parse a stored timestamp. `Ok(None)` for the empty string.
pub fn parse(s: &str) -> Result<Option<DateTime<Utc>>, String> {
    let s = s.trim();
    if s.is_empty() {
        return Ok(None);
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, FORMAT) {
        return Ok(Some(naive.and_utc()));
    }
    DateTime::parse_from_rfc3339(s)
        .map(|t| Some(t.with_timezone(&Utc)))
        .map_err(|e| format!("invalid timestamp {s:?}: {e}"))
}

/// serde adapter for `Option<DateTime<Utc>>` (`""` ⇔ `None`).
pub mod optional {
    use super::*;

    pub fn serialize<S: Serializer>(
        value: &Option<DateTime<Utc>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(t) => serializer.serialize_str(&format(t)),
            None => serializer.serialize_str(""),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?.unwrap_or_default();
        parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// serde adapter for a timestamp that must be present.
pub mod required {
    use super::*;

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse(&raw)
            .map_err(serde::de::Error::custom)?
            .ok_or_else(|| serde::de::Error::custom("missing timestamp"))
    }
}
