//! Timestamp conversions used on the wire
//!
//! The chunkedgraph takes and returns Unix seconds as floats. The
//! materialization service emits either RFC 3339 strings or naive
//! `%Y-%m-%dT%H:%M:%S%.f` strings that are implicitly UTC.

use chrono::{DateTime, NaiveDateTime, Utc};

const NAIVE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// Unix seconds with sub-second precision
pub fn to_unix_seconds(ts: DateTime<Utc>) -> f64 {
    ts.timestamp() as f64 + f64::from(ts.timestamp_subsec_micros()) / 1_000_000.0
}

/// Inverse of [`to_unix_seconds`], rounded to the microsecond
pub fn from_unix_seconds(secs: f64) -> Option<DateTime<Utc>> {
    let micros = (secs * 1_000_000.0).round() as i64;
    DateTime::from_timestamp_micros(micros)
}

/// Parse a service timestamp string, accepting RFC 3339 or naive UTC
pub fn parse_service_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, NAIVE_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

/// Serde adapter for service timestamp strings
pub mod service_format {
    use super::{parse_service_timestamp, NAIVE_FORMAT};
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&ts.format(NAIVE_FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let s = String::deserialize(deserializer)?;
        parse_service_timestamp(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {s}")))
    }

    /// Same format for optional fields; `null` and missing both map to `None`
    pub mod option {
        use chrono::{DateTime, Utc};
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(
            ts: &Option<DateTime<Utc>>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match ts {
                Some(ts) => super::serialize(ts, serializer),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<DateTime<Utc>>, D::Error> {
            match Option::<String>::deserialize(deserializer)? {
                Some(s) => super::super::parse_service_timestamp(&s)
                    .map(Some)
                    .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {s}"))),
                None => Ok(None),
            }
        }
    }
}
