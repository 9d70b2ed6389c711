// SPDX-License-Identifier: MIT OR Apache-2.0
//! Shared serde adapters for the durable execution wire format's duration
//! and timestamp fields (spec §4.2: `sleep` takes a duration string,
//! `sleepUntil` takes an ISO timestamp).
#![deny(unsafe_code)]
#![warn(missing_docs)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::time::Duration;

/// Serde helpers for encoding `Duration` as a humantime string (e.g. `"1h"`).
pub mod duration_humantime {
    use super::*;

    /// Serialize a duration as a humantime string.
    pub fn serialize<S: Serializer>(val: &Duration, ser: S) -> Result<S::Ok, S::Error> {
        humantime::format_duration(*val).to_string().serialize(ser)
    }

    /// Deserialize a duration from a humantime string.
    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Duration, D::Error> {
        let s = String::deserialize(de)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

/// Serde helpers for encoding `Option<Duration>` as an optional humantime string.
pub mod option_duration_humantime {
    use super::*;

    /// Serialize an optional duration as an optional humantime string.
    pub fn serialize<S: Serializer>(val: &Option<Duration>, ser: S) -> Result<S::Ok, S::Error> {
        match val {
            Some(d) => humantime::format_duration(*d).to_string().serialize(ser),
            None => ser.serialize_none(),
        }
    }

    /// Deserialize an optional duration from an optional humantime string.
    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Option<Duration>, D::Error> {
        let opt: Option<String> = Option::deserialize(de)?;
        opt.map(|s| humantime::parse_duration(&s).map_err(serde::de::Error::custom))
            .transpose()
    }
}

/// Serde helpers for encoding `DateTime<Utc>` as an RFC 3339 / ISO-8601 string.
pub mod timestamp_iso8601 {
    use super::*;

    /// Serialize a timestamp as an RFC 3339 string.
    pub fn serialize<S: Serializer>(val: &DateTime<Utc>, ser: S) -> Result<S::Ok, S::Error> {
        val.to_rfc3339().serialize(ser)
    }

    /// Deserialize a timestamp from an RFC 3339 string.
    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<DateTime<Utc>, D::Error> {
        let s = String::deserialize(de)?;
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}

/// Milliseconds-since-epoch encoding, used for [`Event`](https://docs.rs/dsdk-core) timestamps.
pub mod millis_since_epoch {
    use super::*;

    /// Serialize a timestamp as milliseconds since the Unix epoch.
    pub fn serialize<S: Serializer>(val: &DateTime<Utc>, ser: S) -> Result<S::Ok, S::Error> {
        val.timestamp_millis().serialize(ser)
    }

    /// Deserialize a timestamp from milliseconds since the Unix epoch.
    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<DateTime<Utc>, D::Error> {
        let ms = i64::deserialize(de)?;
        DateTime::from_timestamp_millis(ms)
            .ok_or_else(|| serde::de::Error::custom("timestamp out of range"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct WithDuration {
        #[serde(with = "crate::duration_humantime")]
        value: Duration,
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct WithTimestamp {
        #[serde(with = "crate::timestamp_iso8601")]
        value: DateTime<Utc>,
    }

    #[test]
    fn duration_round_trips_as_humantime_string() {
        let payload = WithDuration {
            value: Duration::from_secs(3600),
        };
        let json = serde_json::to_string(&payload).unwrap();
        assert_eq!(json, r#"{"value":"1h"}"#);
        let decoded: WithDuration = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn timestamp_round_trips_as_rfc3339() {
        let dt = DateTime::parse_from_rfc3339("2026-07-30T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let payload = WithTimestamp { value: dt };
        let json = serde_json::to_string(&payload).unwrap();
        let decoded: WithTimestamp = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, payload);
    }
}
