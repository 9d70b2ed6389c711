// SPDX-License-Identifier: MIT OR Apache-2.0
//! The [`Event`] type: the unit of data the server dispatches to functions
//! and the unit `client.send` emits (spec §3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single event, either received by a function trigger or emitted via
/// `client.send` / `step.sendEvent`.
///
/// `id` is the idempotency key (opaque string, assigned by the caller or the
/// server). `ts` is milliseconds since the epoch; callers normally leave it
/// unset and let the event sender fill it with "now" (spec §4.8 step 2a).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Event name, e.g. `"app/user.created"`.
    pub name: String,

    /// JSON-serialisable event payload.
    #[serde(default)]
    pub data: serde_json::Value,

    /// Idempotency key. Omitted on construction; the server assigns one if absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Milliseconds since the Unix epoch. Filled by the sender if absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ts: Option<i64>,

    /// Event schema version, opaque to the SDK.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub v: Option<String>,

    /// Optional caller-supplied metadata, distinct from `data`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<serde_json::Value>,
}

impl Event {
    /// Construct an event with just a name and data; all other fields unset.
    #[must_use]
    pub fn new(name: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            data,
            id: None,
            ts: None,
            v: None,
            user: None,
        }
    }

    /// Fill in `ts` (if absent) and `data` (if null) the way the event
    /// sender normalises outgoing events (spec §4.8 step 2a). `id` is left
    /// untouched — idempotency is the caller's choice.
    pub fn normalize(&mut self, now: DateTime<Utc>) {
        if self.ts.is_none() {
            self.ts = Some(now.timestamp_millis());
        }
        if self.data.is_null() {
            self.data = serde_json::json!({});
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_fills_ts_and_data_but_not_id() {
        let mut e = Event::new("test", serde_json::Value::Null);
        let now = DateTime::parse_from_rfc3339("2026-07-30T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        e.normalize(now);
        assert_eq!(e.ts, Some(now.timestamp_millis()));
        assert_eq!(e.data, serde_json::json!({}));
        assert!(e.id.is_none());
    }

    #[test]
    fn normalize_does_not_overwrite_existing_ts() {
        let mut e = Event::new("test", serde_json::json!({"a": 1}));
        e.ts = Some(1688139903724);
        e.normalize(Utc::now());
        assert_eq!(e.ts, Some(1688139903724));
    }

    #[test]
    fn serialises_without_optional_fields() {
        let e = Event::new("test", serde_json::json!({}));
        let json = serde_json::to_value(&e).unwrap();
        assert!(json.get("id").is_none());
        assert!(json.get("ts").is_none());
    }
}
