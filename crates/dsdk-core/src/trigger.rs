// SPDX-License-Identifier: MIT OR Apache-2.0
//! [`FunctionTrigger`]: the sum of event- and cron-triggers a function can
//! be bound to (spec §3).

use serde::{Deserialize, Serialize};

/// What causes a function to run: an event name (with optional filter and
/// branch condition) or a cron schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FunctionTrigger {
    /// Fires when an event matching `event` (and, if present, `filter` and
    /// `condition`) arrives.
    Event {
        /// Event name to match, e.g. `"app/user.created"`.
        event: String,
        /// Optional CEL-like match expression over the event payload.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filter: Option<String>,
        /// Optional branch condition distinguishing this trigger from
        /// others on the same event name.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        condition: Option<String>,
    },
    /// Fires on a cron schedule.
    Cron {
        /// Standard cron expression.
        cron: String,
        /// IANA timezone name; defaults to UTC when absent.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timezone: Option<String>,
    },
}

impl FunctionTrigger {
    /// Build an event trigger with no filter or condition.
    #[must_use]
    pub fn event(name: impl Into<String>) -> Self {
        Self::Event {
            event: name.into(),
            filter: None,
            condition: None,
        }
    }

    /// Build a cron trigger with no explicit timezone (UTC).
    #[must_use]
    pub fn cron(expr: impl Into<String>) -> Self {
        Self::Cron {
            cron: expr.into(),
            timezone: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_trigger_serialises_tagged() {
        let t = FunctionTrigger::event("app/user.created");
        let json = serde_json::to_value(&t).unwrap();
        assert_eq!(json["type"], "event");
        assert_eq!(json["event"], "app/user.created");
    }

    #[test]
    fn cron_trigger_round_trips() {
        let t = FunctionTrigger::Cron {
            cron: "0 9 * * *".into(),
            timezone: Some("America/Los_Angeles".into()),
        };
        let json = serde_json::to_string(&t).unwrap();
        let back: FunctionTrigger = serde_json::from_str(&json).unwrap();
        assert_eq!(t, back);
    }
}
