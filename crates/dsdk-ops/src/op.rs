// SPDX-License-Identifier: MIT OR Apache-2.0
//! [`OutgoingOp`] and [`StepKind`]: the tagged description of "the next
//! thing to do" (spec §4.2, C2).

use chrono::{DateTime, Utc};
use dsdk_core::Event;
use dsdk_error::StepError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// The kind-specific payload of an [`OutgoingOp`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StepKind {
    /// A user callback, executed locally during discovery.
    Run,
    /// Sleep for a fixed duration; server-executed.
    Sleep {
        /// How long to sleep.
        #[serde(with = "dsdk_duration_serde::duration_humantime")]
        duration: Duration,
    },
    /// Sleep until a wall-clock instant; server-executed.
    SleepUntil {
        /// The instant to resume at.
        #[serde(with = "dsdk_duration_serde::timestamp_iso8601")]
        until: DateTime<Utc>,
    },
    /// Wait for a matching event, with a timeout; server-executed.
    WaitForEvent {
        /// Event name to match.
        event: String,
        /// Optional CEL-like match expression over the event payload.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        match_expr: Option<String>,
        /// How long to wait before resolving to `None`.
        #[serde(with = "dsdk_duration_serde::duration_humantime")]
        timeout: Duration,
    },
    /// Invoke another function and await its return value; server-executed.
    Invoke {
        /// Target function id.
        function_id: String,
        /// Input payload for the invoked function.
        data: serde_json::Value,
        /// Optional timeout; the invocation fails non-retriably past this.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        #[serde(with = "dsdk_duration_serde::option_duration_humantime")]
        timeout: Option<Duration>,
    },
    /// Send one or more events; executed locally like `run` (spec §4.3),
    /// resolving immediately with server-assigned ids rather than awaiting
    /// a future invocation.
    SendEvent {
        /// The events to send.
        events: Vec<Event>,
    },
}

impl StepKind {
    /// Human-readable kind name, used in the wire `op` discriminator and in logs.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Run => "Step",
            Self::Sleep { .. } => "Sleep",
            Self::SleepUntil { .. } => "Sleep",
            Self::WaitForEvent { .. } => "WaitForEvent",
            Self::Invoke { .. } => "InvokeFunction",
            Self::SendEvent { .. } => "Step",
        }
    }
}

/// A single outgoing operation: the typed description of "the next thing to
/// do" that the engine reports to the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutgoingOp {
    /// The step's hashed id (spec §4.1).
    pub hashed_id: String,
    /// Display name — the user-supplied (slugified) step id.
    pub name: String,
    /// The kind-specific payload.
    pub kind: StepKind,
    /// Terminal success payload, set only once a `Run` or `SendEvent` step
    /// has actually executed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    /// Terminal failure, set only once a `Run` step's callback has thrown.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StepError>,
    /// Retry-after hint in seconds, set when a `Run` step's callback threw
    /// a retry-after sentinel (spec §4.4.4).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

impl OutgoingOp {
    /// Construct a non-terminal op for a server-executed kind (sleep,
    /// sleepUntil, waitForEvent, invoke).
    #[must_use]
    pub fn pending(hashed_id: impl Into<String>, name: impl Into<String>, kind: StepKind) -> Self {
        Self {
            hashed_id: hashed_id.into(),
            name: name.into(),
            kind,
            data: None,
            error: None,
            retry_after_secs: None,
        }
    }

    /// Construct a terminal op reporting a successful local execution
    /// (`Run` or `SendEvent`).
    #[must_use]
    pub fn completed(
        hashed_id: impl Into<String>,
        name: impl Into<String>,
        kind: StepKind,
        data: serde_json::Value,
    ) -> Self {
        Self {
            hashed_id: hashed_id.into(),
            name: name.into(),
            kind,
            data: Some(data),
            error: None,
            retry_after_secs: None,
        }
    }

    /// Construct a terminal op reporting a failed `Run` step.
    #[must_use]
    pub fn failed(
        hashed_id: impl Into<String>,
        name: impl Into<String>,
        error: StepError,
        retry_after_secs: Option<u64>,
    ) -> Self {
        Self {
            hashed_id: hashed_id.into(),
            name: name.into(),
            kind: StepKind::Run,
            data: None,
            error: Some(error),
            retry_after_secs,
        }
    }

    /// `true` if the SDK itself executes this op's work (spec §4.2).
    ///
    /// Resolves an apparent tension in spec §4.2 ("`requiresExecution` is
    /// true only for `run`") against §4.3's description of `sendEvent`
    /// running through the event sender locally: both `Run` and
    /// `SendEvent` execute inside the SDK process; everything else is
    /// server-executed. See `DESIGN.md`.
    #[must_use]
    pub fn requires_execution(&self) -> bool {
        matches!(self.kind, StepKind::Run | StepKind::SendEvent { .. })
    }

    /// `true` unless this op resolves immediately (only `SendEvent` does).
    #[must_use]
    pub fn expects_result_on_next_invocation(&self) -> bool {
        !matches!(self.kind, StepKind::SendEvent { .. })
    }

    /// Whether this op already carries a terminal result (success or failure).
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.data.is_some() || self.error.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_requires_execution_others_do_not() {
        let run = OutgoingOp::completed("h", "n", StepKind::Run, serde_json::json!("ok"));
        assert!(run.requires_execution());

        let sleep = OutgoingOp::pending(
            "h",
            "n",
            StepKind::Sleep {
                duration: Duration::from_secs(1),
            },
        );
        assert!(!sleep.requires_execution());
    }

    #[test]
    fn send_event_resolves_immediately() {
        let op = OutgoingOp::completed(
            "h",
            "n",
            StepKind::SendEvent {
                events: vec![Event::new("a", serde_json::json!({}))],
            },
            serde_json::json!({"ids": ["evt-1"]}),
        );
        assert!(op.requires_execution());
        assert!(!op.expects_result_on_next_invocation());
    }

    #[test]
    fn wait_for_event_expects_future_result() {
        let op = OutgoingOp::pending(
            "h",
            "n",
            StepKind::WaitForEvent {
                event: "app/approved".into(),
                match_expr: None,
                timeout: Duration::from_secs(3600),
            },
        );
        assert!(!op.requires_execution());
        assert!(op.expects_result_on_next_invocation());
        assert!(!op.is_terminal());
    }

    #[test]
    fn failed_run_carries_error_and_no_data() {
        let op = OutgoingOp::failed("h", "n", StepError::from_message("boom"), Some(30));
        assert!(op.is_terminal());
        assert!(op.error.is_some());
        assert_eq!(op.retry_after_secs, Some(30));
    }
}
