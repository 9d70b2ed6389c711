// SPDX-License-Identifier: MIT OR Apache-2.0
//! Wire shapes for the POST call-dispatch body and response (spec §6.1).

use dsdk_core::Event;
use dsdk_engine::{CallOutcome, CallRequest};
use dsdk_error::{DsdkError, ErrorCode};
use dsdk_ops::{MemoizedMap, OutgoingOp, StepKind};
use serde::Deserialize;

/// `ctx` sub-object of a POST call-dispatch body (spec §6.1).
#[derive(Debug, Deserialize)]
pub struct RunRequestContext {
    /// Target function id.
    pub fn_id: String,
    /// The run this request belongs to.
    pub run_id: String,
    /// 1-based attempt number.
    pub attempt: u32,
    /// Hashed id of the step the server expects a result for, if any.
    #[serde(default)]
    pub step_id: Option<String>,
    /// Requests the handler skip its usual interrupt-on-fresh-step
    /// behaviour. Not currently consulted: `dsdk-engine`'s `RunMode` is
    /// decided once, client-wide, by `Client::checkpointing`, not per
    /// request. Kept for wire-shape fidelity.
    #[serde(default)]
    pub disable_immediate_execution: bool,
}

/// The full POST call-dispatch body (spec §6.1).
#[derive(Debug, Deserialize)]
pub struct RunRequestBody {
    /// The triggering event (first of the batch).
    pub event: Event,
    /// The full triggering event batch.
    #[serde(default)]
    pub events: Vec<Event>,
    /// Run/attempt/function identification.
    pub ctx: RunRequestContext,
    /// Previously-recorded step results, keyed by hashed id.
    #[serde(default)]
    pub steps: MemoizedMap,
    /// Whether the server expects this SDK to use the batch-details API
    /// rather than inlining `events`. Not currently consulted — this SDK
    /// always reads `events` inline.
    #[serde(default)]
    pub use_api: bool,
    /// Wire protocol version, opaque to this SDK.
    #[serde(default)]
    pub version: Option<u32>,
}

impl RunRequestBody {
    /// Parse a raw POST body.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorCode::ProtocolMalformedBody`] if `raw` doesn't
    /// deserialise into the expected shape.
    pub fn parse(raw: &[u8]) -> Result<Self, DsdkError> {
        serde_json::from_slice(raw)
            .map_err(|err| DsdkError::new(ErrorCode::ProtocolMalformedBody, format!("malformed call request body: {err}")))
    }

    /// Convert into the engine's [`CallRequest`], given the target
    /// function's configured max attempts.
    #[must_use]
    pub fn into_call_request(self, max_attempts: u32) -> CallRequest {
        let events = if self.events.is_empty() { vec![self.event.clone()] } else { self.events };
        CallRequest {
            run_id: self.ctx.run_id,
            attempt: self.ctx.attempt,
            max_attempts,
            event: self.event,
            events,
            steps: self.steps,
        }
    }
}

/// Encode one [`OutgoingOp`] into the wire `{op, id, name, opts, data?,
/// error?}` shape (spec §6.1; both `"StepPlan"` and `"Step"` are accepted
/// labels for a plain run/sendEvent op, per the spec's own test example).
#[must_use]
pub fn encode_op(op: &OutgoingOp) -> serde_json::Value {
    let (label, opts) = match &op.kind {
        StepKind::Run | StepKind::SendEvent { .. } => ("Step", serde_json::json!({})),
        StepKind::Sleep { duration } => (
            "Sleep",
            serde_json::json!({ "duration": humantime::format_duration(*duration).to_string() }),
        ),
        StepKind::SleepUntil { until } => ("Sleep", serde_json::json!({ "until": until.to_rfc3339() })),
        StepKind::WaitForEvent { event, match_expr, timeout } => (
            "WaitForEvent",
            serde_json::json!({
                "event": event,
                "if": match_expr,
                "timeout": humantime::format_duration(*timeout).to_string(),
            }),
        ),
        StepKind::Invoke { function_id, data, timeout } => (
            "InvokeFunction",
            serde_json::json!({
                "function_id": function_id,
                "payload": data,
                "timeout": timeout.map(|d| humantime::format_duration(d).to_string()),
            }),
        ),
    };

    let mut value = serde_json::json!({
        "op": label,
        "id": op.hashed_id,
        "name": op.name,
        "opts": opts,
    });
    if let Some(data) = &op.data {
        value["data"] = data.clone();
    }
    if let Some(error) = &op.error {
        if let Ok(error_json) = serde_json::to_value(error) {
            value["error"] = error_json;
        }
    }
    value
}

/// Encode a [`CallOutcome`] into the HTTP status/body a comm handler
/// returns for a POST call dispatch (spec §6.1: 206 partial, 200 terminal
/// success, 4xx non-retriable error, 5xx transient error).
#[must_use]
pub fn encode_call_outcome(outcome: CallOutcome) -> (u16, serde_json::Value) {
    match outcome {
        CallOutcome::Ops(ops) => {
            let body = ops.iter().map(encode_op).collect::<Vec<_>>();
            (206, serde_json::Value::Array(body))
        }
        CallOutcome::Complete(data) => (200, serde_json::json!([{ "op": "RunComplete", "data": data }])),
        CallOutcome::Error(err) => {
            let status: u16 = if err.code == ErrorCode::ProtocolUnknownFunction {
                400
            } else if err.code.category() == dsdk_error::ErrorCategory::Signature {
                401
            } else if err.code.is_retriable() {
                500
            } else {
                400
            };
            let body = serde_json::json!([{
                "op": "RunError",
                "error": { "code": err.code, "message": err.message },
            }]);
            (status, body)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn parse_rejects_malformed_body() {
        let err = RunRequestBody::parse(b"not json").unwrap_err();
        assert_eq!(err.code, ErrorCode::ProtocolMalformedBody);
    }

    #[test]
    fn parse_accepts_minimal_body() {
        let raw = serde_json::json!({
            "event": { "name": "a", "data": {} },
            "ctx": { "fn_id": "fn-a", "run_id": "run-1", "attempt": 1 },
        });
        let body = RunRequestBody::parse(raw.to_string().as_bytes()).unwrap();
        assert_eq!(body.ctx.fn_id, "fn-a");
        assert!(body.events.is_empty());
    }

    #[test]
    fn into_call_request_falls_back_to_single_event_batch() {
        let raw = serde_json::json!({
            "event": { "name": "a", "data": {} },
            "ctx": { "fn_id": "fn-a", "run_id": "run-1", "attempt": 2 },
        });
        let body = RunRequestBody::parse(raw.to_string().as_bytes()).unwrap();
        let request = body.into_call_request(4);
        assert_eq!(request.events.len(), 1);
        assert_eq!(request.attempt, 2);
        assert_eq!(request.max_attempts, 4);
    }

    #[test]
    fn encode_op_labels_run_as_step() {
        let op = OutgoingOp::completed("h", "n", StepKind::Run, serde_json::json!(1));
        let encoded = encode_op(&op);
        assert_eq!(encoded["op"], "Step");
        assert_eq!(encoded["data"], 1);
    }

    #[test]
    fn encode_op_formats_sleep_duration() {
        let op = OutgoingOp::pending("h", "n", StepKind::Sleep { duration: Duration::from_secs(60) });
        let encoded = encode_op(&op);
        assert_eq!(encoded["op"], "Sleep");
        assert_eq!(encoded["opts"]["duration"], "1m");
    }

    #[test]
    fn encode_call_outcome_ops_is_206() {
        let op = OutgoingOp::completed("h", "n", StepKind::Run, serde_json::json!(1));
        let (status, body) = encode_call_outcome(CallOutcome::Ops(vec![op]));
        assert_eq!(status, 206);
        assert!(body.is_array());
    }

    #[test]
    fn encode_call_outcome_complete_is_200() {
        let (status, body) = encode_call_outcome(CallOutcome::Complete(serde_json::json!("done")));
        assert_eq!(status, 200);
        assert_eq!(body[0]["data"], "done");
    }

    #[test]
    fn encode_call_outcome_unknown_function_is_400() {
        let err = DsdkError::new(ErrorCode::ProtocolUnknownFunction, "no such function");
        let (status, _) = encode_call_outcome(CallOutcome::Error(err));
        assert_eq!(status, 400);
    }

    #[test]
    fn encode_call_outcome_internal_error_is_500() {
        let err = DsdkError::new(ErrorCode::Internal, "boom");
        let (status, _) = encode_call_outcome(CallOutcome::Error(err));
        assert_eq!(status, 500);
    }
}
