// SPDX-License-Identifier: MIT OR Apache-2.0
//! [`Middleware`]: the fixed set of typed hooks middleware classes may
//! implement (spec §4.5 table). Every method has a no-op/passthrough
//! default so implementations override only what they care about,
//! matching `abp-runtime`'s [`LifecycleHook`]-style extension points.

use async_trait::async_trait;
use dsdk_core::Event;
use dsdk_error::{DsdkError, StepFailure};
use crate::onion::Next;

/// The transformable subset of a [`dsdk_core::RunContext`] — `run_id`,
/// `attempt`, `max_attempts`, and the triggering event(s) — exposed to
/// `transformFunctionInput`. The step-tools façade itself is not part of
/// this record: it is not JSON-shaped data for middleware to rewrite, and
/// keeping it out avoids tying this crate to `dsdk-step` and the generic
/// parameter of `RunContext<S>`.
#[derive(Debug, Clone)]
pub struct FunctionInput {
    /// The run this invocation belongs to.
    pub run_id: String,
    /// 1-based attempt number.
    pub attempt: u32,
    /// Maximum attempts allowed.
    pub max_attempts: u32,
    /// The triggering event (first of the batch).
    pub event: Event,
    /// The full event batch.
    pub events: Vec<Event>,
}

/// Outcome of running the user's function handler to completion, as seen
/// by `wrapFunctionHandler`'s `after` phase.
pub type FunctionOutcome = Result<serde_json::Value, DsdkError>;

/// Context around a single step dispatch, as seen by `wrapStep`.
#[derive(Debug, Clone)]
pub struct StepContext {
    /// The step's hashed id.
    pub hashed_id: String,
    /// The step's user-supplied display name.
    pub name: String,
}

/// Outcome of a step dispatch: either the memoized/produced value, or a
/// failure carrying retry semantics.
pub type StepOutcome = Result<serde_json::Value, StepFailure>;

/// Context for `wrapStepHandler`, the innermost onion around the local
/// callback of a fresh `run` step.
pub type StepHandlerContext = StepContext;

/// Context for `wrapSendEvent`: the batch about to be sent.
#[derive(Debug, Clone)]
pub struct SendEventContext {
    /// Events about to be sent, after `transformSendEvent` has run.
    pub events: Vec<Event>,
}

/// Outcome of a send: server-assigned event ids, one per event.
#[derive(Debug, Clone)]
pub struct SendEventOutcome {
    /// Event ids, in the same order as the request batch.
    pub ids: Vec<String>,
}

/// Context for `wrapRequest`: the whole HTTP call dispatch.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Request URL being served.
    pub url: String,
    /// Request method, as text (`"GET"`, `"PUT"`, `"POST"`).
    pub method: String,
}

/// Outcome of `wrapRequest`: the response the adapter will return.
#[derive(Debug, Clone)]
pub struct RequestOutcome {
    /// HTTP status code.
    pub status: u16,
    /// JSON response body.
    pub body: serde_json::Value,
}

/// A middleware class: a fixed set of hooks fired at well-defined points
/// in the request/run/step lifecycle (spec §4.5).
///
/// All methods default to a no-op/passthrough so implementations override
/// only the hooks relevant to them — mirrors `abp-runtime::LifecycleHook`'s
/// default-empty-body extension points, generalised to onion (`wrap*`) and
/// pure-transform hooks in addition to purely informational ones.
///
/// Implementations are constructed fresh per request by the owning
/// [`crate::MiddlewareStack`] factory (spec §4.5 "Middleware instances are
/// per-request"), so instance state never bleeds across requests.
#[async_trait]
pub trait Middleware: Send + Sync {
    /// Name used in logs when an informational hook's error is swallowed.
    fn name(&self) -> &str;

    /// Fires once per middleware class at registration with a client.
    /// Errors are logged and swallowed.
    async fn on_register(&self) -> Result<(), DsdkError> {
        Ok(())
    }

    /// Pure transform of an outgoing event batch (`client.send` and
    /// `step.sendEvent`). Errors propagate as function/send-level failures.
    async fn transform_send_event(&self, events: Vec<Event>) -> Result<Vec<Event>, DsdkError> {
        Ok(events)
    }

    /// Onion around the HTTP send of an event batch.
    async fn wrap_send_event(
        &self,
        ctx: SendEventContext,
        next: Next<'_, SendEventOutcome, DsdkError>,
    ) -> Result<SendEventOutcome, DsdkError> {
        let _ = &ctx;
        next.call().await
    }

    /// Onion around the entire HTTP request dispatch.
    async fn wrap_request(
        &self,
        ctx: RequestContext,
        next: Next<'_, RequestOutcome, DsdkError>,
    ) -> Result<RequestOutcome, DsdkError> {
        let _ = &ctx;
        next.call().await
    }

    /// Pure transform of the [`FunctionInput`] before the handler runs.
    /// Errors propagate as function-level failures.
    async fn transform_function_input(
        &self,
        input: FunctionInput,
    ) -> Result<FunctionInput, DsdkError> {
        Ok(input)
    }

    /// Fires before the handler starts, only on fresh-start requests
    /// (empty memoized mapping). Errors are logged and swallowed.
    async fn on_run_start(&self, _input: &FunctionInput) -> Result<(), DsdkError> {
        Ok(())
    }

    /// Fires once the memoized mapping has been fully consumed, or
    /// immediately if it was empty. Errors are logged and swallowed.
    async fn on_memoization_end(&self, _input: &FunctionInput) -> Result<(), DsdkError> {
        Ok(())
    }

    /// Onion around the user handler.
    async fn wrap_function_handler(
        &self,
        input: FunctionInput,
        next: Next<'_, serde_json::Value, DsdkError>,
    ) -> Result<serde_json::Value, DsdkError> {
        let _ = &input;
        next.call().await
    }

    /// Pure transform of a step's input before `wrap_step`. Errors
    /// propagate as function-level failures.
    async fn transform_step_input(
        &self,
        ctx: &StepContext,
        input: serde_json::Value,
    ) -> Result<serde_json::Value, DsdkError> {
        let _ = ctx;
        Ok(input)
    }

    /// Onion around step dispatch (memoize lookup, op emission, result
    /// decoding).
    async fn wrap_step(
        &self,
        ctx: StepContext,
        next: Next<'_, serde_json::Value, StepFailure>,
    ) -> Result<serde_json::Value, StepFailure> {
        let _ = &ctx;
        next.call().await
    }

    /// Innermost onion around the local step callback (fresh `run` only).
    async fn wrap_step_handler(
        &self,
        ctx: StepHandlerContext,
        next: Next<'_, serde_json::Value, DsdkError>,
    ) -> Result<serde_json::Value, DsdkError> {
        let _ = &ctx;
        next.call().await
    }

    /// Fires after `wrap_step` enters, before the handler runs (fresh
    /// only). Errors are logged and swallowed.
    async fn on_step_start(&self, _ctx: &StepContext) {}

    /// Fires after `wrap_step` resolves with a value (fresh only). Errors
    /// are logged and swallowed.
    async fn on_step_complete(&self, _ctx: &StepContext, _value: &serde_json::Value) {}

    /// Fires after `wrap_step` rejects (fresh only). Errors are logged and
    /// swallowed.
    async fn on_step_error(&self, _ctx: &StepContext, _error: &StepFailure) {}

    /// Fires when the function handler returns a value, only on the
    /// terminating request. Errors are logged and swallowed.
    async fn on_run_complete(&self, _input: &FunctionInput, _result: &serde_json::Value) {}

    /// Fires when the function handler throws, only on the terminating
    /// request. Errors are logged and swallowed.
    async fn on_run_error(&self, _input: &FunctionInput, _error: &DsdkError) {}
}

/// Produces fresh [`Middleware`] instances for each incoming request (spec
/// §4.5: "Middleware instances are per-request: each new request
/// instantiates the class").
pub trait MiddlewareFactory: Send + Sync {
    /// Construct a new instance for the current request.
    fn create(&self) -> Box<dyn Middleware>;
}

impl<F> MiddlewareFactory for F
where
    F: Fn() -> Box<dyn Middleware> + Send + Sync,
{
    fn create(&self) -> Box<dyn Middleware> {
        self()
    }
}
