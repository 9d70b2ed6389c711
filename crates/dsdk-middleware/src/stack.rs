// SPDX-License-Identifier: MIT OR Apache-2.0
//! [`MiddlewareStack`]: the ordered collection of [`Middleware`] instances
//! for one request, and the runners that drive each hook kind (spec §4.5).

use dsdk_core::Event;
use dsdk_error::{DsdkError, StepFailure};

use crate::hook::{
    FunctionInput, Middleware, RequestContext, RequestOutcome, SendEventContext,
    SendEventOutcome, StepContext,
};
use crate::onion::{compose, BoxFuture, Next};

/// Log and discard an error from an informational hook (spec §4.5: errors
/// from `onRegister`, `onRunStart`, `onMemoizationEnd`,
/// `onStepStart/Complete/Error`, `onRunComplete/Error` "are logged and
/// swallowed — they must never abort the function").
fn log_swallowed(hook: &str, mw: &str, err: &DsdkError) {
    tracing::warn!(hook, mw, error = %err, "middleware hook error swallowed");
}

/// Client-level middleware runs outer; function-level runs inner (spec
/// §4.5: "function-level runs *inside* client-level"). Instances are
/// constructed fresh per request by the caller (typically `dsdk-client`
/// and `dsdk-function`, from each registered [`crate::MiddlewareFactory`]).
pub struct MiddlewareStack {
    /// Ordered outer-to-inner: client middleware first, then function middleware.
    layers: Vec<Box<dyn Middleware>>,
}

impl MiddlewareStack {
    /// Build a stack from client-level (outer) and function-level (inner)
    /// middleware instances.
    #[must_use]
    pub fn new(client: Vec<Box<dyn Middleware>>, function: Vec<Box<dyn Middleware>>) -> Self {
        let mut layers = client;
        layers.extend(function);
        Self { layers }
    }

    /// Fire `onRegister` on every layer. Errors are logged and swallowed.
    pub async fn fire_on_register(&self) {
        for mw in &self.layers {
            if let Err(err) = mw.on_register().await {
                log_swallowed("onRegister", mw.name(), &err);
            }
        }
    }

    /// Forward-chain `transformSendEvent` through every layer.
    pub async fn transform_send_event(&self, events: Vec<Event>) -> Result<Vec<Event>, DsdkError> {
        let mut events = events;
        for mw in &self.layers {
            events = mw.transform_send_event(events).await?;
        }
        Ok(events)
    }

    /// Forward-chain `transformFunctionInput` through every layer.
    pub async fn transform_function_input(
        &self,
        input: FunctionInput,
    ) -> Result<FunctionInput, DsdkError> {
        let mut input = input;
        for mw in &self.layers {
            input = mw.transform_function_input(input).await?;
        }
        Ok(input)
    }

    /// Forward-chain `transformStepInput` through every layer.
    pub async fn transform_step_input(
        &self,
        ctx: &StepContext,
        input: serde_json::Value,
    ) -> Result<serde_json::Value, DsdkError> {
        let mut input = input;
        for mw in &self.layers {
            input = mw.transform_step_input(ctx, input).await?;
        }
        Ok(input)
    }

    /// Fire `onRunStart` on every layer (only on fresh-start requests).
    pub async fn fire_on_run_start(&self, input: &FunctionInput) {
        for mw in &self.layers {
            if let Err(err) = mw.on_run_start(input).await {
                log_swallowed("onRunStart", mw.name(), &err);
            }
        }
    }

    /// Fire `onMemoizationEnd` on every layer.
    pub async fn fire_on_memoization_end(&self, input: &FunctionInput) {
        for mw in &self.layers {
            if let Err(err) = mw.on_memoization_end(input).await {
                log_swallowed("onMemoizationEnd", mw.name(), &err);
            }
        }
    }

    /// Fire `onStepStart` on every layer.
    pub async fn fire_on_step_start(&self, ctx: &StepContext) {
        for mw in &self.layers {
            mw.on_step_start(ctx).await;
        }
    }

    /// Fire `onStepComplete` on every layer.
    pub async fn fire_on_step_complete(&self, ctx: &StepContext, value: &serde_json::Value) {
        for mw in &self.layers {
            mw.on_step_complete(ctx, value).await;
        }
    }

    /// Fire `onStepError` on every layer.
    pub async fn fire_on_step_error(&self, ctx: &StepContext, error: &StepFailure) {
        for mw in &self.layers {
            mw.on_step_error(ctx, error).await;
        }
    }

    /// Fire `onRunComplete` on every layer (only on the terminating request).
    pub async fn fire_on_run_complete(&self, input: &FunctionInput, result: &serde_json::Value) {
        for mw in &self.layers {
            mw.on_run_complete(input, result).await;
        }
    }

    /// Fire `onRunError` on every layer (only on the terminating request).
    pub async fn fire_on_run_error(&self, input: &FunctionInput, error: &DsdkError) {
        for mw in &self.layers {
            mw.on_run_error(input, error).await;
        }
    }

    /// Run the `wrapSendEvent` onion around `terminal` (the actual HTTP POST).
    pub async fn run_wrap_send_event<'a, F>(
        &'a self,
        ctx: SendEventContext,
        terminal: F,
    ) -> Result<SendEventOutcome, DsdkError>
    where
        F: FnOnce() -> BoxFuture<'a, Result<SendEventOutcome, DsdkError>> + Send + 'a,
    {
        let layers = self
            .layers
            .iter()
            .map(|mw| {
                let mw: &'a dyn Middleware = mw.as_ref();
                let ctx = ctx.clone();
                Box::new(move |next: Next<'a, SendEventOutcome, DsdkError>| -> BoxFuture<'a, Result<SendEventOutcome, DsdkError>> {
                    Box::pin(mw.wrap_send_event(ctx, next))
                }) as Box<dyn FnOnce(Next<'a, SendEventOutcome, DsdkError>) -> BoxFuture<'a, Result<SendEventOutcome, DsdkError>> + Send + 'a>
            })
            .collect();
        compose(layers, terminal).await
    }

    /// Run the `wrapRequest` onion around `terminal` (the full call dispatch).
    pub async fn run_wrap_request<'a, F>(
        &'a self,
        ctx: RequestContext,
        terminal: F,
    ) -> Result<RequestOutcome, DsdkError>
    where
        F: FnOnce() -> BoxFuture<'a, Result<RequestOutcome, DsdkError>> + Send + 'a,
    {
        let layers = self
            .layers
            .iter()
            .map(|mw| {
                let mw: &'a dyn Middleware = mw.as_ref();
                let ctx = ctx.clone();
                Box::new(move |next: Next<'a, RequestOutcome, DsdkError>| -> BoxFuture<'a, Result<RequestOutcome, DsdkError>> {
                    Box::pin(mw.wrap_request(ctx, next))
                }) as Box<dyn FnOnce(Next<'a, RequestOutcome, DsdkError>) -> BoxFuture<'a, Result<RequestOutcome, DsdkError>> + Send + 'a>
            })
            .collect();
        compose(layers, terminal).await
    }

    /// Run the `wrapFunctionHandler` onion around `terminal` (the user handler).
    pub async fn run_wrap_function_handler<'a, F>(
        &'a self,
        input: FunctionInput,
        terminal: F,
    ) -> Result<serde_json::Value, DsdkError>
    where
        F: FnOnce() -> BoxFuture<'a, Result<serde_json::Value, DsdkError>> + Send + 'a,
    {
        let layers = self
            .layers
            .iter()
            .map(|mw| {
                let mw: &'a dyn Middleware = mw.as_ref();
                let input = input.clone();
                Box::new(move |next: Next<'a, serde_json::Value, DsdkError>| -> BoxFuture<'a, Result<serde_json::Value, DsdkError>> {
                    Box::pin(mw.wrap_function_handler(input, next))
                }) as Box<dyn FnOnce(Next<'a, serde_json::Value, DsdkError>) -> BoxFuture<'a, Result<serde_json::Value, DsdkError>> + Send + 'a>
            })
            .collect();
        compose(layers, terminal).await
    }

    /// Run the `wrapStep` onion around `terminal` (memoize lookup, op
    /// emission, result decoding). Note the failure type is [`StepFailure`],
    /// not [`DsdkError`] — step failures carry retry semantics the rest of
    /// the pipeline doesn't need.
    pub async fn run_wrap_step<'a, F>(
        &'a self,
        ctx: StepContext,
        terminal: F,
    ) -> Result<serde_json::Value, StepFailure>
    where
        F: FnOnce() -> BoxFuture<'a, Result<serde_json::Value, StepFailure>> + Send + 'a,
    {
        let layers = self
            .layers
            .iter()
            .map(|mw| {
                let mw: &'a dyn Middleware = mw.as_ref();
                let ctx = ctx.clone();
                Box::new(move |next: Next<'a, serde_json::Value, StepFailure>| -> BoxFuture<'a, Result<serde_json::Value, StepFailure>> {
                    Box::pin(mw.wrap_step(ctx, next))
                }) as Box<dyn FnOnce(Next<'a, serde_json::Value, StepFailure>) -> BoxFuture<'a, Result<serde_json::Value, StepFailure>> + Send + 'a>
            })
            .collect();
        compose(layers, terminal).await
    }

    /// Run the `wrapStepHandler` onion around `terminal` (the local
    /// callback of a fresh `run` step) — innermost of all the onions.
    pub async fn run_wrap_step_handler<'a, F>(
        &'a self,
        ctx: StepContext,
        terminal: F,
    ) -> Result<serde_json::Value, DsdkError>
    where
        F: FnOnce() -> BoxFuture<'a, Result<serde_json::Value, DsdkError>> + Send + 'a,
    {
        let layers = self
            .layers
            .iter()
            .map(|mw| {
                let mw: &'a dyn Middleware = mw.as_ref();
                let ctx = ctx.clone();
                Box::new(move |next: Next<'a, serde_json::Value, DsdkError>| -> BoxFuture<'a, Result<serde_json::Value, DsdkError>> {
                    Box::pin(mw.wrap_step_handler(ctx, next))
                }) as Box<dyn FnOnce(Next<'a, serde_json::Value, DsdkError>) -> BoxFuture<'a, Result<serde_json::Value, DsdkError>> + Send + 'a>
            })
            .collect();
        compose(layers, terminal).await
    }

    /// Number of registered layers (client + function).
    #[must_use]
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    /// `true` if no middleware is registered at either level.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}
