// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! [`Engine::run_request`]: the execution state machine (C4, spec §4.4).
//!
//! A call request is driven in two pieces raced against each other via
//! `tokio::select!`, mirroring `abp-runtime::Runtime::run_streaming`'s
//! backend-task/event-channel race:
//!
//! - the handler, spawned on its own task, invoked through the
//!   `wrapFunctionHandler` onion;
//! - [`dsdk_step::StepRuntime::wait_for_interrupt`], which resolves the
//!   moment a fresh step records an op it cannot resolve locally.
//!
//! Because a fresh, non-`run` (or failed-checkpoint) step suspends forever
//! (see `dsdk-step`'s `runtime` module docs), the handler task can only ever
//! resolve on its own if every step it touched was already memoized or
//! executed locally — the race is never actually contested; whichever side
//! can complete, does.

use std::collections::HashSet;
use std::sync::Arc;

use dsdk_core::{Event, RunContext};
use dsdk_error::{DsdkError, ErrorCode};
use dsdk_middleware::{FunctionInput, MiddlewareStack};
use dsdk_ops::{MemoizedMap, OutgoingOp};
use dsdk_step::{BoxFuture, Checkpointer, EventDispatch, Invoker, RunMode, StepRuntime, StepTools};

/// A boxed, cloneable function handler: takes the transformed [`RunContext`]
/// and returns the handler's final JSON result or a function-level error.
///
/// `'static` because the engine spawns it onto its own `tokio` task.
pub type Handler =
    Arc<dyn Fn(RunContext<StepTools>) -> BoxFuture<'static, Result<serde_json::Value, DsdkError>> + Send + Sync>;

/// One incoming call request (spec §6.1's `FunctionRunRequest`, decoded).
#[derive(Debug, Clone)]
pub struct CallRequest {
    /// The run this request belongs to.
    pub run_id: String,
    /// 1-based attempt number.
    pub attempt: u32,
    /// Maximum attempts the function's retry policy allows.
    pub max_attempts: u32,
    /// The triggering event (first of the batch).
    pub event: Event,
    /// The full triggering event batch.
    pub events: Vec<Event>,
    /// Previously-recorded step results, keyed by hashed id.
    pub steps: MemoizedMap,
}

/// What the engine reports back to the communication handler (C7) for it to
/// encode onto the wire (spec §4.4.1 step 5).
#[derive(Debug)]
pub enum CallOutcome {
    /// The handler was interrupted by fresh-step discovery (or a parallel
    /// group finished collecting); these ops become the 206 response.
    Ops(Vec<OutgoingOp>),
    /// The handler returned a value on the terminating request.
    Complete(serde_json::Value),
    /// The handler, a middleware hook, or the engine itself failed.
    Error(DsdkError),
}

/// Drives call requests through memoization replay and fresh-step discovery.
///
/// One `Engine` is shared across every request a function receives; state
/// specific to a single request lives in the [`StepRuntime`] built fresh
/// inside [`Engine::run_request`].
pub struct Engine {
    middleware: Arc<MiddlewareStack>,
    checkpointer: Option<Arc<dyn Checkpointer>>,
    events: Arc<dyn EventDispatch>,
    invoker: Arc<dyn Invoker>,
    mode: RunMode,
}

impl Engine {
    /// Build an engine from its collaborators (spec §4.4.2's checkpointer,
    /// §4.3's event dispatch and invoke targets, and the shared middleware
    /// stack).
    #[must_use]
    pub fn new(
        middleware: Arc<MiddlewareStack>,
        checkpointer: Option<Arc<dyn Checkpointer>>,
        events: Arc<dyn EventDispatch>,
        invoker: Arc<dyn Invoker>,
        mode: RunMode,
    ) -> Self {
        Self {
            middleware,
            checkpointer,
            events,
            invoker,
            mode,
        }
    }

    /// Run one call request to either an interrupt report, a final result,
    /// or an error (spec §4.4.1).
    pub async fn run_request(&self, handler: Handler, request: CallRequest) -> CallOutcome {
        let fresh_start = request.steps.is_empty();

        let input = FunctionInput {
            run_id: request.run_id,
            attempt: request.attempt,
            max_attempts: request.max_attempts,
            event: request.event,
            events: request.events,
        };

        let input = match self.middleware.transform_function_input(input).await {
            Ok(input) => input,
            Err(err) => return CallOutcome::Error(err),
        };

        // onRunStart fires only on the fresh-start request (spec §4.5 table).
        if fresh_start {
            self.middleware.fire_on_run_start(&input).await;
        }

        let runtime = Arc::new(StepRuntime::new(
            request.steps,
            self.mode,
            Arc::clone(&self.middleware),
            self.checkpointer.clone(),
            Arc::clone(&self.events),
            Arc::clone(&self.invoker),
            input.clone(),
        ));

        // With zero memoized steps, onMemoizationEnd fires here, before
        // wrapFunctionHandler begins (spec §4.5's ordering rule). Otherwise
        // it fires later, mid-handler, from inside `StepTools`.
        runtime.fire_memoization_end_if_needed().await;

        let ctx = RunContext {
            run_id: input.run_id.clone(),
            attempt: input.attempt,
            max_attempts: input.max_attempts,
            event: input.event.clone(),
            events: input.events.clone(),
            logger: dsdk_core::default_logger(),
            step: StepTools::new(Arc::clone(&runtime)),
        };

        let middleware = Arc::clone(&self.middleware);
        let wrapped_input = input.clone();
        let mut handler_task = tokio::spawn(async move {
            middleware
                .run_wrap_function_handler(wrapped_input, move || handler(ctx))
                .await
        });

        tokio::select! {
            result = &mut handler_task => {
                self.finish(&input, &runtime, result).await
            }
            () = runtime.wait_for_interrupt() => {
                handler_task.abort();
                tracing::debug!(run_id = %input.run_id, "handler interrupted by fresh-step discovery");
                CallOutcome::Ops(runtime.harvest())
            }
        }
    }

    async fn finish(
        &self,
        input: &FunctionInput,
        runtime: &StepRuntime,
        result: Result<Result<serde_json::Value, DsdkError>, tokio::task::JoinError>,
    ) -> CallOutcome {
        let result = match result {
            Ok(result) => result,
            Err(join_err) => Err(DsdkError::new(
                ErrorCode::Internal,
                format!("function handler task failed: {join_err}"),
            )),
        };

        match result {
            Ok(value) => {
                if runtime.unconsumed_count() > 0 {
                    let err = DsdkError::new(
                        ErrorCode::StepNonDeterministic,
                        "memoized steps were left unconsumed: the function took a different path than the one that produced them",
                    );
                    self.middleware.fire_on_run_error(input, &err).await;
                    return CallOutcome::Error(err);
                }
                self.middleware.fire_on_run_complete(input, &value).await;
                CallOutcome::Complete(value)
            }
            Err(err) => {
                self.middleware.fire_on_run_error(input, &err).await;
                CallOutcome::Error(err)
            }
        }
    }
}

/// Hashed ids a [`CallRequest`]'s memoized mapping covers — used by the
/// communication handler to log a summary without cloning the whole map.
#[must_use]
pub fn memoized_ids(steps: &MemoizedMap) -> HashSet<String> {
    steps.keys().cloned().collect()
}
