// SPDX-License-Identifier: MIT OR Apache-2.0
//! [`StepTools`]: the user-visible façade methods (spec §4.3).

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dsdk_core::Event;
use dsdk_error::{DsdkError, ErrorCode, StepError, StepFailure};
use dsdk_middleware::StepContext;
use dsdk_ops::{MemoizedStep, OutgoingOp, StepKind};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::runtime::{RunMode, StepRuntime};

/// Step-tools façade exposed to user function handlers as `ctx.step`.
///
/// Cheap to clone — every method borrows the shared [`StepRuntime`].
#[derive(Clone)]
pub struct StepTools {
    runtime: Arc<StepRuntime>,
}

impl StepTools {
    /// Wrap a runtime as a façade. Used by `dsdk-engine` to build the
    /// `RunContext<StepTools>` handed to the handler.
    #[must_use]
    pub fn new(runtime: Arc<StepRuntime>) -> Self {
        Self { runtime }
    }

    fn decode<T: DeserializeOwned>(value: &serde_json::Value) -> Result<T, StepFailure> {
        serde_json::from_value(value.clone()).map_err(|e| {
            StepFailure::Retriable(StepError::from_message(format!(
                "failed to decode memoized step value: {e}"
            )))
        })
    }

    /// `wrapStepHandler`'s contract is [`DsdkError`] (spec §4.5) since it
    /// wraps only the local callback invocation, not step-level retry
    /// semantics — those live one layer out, in `wrapStep`. The callback
    /// itself returns the richer [`StepFailure`], so crossing that boundary
    /// round-trips the full [`StepError`] plus retry hint through context.
    fn step_failure_to_dsdk_error(failure: StepFailure) -> DsdkError {
        let (code, error, retry_after_secs) = match failure {
            StepFailure::Retriable(e) => (ErrorCode::StepCallbackFailed, e, None),
            StepFailure::NonRetriable(e) => (ErrorCode::StepNonRetriable, e, None),
            StepFailure::RetryAfter { error, retry_after_secs } => {
                (ErrorCode::StepCallbackFailed, error, Some(retry_after_secs))
            }
        };
        let mut err = DsdkError::new(code, error.message.clone()).with_context(
            "step_error",
            serde_json::to_value(&error).unwrap_or(serde_json::Value::Null),
        );
        if let Some(secs) = retry_after_secs {
            err = err.with_context("retry_after_secs", secs);
        }
        err
    }

    fn dsdk_error_to_step_failure(err: DsdkError) -> StepFailure {
        let step_error = err
            .context
            .get("step_error")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_else(|| StepError::from_message(err.message.clone()));
        if err.code == ErrorCode::StepNonRetriable {
            return StepFailure::NonRetriable(step_error);
        }
        match err.context.get("retry_after_secs").and_then(serde_json::Value::as_u64) {
            Some(retry_after_secs) => StepFailure::RetryAfter { error: step_error, retry_after_secs },
            None => StepFailure::Retriable(step_error),
        }
    }

    /// Run `callback` exactly once per `(id, occurrence)`. On replay, the
    /// memoized value (or error) is returned without re-running `callback`.
    ///
    /// The whole dispatch — memo lookup, fresh execution, op recording —
    /// runs inside the `wrapStep` onion; the local callback itself runs one
    /// layer deeper, inside `wrapStepHandler` (spec §4.5).
    pub async fn run<T, F, Fut>(&self, id: &str, callback: F) -> Result<T, StepFailure>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<T, StepFailure>> + Send,
    {
        let (_, hashed_id) = self.runtime.next_position(id);
        self.runtime.fire_memoization_end_if_needed().await;
        let ctx = StepContext {
            hashed_id: hashed_id.clone(),
            name: id.to_string(),
        };

        let runtime = &self.runtime;
        let lookup_id = hashed_id.clone();
        let outcome: Result<serde_json::Value, StepFailure> = runtime
            .middleware()
            .run_wrap_step(ctx.clone(), move || {
                Box::pin(async move {
                    if let Some(memo) = runtime.lookup(&lookup_id) {
                        return match memo {
                            MemoizedStep::Data { data } => Ok(data),
                            MemoizedStep::Error { error } => Err(StepFailure::Retriable(error)),
                        };
                    }

                    runtime.middleware().fire_on_step_start(&ctx).await;

                    let inner_ctx = ctx.clone();
                    let result: Result<serde_json::Value, DsdkError> = runtime
                        .middleware()
                        .run_wrap_step_handler(inner_ctx, move || {
                            Box::pin(async move {
                                match callback().await {
                                    Ok(value) => serde_json::to_value(value).map_err(|e| {
                                        DsdkError::new(
                                            ErrorCode::Internal,
                                            format!("failed to encode step result: {e}"),
                                        )
                                    }),
                                    Err(failure) => Err(Self::step_failure_to_dsdk_error(failure)),
                                }
                            })
                        })
                        .await;

                    let outcome = result.map_err(Self::dsdk_error_to_step_failure);

                    match &outcome {
                        Ok(value) => runtime.middleware().fire_on_step_complete(&ctx, value).await,
                        Err(err) => runtime.middleware().fire_on_step_error(&ctx, err).await,
                    }

                    outcome
                })
            })
            .await;

        // A memoized hit resolved inside the onion without touching op
        // recording or suspension — just decode and return it.
        if self.runtime.lookup(&hashed_id).is_some() {
            return outcome.and_then(|value| Self::decode(&value));
        }

        let op = match &outcome {
            Ok(value) => OutgoingOp::completed(hashed_id.clone(), id, StepKind::Run, value.clone()),
            Err(StepFailure::NonRetriable(e)) => {
                OutgoingOp::failed(hashed_id.clone(), id, e.clone(), None)
            }
            Err(StepFailure::RetryAfter { error, retry_after_secs }) => {
                OutgoingOp::failed(hashed_id.clone(), id, error.clone(), Some(*retry_after_secs))
            }
            Err(StepFailure::Retriable(e)) => {
                OutgoingOp::failed(hashed_id.clone(), id, e.clone(), None)
            }
        };

        if self.runtime.mode() == RunMode::Checkpoint {
            if let Some(checkpointer) = self.runtime.checkpointer() {
                self.runtime.record(op.clone());
                if checkpointer.checkpoint(&op).await.is_ok() {
                    self.runtime.forget(&hashed_id);
                    return outcome.and_then(|value| Self::decode(&value));
                }
                self.runtime.suspend().await;
            }
        }

        self.runtime.record(op);
        self.runtime.suspend().await
    }

    /// Suspend for a fixed duration; no local execution.
    pub async fn sleep(&self, id: &str, duration: Duration) -> ! {
        let (_, hashed_id) = self.runtime.next_position(id);
        self.runtime.fire_memoization_end_if_needed().await;
        if self.runtime.lookup(&hashed_id).is_some() {
            unreachable!("a replayed sleep never completes locally — see DESIGN.md");
        }
        self.runtime
            .record(OutgoingOp::pending(hashed_id, id, StepKind::Sleep { duration }));
        self.runtime.suspend().await
    }

    /// Suspend until a fixed wall-clock instant; no local execution.
    pub async fn sleep_until(&self, id: &str, until: DateTime<Utc>) -> ! {
        let (_, hashed_id) = self.runtime.next_position(id);
        self.runtime.fire_memoization_end_if_needed().await;
        self.runtime
            .record(OutgoingOp::pending(hashed_id, id, StepKind::SleepUntil { until }));
        self.runtime.suspend().await
    }

    /// Wait for a matching event up to `timeout`, resolving to `None` on
    /// timeout (server-executed; never runs locally).
    pub async fn wait_for_event<T: DeserializeOwned>(
        &self,
        id: &str,
        event: &str,
        match_expr: Option<&str>,
        timeout: Duration,
    ) -> Result<Option<T>, StepFailure> {
        let (_, hashed_id) = self.runtime.next_position(id);
        self.runtime.fire_memoization_end_if_needed().await;

        if let Some(memo) = self.runtime.lookup(&hashed_id) {
            return match memo {
                MemoizedStep::Data { data } if data.is_null() => Ok(None),
                MemoizedStep::Data { data } => Self::decode(&data).map(Some),
                MemoizedStep::Error { error } => Err(StepFailure::Retriable(error)),
            };
        }

        self.runtime.record(OutgoingOp::pending(
            hashed_id,
            id,
            StepKind::WaitForEvent {
                event: event.to_string(),
                match_expr: match_expr.map(str::to_string),
                timeout,
            },
        ));
        self.runtime.suspend().await
    }

    /// Invoke another registered function and await its return value
    /// (server-executed; never runs locally).
    pub async fn invoke<T: DeserializeOwned>(
        &self,
        id: &str,
        function_id: &str,
        data: serde_json::Value,
        timeout: Option<Duration>,
    ) -> Result<T, StepFailure> {
        let (_, hashed_id) = self.runtime.next_position(id);
        self.runtime.fire_memoization_end_if_needed().await;

        if let Some(memo) = self.runtime.lookup(&hashed_id) {
            return match memo {
                MemoizedStep::Data { data } => Self::decode(&data),
                MemoizedStep::Error { error } => Err(StepFailure::NonRetriable(error)),
            };
        }

        self.runtime.record(OutgoingOp::pending(
            hashed_id,
            id,
            StepKind::Invoke {
                function_id: function_id.to_string(),
                data,
                timeout,
            },
        ));
        self.runtime.suspend().await
    }

    /// Send one or more events. Executes locally (spec §4.3, §4.2's open
    /// question — see `DESIGN.md`) and resolves immediately rather than
    /// interrupting the handler.
    pub async fn send_event(&self, id: &str, events: Vec<Event>) -> Result<Vec<String>, DsdkError> {
        let (_, hashed_id) = self.runtime.next_position(id);
        self.runtime.fire_memoization_end_if_needed().await;

        if let Some(memo) = self.runtime.lookup(&hashed_id) {
            return match memo {
                MemoizedStep::Data { data } => serde_json::from_value(data).map_err(|e| {
                    DsdkError::new(ErrorCode::Internal, format!("bad memoized sendEvent ids: {e}"))
                }),
                MemoizedStep::Error { error } => {
                    Err(DsdkError::new(ErrorCode::Internal, error.message))
                }
            };
        }

        let events = self.runtime.middleware().transform_send_event(events.clone()).await?;
        let ids = self.runtime.events().dispatch(events.clone()).await?;

        self.runtime.record(OutgoingOp::completed(
            hashed_id,
            id,
            StepKind::SendEvent { events },
            serde_json::json!({ "ids": ids }),
        ));
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{EventDispatch, Invoker};
    use async_trait::async_trait;
    use dsdk_middleware::MiddlewareStack;
    use dsdk_ops::MemoizedMap;

    struct NoopEvents;
    #[async_trait]
    impl EventDispatch for NoopEvents {
        async fn dispatch(&self, events: Vec<Event>) -> Result<Vec<String>, DsdkError> {
            Ok(events.iter().map(|_| "evt-1".to_string()).collect())
        }
    }

    struct NoopInvoker;
    #[async_trait]
    impl Invoker for NoopInvoker {
        async fn invoke(
            &self,
            _function_id: &str,
            _data: serde_json::Value,
            _timeout: Option<Duration>,
        ) -> Result<serde_json::Value, StepFailure> {
            Ok(serde_json::json!(null))
        }
    }

    fn tools(memoized: MemoizedMap) -> StepTools {
        StepTools::new(Arc::new(StepRuntime::new(
            memoized,
            RunMode::Interrupt,
            Arc::new(MiddlewareStack::new(vec![], vec![])),
            None,
            Arc::new(NoopEvents),
            Arc::new(NoopInvoker),
            dsdk_middleware::FunctionInput {
                run_id: "run-1".into(),
                attempt: 1,
                max_attempts: 1,
                event: Event::new("test/event", serde_json::json!({})),
                events: vec![],
            },
        )))
    }

    #[tokio::test]
    async fn memoized_run_resolves_without_running_callback() {
        let mut map = MemoizedMap::new();
        map.insert(
            dsdk_hash::hash("my-step", 0),
            MemoizedStep::Data {
                data: serde_json::json!("cached"),
            },
        );
        let step = tools(map);
        let mut ran = false;
        let result: Result<String, StepFailure> = step
            .run("my-step", || async {
                ran = true;
                Ok("fresh".to_string())
            })
            .await;
        assert_eq!(result.unwrap(), "cached");
        assert!(!ran);
    }

    #[tokio::test]
    async fn send_event_resolves_immediately_without_suspending() {
        let step = tools(MemoizedMap::new());
        let ids = step
            .send_event("notify", vec![Event::new("app/x", serde_json::json!({}))])
            .await
            .unwrap();
        assert_eq!(ids, vec!["evt-1".to_string()]);
    }

    #[tokio::test]
    async fn fresh_run_records_op_and_never_resolves() {
        let step = tools(MemoizedMap::new());
        let fut = step.run("my-step", || async { Ok::<_, StepFailure>("result".to_string()) });
        // A single poll is enough to observe the suspend; see runtime.rs docs.
        tokio::select! {
            biased;
            _ = fut => panic!("fresh step must not resolve this request"),
            () = tokio::task::yield_now() => {}
        }
    }
}
