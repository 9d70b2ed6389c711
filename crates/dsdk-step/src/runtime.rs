// SPDX-License-Identifier: MIT OR Apache-2.0
//! [`StepRuntime`]: shared per-invocation state behind the [`crate::StepTools`]
//! façade — memoized lookups, fresh-op recording, and the suspend/notify
//! mechanism the engine (C4) drives (spec §4.3, §4.4).
//!
//! ## How "suspend" is implemented
//!
//! The source spec describes each step call as a coroutine with one
//! explicit suspension point, translated for thread-based languages into
//! "run the handler on a dedicated task with explicit channels for step
//! discovery" (spec §9). This crate takes that literally: a fresh step
//! that must suspend records its [`OutgoingOp`] into [`StepRuntime::discovered`],
//! fires [`StepRuntime::interrupt`], and then awaits [`std::future::pending`]
//! forever. Because a single [`std::future::Future::poll`] call runs to
//! completion without yielding the OS thread, every sibling step discovered
//! within the same synchronous stretch of code (in particular, every branch
//! of a [`crate::group::Group::parallel`] call) finishes recording its op
//! *before* the engine's `tokio::select!` is scheduled to observe the
//! notification and abort the handler task. No explicit barrier/counter is
//! needed to get this right.
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use dsdk_core::Event;
use dsdk_error::{DsdkError, StepFailure};
use dsdk_middleware::{FunctionInput, MiddlewareStack};
use dsdk_ops::{MemoizedMap, OutgoingOp};

/// A future whose concrete type isn't known statically — used for the
/// siblings collected by [`crate::group::Group::parallel`].
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Whether fresh `run` steps interrupt the handler (the default) or are
/// checkpointed to the server in-band (spec §4.4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Fresh steps always interrupt the handler; the next request replays.
    Interrupt,
    /// Fresh `run` steps are posted to the server immediately; on success
    /// the handler resumes in the same request.
    Checkpoint,
}

/// Posts a single completed `run` step's result to the server out-of-band
/// (spec §4.4.2). Implemented by `dsdk-comm` in terms of the wire protocol;
/// kept as a trait here so this crate doesn't depend on the HTTP stack.
#[async_trait]
pub trait Checkpointer: Send + Sync {
    /// Attempt to checkpoint `op`. `Ok(())` means the server accepted it
    /// and the handler may resume; any error falls back to interrupt mode
    /// for this step.
    async fn checkpoint(&self, op: &OutgoingOp) -> Result<(), DsdkError>;
}

/// Dispatches an event batch for `step.sendEvent` — the same sender used
/// by `client.send` (C8), reached through a trait so this crate doesn't
/// depend on `dsdk-event` directly.
#[async_trait]
pub trait EventDispatch: Send + Sync {
    /// Send `events`, returning the server-assigned ids in request order.
    async fn dispatch(&self, events: Vec<Event>) -> Result<Vec<String>, DsdkError>;
}

/// Dispatches `step.invoke` calls to another registered function.
#[async_trait]
pub trait Invoker: Send + Sync {
    /// Invoke `function_id` with `data`, waiting up to `timeout` if given.
    async fn invoke(
        &self,
        function_id: &str,
        data: serde_json::Value,
        timeout: Option<std::time::Duration>,
    ) -> Result<serde_json::Value, StepFailure>;
}

/// Per-invocation shared state behind every [`crate::StepTools`] method
/// call. One `StepRuntime` backs exactly one call request.
pub struct StepRuntime {
    memoized: MemoizedMap,
    position: Mutex<dsdk_hash::PositionTracker>,
    mode: RunMode,
    middleware: std::sync::Arc<MiddlewareStack>,
    checkpointer: Option<std::sync::Arc<dyn Checkpointer>>,
    events: std::sync::Arc<dyn EventDispatch>,
    invoker: std::sync::Arc<dyn Invoker>,
    /// Ops discovered (and not since checkpointed-away) this request, in
    /// discovery order — what the engine reports if the handler suspends.
    discovered: Mutex<Vec<OutgoingOp>>,
    /// Fired the moment a fresh step records an op it won't locally resolve
    /// this request. The engine awaits this alongside the handler's join
    /// handle to know when to stop driving it.
    interrupt: tokio::sync::Notify,
    /// Set once `discovered` has been harvested, guarding against acting on
    /// a stale/duplicate notification.
    harvested: AtomicBool,
    /// Total step-tools calls made so far this request, memoized or fresh —
    /// compared against `memoized.len()` to detect the `onMemoizationEnd` point.
    calls_made: AtomicUsize,
    /// Hashed ids of memoized entries actually looked up this request. If
    /// the handler returns a final result while entries remain unconsumed,
    /// some step the program took last time was skipped this time — the
    /// engine raises `StepNonDeterministic` (spec §8, `DESIGN.md`).
    consumed: Mutex<std::collections::HashSet<String>>,
    /// Subject of `onMemoizationEnd` — fixed for the life of the request.
    function_input: FunctionInput,
    /// Guards against firing `onMemoizationEnd` more than once. The hook
    /// must fire the instant the mapping is exhausted, which can happen
    /// mid-handler rather than only at end-of-run, so every `StepTools`
    /// method checks this rather than the engine checking once at the end.
    memo_end_fired: AtomicBool,
}

impl StepRuntime {
    /// Construct a runtime for one call request.
    #[must_use]
    pub fn new(
        memoized: MemoizedMap,
        mode: RunMode,
        middleware: std::sync::Arc<MiddlewareStack>,
        checkpointer: Option<std::sync::Arc<dyn Checkpointer>>,
        events: std::sync::Arc<dyn EventDispatch>,
        invoker: std::sync::Arc<dyn Invoker>,
        function_input: FunctionInput,
    ) -> Self {
        Self {
            memoized,
            position: Mutex::new(dsdk_hash::PositionTracker::new()),
            mode,
            middleware,
            checkpointer,
            events,
            invoker,
            discovered: Mutex::new(Vec::new()),
            interrupt: tokio::sync::Notify::new(),
            harvested: AtomicBool::new(false),
            calls_made: AtomicUsize::new(0),
            consumed: Mutex::new(std::collections::HashSet::new()),
            function_input,
            memo_end_fired: AtomicBool::new(false),
        }
    }

    /// `true` once every memoized entry has been observed by a step call
    /// this request (spec: `onMemoizationEnd` firing condition).
    #[must_use]
    pub fn memoization_exhausted(&self) -> bool {
        self.calls_made.load(Ordering::SeqCst) >= self.memoized.len()
    }

    /// Number of memoized entries never looked up this request. A non-zero
    /// count once the handler returns a final result means the program took
    /// a different path than the one that produced the memoized mapping.
    #[must_use]
    pub fn unconsumed_count(&self) -> usize {
        self.memoized.len() - self.consumed.lock().unwrap().len()
    }

    pub(crate) fn next_position(&self, id: &str) -> (u32, String) {
        self.calls_made.fetch_add(1, Ordering::SeqCst);
        self.position.lock().unwrap().next(id)
    }

    /// Fire `onMemoizationEnd` the instant the mapping becomes exhausted.
    /// This can happen mid-handler (the step call that consumes the last
    /// memoized entry), not only once the handler returns, so every
    /// `StepTools` method calls this right after `next_position` — and the
    /// engine calls it once more before invoking the handler, to cover the
    /// empty-mapping case (spec §4.5: "fires immediately on entry when the
    /// memoized mapping is empty").
    pub async fn fire_memoization_end_if_needed(&self) {
        if self.memoization_exhausted() && !self.memo_end_fired.swap(true, Ordering::SeqCst) {
            self.middleware.fire_on_memoization_end(&self.function_input).await;
        }
    }

    pub(crate) fn lookup(&self, hashed_id: &str) -> Option<dsdk_ops::MemoizedStep> {
        let hit = self.memoized.get(hashed_id).cloned();
        if hit.is_some() {
            self.consumed.lock().unwrap().insert(hashed_id.to_string());
        }
        hit
    }

    pub(crate) fn middleware(&self) -> &MiddlewareStack {
        &self.middleware
    }

    pub(crate) fn mode(&self) -> RunMode {
        self.mode
    }

    pub(crate) fn checkpointer(&self) -> Option<&(dyn Checkpointer)> {
        self.checkpointer.as_deref()
    }

    pub(crate) fn events(&self) -> &dyn EventDispatch {
        self.events.as_ref()
    }

    pub(crate) fn invoker(&self) -> &dyn Invoker {
        self.invoker.as_ref()
    }

    /// Record a fresh op and wake the engine's interrupt watch. Does not
    /// itself suspend — callers follow this with [`StepRuntime::suspend`]
    /// unless the step resolved locally (checkpoint success, `sendEvent`).
    pub(crate) fn record(&self, op: OutgoingOp) {
        tracing::debug!(hashed_id = %op.hashed_id, name = %op.name, kind = op.kind.label(), "step op discovered");
        self.discovered.lock().unwrap().push(op);
        self.interrupt.notify_one();
    }

    /// Remove the most recently recorded op matching `hashed_id` — used
    /// when a checkpoint succeeds and the step no longer needs reporting.
    pub(crate) fn forget(&self, hashed_id: &str) {
        let mut ops = self.discovered.lock().unwrap();
        if let Some(pos) = ops.iter().rposition(|op| op.hashed_id == hashed_id) {
            ops.remove(pos);
        }
    }

    /// Suspend forever. See the module-level docs for why this never waking
    /// is exactly the "suspend" primitive this crate needs.
    pub(crate) async fn suspend(&self) -> ! {
        std::future::pending::<()>().await;
        unreachable!("a pending future never resolves")
    }

    /// Engine-side: wait until at least one fresh op has been recorded.
    /// Resolves immediately if ops are already present (covers the case
    /// where the notification fired before the engine started watching).
    pub async fn wait_for_interrupt(&self) {
        if !self.discovered.lock().unwrap().is_empty() {
            return;
        }
        self.interrupt.notified().await;
    }

    /// Engine-side: take every op recorded so far, in discovery order.
    pub fn harvest(&self) -> Vec<OutgoingOp> {
        self.harvested.store(true, Ordering::SeqCst);
        std::mem::take(&mut self.discovered.lock().unwrap())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dsdk_middleware::MiddlewareStack;
    use std::sync::Arc;

    struct NoopEvents;
    #[async_trait]
    impl EventDispatch for NoopEvents {
        async fn dispatch(&self, events: Vec<Event>) -> Result<Vec<String>, DsdkError> {
            Ok(events.iter().map(|_| "evt".to_string()).collect())
        }
    }

    struct NoopInvoker;
    #[async_trait]
    impl Invoker for NoopInvoker {
        async fn invoke(
            &self,
            _function_id: &str,
            _data: serde_json::Value,
            _timeout: Option<std::time::Duration>,
        ) -> Result<serde_json::Value, StepFailure> {
            Ok(serde_json::json!(null))
        }
    }

    fn test_function_input() -> FunctionInput {
        FunctionInput {
            run_id: "run-1".into(),
            attempt: 1,
            max_attempts: 1,
            event: Event::new("test/event", serde_json::json!({})),
            events: vec![],
        }
    }

    fn runtime(memoized: MemoizedMap) -> StepRuntime {
        StepRuntime::new(
            memoized,
            RunMode::Interrupt,
            Arc::new(MiddlewareStack::new(vec![], vec![])),
            None,
            Arc::new(NoopEvents),
            Arc::new(NoopInvoker),
            test_function_input(),
        )
    }

    #[test]
    fn position_tracker_increments_across_calls() {
        let rt = runtime(MemoizedMap::new());
        let (i0, _) = rt.next_position("a");
        let (i1, _) = rt.next_position("a");
        assert_eq!(i0, 0);
        assert_eq!(i1, 1);
    }

    #[tokio::test]
    async fn memoization_end_fires_once_mapping_exhausted() {
        let mut map = MemoizedMap::new();
        map.insert(
            dsdk_hash::hash("a", 0),
            dsdk_ops::MemoizedStep::Data { data: serde_json::json!(1) },
        );
        let rt = runtime(map);
        assert!(!rt.memoization_exhausted());
        rt.lookup(&dsdk_hash::hash("a", 0));
        rt.next_position("a");
        assert!(rt.memoization_exhausted());
        rt.fire_memoization_end_if_needed().await;
        assert!(rt.memo_end_fired.load(Ordering::SeqCst));
    }

    #[test]
    fn unconsumed_count_reflects_unlooked_up_entries() {
        let mut map = MemoizedMap::new();
        map.insert(
            dsdk_hash::hash("a", 0),
            dsdk_ops::MemoizedStep::Data { data: serde_json::json!(1) },
        );
        map.insert(
            dsdk_hash::hash("b", 0),
            dsdk_ops::MemoizedStep::Data { data: serde_json::json!(2) },
        );
        let rt = runtime(map);
        assert_eq!(rt.unconsumed_count(), 2);
        rt.lookup(&dsdk_hash::hash("a", 0));
        assert_eq!(rt.unconsumed_count(), 1);
    }

    #[tokio::test]
    async fn record_then_harvest_round_trips() {
        let rt = runtime(MemoizedMap::new());
        rt.record(OutgoingOp::completed(
            "h",
            "n",
            dsdk_ops::StepKind::Run,
            serde_json::json!(1),
        ));
        let ops = rt.harvest();
        assert_eq!(ops.len(), 1);
        assert!(rt.harvest().is_empty());
    }
}
