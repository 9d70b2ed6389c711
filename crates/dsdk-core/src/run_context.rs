// SPDX-License-Identifier: MIT OR Apache-2.0
//! [`RunContext`]: the immutable per-invocation record delivered to
//! middleware and user code (spec §3).

use crate::event::Event;
use crate::logger::SharedLogger;

/// Per-invocation record passed to the function handler and to every
/// middleware hook.
///
/// Generic over `S`, the step-tools façade type (`dsdk-step::StepTools`),
/// to avoid a dependency cycle between `dsdk-core` and `dsdk-step` — the
/// façade itself exposes the `group.parallel(...)` primitive (spec §4.3),
/// so `RunContext` does not carry a separate `group` field.
#[derive(Clone)]
pub struct RunContext<S> {
    /// Unique identifier for this run (stable across every request in the run).
    pub run_id: String,
    /// 1-based attempt number within the run.
    pub attempt: u32,
    /// Maximum attempts the function's retry policy allows.
    pub max_attempts: u32,
    /// The event that triggered this run (the first, for batched triggers).
    pub event: Event,
    /// All events in the batch (length 1 for non-batched triggers).
    pub events: Vec<Event>,
    /// Diagnostics sink.
    pub logger: SharedLogger,
    /// Step-tools façade: `run`, `sleep`, `sleepUntil`, `waitForEvent`,
    /// `invoke`, `sendEvent`, and the parallel `group` primitive.
    pub step: S,
}

impl<S> RunContext<S> {
    /// Map the step-tools façade to a different type, preserving every
    /// other field. Used by middleware's `transformFunctionInput` hook,
    /// which may wrap `step` without touching the rest of the context.
    pub fn map_step<T>(self, f: impl FnOnce(S) -> T) -> RunContext<T> {
        RunContext {
            run_id: self.run_id,
            attempt: self.attempt,
            max_attempts: self.max_attempts,
            event: self.event,
            events: self.events,
            logger: self.logger,
            step: f(self.step),
        }
    }
}
