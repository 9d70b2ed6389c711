// SPDX-License-Identifier: MIT OR Apache-2.0
//! [`Group::parallel`]: fan a batch of step-tools calls out concurrently
//! (spec §4.4.3, C3).
//!
//! The source spec frames this as a callback returning an array of
//! already-started promises; Rust futures are lazy, so the equivalent is
//! simply a collection of not-yet-polled futures driven together. No
//! separate "parallel mode" flag exists on [`crate::runtime::StepRuntime`]:
//! because every [`std::future::Future::poll`] call runs synchronously to
//! completion, `futures::future::join_all` polling each step future in
//! sequence within one poll round means every fresh step inside the group
//! has already called [`crate::runtime::StepRuntime::record`] before the
//! engine's watcher task is scheduled to react to the first notification —
//! see `runtime.rs`'s module docs. This crate only needs to hand that
//! concurrency to `join_all`; the ordering guarantee falls out for free.

use std::future::Future;

use futures::future::join_all;

/// Namespace for the parallel-discovery primitive exposed as `ctx.group`.
pub struct Group;

impl Group {
    /// Drive every future in `futures` concurrently, in the order given,
    /// and collect their outputs once all have resolved (or, for fresh
    /// steps, once all have suspended — the group itself never resolves
    /// this request unless every step it contains was memoized).
    pub async fn parallel<T, Fut, I>(futures: I) -> Vec<T>
    where
        I: IntoIterator<Item = Fut>,
        Fut: Future<Output = T> + Send,
        T: Send,
    {
        join_all(futures).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn parallel_preserves_order_for_already_resolved_futures() {
        let results = Group::parallel(vec![
            Box::pin(async { 1 }) as std::pin::Pin<Box<dyn Future<Output = i32> + Send>>,
            Box::pin(async { 2 }),
            Box::pin(async { 3 }),
        ])
        .await;
        assert_eq!(results, vec![1, 2, 3]);
    }
}
