// SPDX-License-Identifier: MIT OR Apache-2.0
//! Generic onion composition: outer `before` runs first, inner `after` runs
//! first, symmetric to how the hooks were entered (spec §4.5, §6 "onion
//! order").

use std::future::Future;
use std::pin::Pin;

/// A boxed, `Send` future — the common currency for every async hook in
/// this crate, since trait objects can't return `impl Future` directly.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The remainder of an onion chain, handed to a layer's wrap hook. Calling
/// [`Next::call`] runs every inner layer (and finally the terminal body),
/// producing the onion's "before forward, after backward" unwind.
///
/// Generic over the failure type `E` so `wrapStep` (which fails with
/// `StepFailure`, not the plain SDK error) can share this machinery with
/// every other `wrap*` hook.
pub struct Next<'a, T, E> {
    inner: Box<dyn FnOnce() -> BoxFuture<'a, Result<T, E>> + Send + 'a>,
}

impl<'a, T: Send + 'a, E: Send + 'a> Next<'a, T, E> {
    /// Wrap a thunk that runs the rest of the chain.
    pub fn new(f: impl FnOnce() -> BoxFuture<'a, Result<T, E>> + Send + 'a) -> Self {
        Self { inner: Box::new(f) }
    }

    /// Invoke the rest of the chain.
    pub async fn call(self) -> Result<T, E> {
        (self.inner)().await
    }
}

/// Fold a stack of onion layers (outermost first) around a terminal body.
///
/// Each `layer` is called with a [`Next`] representing everything inside
/// it; layers are applied outer-to-inner when building, so the outermost
/// layer's closure is the one returned here and its `before` code runs
/// first when the resulting future is polled.
pub fn compose<'a, T: Send + 'a, E: Send + 'a>(
    layers: Vec<Box<dyn FnOnce(Next<'a, T, E>) -> BoxFuture<'a, Result<T, E>> + Send + 'a>>,
    terminal: impl FnOnce() -> BoxFuture<'a, Result<T, E>> + Send + 'a,
) -> BoxFuture<'a, Result<T, E>> {
    let mut next = Next::new(terminal);
    for layer in layers.into_iter().rev() {
        let inner_next = next;
        next = Next::new(move || layer(inner_next));
    }
    Box::pin(next.call())
}
