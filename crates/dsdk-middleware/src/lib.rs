// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
#![deny(unsafe_code)]
#![warn(missing_docs)]

/// [`Middleware`] and its hook contexts/outcomes.
pub mod hook;
/// Onion composition ([`onion::Next`], [`onion::compose`]).
pub mod onion;
/// [`stack::MiddlewareStack`]: the per-request ordered layer list and its runners.
pub mod stack;

pub use hook::{
    FunctionInput, FunctionOutcome, Middleware, MiddlewareFactory, RequestContext,
    RequestOutcome, SendEventContext, SendEventOutcome, StepContext, StepHandlerContext,
    StepOutcome,
};
pub use onion::{compose, BoxFuture, Next};
pub use stack::MiddlewareStack;
