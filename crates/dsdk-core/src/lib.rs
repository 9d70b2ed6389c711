// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! dsdk-core
#![deny(unsafe_code)]
#![warn(missing_docs)]

/// The [`Event`] type and its wire normalisation.
pub mod event;
/// [`FunctionConfig`] and its sub-configurations (retries, concurrency, batching, ...).
pub mod function_config;
/// Pluggable [`Logger`] for SDK diagnostics.
pub mod logger;
/// [`Mode`]: dev vs. cloud operating mode.
pub mod mode;
/// [`RequestInfo`]: the framework-agnostic incoming-request view.
pub mod request;
/// [`RunContext`]: the per-invocation record delivered to handlers and middleware.
pub mod run_context;
/// [`FunctionTrigger`]: event- and cron-triggers.
pub mod trigger;

pub use event::Event;
pub use function_config::{
    BatchConfig, CancelOn, ConcurrencyConfig, Debounce, FunctionConfig, Priority, RateLimit,
    Throttle,
};
pub use logger::{default_logger, LogLevel, Logger, SharedLogger, TracingLogger};
pub use mode::Mode;
pub use request::{HttpMethod, InMemoryBody, RequestBody, RequestInfo};
pub use run_context::RunContext;
pub use trigger::FunctionTrigger;

/// SDK name reported in the `x-inngest-sdk` header and introspection response.
pub const SDK_NAME: &str = "inngest-rs";

/// SDK version reported alongside [`SDK_NAME`].
pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");
