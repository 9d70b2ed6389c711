// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! [`FunctionDefinition`] and its builder, [`FunctionBuilder`] (C10).

use dsdk_core::{
    BatchConfig, CancelOn, ConcurrencyConfig, Debounce, FunctionConfig, FunctionTrigger, Priority,
    RateLimit, Throttle,
};
use dsdk_engine::Handler;
use dsdk_error::DsdkError;
use dsdk_middleware::MiddlewareFactory;

/// A registered function: its server-visible [`FunctionConfig`], its
/// handler, and any function-level middleware factories.
///
/// Function-level middleware runs *inside* client-level middleware (spec
/// §4.5) — `dsdk-client` is responsible for instantiating these factories
/// fresh per request and appending them after the client's own layers.
pub struct FunctionDefinition {
    /// Server-visible configuration: id, triggers, retries, concurrency, ...
    pub config: FunctionConfig,
    /// The user's handler, boxed for storage in a function registry.
    pub handler: Handler,
    /// Factories for function-level middleware, instantiated per request.
    pub middleware: Vec<Box<dyn MiddlewareFactory>>,
}

impl FunctionDefinition {
    /// Stable function id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.config.id
    }
}

/// Builds a [`FunctionDefinition`] from an id, one or more triggers, and
/// optional server-visible configuration, mirroring `createFunction`'s
/// options object.
///
/// ```ignore
/// let def = FunctionBuilder::new("send-welcome-email", FunctionTrigger::event("user/created"))
///     .retries(5)
///     .concurrency(ConcurrencyConfig { limit: 10, key: None, scope: None })
///     .build(handler)?;
/// ```
pub struct FunctionBuilder {
    config: FunctionConfig,
    middleware: Vec<Box<dyn MiddlewareFactory>>,
}

impl FunctionBuilder {
    /// Start a builder with a stable id and one trigger.
    #[must_use]
    pub fn new(id: impl Into<String>, trigger: FunctionTrigger) -> Self {
        Self {
            config: FunctionConfig::new(id, trigger),
            middleware: Vec::new(),
        }
    }

    /// Add an additional trigger (a function may fire on more than one
    /// event name or cron schedule).
    #[must_use]
    pub fn trigger(mut self, trigger: FunctionTrigger) -> Self {
        self.config.triggers.push(trigger);
        self
    }

    /// Human-readable display name.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = Some(name.into());
        self
    }

    /// Retry count override.
    #[must_use]
    pub fn retries(mut self, retries: u32) -> Self {
        self.config.retries = Some(retries);
        self
    }

    /// Concurrency limit.
    #[must_use]
    pub fn concurrency(mut self, concurrency: ConcurrencyConfig) -> Self {
        self.config.concurrency = Some(concurrency);
        self
    }

    /// Event batching. Mutually exclusive with `cancel_on`, `rate_limit`,
    /// and `idempotency` — enforced by [`FunctionDefinition`]'s
    /// [`FunctionConfig::validate`] at `build` time.
    #[must_use]
    pub fn batch_events(mut self, batch: BatchConfig) -> Self {
        self.config.batch_events = Some(batch);
        self
    }

    /// Fixed-window rate limit.
    #[must_use]
    pub fn rate_limit(mut self, rate_limit: RateLimit) -> Self {
        self.config.rate_limit = Some(rate_limit);
        self
    }

    /// Token-bucket throttle.
    #[must_use]
    pub fn throttle(mut self, throttle: Throttle) -> Self {
        self.config.throttle = Some(throttle);
        self
    }

    /// Debounce.
    #[must_use]
    pub fn debounce(mut self, debounce: Debounce) -> Self {
        self.config.debounce = Some(debounce);
        self
    }

    /// Run priority expression.
    #[must_use]
    pub fn priority(mut self, priority: Priority) -> Self {
        self.config.priority = Some(priority);
        self
    }

    /// Add a condition that cancels an in-flight run.
    #[must_use]
    pub fn cancel_on(mut self, cancel_on: CancelOn) -> Self {
        self.config.cancel_on.push(cancel_on);
        self
    }

    /// Idempotency key expression.
    #[must_use]
    pub fn idempotency(mut self, expression: impl Into<String>) -> Self {
        self.config.idempotency = Some(expression.into());
        self
    }

    /// Attach a function-level middleware factory under a name, recorded in
    /// [`FunctionConfig::middleware`] for introspection (spec §6.1).
    #[must_use]
    pub fn middleware(mut self, name: impl Into<String>, factory: Box<dyn MiddlewareFactory>) -> Self {
        self.config.middleware.push(name.into());
        self.middleware.push(factory);
        self
    }

    /// Finalize the definition, validating [`FunctionConfig`]'s invariants.
    ///
    /// # Errors
    ///
    /// Returns whatever [`FunctionConfig::validate`] returns: an
    /// incompatible-batch-config error, or a no-triggers error.
    pub fn build(self, handler: Handler) -> Result<FunctionDefinition, DsdkError> {
        self.config.validate()?;
        Ok(FunctionDefinition {
            config: self.config,
            handler,
            middleware: self.middleware,
        })
    }
}
