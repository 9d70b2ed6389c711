// SPDX-License-Identifier: MIT OR Apache-2.0
//! Pluggable [`Logger`] used by [`crate::RunContext`] and the client, so the
//! SDK's own diagnostics compose with `tracing` by default but can be
//! redirected by a middleware or host application.

use std::sync::Arc;

/// Severity of a logged message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Fine-grained diagnostics (per-step memoization hits/misses).
    Debug,
    /// Notable but non-fatal conditions (reconnects, swallowed hook errors).
    Warn,
    /// Run lifecycle milestones.
    Info,
    /// Failures about to be surfaced to the caller.
    Error,
}

/// A sink for SDK diagnostics.
pub trait Logger: Send + Sync {
    /// Emit a single log line at the given level.
    fn log(&self, level: LogLevel, message: &str);
}

/// Default [`Logger`] that forwards to the `tracing` crate, matching the
/// rest of the workspace's logging convention.
#[derive(Debug, Clone, Default)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn log(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Debug => tracing::debug!(target: "dsdk", "{message}"),
            LogLevel::Warn => tracing::warn!(target: "dsdk", "{message}"),
            LogLevel::Info => tracing::info!(target: "dsdk", "{message}"),
            LogLevel::Error => tracing::error!(target: "dsdk", "{message}"),
        }
    }
}

/// Shared handle to a [`Logger`], cheap to clone into every [`crate::RunContext`].
pub type SharedLogger = Arc<dyn Logger>;

/// Build the default [`SharedLogger`] (a [`TracingLogger`]).
#[must_use]
pub fn default_logger() -> SharedLogger {
    Arc::new(TracingLogger)
}
