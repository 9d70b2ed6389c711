// SPDX-License-Identifier: MIT OR Apache-2.0
//! [`FunctionConfig`]: the server-visible configuration of a registered
//! function (spec §3).

use crate::trigger::FunctionTrigger;
use dsdk_error::{DsdkError, ErrorCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Concurrency limit applied to runs of a function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConcurrencyConfig {
    /// Maximum number of concurrent runs.
    pub limit: u32,
    /// Optional key expression that partitions the limit (e.g. per-customer).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// Optional scope the limit applies within (`"fn"`, `"env"`, `"account"`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

/// Batching configuration: the server buffers events and invokes once per
/// batch instead of once per event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Maximum number of events per batch.
    pub max_size: u32,
    /// Maximum time to wait for a batch to fill before invoking anyway.
    #[serde(with = "dsdk_duration_serde::duration_humantime")]
    pub timeout: Duration,
}

/// A fixed-window rate limit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimit {
    /// Maximum number of runs per period.
    pub limit: u32,
    /// Window length.
    #[serde(with = "dsdk_duration_serde::duration_humantime")]
    pub period: Duration,
    /// Optional key expression partitioning the limit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

/// A token-bucket throttle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Throttle {
    /// Steady-state rate: runs per period.
    pub limit: u32,
    /// Window length for the steady-state rate.
    #[serde(with = "dsdk_duration_serde::duration_humantime")]
    pub period: Duration,
    /// Optional burst allowance above the steady-state rate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub burst: Option<u32>,
    /// Optional key expression partitioning the throttle.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

/// Debounce: delay invocation until no new matching event has arrived for
/// `period`, re-invoking (replacing queued runs) on every new event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Debounce {
    /// Quiet period required before invocation.
    #[serde(with = "dsdk_duration_serde::duration_humantime")]
    pub period: Duration,
    /// Optional key expression partitioning the debounce window.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

/// Run priority expression, evaluated against the triggering event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Priority {
    /// Expression producing a priority factor from the triggering event.
    pub run: String,
}

/// A condition under which an in-flight run is cancelled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancelOn {
    /// Event name that, when received, may cancel the run.
    pub event: String,
    /// Optional match expression narrowing which events cancel.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub if_expression: Option<String>,
    /// Optional window after which the cancel trigger itself expires.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[serde(with = "dsdk_duration_serde::option_duration_humantime")]
    pub timeout: Option<Duration>,
}

/// Server-visible configuration for a registered function (spec §3).
///
/// # Invariants
///
/// If `batch_events` is set, none of `cancel_on`, `rate_limit`, or
/// `idempotency` may also be set — call [`FunctionConfig::validate`] to
/// enforce this statically before registering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionConfig {
    /// Stable function id, unique within the app.
    pub id: String,
    /// Human-readable display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// One or more triggers; merged into the server-visible function config.
    pub triggers: Vec<FunctionTrigger>,
    /// Retry count override. Defaults to the server policy when omitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,
    /// Concurrency limit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<ConcurrencyConfig>,
    /// Event batching.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_events: Option<BatchConfig>,
    /// Rate limit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimit>,
    /// Throttle.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub throttle: Option<Throttle>,
    /// Debounce.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debounce: Option<Debounce>,
    /// Run priority.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    /// Conditions that cancel an in-flight run.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cancel_on: Vec<CancelOn>,
    /// Idempotency key expression, deduplicating runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency: Option<String>,
    /// Names of function-level middleware attached to this function.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub middleware: Vec<String>,
}

impl FunctionConfig {
    /// Create a minimal config: an id and one trigger, everything else unset.
    #[must_use]
    pub fn new(id: impl Into<String>, trigger: FunctionTrigger) -> Self {
        Self {
            id: id.into(),
            name: None,
            triggers: vec![trigger],
            retries: None,
            concurrency: None,
            batch_events: None,
            rate_limit: None,
            throttle: None,
            debounce: None,
            priority: None,
            cancel_on: Vec::new(),
            idempotency: None,
            middleware: Vec::new(),
        }
    }

    /// Enforce the static invariant: `batch_events` is mutually exclusive
    /// with `cancel_on`, `rate_limit`, and `idempotency`.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorCode::ConfigIncompatibleBatch`] if the invariant is violated.
    pub fn validate(&self) -> Result<(), DsdkError> {
        if self.batch_events.is_some() {
            if !self.cancel_on.is_empty() {
                return Err(DsdkError::new(
                    ErrorCode::ConfigIncompatibleBatch,
                    format!("function `{}`: batchEvents cannot be combined with cancelOn", self.id),
                ));
            }
            if self.rate_limit.is_some() {
                return Err(DsdkError::new(
                    ErrorCode::ConfigIncompatibleBatch,
                    format!("function `{}`: batchEvents cannot be combined with rateLimit", self.id),
                ));
            }
            if self.idempotency.is_some() {
                return Err(DsdkError::new(
                    ErrorCode::ConfigIncompatibleBatch,
                    format!("function `{}`: batchEvents cannot be combined with idempotency", self.id),
                ));
            }
        }
        if self.triggers.is_empty() {
            return Err(DsdkError::new(
                ErrorCode::ConfigUnrecognisedTrigger,
                format!("function `{}` has no triggers", self.id),
            ));
        }
        Ok(())
    }
}
