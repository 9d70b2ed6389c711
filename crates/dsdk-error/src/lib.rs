// SPDX-License-Identifier: MIT OR Apache-2.0
//! Unified error taxonomy with stable error codes for the durable execution SDK.
//!
//! Every error that can cross an SDK boundary (HTTP response, memoized step,
//! event-send rejection) carries a stable, wire-serialisable [`ErrorCode`], a
//! broad [`ErrorCategory`], a human-readable message, and optional structured
//! context. Use [`DsdkError::new`] to build one.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// ErrorCategory
// ---------------------------------------------------------------------------

/// Broad family an [`ErrorCode`] belongs to, matching spec §7's taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Missing/invalid configuration discovered at construction or first send.
    Configuration,
    /// Bad or missing signature on an incoming request.
    Signature,
    /// Malformed request body or unknown function id.
    Protocol,
    /// A user callback inside `step.run` threw.
    Step,
    /// Event send failed.
    Send,
    /// Connect-mode socket failure.
    Transport,
    /// Catch-all for unexpected internal errors.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Configuration => "configuration",
            Self::Signature => "signature",
            Self::Protocol => "protocol",
            Self::Step => "step",
            Self::Send => "send",
            Self::Transport => "transport",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// ErrorCode
// ---------------------------------------------------------------------------

/// Machine-readable, stable error code. Serialises to `SCREAMING_SNAKE_CASE`
/// and is guaranteed not to change shape across patch releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // -- Configuration --
    /// A required client option (e.g. signing key in cloud mode) is missing.
    ConfigMissingKey,
    /// A configured base URL could not be parsed as absolute.
    ConfigInvalidUrl,
    /// A function trigger is neither an event trigger nor a cron trigger.
    ConfigUnrecognisedTrigger,
    /// `batchEvents` was set together with a statically-incompatible option.
    ConfigIncompatibleBatch,
    /// `connect()` was called with no functions registered on the client.
    ConfigEmptyAppsList,

    // -- Signature --
    /// The `x-inngest-signature` header was absent in cloud mode.
    SignatureMissing,
    /// The signature did not verify against the signing key (or fallback).
    SignatureInvalid,
    /// The signed timestamp fell outside the clock-skew window.
    SignatureExpired,

    // -- Protocol --
    /// The request body did not parse into a typed run-request.
    ProtocolMalformedBody,
    /// `ctx.fn_id` does not match any registered function.
    ProtocolUnknownFunction,

    // -- Step --
    /// A `step.run` callback threw; retriable per the function's retry policy.
    StepCallbackFailed,
    /// A `step.run` callback threw a non-retriable sentinel.
    StepNonRetriable,
    /// The memoized mapping was consumed out of the order the program calls steps in.
    StepNonDeterministic,

    // -- Send --
    /// `client.send` was called in cloud mode with no event key configured.
    SendNoEventKey,
    /// The server rejected the event batch.
    SendRejected,

    // -- Transport --
    /// The connect handshake failed (fatal, not retried).
    TransportHandshakeFailed,
    /// The gateway WebSocket closed or failed to connect; retried with backoff.
    TransportSocketFailed,

    /// Catch-all for errors that don't fit another code.
    Internal,
}

impl ErrorCode {
    /// The [`ErrorCategory`] this code belongs to.
    #[must_use]
    pub fn category(self) -> ErrorCategory {
        match self {
            Self::ConfigMissingKey
            | Self::ConfigInvalidUrl
            | Self::ConfigUnrecognisedTrigger
            | Self::ConfigIncompatibleBatch
            | Self::ConfigEmptyAppsList => ErrorCategory::Configuration,
            Self::SignatureMissing | Self::SignatureInvalid | Self::SignatureExpired => {
                ErrorCategory::Signature
            }
            Self::ProtocolMalformedBody | Self::ProtocolUnknownFunction => ErrorCategory::Protocol,
            Self::StepCallbackFailed | Self::StepNonRetriable | Self::StepNonDeterministic => {
                ErrorCategory::Step
            }
            Self::SendNoEventKey | Self::SendRejected => ErrorCategory::Send,
            Self::TransportHandshakeFailed | Self::TransportSocketFailed => {
                ErrorCategory::Transport
            }
            Self::Internal => ErrorCategory::Internal,
        }
    }

    /// Whether the server is expected to retry a request that fails with
    /// this code. Purely advisory — the server makes the final call.
    #[must_use]
    pub fn is_retriable(self) -> bool {
        !matches!(
            self,
            Self::SignatureMissing
                | Self::SignatureInvalid
                | Self::SignatureExpired
                | Self::ProtocolMalformedBody
                | Self::ProtocolUnknownFunction
                | Self::StepNonRetriable
                | Self::ConfigMissingKey
                | Self::ConfigInvalidUrl
                | Self::ConfigUnrecognisedTrigger
                | Self::ConfigIncompatibleBatch
                | Self::ConfigEmptyAppsList
        )
    }
}

// ---------------------------------------------------------------------------
// DsdkError
// ---------------------------------------------------------------------------

/// Top-level SDK error: a code, a message, and arbitrary structured context.
#[derive(Debug, Clone, Serialize, Deserialize, thiserror::Error)]
#[error("{code:?}: {message}")]
pub struct DsdkError {
    /// Stable machine-readable code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
    /// Extra key-value context (header names, function ids, ...).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub context: BTreeMap<String, serde_json::Value>,
}

impl DsdkError {
    /// Build a new error with no context.
    #[must_use]
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            context: BTreeMap::new(),
        }
    }

    /// Attach a context key-value pair (builder style).
    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// The [`ErrorCategory`] this error's code belongs to.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        self.code.category()
    }
}

// ---------------------------------------------------------------------------
// StepError — the wire shape of a memoized step failure (spec §3, §4.4.4)
// ---------------------------------------------------------------------------

/// Serialised shape of a failed step, matching spec §3's
/// `{name, message, stack?, cause?}` and round-tripped through the memoized
/// mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepError {
    /// The error's "class" name (e.g. the user exception type name).
    pub name: String,
    /// Human-readable message.
    pub message: String,
    /// Optional stack trace text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    /// Optional nested cause.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<Box<StepError>>,
}

impl StepError {
    /// Construct a `StepError` from just a message, using `"Error"` as the name.
    #[must_use]
    pub fn from_message(message: impl Into<String>) -> Self {
        Self {
            name: "Error".to_string(),
            message: message.into(),
            stack: None,
            cause: None,
        }
    }
}

impl fmt::Display for StepError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.message)
    }
}

impl std::error::Error for StepError {}

// ---------------------------------------------------------------------------
// Sentinel errors a `step.run` callback can return (spec §4.4.4, §7)
// ---------------------------------------------------------------------------

/// The outcome of a failed `step.run` callback, as user code can express it.
///
/// A plain `Err(StepError)` is retriable up to the function's retry count.
/// Wrap in [`StepFailure::NonRetriable`] or [`StepFailure::RetryAfter`] to
/// override that.
#[derive(Debug, Clone, Serialize, Deserialize, thiserror::Error)]
pub enum StepFailure {
    /// Retried by the server, up to the function's configured retry count.
    #[error("{0}")]
    Retriable(StepError),
    /// Never retried; the run fails on the next invocation.
    #[error("{0} (non-retriable)")]
    NonRetriable(StepError),
    /// Retried, but only after the given duration has elapsed.
    #[error("{error} (retry after {retry_after_secs}s)")]
    RetryAfter {
        /// The underlying error.
        error: StepError,
        /// Hint, in seconds, for how long the server should wait before retrying.
        retry_after_secs: u64,
    },
}

impl StepFailure {
    /// Build a non-retriable failure, matching the `NonRetriableError` sentinel.
    #[must_use]
    pub fn non_retriable(message: impl Into<String>) -> Self {
        Self::NonRetriable(StepError::from_message(message))
    }

    /// Build a retry-after failure, matching the `RetryAfterError` sentinel.
    #[must_use]
    pub fn retry_after(message: impl Into<String>, retry_after_secs: u64) -> Self {
        Self::RetryAfter {
            error: StepError::from_message(message),
            retry_after_secs,
        }
    }

    /// The underlying [`StepError`], regardless of variant.
    #[must_use]
    pub fn step_error(&self) -> &StepError {
        match self {
            Self::Retriable(e) | Self::NonRetriable(e) => e,
            Self::RetryAfter { error, .. } => error,
        }
    }

    /// Whether the server should retry this step.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        !matches!(self, Self::NonRetriable(_))
    }
}

impl From<StepError> for StepFailure {
    fn from(e: StepError) -> Self {
        Self::Retriable(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_is_stable_per_code() {
        assert_eq!(ErrorCode::SignatureInvalid.category(), ErrorCategory::Signature);
        assert_eq!(ErrorCode::StepNonDeterministic.category(), ErrorCategory::Step);
    }

    #[test]
    fn non_retriable_codes_are_not_retriable() {
        assert!(!ErrorCode::SignatureInvalid.is_retriable());
        assert!(!ErrorCode::StepNonRetriable.is_retriable());
        assert!(ErrorCode::StepCallbackFailed.is_retriable());
    }

    #[test]
    fn step_error_round_trips_through_json() {
        let err = StepError {
            name: "TypeError".into(),
            message: "boom".into(),
            stack: Some("at foo.rs:1".into()),
            cause: Some(Box::new(StepError::from_message("root cause"))),
        };
        let json = serde_json::to_string(&err).unwrap();
        let back: StepError = serde_json::from_str(&json).unwrap();
        assert_eq!(err, back);
    }

    #[test]
    fn step_failure_non_retriable_is_not_retriable() {
        let f = StepFailure::non_retriable("fatal");
        assert!(!f.is_retriable());
        let f2 = StepFailure::retry_after("slow down", 30);
        assert!(f2.is_retriable());
    }
}
