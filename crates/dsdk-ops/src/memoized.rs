// SPDX-License-Identifier: MIT OR Apache-2.0
//! [`MemoizedStep`]: a previously-completed step result, keyed by hashed id,
//! delivered by the server on a call request (spec §3).

use dsdk_error::StepError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The outcome of a step that the server has already recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MemoizedStep {
    /// The step completed successfully with this value.
    Data {
        /// The step's resolved value.
        data: serde_json::Value,
    },
    /// The step failed terminally; the error is replayed to user code.
    Error {
        /// The step's recorded failure.
        error: StepError,
    },
}

impl MemoizedStep {
    /// The memoized success value, if this is a `Data` entry.
    #[must_use]
    pub fn data(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Data { data } => Some(data),
            Self::Error { .. } => None,
        }
    }

    /// The memoized error, if this is an `Error` entry.
    #[must_use]
    pub fn error(&self) -> Option<&StepError> {
        match self {
            Self::Data { .. } => None,
            Self::Error { error } => Some(error),
        }
    }
}

/// The mapping delivered in a call request's `steps` field: hashed id to
/// memoized result, populated by the server and consumed exactly once per
/// entry in program order (spec §8).
pub type MemoizedMap = BTreeMap<String, MemoizedStep>;
