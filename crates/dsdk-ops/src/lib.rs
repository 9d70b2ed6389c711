// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
#![deny(unsafe_code)]
#![warn(missing_docs)]

mod memoized;
mod op;

pub use memoized::{MemoizedMap, MemoizedStep};
pub use op::{OutgoingOp, StepKind};
