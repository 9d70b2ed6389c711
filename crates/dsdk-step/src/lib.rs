// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! Step-tools façade (C3). See [`runtime`] for the suspend/notify mechanism
//! this crate is built around, [`tools`] for the user-visible methods, and
//! [`group`] for parallel discovery.

mod group;
mod runtime;
mod tools;

pub use group::Group;
pub use runtime::{BoxFuture, Checkpointer, EventDispatch, Invoker, RunMode, StepRuntime};
pub use tools::StepTools;
