// Copyright (c) The labrat Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Declaring experiments, tests and hooks.
//!
//! The main structure in this module is [`Script`]. User code calls its declaration methods to
//! build the experiment tree; the finished script is turned into a
//! [`TestPlan`](crate::plan::TestPlan) and handed to the runner.

mod imp;
mod options;
mod unit;

pub use imp::*;
pub use options::*;
pub use unit::*;
