// Copyright (c) The labrat Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Time-keeping for the engine: stopwatches for durations and the captured timer capability used
//! to enforce timeouts.

mod stopwatch;
mod timers;

pub(crate) use stopwatch::*;
pub use timers::*;
