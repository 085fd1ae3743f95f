// Copyright (c) The labrat Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Events produced during a run, and the aggregator that turns outcomes into a
//! [`Notebook`](labrat_metadata::Notebook).
//!
//! Rendering the notebook (console, TAP, JUnit and so on) is left to downstream reporters.

mod aggregator;
mod events;

pub use aggregator::*;
pub use events::*;
