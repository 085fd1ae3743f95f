// Copyright (c) The labrat Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Structured access to the notebook produced by a labrat run.
//!
//! A notebook is the single aggregate result of one run. Reporters (console, TAP, JUnit, coverage
//! renderers and so on) consume it; they never see the experiment tree itself.

mod exit_codes;
mod filter;
mod notebook;

pub use exit_codes::*;
pub use filter::*;
pub use notebook::*;
