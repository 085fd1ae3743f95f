// Copyright (c) The labrat Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Core declaration and scheduling logic for labrat.
//!
//! A run goes through these stages:
//!
//! 1. Tests are declared on a [`Script`](script::Script): nested experiments, tests, and
//!    `before`/`after`/`before_each`/`after_each` hooks.
//! 2. The script is planned into a [`TestPlan`](plan::TestPlan), which assigns sequence ids and
//!    applies a [`TestFilter`](test_filter::TestFilter).
//! 3. A [`TestRunner`](runner::TestRunner) executes the plan. Every hook and test runs behind a
//!    fault boundary that enforces timeouts and catches panics, errors and duplicate completions.
//! 4. The run produces a [`Notebook`](labrat_metadata::Notebook) for reporters.

pub mod config;
pub mod errors;
mod helpers;
pub mod output;
pub mod plan;
pub mod reporter;
pub mod runner;
pub mod script;
pub mod test_filter;
pub mod time;

pub use helpers::plural;
