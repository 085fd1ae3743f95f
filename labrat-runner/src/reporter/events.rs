// Copyright (c) The labrat Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use chrono::{DateTime, FixedOffset};
use labrat_metadata::TestOutcome;
use std::time::Duration;

/// A test event.
///
/// Events are produced by a [`TestRunner`](crate::runner::TestRunner) and passed to the callback
/// given to [`TestRunner::execute`](crate::runner::TestRunner::execute).
#[derive(Clone, Debug)]
pub struct TestEvent {
    /// The time at which the event was generated, including the offset from UTC.
    pub timestamp: DateTime<FixedOffset>,

    /// The amount of time elapsed since the start of the run.
    pub elapsed: Duration,

    /// The kind of test event this is.
    pub kind: TestEventKind,
}

/// The kind of test event this is.
///
/// Forms part of [`TestEvent`].
#[derive(Clone, Debug)]
pub enum TestEventKind {
    /// The run started.
    RunStarted {
        /// The number of declared tests.
        test_count: usize,

        /// The number of tests that matched the filters.
        included_count: usize,

        /// Whether this is a dry run.
        dry: bool,
    },

    /// An experiment with at least one included test started.
    ExperimentStarted {
        /// Titles of the experiment and its ancestors, outermost first.
        path: Vec<String>,
    },

    /// An outcome was recorded in the notebook.
    ///
    /// This covers executed, skipped and todo tests as well as synthetic entries for hook
    /// failures and duplicate completions.
    TestRecorded {
        /// The recorded outcome.
        outcome: TestOutcome,

        /// The number of failures recorded so far, including this one.
        failures: usize,
    },

    /// The run finished.
    RunFinished {
        /// The time at which the run was started.
        start_time: DateTime<FixedOffset>,

        /// The number of outcomes recorded.
        recorded: usize,

        /// The number of failures.
        failures: usize,

        /// Whether the run stopped early, either because of `bail` or because the event callback
        /// failed.
        stopped_early: bool,
    },
}
