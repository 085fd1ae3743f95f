// Copyright (c) The labrat Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use labrat_metadata::{Notebook, TestOutcome};
use std::time::Duration;
use tracing::debug;

/// Accumulates outcomes into a [`Notebook`].
///
/// Outcomes are kept in the order they are recorded. Every outcome that carries an error counts
/// as a failure, including synthetic entries.
#[derive(Debug, Default)]
pub struct NotebookAggregator {
    tests: Vec<TestOutcome>,
    failures: usize,
}

impl NotebookAggregator {
    /// Creates a new, empty aggregator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an outcome.
    pub fn record(&mut self, outcome: TestOutcome) {
        if outcome.is_failure() {
            self.failures += 1;
            debug!(title = %outcome.title, failures = self.failures, "recorded failure");
        }
        self.tests.push(outcome);
    }

    /// Returns the number of failures recorded so far.
    pub fn failures(&self) -> usize {
        self.failures
    }

    /// Returns the number of outcomes recorded so far.
    pub fn recorded(&self) -> usize {
        self.tests.len()
    }

    /// Finishes the run and returns the notebook.
    ///
    /// The returned notebook has no leaks or coverage attached.
    pub fn finish(self, elapsed: Duration) -> Notebook {
        Notebook {
            elapsed,
            tests: self.tests,
            failures: self.failures,
            leaks: None,
            coverage: None,
        }
    }
}
