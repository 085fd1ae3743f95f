// Copyright (c) The labrat Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::{fmt, time::Duration};

/// Options for an experiment.
///
/// Unset fields are inherited from the enclosing experiment. `only` is never inherited.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ExperimentOptions {
    /// Skip this experiment and everything inside it.
    pub skip: bool,

    /// Run only this experiment among its siblings.
    pub only: bool,

    /// The timeout for hooks and tests in this experiment.
    pub timeout: Option<Duration>,

    /// Whether tests in this experiment run in the parallel group by default.
    pub parallel: Option<bool>,
}

impl ExperimentOptions {
    /// Options with `only` set.
    pub fn only() -> Self {
        Self {
            only: true,
            ..Self::default()
        }
    }

    /// Options with `skip` set.
    pub fn skip() -> Self {
        Self {
            skip: true,
            ..Self::default()
        }
    }

    pub(crate) fn inherit(self, parent: &ExperimentOptions) -> Self {
        Self {
            skip: self.skip || parent.skip,
            only: self.only,
            timeout: self.timeout.or(parent.timeout),
            parallel: self.parallel.or(parent.parallel),
        }
    }
}

/// Options for a test.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TestOptions {
    /// Don't run this test; record it as skipped.
    pub skip: bool,

    /// Run only this test among its siblings.
    pub only: bool,

    /// The timeout for this test.
    pub timeout: Option<Duration>,

    /// Whether this test runs in the parallel group.
    pub parallel: Option<bool>,

    /// The number of assertions the test is expected to perform.
    pub plan: Option<usize>,

    /// How often a failing test is retried.
    pub retry: Option<Retry>,
}

impl TestOptions {
    /// Options with `only` set.
    pub fn only() -> Self {
        Self {
            only: true,
            ..Self::default()
        }
    }

    /// Options with `skip` set.
    pub fn skip() -> Self {
        Self {
            skip: true,
            ..Self::default()
        }
    }

    pub(crate) fn inherit(self, experiment: &ExperimentOptions) -> Self {
        Self {
            skip: self.skip || experiment.skip,
            timeout: self.timeout.or(experiment.timeout),
            parallel: self.parallel.or(experiment.parallel),
            ..self
        }
    }

    /// Returns the total number of attempts this test gets.
    pub fn total_attempts(&self) -> usize {
        self.retry.map_or(1, |retry| retry.retries() + 1)
    }
}

/// Options for a hook.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct HookOptions {
    /// The timeout for this hook.
    ///
    /// If unset, `before_each` and `after_each` hooks use the timeout of the experiment the test
    /// was declared in, not of the experiment the hook was declared in.
    pub timeout: Option<Duration>,
}

/// The retry setting for a test.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Retry {
    /// `true` retries up to [`Retry::DEFAULT_RETRIES`] times; `false` disables retries.
    Enabled(bool),

    /// Retry up to this many times.
    Count(usize),
}

impl Retry {
    /// The number of retries used for `Retry::Enabled(true)`.
    pub const DEFAULT_RETRIES: usize = 5;

    /// Returns the number of retries after the first attempt.
    pub fn retries(self) -> usize {
        match self {
            Self::Enabled(true) => Self::DEFAULT_RETRIES,
            Self::Enabled(false) => 0,
            Self::Count(count) => count,
        }
    }
}

/// The kind of hook.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum HookKind {
    /// Runs once before the tests of an experiment.
    Before,

    /// Runs once after the tests and child experiments of an experiment.
    After,

    /// Runs before every test in the experiment and its descendants.
    BeforeEach,

    /// Runs after every test in the experiment and its descendants.
    AfterEach,
}

impl HookKind {
    /// Returns the message recorded when this hook fails.
    pub fn failure_message(self) -> String {
        format!("'{self}' action failed")
    }
}

impl fmt::Display for HookKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Before => write!(f, "before"),
            Self::After => write!(f, "after"),
            Self::BeforeEach => write!(f, "before each"),
            Self::AfterEach => write!(f, "after each"),
        }
    }
}
