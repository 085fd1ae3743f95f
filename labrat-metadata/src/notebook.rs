// Copyright (c) The labrat Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::LabratExitCode;
use serde::{Deserialize, Serialize};
use std::{fmt, time::Duration};

/// The aggregate result of one run.
///
/// Created fresh per run by the runner. The caller may attach externally computed leak and
/// coverage data before handing it to a reporter.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct Notebook {
    /// Wall-clock time the run took, serialized in milliseconds.
    #[serde(rename = "ms", with = "duration_millis")]
    pub elapsed: Duration,

    /// Outcomes in the order they were recorded.
    pub tests: Vec<TestOutcome>,

    /// The number of outcomes carrying an error.
    pub failures: usize,

    /// Global leaks found by an external leak detector, if leak detection was enabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leaks: Option<Vec<String>>,

    /// Coverage summary computed by an external instrumenter, if coverage was enabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coverage: Option<CoverageSummary>,
}

impl Notebook {
    /// Attaches the list of leaked globals reported by a leak detector.
    pub fn attach_leaks(&mut self, leaks: Vec<String>) {
        self.leaks = Some(leaks);
    }

    /// Attaches a coverage summary.
    pub fn attach_coverage(&mut self, coverage: CoverageSummary) {
        self.coverage = Some(coverage);
    }

    /// Returns true if any leaks were attached.
    pub fn has_leaks(&self) -> bool {
        self.leaks.as_ref().is_some_and(|leaks| !leaks.is_empty())
    }

    /// Returns the outcomes that carry an error.
    pub fn failed_tests(&self) -> impl Iterator<Item = &TestOutcome> + '_ {
        self.tests.iter().filter(|outcome| outcome.is_failure())
    }

    /// Classifies the run into a process exit code.
    ///
    /// Failures take precedence over leaks, which take precedence over coverage. The coverage
    /// check only applies if both a threshold and a coverage summary are present.
    pub fn exit_code(&self, coverage_threshold: Option<f64>) -> i32 {
        if self.failures > 0 {
            return LabratExitCode::TEST_RUN_FAILED;
        }
        if self.has_leaks() {
            return LabratExitCode::LEAKS_DETECTED;
        }
        if let (Some(threshold), Some(coverage)) = (coverage_threshold, &self.coverage) {
            if coverage.percent < threshold {
                return LabratExitCode::COVERAGE_BELOW_THRESHOLD;
            }
        }
        LabratExitCode::OK
    }

    /// Parses a notebook from JSON, for reporters running in a separate process.
    pub fn parse_json(json: impl AsRef<str>) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json.as_ref())
    }

    /// Serializes the notebook to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// The recorded outcome of one executed test, or a synthetic entry manufactured by the engine.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct TestOutcome {
    /// The sequence id of the test. `None` for synthetic entries that aren't scoped to one test,
    /// such as a failing `before` hook.
    pub id: Option<usize>,

    /// Titles of the enclosing experiments, outermost first.
    pub path: Vec<String>,

    /// The full title: the path and the local title joined by spaces.
    pub title: String,

    /// How long the unit took, serialized in milliseconds.
    #[serde(with = "duration_millis")]
    pub duration: Duration,

    /// The error, if the unit failed.
    #[serde(default)]
    pub err: Option<UnitError>,

    /// True if the test was not executed.
    pub skipped: bool,

    /// True if the test was declared without a function.
    pub todo: bool,

    /// Notes added by the unit while it ran.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
}

impl TestOutcome {
    /// Returns true if this outcome carries an error.
    #[inline]
    pub fn is_failure(&self) -> bool {
        self.err.is_some()
    }
}

/// A normalized failure.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct UnitError {
    /// The kind of failure.
    pub kind: FailureKind,

    /// A human-readable message.
    pub message: String,

    /// Further failures attached to the same unit, such as a failing cleanup or the hook error
    /// behind a synthetic hook failure.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub additional: Vec<UnitError>,
}

impl UnitError {
    /// Creates a new error with no additional failures.
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            additional: Vec::new(),
        }
    }
}

impl fmt::Display for UnitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        for additional in &self.additional {
            write!(f, "\n  caused by: {additional}")?;
        }
        Ok(())
    }
}

/// The kind of failure a unit experienced.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
#[non_exhaustive]
pub enum FailureKind {
    /// An explicit assertion or failure reported by the unit.
    Assertion,

    /// An error value returned by the unit.
    Error,

    /// The unit panicked.
    Panic,

    /// The unit did not complete within its timeout.
    Timeout,

    /// A task spawned by the unit panicked.
    UncaughtError,

    /// A task spawned by the unit returned an error that nobody observed.
    UnhandledRejection,

    /// The number of assertions didn't match the plan.
    Plan,

    /// A function wrapped with `must_call` wasn't called the expected number of times.
    MustCall,

    /// A cleanup registered by the unit failed.
    Cleanup,

    /// The unit signalled completion more than once.
    DuplicateCompletion,

    /// A hook guarding this scope failed.
    Hook,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Assertion => "assertion",
            Self::Error => "error",
            Self::Panic => "panic",
            Self::Timeout => "timeout",
            Self::UncaughtError => "uncaught error",
            Self::UnhandledRejection => "unhandled rejection",
            Self::Plan => "plan",
            Self::MustCall => "must-call",
            Self::Cleanup => "cleanup",
            Self::DuplicateCompletion => "duplicate completion",
            Self::Hook => "hook",
        };
        f.write_str(s)
    }
}

/// Coverage summary computed by an external instrumenter.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct CoverageSummary {
    /// Percentage of covered lines, between 0 and 100.
    pub percent: f64,

    /// Source lines of code considered.
    pub sloc: usize,

    /// Lines that were hit.
    pub hits: usize,

    /// Lines that were missed.
    pub misses: usize,
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub(super) fn serialize<S: Serializer>(
        duration: &Duration,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        serializer.serialize_u64(millis)
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
