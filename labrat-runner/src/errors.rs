// Copyright (c) The labrat Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced by labrat.

use crate::helpers::{format_duration_ms, panic_payload_message};
use camino::Utf8PathBuf;
use config::ConfigError;
use labrat_metadata::{FailureKind, UnitError};
use std::{any::Any, borrow::Cow, fmt, time::Duration};
use swrite::{SWrite, swrite};
use thiserror::Error;

/// An error that occurred while declaring the experiment tree.
///
/// Declaration errors are fatal: they are returned synchronously while the tree is being built,
/// before any run starts.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum DeclarationError {
    /// Two sibling experiments were marked `only`.
    #[error(
        "cannot set multiple experiments as only at the same level: `{title}` conflicts with `{existing}`"
    )]
    MultipleOnlyExperiments {
        /// The experiment that was already marked `only`.
        existing: String,

        /// The experiment being declared.
        title: String,
    },

    /// Two sibling tests were marked `only`.
    #[error(
        "cannot set multiple tests as only at the same level: `{title}` conflicts with `{existing}`"
    )]
    MultipleOnlyTests {
        /// The test that was already marked `only`.
        existing: String,

        /// The test being declared.
        title: String,
    },
}

/// An error that occurs while parsing an [`IdFilter`](crate::test_filter::IdFilter).
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("invalid id filter `{input}`: {message}")]
pub struct IdFilterParseError {
    input: String,
    message: Cow<'static, str>,
}

impl IdFilterParseError {
    pub(crate) fn new(input: impl Into<String>, message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            input: input.into(),
            message: message.into(),
        }
    }
}

/// An error that occurs while building a [`TestFilter`](crate::test_filter::TestFilter).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TestFilterBuildError {
    /// The grep pattern is not a valid regular expression.
    #[error("grep pattern `{pattern}` is not a valid regular expression")]
    Grep {
        /// The pattern that failed to compile.
        pattern: String,

        /// The underlying error.
        #[source]
        err: regex::Error,
    },

    /// The id filter could not be parsed.
    #[error(transparent)]
    Id(#[from] IdFilterParseError),
}

/// An error that occurred while loading run settings.
#[derive(Debug, Error)]
#[error("failed to parse labrat settings{}", DisplayConfigFile(.config_file.as_ref()))]
#[non_exhaustive]
pub struct ConfigParseError {
    config_file: Option<Utf8PathBuf>,
    #[source]
    kind: ConfigParseErrorKind,
}

impl ConfigParseError {
    pub(crate) fn new(config_file: Option<Utf8PathBuf>, kind: ConfigParseErrorKind) -> Self {
        Self { config_file, kind }
    }

    /// Returns the config file that failed to parse, if any.
    pub fn config_file(&self) -> Option<&Utf8PathBuf> {
        self.config_file.as_ref()
    }

    /// Returns the kind of error.
    pub fn kind(&self) -> &ConfigParseErrorKind {
        &self.kind
    }
}

struct DisplayConfigFile<'a>(Option<&'a Utf8PathBuf>);

impl fmt::Display for DisplayConfigFile<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(config_file) => write!(f, " at `{config_file}`"),
            None => Ok(()),
        }
    }
}

/// The kind of error that occurred while loading run settings.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigParseErrorKind {
    /// Building the layered configuration failed.
    #[error("error building config")]
    BuildError(#[source] ConfigError),

    /// Deserializing the configuration failed.
    #[error("error deserializing config")]
    DeserializeError(#[source] serde_path_to_error::Error<ConfigError>),
}

/// An error that occurred while building a [`TestRunner`](crate::runner::TestRunner).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TestRunnerBuildError {
    /// An error occurred while creating the execution runtime.
    #[error("error creating Tokio runtime")]
    TokioRuntimeCreate(#[source] std::io::Error),

    /// An error occurred while starting the timer thread.
    #[error("error starting timer thread")]
    TimerThreadSpawn(#[source] std::io::Error),
}

/// An error that prevented a run from producing a notebook.
///
/// Failures in hooks and tests never produce this error: they are recorded in the notebook
/// instead.
#[derive(Debug, Error)]
pub enum TestRunnerExecuteError<E> {
    /// The reporter callback returned an error, so the run was cancelled.
    #[error("error reporting test event")]
    Report(#[source] E),

    /// The engine itself panicked. This is a bug in labrat.
    #[error("the labrat engine panicked: {message}")]
    EnginePanic {
        /// The panic message.
        message: String,
    },
}

/// The failure value produced by a hook, test or cleanup.
///
/// Any [`std::error::Error`] converts into a `TestError`, so `?` can be used in unit bodies. As a
/// consequence, `TestError` itself does not implement `std::error::Error`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TestError {
    kind: FailureKind,
    message: String,
}

impl TestError {
    /// Creates an error with an arbitrary message.
    pub fn msg(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Error, message)
    }

    /// Creates an assertion failure.
    pub fn assertion(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Assertion, message)
    }

    pub(crate) fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        Self::new(FailureKind::Panic, panic_payload_message(&*payload))
    }

    pub(crate) fn timeout(timeout: Duration, title: &str) -> Self {
        Self::new(
            FailureKind::Timeout,
            format!("Timed out ({}) - {title}", format_duration_ms(timeout)),
        )
    }

    pub(crate) fn duplicate_completion(title: &str) -> Self {
        Self::new(
            FailureKind::DuplicateCompletion,
            format!("multiple callbacks - {title}"),
        )
    }

    pub(crate) fn with_kind(mut self, kind: FailureKind) -> Self {
        self.kind = kind;
        self
    }

    /// Returns the kind of failure.
    pub fn kind(&self) -> FailureKind {
        self.kind
    }

    /// Returns the failure message.
    pub fn message(&self) -> &str {
        &self.message
    }

    pub(crate) fn into_unit_error(self) -> UnitError {
        UnitError::new(self.kind, self.message)
    }
}

impl fmt::Display for TestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl<E: std::error::Error> From<E> for TestError {
    fn from(err: E) -> Self {
        let mut message = err.to_string();
        let mut source = err.source();
        while let Some(err) = source {
            swrite!(message, ": {err}");
            source = err.source();
        }
        Self::new(FailureKind::Error, message)
    }
}
