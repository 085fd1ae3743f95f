// Copyright (c) The labrat Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Run settings.
//!
//! Settings are normally produced by a command-line layer. They can also be loaded from a TOML
//! file layered over the defaults shipped with labrat, with `LABRAT_RUN_*` environment variables
//! taking precedence over both.

use crate::{
    errors::{ConfigParseError, ConfigParseErrorKind},
    test_filter::IdFilter,
};
use camino::Utf8Path;
use config::{Config, ConfigBuilder, Environment, File, FileFormat, builder::DefaultState};
use serde::Deserialize;
use std::time::Duration;

/// The environment variable set to [`RunSettings::environment`] before a run starts.
pub const ENVIRONMENT_VAR: &str = "LABRAT_ENV";

/// Settings for a single run.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct RunSettings {
    /// The value [`ENVIRONMENT_VAR`] is set to before the run starts.
    pub environment: String,

    /// A regular expression matched against full test titles.
    pub grep: Option<String>,

    /// Sequence ids to include.
    pub id: Option<IdFilter>,

    /// Record every included test as skipped without invoking any hook or test.
    pub dry: bool,

    /// The default for tests that don't set `parallel` themselves.
    pub parallel: bool,

    /// The default timeout for tests and hooks. Zero disables timeouts.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// Stop executing tests once this many failures have been recorded.
    pub bail: Option<usize>,

    /// Whether an external leak detector will attach leaks to the notebook.
    pub leaks: bool,

    /// Whether an external instrumenter will attach coverage to the notebook.
    pub coverage: bool,

    /// The minimum coverage percentage for the run to be considered successful.
    pub coverage_threshold: Option<f64>,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            environment: "test".to_owned(),
            grep: None,
            id: None,
            dry: false,
            parallel: false,
            timeout: RunSettings::DEFAULT_TIMEOUT,
            bail: None,
            leaks: true,
            coverage: false,
            coverage_threshold: None,
        }
    }
}

impl RunSettings {
    /// The default timeout for tests and hooks.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

    /// The settings shipped with labrat, in TOML form.
    pub const DEFAULT_CONFIG: &'static str = include_str!("../default-config.toml");

    /// Loads settings from the defaults, an optional config file and the environment.
    pub fn from_sources(config_file: Option<&Utf8Path>) -> Result<Self, ConfigParseError> {
        let mut builder = Self::make_default_config();
        if let Some(config_file) = config_file {
            builder = builder.add_source(File::new(config_file.as_str(), FileFormat::Toml));
        }
        builder = builder.add_source(Self::environment_source());

        Self::build_and_deserialize_config(&builder)
            .map_err(|kind| ConfigParseError::new(config_file.map(|path| path.to_owned()), kind))
    }

    /// Loads settings from a TOML string layered over the defaults. Environment variables are not
    /// consulted.
    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigParseError> {
        let builder =
            Self::make_default_config().add_source(File::from_str(toml, FileFormat::Toml));
        Self::build_and_deserialize_config(&builder)
            .map_err(|kind| ConfigParseError::new(None, kind))
    }

    /// Returns the timeout to use, or `None` if timeouts are disabled.
    pub fn effective_timeout(&self) -> Option<Duration> {
        (!self.timeout.is_zero()).then_some(self.timeout)
    }

    fn make_default_config() -> ConfigBuilder<DefaultState> {
        Config::builder().add_source(File::from_str(Self::DEFAULT_CONFIG, FileFormat::Toml))
    }

    fn environment_source() -> Environment {
        // For example, LABRAT_RUN_COVERAGE_THRESHOLD=90.
        Environment::with_prefix("LABRAT_RUN")
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true)
            .ignore_empty(true)
            .keep_prefix(false)
    }

    fn build_and_deserialize_config(
        builder: &ConfigBuilder<DefaultState>,
    ) -> Result<Self, ConfigParseErrorKind> {
        let config = builder
            .build_cloned()
            .map_err(ConfigParseErrorKind::BuildError)?;

        serde_path_to_error::deserialize(config).map_err(ConfigParseErrorKind::DeserializeError)
    }
}
