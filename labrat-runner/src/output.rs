// Copyright (c) The labrat Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Logging setup.
//!
//! labrat logs through [`tracing`]. Embedders that already install a subscriber don't need this
//! module; others can call [`init_logging`] once at startup.

use std::sync::Once;
use tracing::{level_filters::LevelFilter, warn};
use tracing_subscriber::{Layer, filter::Targets, layer::SubscriberExt, util::SubscriberInitExt};

/// The environment variable used to configure log levels, in `tracing_subscriber`'s `Targets`
/// syntax. For example, `LABRAT_LOG=labrat_runner=debug`.
pub const LOG_ENV_VAR: &str = "LABRAT_LOG";

static INIT_LOGGER: Once = Once::new();

/// Installs a global subscriber that writes to standard error.
///
/// The log level is read from [`LOG_ENV_VAR`] and defaults to `info`. Calling this more than once
/// has no further effect. If another global subscriber is already installed, that subscriber is
/// kept.
pub fn init_logging() {
    INIT_LOGGER.call_once(|| {
        let level_str = std::env::var(LOG_ENV_VAR).unwrap_or_default();
        let (targets, parse_error) = parse_targets(&level_str);

        let layer = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_filter(targets);

        // try_init fails if a subscriber was installed by someone else: keep theirs.
        if tracing_subscriber::registry().with(layer).try_init().is_ok() {
            if let Some(error) = parse_error {
                warn!("ignoring invalid {LOG_ENV_VAR} value `{level_str}`: {error}");
            }
        }
    });
}

fn parse_targets(level_str: &str) -> (Targets, Option<String>) {
    let default = || Targets::new().with_default(LevelFilter::INFO);
    // An empty string means the standard level filter.
    if level_str.is_empty() {
        return (default(), None);
    }
    match level_str.parse::<Targets>() {
        Ok(targets) => (targets, None),
        Err(error) => (default(), Some(error.to_string())),
    }
}
