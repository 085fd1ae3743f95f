// Copyright (c) The labrat Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use serde::{Deserialize, Serialize};
use std::fmt;

/// An enum describing whether a test matches the filters of a run.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", tag = "status")]
pub enum FilterMatch {
    /// This test matches every filter.
    Matches,

    /// This test does not match a filter.
    ///
    /// Mismatched tests are excluded from the notebook entirely: they are not recorded as skipped.
    Mismatch {
        /// The reason the test was excluded.
        reason: MismatchReason,
    },
}

impl FilterMatch {
    /// Returns true if the filters matched this test.
    #[inline]
    pub fn is_match(&self) -> bool {
        matches!(self, FilterMatch::Matches)
    }
}

/// The reason for why a test doesn't match a filter.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
#[non_exhaustive]
pub enum MismatchReason {
    /// The sequence id of the test isn't in the id filter.
    Id,

    /// The full title of the test doesn't match the grep pattern.
    Grep,
}

impl fmt::Display for MismatchReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MismatchReason::Id => write!(f, "does not match the provided id filter"),
            MismatchReason::Grep => write!(f, "does not match the provided grep pattern"),
        }
    }
}
