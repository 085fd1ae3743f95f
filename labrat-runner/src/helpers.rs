// Copyright (c) The labrat Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! General support code for labrat-runner.

use std::{any::Any, time::Duration};

/// Utilities for pluralizing various words based on count or plurality.
pub mod plural {
    /// Returns "test" if `count` is 1, otherwise "tests".
    pub fn tests_str(count: usize) -> &'static str {
        if count == 1 { "test" } else { "tests" }
    }

    /// Returns "time" if `count` is 1, otherwise "times".
    pub fn times_str(count: usize) -> &'static str {
        if count == 1 { "time" } else { "times" }
    }

    /// Returns "assertion" if `count` is 1, otherwise "assertions".
    pub fn assertions_str(count: usize) -> &'static str {
        if count == 1 { "assertion" } else { "assertions" }
    }
}

/// Extracts a readable message from a panic payload.
pub(crate) fn panic_payload_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panicked with a non-string payload".to_owned()
    }
}

pub(crate) fn format_duration_ms(duration: Duration) -> String {
    format!("{}ms", duration.as_millis())
}

/// Joins non-empty title segments with single spaces.
pub(crate) fn join_title<'a>(segments: impl IntoIterator<Item = &'a str>) -> String {
    itertools::join(segments.into_iter().filter(|s| !s.is_empty()), " ")
}
