// Copyright (c) The labrat Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

/// Documented exit codes for labrat runs.
///
/// A run may fail for a variety of reasons. This structure documents the exit codes that may occur
/// in case of expected failures.
///
/// Unknown/unexpected failures will always result in exit code 1.
pub enum LabratExitCode {}

impl LabratExitCode {
    /// No errors occurred and the run completed normally.
    pub const OK: i32 = 0;

    /// One or more tests, hooks or engine checks failed.
    pub const TEST_RUN_FAILED: i32 = 100;

    /// The external leak detector attached leaks to the notebook.
    pub const LEAKS_DETECTED: i32 = 101;

    /// The attached coverage summary is below the requested threshold.
    pub const COVERAGE_BELOW_THRESHOLD: i32 = 102;

    /// Declaring the experiment tree failed, for example because of conflicting `only` flags.
    pub const DECLARATION_FAILED: i32 = 104;

    /// A user issue happened while setting up a run: bad settings, filters or config files.
    pub const SETUP_ERROR: i32 = 96;
}
