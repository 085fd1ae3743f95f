// Copyright (c) The labrat Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::fixtures::*;
use color_eyre::eyre::Result;
use indoc::indoc;
use labrat_runner::{
    config::RunSettings,
    reporter::TestEventKind,
    script::Script,
};
use pretty_assertions::assert_eq;
use std::time::Duration;
use test_case::test_case;

/// Four tests with ids 1 to 4. Even ids fail.
fn numbered(journal: &Journal) -> Result<Script> {
    let mut script = Script::new();
    script.test("one", journal.unit("one"))?;
    script.experiment("group", |script| {
        script.before(journal.unit("group before"));
        script.test("two", journal.failing_unit("two"))?;
        script.test("three", journal.unit("three"))
    })?;
    script.experiment("tail", |script| {
        script.test("four", journal.failing_unit("four"))
    })?;
    Ok(script)
}

#[test_case(
    indoc! {r#"
        id = "1,3"
    "#},
    &["one", "group three"],
    0;
    "odd ids"
)]
#[test_case(
    indoc! {r#"
        id = [2, 4]
    "#},
    &["group two", "tail four"],
    2;
    "even ids"
)]
#[test_case(
    indoc! {r#"
        grep = "^group"
    "#},
    &["group two", "group three"],
    1;
    "grep"
)]
#[test_case(
    indoc! {r#"
        id = "3-4"
        grep = "^group"
    "#},
    &["group three"],
    0;
    "id and grep"
)]
fn filtered_runs(config: &str, expected: &[&str], failures: usize) -> Result<()> {
    let journal = Journal::default();
    let settings = RunSettings::from_toml_str(config)?;
    let notebook = run_with(numbered(&journal)?, &settings)?;

    assert_eq!(titles(&notebook), expected, "excluded tests aren't recorded");
    assert_eq!(notebook.failures, failures);
    Ok(())
}

#[test]
fn hooks_of_excluded_experiments_not_run() -> Result<()> {
    let journal = Journal::default();
    let settings = RunSettings::from_toml_str(indoc! {r#"
        id = [1, 4]
    "#})?;
    let notebook = run_with(numbered(&journal)?, &settings)?;

    assert_eq!(journal.entries(), ["one", "four"]);
    assert_eq!(titles(&notebook), ["one", "tail four"]);
    Ok(())
}

#[test]
fn ids_are_assigned_regardless_of_filter() -> Result<()> {
    let journal = Journal::default();
    let settings = RunSettings::from_toml_str(indoc! {r#"
        grep = "three"
    "#})?;
    let notebook = run_with(numbered(&journal)?, &settings)?;
    assert_eq!(outcome(&notebook, "group three")?.id, Some(3));
    Ok(())
}

#[test]
fn dry_run() -> Result<()> {
    let journal = Journal::default();
    let mut script = numbered(&journal)?;
    script.before_each(journal.unit("before each"));
    // Root tests are numbered before those of child experiments, so this gets id 2.
    script.todo("five")?;

    let settings = RunSettings::from_toml_str(indoc! {r#"
        dry = true
        id = "2-5"
    "#})?;
    let mut dry = None;
    let notebook = run_with_events(script, &settings, |event| {
        if let TestEventKind::RunStarted {
            test_count,
            included_count,
            dry: is_dry,
        } = event.kind
        {
            assert_eq!((test_count, included_count), (5, 4));
            dry = Some(is_dry);
        }
    })?;

    assert_eq!(dry, Some(true));
    assert!(journal.entries().is_empty(), "no hook or test runs");
    assert_eq!(
        titles(&notebook),
        ["five", "group two", "group three", "tail four"]
    );
    for test in &notebook.tests {
        assert!(test.skipped, "{} is skipped", test.title);
        assert_eq!(test.duration, Duration::ZERO);
        assert!(test.err.is_none());
    }
    assert!(outcome(&notebook, "five")?.todo);
    assert_eq!(notebook.failures, 0);
    Ok(())
}

#[test]
fn invalid_grep_is_an_error() {
    let settings = RunSettings {
        grep: Some("(".to_owned()),
        ..Default::default()
    };
    let err = run_with(Script::new(), &settings).expect_err("invalid regex is rejected");
    assert!(
        err.to_string().contains("grep"),
        "error mentions the grep pattern: {err}"
    );
}
