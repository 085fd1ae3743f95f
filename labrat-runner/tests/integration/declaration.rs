// Copyright (c) The labrat Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::fixtures::*;
use color_eyre::eyre::Result;
use labrat_runner::{
    errors::DeclarationError,
    script::{ExperimentOptions, Script, TestOptions},
};
use pretty_assertions::assert_eq;
use test_case::test_case;

#[test_case(0; "top level")]
#[test_case(1; "nested once")]
#[test_case(3; "nested deeply")]
fn multiple_only_tests_rejected(depth: usize) {
    fn declare(script: &mut Script, depth: usize) -> Result<(), DeclarationError> {
        if depth == 0 {
            script.test_only("first", |_| async { Ok(()) })?;
            script.test("plain", |_| async { Ok(()) })?;
            script.test_only("second", |_| async { Ok(()) })
        } else {
            script.experiment(format!("level {depth}"), |script| {
                declare(script, depth - 1)
            })
        }
    }

    let mut script = Script::new();
    let err = declare(&mut script, depth).expect_err("second only test is rejected");
    assert!(
        matches!(err, DeclarationError::MultipleOnlyTests { .. }),
        "unexpected error: {err}"
    );
}

#[test_case(0; "top level")]
#[test_case(2; "nested")]
fn multiple_only_experiments_rejected(depth: usize) {
    fn declare(script: &mut Script, depth: usize) -> Result<(), DeclarationError> {
        if depth == 0 {
            script.experiment_only("first", |_| Ok(()))?;
            script.experiment_only("second", |_| Ok(()))
        } else {
            script.experiment(format!("level {depth}"), |script| {
                declare(script, depth - 1)
            })
        }
    }

    let mut script = Script::new();
    let err = declare(&mut script, depth).expect_err("second only experiment is rejected");
    assert!(
        matches!(err, DeclarationError::MultipleOnlyExperiments { .. }),
        "unexpected error: {err}"
    );
}

#[test]
fn only_test_among_siblings() -> Result<()> {
    let journal = Journal::default();
    let mut script = Script::new();
    script.experiment("e", |script| {
        script.test("a", journal.unit("a"))?;
        script.test("b", journal.unit("b"))?;
        script.test_only("c", journal.unit("c"))?;
        script.test("d", journal.unit("d"))
    })?;

    let notebook = run(script)?;
    assert_eq!(journal.entries(), ["c"]);
    assert_eq!(titles(&notebook), ["e a", "e b", "e c", "e d"]);
    for title in ["e a", "e b", "e d"] {
        assert!(outcome(&notebook, title)?.skipped, "{title} is skipped");
    }
    assert!(!outcome(&notebook, "e c")?.skipped);
    assert_eq!(notebook.failures, 0);
    Ok(())
}

#[test]
fn only_experiment_skips_sibling_experiments() -> Result<()> {
    let journal = Journal::default();
    let mut script = Script::new();
    script.experiment("before", |script| {
        script.before(journal.unit("before: before hook"));
        script.test("t", journal.unit("before: t"))
    })?;
    script.experiment_only("chosen", |script| {
        script.test("t1", journal.unit("chosen: t1"))?;
        script.test("t2", journal.unit("chosen: t2"))
    })?;
    script.experiment("after", |script| script.test("t", journal.unit("after: t")))?;

    let notebook = run(script)?;
    assert_eq!(journal.entries(), ["chosen: t1", "chosen: t2"]);
    assert!(outcome(&notebook, "before t")?.skipped);
    assert!(outcome(&notebook, "after t")?.skipped);
    Ok(())
}

#[test]
fn skip_is_sticky() -> Result<()> {
    let journal = Journal::default();
    let mut script = Script::new();
    script.experiment_skip("outer", |script| {
        script.before(journal.unit("outer before"));
        script.experiment_with(
            "inner",
            ExperimentOptions {
                skip: false,
                ..Default::default()
            },
            |script| {
                script.before_each(journal.unit("inner before each"));
                script.test("t", journal.unit("inner t"))
            },
        )
    })?;

    let notebook = run(script)?;
    assert!(journal.entries().is_empty(), "nothing under a skipped experiment runs");
    let t = outcome(&notebook, "outer inner t")?;
    assert!(t.skipped);
    assert!(t.err.is_none());
    Ok(())
}

#[test]
fn skip_and_todo_recorded() -> Result<()> {
    let journal = Journal::default();
    let mut script = Script::new();
    script.test_skip("skipped", journal.unit("skipped"))?;
    script.todo("later")?;
    script.test_with(
        "skipped via options",
        TestOptions {
            skip: true,
            ..Default::default()
        },
        journal.unit("skipped via options"),
    )?;

    let notebook = run(script)?;
    assert!(journal.entries().is_empty());

    let skipped = outcome(&notebook, "skipped")?;
    assert!(skipped.skipped && !skipped.todo);
    let todo = outcome(&notebook, "later")?;
    assert!(todo.skipped && todo.todo);
    assert!(outcome(&notebook, "skipped via options")?.skipped);
    assert_eq!(notebook.failures, 0);
    Ok(())
}

#[test]
fn titles_and_paths() -> Result<()> {
    let mut script = Script::new();
    script.test("root test", |_| async { Ok(()) })?;
    script.experiment("math", |script| {
        script.experiment("integers", |script| {
            script.test("add", |flags| async move {
                flags.assert(flags.title() == "math integers add", "title is joined")
            })
        })
    })?;

    let notebook = run(script)?;
    assert_eq!(notebook.failures, 0, "{:?}", notebook.tests);
    let add = outcome(&notebook, "math integers add")?;
    assert_eq!(add.path, ["math", "integers"]);
    assert_eq!(add.id, Some(2));
    assert!(outcome(&notebook, "root test")?.path.is_empty());
    Ok(())
}
