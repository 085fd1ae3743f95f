// Copyright (c) The labrat Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::fixtures::*;
use color_eyre::eyre::Result;
use labrat_metadata::FailureKind;
use labrat_runner::{
    config::RunSettings,
    errors::TestError,
    reporter::TestEventKind,
    script::{Retry, Script, TestOptions},
};
use maplit::hashset;
use pretty_assertions::assert_eq;
use std::{
    cell::Cell,
    collections::HashSet,
    future::ready,
    rc::Rc,
    time::Duration,
};

#[test]
fn hooks_run_in_order_with_inheritance() -> Result<()> {
    let journal = Journal::default();
    let mut script = Script::new();
    script.before_each(journal.unit("root before each"));
    script.after_each(journal.unit("root after each"));
    script.experiment("outer", |script| {
        script.before(journal.unit("outer before"));
        script.after(journal.unit("outer after"));
        script.before_each(journal.unit("outer before each"));
        script.after_each(journal.unit("outer after each"));
        script.test("t1", journal.unit("t1"))?;
        script.experiment("inner", |script| {
            script.before(journal.unit("inner before"));
            script.before_each(journal.unit("inner before each"));
            script.after_each(journal.unit("inner after each"));
            script.test("t2", journal.unit("t2"))
        })
    })?;

    let notebook = run(script)?;
    assert_eq!(
        journal.entries(),
        [
            "outer before",
            "root before each",
            "outer before each",
            "t1",
            "outer after each",
            "root after each",
            "inner before",
            "root before each",
            "outer before each",
            "inner before each",
            "t2",
            "inner after each",
            "outer after each",
            "root after each",
            "outer after",
        ]
    );
    assert_eq!(titles(&notebook), ["outer t1", "outer inner t2"]);
    assert_eq!(notebook.failures, 0);
    Ok(())
}

#[test]
fn failing_before_skips_experiment() -> Result<()> {
    let journal = Journal::default();
    let mut script = Script::new();
    script.experiment("broken", |script| {
        script.before(journal.failing_unit("broken before"));
        script.after(journal.unit("broken after"));
        script.test("t", journal.unit("broken t"))?;
        script.experiment("child", |script| {
            script.test("t", journal.unit("broken child t"))
        })
    })?;
    script.experiment("sibling", |script| {
        script.test("t", journal.unit("sibling t"))
    })?;

    let notebook = run(script)?;
    assert_eq!(journal.entries(), ["broken before", "sibling t"]);
    assert_eq!(titles(&notebook), ["broken", "sibling t"]);
    assert_eq!(notebook.failures, 1);

    let failure = outcome(&notebook, "broken")?;
    assert_eq!(failure.id, None, "hook failures aren't tied to a test");
    let err = failure.err.as_ref().expect("hook failure recorded");
    assert_eq!(err.kind, FailureKind::Hook);
    assert_eq!(err.message, "'before' action failed");
    assert_eq!(err.additional.len(), 1);
    assert_eq!(err.additional[0].message, "broken before failed");
    Ok(())
}

#[test]
fn failing_before_each_is_scoped_to_one_test() -> Result<()> {
    let journal = Journal::default();
    let calls = Rc::new(Cell::new(0_usize));
    let mut script = Script::new();
    script.experiment("e", |script| {
        let calls = calls.clone();
        script.before_each(move |_| {
            let call = calls.get();
            calls.set(call + 1);
            ready(if call == 0 {
                Err(TestError::msg("first setup failed"))
            } else {
                Ok(())
            })
        });
        script.after_each(journal.unit("after each"));
        script.test("first", journal.unit("first"))?;
        script.test("second", journal.unit("second"))
    })?;

    let notebook = run(script)?;
    assert_eq!(calls.get(), 2);
    assert_eq!(
        journal.entries(),
        ["second", "after each"],
        "the failed iteration runs neither the test nor its after each hook"
    );
    assert_eq!(titles(&notebook), ["e first", "e second"]);

    let first = outcome(&notebook, "e first")?;
    assert_eq!(first.id, Some(1));
    let err = first.err.as_ref().expect("before each failure recorded");
    assert_eq!(err.kind, FailureKind::Hook);
    assert_eq!(err.message, "'before each' action failed");
    assert!(outcome(&notebook, "e second")?.err.is_none());
    assert_eq!(notebook.failures, 1);
    Ok(())
}

#[test]
fn failing_after_hooks_recorded() -> Result<()> {
    let journal = Journal::default();
    let mut script = Script::new();
    script.experiment("e", |script| {
        script.after_each(journal.failing_unit("after each"));
        script.after(journal.failing_unit("after"));
        script.test("t", journal.unit("t"))
    })?;

    let notebook = run(script)?;
    assert_eq!(journal.entries(), ["t", "after each", "after"]);
    assert_eq!(titles(&notebook), ["e t", "e t", "e"]);

    let [test, after_each, after] = notebook.tests.as_slice() else {
        panic!("expected three entries, found {:?}", notebook.tests);
    };
    assert!(test.err.is_none(), "the test itself passed");
    assert_eq!(
        after_each.err.as_ref().map(|err| err.message.as_str()),
        Some("'after each' action failed")
    );
    assert_eq!(
        after.err.as_ref().map(|err| err.message.as_str()),
        Some("'after' action failed")
    );
    assert_eq!(notebook.failures, 2);
    Ok(())
}

#[test]
fn serial_group_finishes_before_parallel_group_starts() -> Result<()> {
    let journal = Journal::default();
    let mut script = Script::new();
    script.test("implicitly parallel", journal.unit("parallel"))?;
    let serial_journal = journal.clone();
    script.test_with(
        "explicitly serial",
        TestOptions {
            parallel: Some(false),
            ..Default::default()
        },
        move |_| {
            let journal = serial_journal.clone();
            async move {
                journal.log("serial start");
                tokio::time::sleep(Duration::from_millis(50)).await;
                journal.log("serial end");
                Ok(())
            }
        },
    )?;

    let settings = RunSettings {
        parallel: true,
        ..Default::default()
    };
    let notebook = run_with(script, &settings)?;
    assert_eq!(
        journal.entries(),
        ["serial start", "serial end", "parallel"]
    );
    assert_eq!(notebook.failures, 0);
    Ok(())
}

#[test]
fn parallel_tests_complete_by_elapsed_time() -> Result<()> {
    let journal = Journal::default();
    let parallel = TestOptions {
        parallel: Some(true),
        ..Default::default()
    };
    let mut script = Script::new();
    let slow_journal = journal.clone();
    script.test_with("slow", parallel.clone(), move |_| {
        let journal = slow_journal.clone();
        async move {
            journal.log("slow started");
            tokio::time::sleep(Duration::from_millis(30)).await;
            journal.log("slow finished");
            Ok(())
        }
    })?;
    script.test_with("sync", parallel, journal.unit("sync finished"))?;

    let notebook = run(script)?;
    assert_eq!(
        journal.entries(),
        ["slow started", "sync finished", "slow finished"],
        "the synchronous test doesn't wait for the slow one"
    );
    assert_eq!(
        titles(&notebook),
        ["sync", "slow"],
        "outcomes are recorded in completion order"
    );
    let ids: HashSet<_> = notebook.tests.iter().filter_map(|test| test.id).collect();
    assert_eq!(ids, hashset! {1, 2});
    Ok(())
}

#[test]
fn retries_until_passing() -> Result<()> {
    let attempts = Rc::new(Cell::new(0_usize));
    let mut script = Script::new();
    let counter = attempts.clone();
    script.test_with(
        "flaky",
        TestOptions {
            retry: Some(Retry::Count(3)),
            ..Default::default()
        },
        move |_| {
            let attempt = counter.get() + 1;
            counter.set(attempt);
            ready(if attempt < 3 {
                Err(TestError::msg(format!("attempt {attempt} failed")))
            } else {
                Ok(())
            })
        },
    )?;
    script.test_with(
        "hopeless",
        TestOptions {
            retry: Some(Retry::Count(1)),
            ..Default::default()
        },
        |_| ready(Err(TestError::msg("always fails"))),
    )?;

    let notebook = run(script)?;
    assert_eq!(attempts.get(), 3);

    let flaky = outcome(&notebook, "flaky")?;
    assert!(flaky.err.is_none());
    assert_eq!(flaky.notes, ["retried 2 times"]);

    let hopeless = outcome(&notebook, "hopeless")?;
    assert_eq!(
        hopeless.err.as_ref().map(|err| err.message.as_str()),
        Some("always fails")
    );
    assert_eq!(hopeless.notes, ["retried 1 time"]);
    assert_eq!(notebook.failures, 1);
    Ok(())
}

#[test]
fn bail_stops_the_run() -> Result<()> {
    let journal = Journal::default();
    let mut script = Script::new();
    script.experiment("e", |script| {
        script.after(journal.unit("after"));
        script.test("first", journal.failing_unit("first"))?;
        script.test("second", journal.unit("second"))
    })?;
    script.experiment("later", |script| {
        script.before(journal.unit("later before"));
        script.test("third", journal.unit("third"))
    })?;

    let settings = RunSettings {
        bail: Some(1),
        ..Default::default()
    };
    let mut stopped_early = None;
    let notebook = run_with_events(script, &settings, |event| {
        if let TestEventKind::RunFinished {
            stopped_early: stopped,
            ..
        } = event.kind
        {
            stopped_early = Some(stopped);
        }
    })?;

    assert_eq!(journal.entries(), ["first"]);
    assert_eq!(notebook.failures, 1);
    assert!(outcome(&notebook, "later third")?.skipped);
    assert!(outcome(&notebook, "e second")?.skipped);
    assert_eq!(stopped_early, Some(true));
    Ok(())
}

#[test]
fn context_inherited_by_child_experiments() -> Result<()> {
    let mut script = Script::new();
    script.before(|flags| {
        flags.context().insert("db", "connected".to_owned());
        ready(Ok(()))
    });
    script.experiment("child", |script| {
        script.before(|flags| {
            flags.context().insert("child", 1_u32);
            ready(Ok(()))
        });
        script.test("sees both", |flags| async move {
            let db = flags.context().get::<String>("db");
            flags.assert(db.as_deref().map(String::as_str) == Some("connected"), "db from root")?;
            flags.assert(flags.context().contains_key("child"), "own value")
        })
    })?;
    script.experiment("sibling", |script| {
        script.test("sees root only", |flags| async move {
            flags.assert(flags.context().contains_key("db"), "db from root")?;
            flags.assert(!flags.context().contains_key("child"), "no sibling values")
        })
    })?;

    let notebook = run(script)?;
    assert_eq!(notebook.failures, 0, "{:?}", notebook.tests);
    Ok(())
}

#[test]
fn environment_set_before_run() -> Result<()> {
    let mut script = Script::new();
    script.test("reads environment", |flags| async move {
        let env = std::env::var("LABRAT_ENV")?;
        flags.assert(env == "staging", format!("unexpected environment `{env}`"))
    })?;

    let settings = RunSettings {
        environment: "staging".to_owned(),
        ..Default::default()
    };
    let notebook = run_with(script, &settings)?;
    assert_eq!(notebook.failures, 0, "{:?}", notebook.tests);
    Ok(())
}
