// Copyright (c) The labrat Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{
    Caught, Context, FaultBoundary, FaultSink, UnitInvocation, UnitReport, clear_current_unit,
};
use crate::{
    config::{ENVIRONMENT_VAR, RunSettings},
    errors::{TestError, TestRunnerBuildError, TestRunnerExecuteError},
    helpers::{join_title, panic_payload_message, plural},
    plan::TestPlan,
    reporter::{NotebookAggregator, TestEvent, TestEventKind},
    script::{ExperimentId, Hook, HookKind, TestNode, UnitFn},
    time::{StopwatchStart, Timers, stopwatch},
};
use chrono::Local;
use futures::{
    future::{FutureExt, LocalBoxFuture},
    stream::{FuturesUnordered, StreamExt},
};
use labrat_metadata::{FailureKind, Notebook, TestOutcome, UnitError};
use std::{
    cell::RefCell, convert::Infallible, fmt, panic::AssertUnwindSafe, time::Duration,
};
use tokio::{runtime::Runtime, task::LocalSet};
use tracing::{debug, instrument, warn};

/// Test runner options.
#[derive(Debug, Default)]
pub struct TestRunnerBuilder {
    timers: Option<Timers>,
}

impl TestRunnerBuilder {
    /// Sets the timers used to enforce timeouts.
    ///
    /// By default, new timers are captured when the runner is built.
    pub fn set_timers(&mut self, timers: Timers) -> &mut Self {
        self.timers = Some(timers);
        self
    }

    /// Creates a new test runner.
    pub fn build<'a>(
        self,
        plan: &'a TestPlan,
        settings: &RunSettings,
    ) -> Result<TestRunner<'a>, TestRunnerBuildError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .thread_name("labrat-runner")
            .build()
            .map_err(TestRunnerBuildError::TokioRuntimeCreate)?;
        let timers = match self.timers {
            Some(timers) => timers,
            None => Timers::capture()?,
        };

        Ok(TestRunner {
            plan,
            settings: settings.clone(),
            runtime,
            timers,
        })
    }
}

/// Context for running tests.
///
/// Created using [`TestRunnerBuilder::build`].
#[derive(Debug)]
pub struct TestRunner<'a> {
    plan: &'a TestPlan,
    settings: RunSettings,
    runtime: Runtime,
    timers: Timers,
}

impl TestRunner<'_> {
    /// Executes the planned tests and returns the notebook.
    ///
    /// The callback is called with every event. Failures of hooks and tests are recorded in the
    /// notebook; this only returns an error if the engine itself panicked.
    pub fn execute<F>(self, mut callback: F) -> Result<Notebook, TestRunnerExecuteError<Infallible>>
    where
        F: FnMut(TestEvent),
    {
        self.try_execute::<Infallible, _>(|event| {
            callback(event);
            Ok(())
        })
    }

    /// Executes the planned tests and returns the notebook.
    ///
    /// Accepts a callback that is called with every event. If the callback returns an error, no
    /// further hooks or tests are started, remaining tests are recorded as skipped, the callback
    /// is no longer called, and the error is returned.
    pub fn try_execute<E, F>(self, callback: F) -> Result<Notebook, TestRunnerExecuteError<E>>
    where
        F: FnMut(TestEvent) -> Result<(), E>,
        E: fmt::Debug,
    {
        // SAFETY: units only run on this thread, and the timer thread never reads the
        // environment.
        unsafe { std::env::set_var(ENVIRONMENT_VAR, &self.settings.environment) };

        let TestRunner {
            plan,
            settings,
            runtime,
            timers,
        } = self;

        let faults = FaultSink::default();
        let cx = RunContext {
            plan,
            settings: &settings,
            boundary: FaultBoundary::new(timers, faults.clone()),
            faults,
            stopwatch: stopwatch(),
            aggregator: RefCell::new(NotebookAggregator::new()),
            callback: RefCell::new(callback),
            report_error: RefCell::new(None),
        };

        let local = LocalSet::new();
        let res = local.block_on(
            &runtime,
            Caught::engine(AssertUnwindSafe(cx.run()).catch_unwind().boxed_local()),
        );
        // Units that timed out and never finished are dropped along with the local set.
        drop(local);
        clear_current_unit();

        match (res, cx.report_error.into_inner()) {
            (Ok(notebook), None) => Ok(notebook),
            (Ok(_), Some(error)) => Err(TestRunnerExecuteError::Report(error)),
            (Err(payload), _) => Err(TestRunnerExecuteError::EnginePanic {
                message: panic_payload_message(&*payload),
            }),
        }
    }
}

struct RunContext<'a, F, E> {
    plan: &'a TestPlan,
    settings: &'a RunSettings,
    boundary: FaultBoundary,
    faults: FaultSink,
    stopwatch: StopwatchStart,
    aggregator: RefCell<NotebookAggregator>,
    callback: RefCell<F>,
    // Set once the callback fails. No further events are reported after that.
    report_error: RefCell<Option<E>>,
}

impl<F, E> RunContext<'_, F, E>
where
    F: FnMut(TestEvent) -> Result<(), E>,
    E: fmt::Debug,
{
    async fn run(&self) -> Notebook {
        let dry = self.settings.dry;
        let test_count = self.plan.test_count();
        let included_count = self.plan.included_count(ExperimentId::ROOT);
        debug!(
            dry,
            "running {included_count} of {test_count} {}",
            plural::tests_str(test_count)
        );
        self.report(TestEventKind::RunStarted {
            test_count,
            included_count,
            dry,
        });

        self.run_experiment(ExperimentId::ROOT, Context::new(), false)
            .await;

        // Give units that are about to complete a second time a chance to do so.
        tokio::task::yield_now().await;
        self.record_late_faults();

        let stopped_early = self.is_stopping();
        let snapshot = self.stopwatch.snapshot();
        let aggregator = std::mem::take(&mut *self.aggregator.borrow_mut());
        self.report(TestEventKind::RunFinished {
            start_time: snapshot.start_time.fixed_offset(),
            recorded: aggregator.recorded(),
            failures: aggregator.failures(),
            stopped_early,
        });
        aggregator.finish(snapshot.duration)
    }

    fn run_experiment(
        &self,
        id: ExperimentId,
        context: Context,
        skip: bool,
    ) -> LocalBoxFuture<'_, ()> {
        async move {
            if self.plan.included_count(id) == 0 {
                debug!(?id, "no included tests, not visiting experiment");
                return;
            }

            let experiment = self.plan.experiment(id);
            // Skip is sticky: once an ancestor is skipped, so is everything below it.
            let skip = skip || experiment.options().skip;
            let path = self.plan.experiment_path(id);
            if id != ExperimentId::ROOT {
                self.report(TestEventKind::ExperimentStarted { path: path.clone() });
            }
            let run_hooks = !skip && !self.settings.dry;

            if run_hooks {
                for hook in experiment.hooks(HookKind::Before) {
                    if self.is_stopping() {
                        break;
                    }
                    let report = self
                        .run_hook(HookKind::Before, hook, id, None, &context)
                        .await;
                    if !report.is_success() {
                        let title = join_title(path.iter().map(String::as_str));
                        self.record_hook_failure(HookKind::Before, None, path, title, report);
                        return;
                    }
                }
            }

            self.run_tests(id, &context, skip).await;

            for child in experiment.experiments() {
                self.run_experiment(*child, context.fork(), skip).await;
            }

            if run_hooks {
                for hook in experiment.hooks(HookKind::After) {
                    if self.is_stopping() {
                        break;
                    }
                    let report = self
                        .run_hook(HookKind::After, hook, id, None, &context)
                        .await;
                    if !report.is_success() {
                        let title = join_title(path.iter().map(String::as_str));
                        self.record_hook_failure(HookKind::After, None, path, title, report);
                        break;
                    }
                }
            }
        }
        .boxed_local()
    }

    async fn run_tests(&self, id: ExperimentId, context: &Context, skip: bool) {
        let (parallel, serial): (Vec<&TestNode>, Vec<&TestNode>) = self
            .plan
            .experiment(id)
            .tests()
            .iter()
            .filter(|test| test.filter_match().is_match())
            .partition(|test| test.options().parallel.unwrap_or(self.settings.parallel));

        for test in serial {
            self.run_test(test, context, skip).await;
        }

        if !parallel.is_empty() {
            debug!(count = parallel.len(), "starting parallel group");
            // All members are started on the first poll; outcomes are recorded as they complete.
            let mut running: FuturesUnordered<_> = parallel
                .into_iter()
                .map(|test| self.run_test(test, context, skip))
                .collect();
            while running.next().await.is_some() {}
        }
    }

    #[instrument(level = "debug", skip_all, fields(id = test.id(), title = test.title()))]
    async fn run_test(&self, test: &TestNode, context: &Context, skip: bool) {
        let skip = skip || test.options().skip || self.settings.dry || self.is_stopping();
        let func = match &test.func {
            Some(func) if !skip => func,
            _ => {
                self.record(TestOutcome {
                    id: Some(test.id()),
                    path: test.path().to_vec(),
                    title: test.title().to_owned(),
                    duration: Duration::ZERO,
                    err: None,
                    skipped: true,
                    todo: test.is_todo(),
                    notes: Vec::new(),
                });
                return;
            }
        };

        for hook in self.plan.before_each_chain(test.experiment()) {
            let report = self
                .run_hook(
                    HookKind::BeforeEach,
                    hook,
                    test.experiment(),
                    Some(test),
                    context,
                )
                .await;
            if !report.is_success() {
                self.record_hook_failure(
                    HookKind::BeforeEach,
                    Some(test.id()),
                    test.path().to_vec(),
                    test.title().to_owned(),
                    report,
                );
                return;
            }
        }

        let (mut report, duplicates, attempts) = self.run_body(test, func, context).await;
        if attempts > 1 {
            let retries = attempts - 1;
            report
                .notes
                .push(format!("retried {retries} {}", plural::times_str(retries)));
        }

        let mut after_each_failure = None;
        for hook in self.plan.after_each_chain(test.experiment()) {
            let report = self
                .run_hook(
                    HookKind::AfterEach,
                    hook,
                    test.experiment(),
                    Some(test),
                    context,
                )
                .await;
            if !report.is_success() {
                after_each_failure = Some(report);
                break;
            }
        }

        self.record(TestOutcome {
            id: Some(test.id()),
            path: test.path().to_vec(),
            title: test.title().to_owned(),
            duration: report.duration,
            err: report.to_unit_error(),
            skipped: false,
            todo: false,
            notes: report.notes,
        });
        for err in duplicates {
            self.record(fault_outcome(
                Some(test.id()),
                test.path().to_vec(),
                test.title().to_owned(),
                err,
            ));
        }
        if let Some(report) = after_each_failure {
            self.record_hook_failure(
                HookKind::AfterEach,
                Some(test.id()),
                test.path().to_vec(),
                test.title().to_owned(),
                report,
            );
        }
    }

    /// Runs a test body, retrying it while it fails and attempts remain.
    ///
    /// Returns the report of the final attempt, duplicate completions from every attempt, and the
    /// number of attempts made.
    async fn run_body(
        &self,
        test: &TestNode,
        func: &UnitFn,
        context: &Context,
    ) -> (UnitReport, Vec<TestError>, usize) {
        let total_attempts = test.options().total_attempts();
        let timeout = self.resolve_timeout(test.options().timeout);
        let mut duplicates = Vec::new();
        let mut attempt = 1;
        loop {
            let mut report = self
                .boundary
                .run_unit(UnitInvocation {
                    func: func.clone(),
                    id: Some(test.id()),
                    path: test.path().to_vec(),
                    title: test.title().to_owned(),
                    context: context.clone(),
                    timeout,
                    plan: test.options().plan,
                })
                .await;
            duplicates.append(&mut report.duplicates);

            if report.is_success() || attempt >= total_attempts {
                return (report, duplicates, attempt);
            }
            debug!(attempt, total_attempts, "test failed, retrying");
            attempt += 1;
        }
    }

    async fn run_hook(
        &self,
        kind: HookKind,
        hook: &Hook,
        experiment: ExperimentId,
        test: Option<&TestNode>,
        context: &Context,
    ) -> UnitReport {
        let (id, path, scope) = match test {
            Some(test) => (
                Some(test.id()),
                test.path().to_vec(),
                test.title().to_owned(),
            ),
            None => {
                let path = self.plan.experiment_path(experiment);
                let scope = join_title(path.iter().map(String::as_str));
                (None, path, scope)
            }
        };
        let title = if scope.is_empty() {
            format!("{kind} hook")
        } else {
            format!("{kind} hook: {scope}")
        };
        let timeout = self.resolve_timeout(
            hook.options()
                .timeout
                .or(self.plan.experiment(experiment).options().timeout),
        );

        let mut report = self
            .boundary
            .run_unit(UnitInvocation {
                func: hook.func.clone(),
                id,
                path: path.clone(),
                title: title.clone(),
                context: context.clone(),
                timeout,
                plan: None,
            })
            .await;

        for err in std::mem::take(&mut report.duplicates) {
            self.record(fault_outcome(id, path.clone(), title.clone(), err));
        }
        report
    }

    /// Resolves a unit's timeout against the global default. Zero disables the timeout.
    fn resolve_timeout(&self, timeout: Option<Duration>) -> Option<Duration> {
        match timeout {
            Some(timeout) => (!timeout.is_zero()).then_some(timeout),
            None => self.settings.effective_timeout(),
        }
    }

    fn record_hook_failure(
        &self,
        kind: HookKind,
        id: Option<usize>,
        path: Vec<String>,
        title: String,
        report: UnitReport,
    ) {
        debug!(%kind, title = %title, "hook failed");
        let err = UnitError {
            kind: FailureKind::Hook,
            message: kind.failure_message(),
            additional: report.to_unit_error().into_iter().collect(),
        };
        self.record(TestOutcome {
            id,
            path,
            title,
            duration: report.duration,
            err: Some(err),
            skipped: false,
            todo: false,
            notes: report.notes,
        });
    }

    /// Returns true if no further units should be started.
    fn is_stopping(&self) -> bool {
        if self.report_error.borrow().is_some() {
            return true;
        }
        // A bail of 0 behaves like a bail of 1.
        self.settings
            .bail
            .is_some_and(|bail| self.aggregator.borrow().failures() >= bail.max(1))
    }

    fn record(&self, outcome: TestOutcome) {
        self.record_late_faults();
        self.push(outcome);
    }

    fn record_late_faults(&self) {
        for outcome in self.faults.drain() {
            self.push(outcome);
        }
    }

    fn push(&self, outcome: TestOutcome) {
        let failures = {
            let mut aggregator = self.aggregator.borrow_mut();
            aggregator.record(outcome.clone());
            aggregator.failures()
        };
        self.report(TestEventKind::TestRecorded { outcome, failures });
    }

    fn report(&self, kind: TestEventKind) {
        if self.report_error.borrow().is_some() {
            return;
        }
        let event = TestEvent {
            timestamp: Local::now().fixed_offset(),
            elapsed: self.stopwatch.snapshot().duration,
            kind,
        };
        let res = {
            let mut callback = self.callback.borrow_mut();
            (*callback)(event)
        };
        if let Err(error) = res {
            warn!(?error, "reporting test event failed, stopping run");
            *self.report_error.borrow_mut() = Some(error);
        }
    }
}

fn fault_outcome(
    id: Option<usize>,
    path: Vec<String>,
    title: String,
    err: TestError,
) -> TestOutcome {
    TestOutcome {
        id,
        path,
        title,
        duration: Duration::ZERO,
        err: Some(err.into_unit_error()),
        skipped: false,
        todo: false,
        notes: Vec::new(),
    }
}
