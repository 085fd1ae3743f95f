// Copyright (c) The labrat Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The fault boundary every hook, test and cleanup runs behind.
//!
//! A unit is spawned as a local task and raced against a timer taken from the captured
//! [`Timers`]. Whatever the unit does (panicking, returning an error, completing twice, failing
//! from a spawned task after it returned), the boundary turns it into exactly one [`UnitReport`].
//! Faults that arrive after the boundary has closed are recorded in the run's [`FaultSink`].

use super::{Caught, Context, Done, Flags, UnitSignal, UnitState, install_panic_hook};
use crate::{
    errors::TestError,
    helpers::plural,
    script::UnitFn,
    time::Timers,
};
use futures::future::{self, FutureExt};
use labrat_metadata::{FailureKind, TestOutcome, UnitError};
use std::{cell::RefCell, future::Future, panic::AssertUnwindSafe, rc::Rc, time::Duration};
use tokio::sync::mpsc;
use tracing::{debug, instrument};

/// Faults reported after the unit that caused them has finished.
///
/// Shared by every unit in a run. The runner drains it each time it records an outcome.
#[derive(Clone, Debug, Default)]
pub(crate) struct FaultSink {
    faults: Rc<RefCell<Vec<TestOutcome>>>,
}

impl FaultSink {
    pub(crate) fn record(&self, outcome: TestOutcome) {
        self.faults.borrow_mut().push(outcome);
    }

    pub(crate) fn drain(&self) -> Vec<TestOutcome> {
        std::mem::take(&mut *self.faults.borrow_mut())
    }
}

/// One invocation of a unit.
#[derive(Debug)]
pub(crate) struct UnitInvocation {
    pub(crate) func: UnitFn,
    pub(crate) id: Option<usize>,
    pub(crate) path: Vec<String>,
    pub(crate) title: String,
    pub(crate) context: Context,
    pub(crate) timeout: Option<Duration>,
    pub(crate) plan: Option<usize>,
}

/// The normalized outcome of one unit invocation.
#[derive(Debug)]
pub(crate) struct UnitReport {
    pub(crate) result: Result<(), TestError>,
    pub(crate) additional: Vec<TestError>,
    pub(crate) notes: Vec<String>,
    /// Duplicate completions observed while the boundary was open.
    pub(crate) duplicates: Vec<TestError>,
    pub(crate) duration: Duration,
}

impl UnitReport {
    pub(crate) fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    /// Converts the result into a notebook error, with additional errors attached.
    pub(crate) fn to_unit_error(&self) -> Option<UnitError> {
        let err = self.result.as_ref().err()?;
        let mut unit_error = err.clone().into_unit_error();
        unit_error.additional = self
            .additional
            .iter()
            .map(|err| err.clone().into_unit_error())
            .collect();
        Some(unit_error)
    }

    fn fail(&mut self, err: TestError) {
        if self.result.is_ok() {
            self.result = Err(err);
        } else {
            self.additional.push(err);
        }
    }
}

/// Runs units in isolation with timeouts.
#[derive(Debug)]
pub(crate) struct FaultBoundary {
    timers: Timers,
    faults: FaultSink,
}

impl FaultBoundary {
    pub(crate) fn new(timers: Timers, faults: FaultSink) -> Self {
        install_panic_hook();
        Self { timers, faults }
    }

    /// Runs a unit to completion.
    ///
    /// Must be called from within a [`LocalSet`](tokio::task::LocalSet).
    #[instrument(level = "debug", skip_all, fields(title = %unit.title))]
    pub(crate) async fn run_unit(&self, unit: UnitInvocation) -> UnitReport {
        let start = std::time::Instant::now();
        let UnitInvocation {
            func,
            id,
            path,
            title,
            context,
            timeout,
            plan,
        } = unit;

        let (signals_tx, mut signals_rx) = mpsc::unbounded_channel();
        let state = Rc::new(UnitState::new(
            id,
            path,
            title,
            context,
            signals_tx,
            self.faults.clone(),
        ));

        // The task is detached: a unit that times out keeps running, and a completion it signals
        // later is reported as a duplicate.
        drop(tokio::task::spawn_local(Caught::unit(
            &state,
            invoke(func, state.clone()).boxed_local(),
        )));

        let mut report = UnitReport {
            result: Ok(()),
            additional: Vec::new(),
            notes: Vec::new(),
            duplicates: Vec::new(),
            duration: Duration::ZERO,
        };
        let mut late = Vec::new();

        let expiry = self.expiry(timeout);
        tokio::pin!(expiry);
        report.result = loop {
            tokio::select! {
                biased;
                signal = signals_rx.recv() => match signal {
                    Some(UnitSignal::Completed(result)) => break result,
                    Some(UnitSignal::Duplicate(err)) => report.duplicates.push(err),
                    Some(UnitSignal::Late(err)) => late.push(err),
                    Some(UnitSignal::Uncaught(err)) => route_uncaught(&state, err, &mut late),
                    // The state holds the sender, so this can't happen.
                    None => break Err(TestError::msg("unit completion channel closed")),
                },
                timeout = &mut expiry => {
                    debug!(?timeout, "unit timed out");
                    state.settle();
                    break Err(TestError::timeout(timeout, &state.title));
                }
            }
        };

        // Signals sent synchronously alongside the completion.
        drain_signals(&state, &mut signals_rx, &mut report, &mut late);

        for cleanup in state.take_cleanups().into_iter().rev() {
            let cleanup = AssertUnwindSafe(cleanup()).catch_unwind().map(|res| match res {
                Ok(res) => res,
                Err(payload) => Err(TestError::from_panic(payload)),
            });
            let res = match self.with_timeout(cleanup, timeout).await {
                Some(res) => res,
                None => Err(TestError::timeout(
                    timeout.unwrap_or_default(),
                    &format!("cleanup of {}", state.title),
                )),
            };
            if let Err(err) = res {
                report.fail(err.with_kind(FailureKind::Cleanup));
            }
        }

        for err in state.must_call_errors() {
            report.fail(err);
        }

        if let Some(plan) = plan {
            let found = state.assertions();
            if found != plan {
                report.fail(TestError::new(
                    FailureKind::Plan,
                    format!(
                        "Expected {plan} {}, but found {found}",
                        plural::assertions_str(plan)
                    ),
                ));
            }
        }

        // From here on, faults go to the sink.
        signals_rx.close();
        drain_signals(&state, &mut signals_rx, &mut report, &mut late);
        for err in late {
            report.fail(err);
        }

        report.notes = state.take_notes();
        report.duration = start.elapsed();
        report
    }

    /// Resolves once `timeout` has elapsed on the captured timers, or never if there is none.
    fn expiry(&self, timeout: Option<Duration>) -> impl Future<Output = Duration> {
        let sleep = timeout.map(|timeout| (timeout, self.timers.sleep(timeout)));
        async move {
            match sleep {
                Some((timeout, sleep)) => {
                    sleep.await;
                    timeout
                }
                None => future::pending().await,
            }
        }
    }

    async fn with_timeout<T>(
        &self,
        fut: impl Future<Output = T>,
        timeout: Option<Duration>,
    ) -> Option<T> {
        let expiry = self.expiry(timeout);
        tokio::select! {
            biased;
            res = fut => Some(res),
            _ = expiry => None,
        }
    }
}

async fn invoke(func: UnitFn, state: Rc<UnitState>) {
    let flags = Flags::new(state.clone());
    match func {
        UnitFn::Async(f) => {
            let res = AssertUnwindSafe(async move { f(flags).await })
                .catch_unwind()
                .await;
            let result = match res {
                Ok(result) => result,
                Err(payload) => Err(TestError::from_panic(payload)),
            };
            state.complete(result);
        }
        UnitFn::Callback(f) => {
            let done = Done::new(state.clone());
            let res = std::panic::catch_unwind(AssertUnwindSafe(|| f(flags, done)));
            if let Err(payload) = res {
                let err = TestError::from_panic(payload);
                if state.is_settled() {
                    state.uncaught(err);
                } else {
                    state.complete(Err(err));
                }
            }
        }
    }
}

fn drain_signals(
    state: &UnitState,
    signals_rx: &mut mpsc::UnboundedReceiver<UnitSignal>,
    report: &mut UnitReport,
    late: &mut Vec<TestError>,
) {
    while let Ok(signal) = signals_rx.try_recv() {
        match signal {
            // Only one completion is ever sent.
            UnitSignal::Completed(_) => {}
            UnitSignal::Duplicate(err) => report.duplicates.push(err),
            UnitSignal::Late(err) => late.push(err),
            UnitSignal::Uncaught(err) => route_uncaught(state, err, late),
        }
    }
}

/// Routes a panic that escaped the boundary through the unit's uncaught error handler.
fn route_uncaught(state: &UnitState, err: TestError, late: &mut Vec<TestError>) {
    // The handler is user code, and may panic too.
    if let Err(payload) = std::panic::catch_unwind(AssertUnwindSafe(|| state.uncaught(err))) {
        late.push(TestError::from_panic(payload).with_kind(FailureKind::UncaughtError));
    }
}
