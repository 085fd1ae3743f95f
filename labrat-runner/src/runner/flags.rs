// Copyright (c) The labrat Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{Caught, Context, FaultSink};
use crate::errors::TestError;
use debug_ignore::DebugIgnore;
use futures::future::{FutureExt, LocalBoxFuture};
use labrat_metadata::{FailureKind, TestOutcome};
use std::{
    cell::{Cell, RefCell},
    future::Future,
    panic::AssertUnwindSafe,
    rc::Rc,
    time::Duration,
};
use tokio::{
    sync::mpsc::{UnboundedSender, error::SendError},
    task::JoinHandle,
};
use tracing::debug;

/// Signals sent from a running unit to its fault boundary.
#[derive(Debug)]
pub(crate) enum UnitSignal {
    /// The unit settled. Sent at most once.
    Completed(Result<(), TestError>),

    /// The unit signalled completion again after it had settled.
    Duplicate(TestError),

    /// A spawned task failed after the unit settled, and no handler was installed.
    Late(TestError),

    /// A panic escaped a task that wasn't spawned through [`Flags::spawn`]. The boundary routes
    /// it like a panic in a spawned task.
    Uncaught(TestError),
}

pub(crate) type Cleanup = Box<dyn FnOnce() -> LocalBoxFuture<'static, Result<(), TestError>>>;
type ErrorHandler = Rc<dyn Fn(TestError)>;

/// State shared between a unit, its [`Flags`] and [`Done`] handles, and its fault boundary.
#[derive(Debug)]
pub(crate) struct UnitState {
    pub(crate) id: Option<usize>,
    pub(crate) path: Vec<String>,
    pub(crate) title: String,
    context: Context,
    settled: Cell<bool>,
    notes: RefCell<Vec<String>>,
    cleanups: RefCell<DebugIgnore<Vec<Cleanup>>>,
    uncaught_handler: RefCell<DebugIgnore<Option<ErrorHandler>>>,
    rejection_handler: RefCell<DebugIgnore<Option<ErrorHandler>>>,
    assertions: Cell<usize>,
    must_calls: RefCell<Vec<Rc<MustCall>>>,
    signals: UnboundedSender<UnitSignal>,
    faults: FaultSink,
}

impl UnitState {
    pub(crate) fn new(
        id: Option<usize>,
        path: Vec<String>,
        title: String,
        context: Context,
        signals: UnboundedSender<UnitSignal>,
        faults: FaultSink,
    ) -> Self {
        Self {
            id,
            path,
            title,
            context,
            settled: Cell::new(false),
            notes: RefCell::new(Vec::new()),
            cleanups: RefCell::new(DebugIgnore(Vec::new())),
            uncaught_handler: RefCell::new(DebugIgnore(None)),
            rejection_handler: RefCell::new(DebugIgnore(None)),
            assertions: Cell::new(0),
            must_calls: RefCell::new(Vec::new()),
            signals,
            faults,
        }
    }

    /// Settles the unit with `result`. Returns false if the unit had already settled, in which
    /// case a duplicate completion is reported instead.
    pub(crate) fn complete(&self, result: Result<(), TestError>) -> bool {
        if self.settled.replace(true) {
            debug!(title = %self.title, "duplicate completion");
            self.send(UnitSignal::Duplicate(TestError::duplicate_completion(
                &self.title,
            )));
            return false;
        }
        self.send(UnitSignal::Completed(result));
        true
    }

    /// Marks the unit settled without sending a completion, for example on timeout.
    pub(crate) fn settle(&self) {
        self.settled.set(true);
    }

    pub(crate) fn is_settled(&self) -> bool {
        self.settled.get()
    }

    /// Routes a panic from a spawned task or a settled callback unit.
    pub(crate) fn uncaught(&self, err: TestError) {
        let handler = self.uncaught_handler.borrow().0.clone();
        self.route(err.with_kind(FailureKind::UncaughtError), handler);
    }

    /// Reports a panic that escaped the boundary. Called from the panic hook, so this must not
    /// run user code.
    pub(crate) fn escaped_panic(&self, err: TestError) {
        self.send(UnitSignal::Uncaught(err));
    }

    /// Routes an error returned by a spawned task.
    pub(crate) fn unhandled_rejection(&self, err: TestError) {
        let handler = self.rejection_handler.borrow().0.clone();
        self.route(err.with_kind(FailureKind::UnhandledRejection), handler);
    }

    fn route(&self, err: TestError, handler: Option<ErrorHandler>) {
        match handler {
            Some(handler) => handler(err),
            None if !self.is_settled() => {
                self.complete(Err(err));
            }
            None => self.send(UnitSignal::Late(err)),
        }
    }

    // Once the boundary has closed, faults go to the run-wide sink instead.
    fn send(&self, signal: UnitSignal) {
        if let Err(SendError(signal)) = self.signals.send(signal) {
            match signal {
                UnitSignal::Duplicate(err) | UnitSignal::Late(err) | UnitSignal::Uncaught(err) => {
                    self.record_late(err)
                }
                // The boundary holds the receiver until the unit settles.
                UnitSignal::Completed(_) => {}
            }
        }
    }

    fn record_late(&self, err: TestError) {
        debug!(title = %self.title, %err, "recording fault after unit finished");
        self.faults.record(TestOutcome {
            id: self.id,
            path: self.path.clone(),
            title: self.title.clone(),
            duration: Duration::ZERO,
            err: Some(err.into_unit_error()),
            skipped: false,
            todo: false,
            notes: Vec::new(),
        });
    }

    pub(crate) fn take_cleanups(&self) -> Vec<Cleanup> {
        std::mem::take(&mut self.cleanups.borrow_mut().0)
    }

    pub(crate) fn take_notes(&self) -> Vec<String> {
        std::mem::take(&mut *self.notes.borrow_mut())
    }

    pub(crate) fn assertions(&self) -> usize {
        self.assertions.get()
    }

    /// Returns an error for every `must_call` wrapper called the wrong number of times.
    pub(crate) fn must_call_errors(&self) -> Vec<TestError> {
        self.must_calls
            .borrow()
            .iter()
            .filter_map(|must_call| must_call.check())
            .collect()
    }
}

#[derive(Debug)]
struct MustCall {
    expected: usize,
    actual: Cell<usize>,
}

impl MustCall {
    fn check(&self) -> Option<TestError> {
        let actual = self.actual.get();
        (actual != self.expected).then(|| {
            TestError::new(
                FailureKind::MustCall,
                format!(
                    "Expected function to be executed {} time(s) but was executed {actual} time(s)",
                    self.expected
                ),
            )
        })
    }
}

/// The handle passed to every hook and test.
///
/// `Flags` gives a unit access to its experiment's [`Context`] and lets it customize how the
/// fault boundary treats it: notes, cleanups, error routing, call-count expectations and assertion
/// counting.
#[derive(Clone, Debug)]
pub struct Flags {
    state: Rc<UnitState>,
}

impl Flags {
    pub(crate) fn new(state: Rc<UnitState>) -> Self {
        Self { state }
    }

    /// The full title of the unit.
    pub fn title(&self) -> &str {
        &self.state.title
    }

    /// The context of the experiment this unit belongs to.
    pub fn context(&self) -> &Context {
        &self.state.context
    }

    /// Adds a note to the unit's outcome.
    pub fn note(&self, note: impl Into<String>) {
        self.state.notes.borrow_mut().push(note.into());
    }

    /// Registers a cleanup function.
    ///
    /// Cleanups run after the unit completes, whether it passed or not, in reverse order of
    /// registration. A failing cleanup fails a passing unit; for a failing unit it is attached as
    /// an additional error.
    pub fn on_cleanup<F, Fut>(&self, f: F)
    where
        F: FnOnce() -> Fut + 'static,
        Fut: Future<Output = Result<(), TestError>> + 'static,
    {
        self.state
            .cleanups
            .borrow_mut()
            .push(Box::new(move || f().boxed_local()));
    }

    /// Installs a handler for panics in tasks spawned through [`Flags::spawn`].
    ///
    /// Without a handler, such a panic fails the unit.
    pub fn on_uncaught_error(&self, f: impl Fn(TestError) + 'static) {
        let handler: ErrorHandler = Rc::new(f);
        *self.state.uncaught_handler.borrow_mut() = DebugIgnore(Some(handler));
    }

    /// Installs a handler for errors returned by tasks spawned through [`Flags::spawn`].
    ///
    /// Without a handler, such an error fails the unit.
    pub fn on_unhandled_rejection(&self, f: impl Fn(TestError) + 'static) {
        let handler: ErrorHandler = Rc::new(f);
        *self.state.rejection_handler.borrow_mut() = DebugIgnore(Some(handler));
    }

    /// Wraps `f` so that the unit fails unless the wrapper is called exactly `expected` times.
    ///
    /// The call count is checked once the unit completes. Functions with several arguments can
    /// take a tuple.
    pub fn must_call<T, R>(&self, expected: usize, f: impl Fn(T) -> R + 'static) -> impl Fn(T) -> R {
        let must_call = Rc::new(MustCall {
            expected,
            actual: Cell::new(0),
        });
        self.state.must_calls.borrow_mut().push(must_call.clone());
        move |arg| {
            must_call.actual.set(must_call.actual.get() + 1);
            f(arg)
        }
    }

    /// Counts an assertion and fails with `message` if `condition` is false.
    ///
    /// Returns a result so that it can be used with `?`.
    pub fn assert(&self, condition: bool, message: impl Into<String>) -> Result<(), TestError> {
        self.count_assertion();
        if condition {
            Ok(())
        } else {
            Err(TestError::assertion(message))
        }
    }

    /// Counts an assertion performed by other means, for use with a test's `plan`.
    pub fn count_assertion(&self) {
        self.state.assertions.set(self.state.assertions.get() + 1);
    }

    /// Spawns a task that is owned by this unit.
    ///
    /// A panic in the task is routed to the [uncaught error handler](Self::on_uncaught_error), and
    /// an error it returns to the [unhandled rejection handler](Self::on_unhandled_rejection).
    ///
    /// Prefer this to [`tokio::task::spawn_local`]. A panic in a task spawned directly is still
    /// treated as an uncaught error, but it is attributed to whichever unit was polled most
    /// recently, which may not be the unit that spawned it when tests run in parallel.
    pub fn spawn<Fut>(&self, fut: Fut) -> JoinHandle<()>
    where
        Fut: Future<Output = Result<(), TestError>> + 'static,
    {
        let state = self.state.clone();
        let task = async move {
            match AssertUnwindSafe(fut).catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => state.unhandled_rejection(err),
                Err(payload) => state.uncaught(TestError::from_panic(payload)),
            }
        };
        tokio::task::spawn_local(Caught::unit(&self.state, task.boxed_local()))
    }
}

/// The completion handle passed to callback-shaped units.
///
/// The first call to [`Done::complete`] (or [`Done::pass`] / [`Done::fail`]) settles the unit.
/// Every later call is a protocol violation and is recorded as a separate failure. `Done` can be
/// cloned and moved into spawned tasks.
#[derive(Clone, Debug)]
pub struct Done {
    state: Rc<UnitState>,
}

impl Done {
    pub(crate) fn new(state: Rc<UnitState>) -> Self {
        Self { state }
    }

    /// Settles the unit with `result`.
    pub fn complete(&self, result: Result<(), TestError>) {
        self.state.complete(result);
    }

    /// Settles the unit as passed.
    pub fn pass(&self) {
        self.complete(Ok(()));
    }

    /// Settles the unit as failed.
    pub fn fail(&self, err: impl Into<TestError>) {
        self.complete(Err(err.into()));
    }
}
