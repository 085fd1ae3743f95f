// Copyright (c) The labrat Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Attribution of panics that escape the fault boundary.
//!
//! Tokio catches a panic in a task spawned with [`tokio::task::spawn_local`] and stores it in the
//! task's `JoinHandle`. If a unit spawns such a task itself (rather than through
//! [`Flags::spawn`](super::Flags::spawn)) and drops the handle, the panic would be lost. A panic
//! hook, installed once per process, hands those panics to the unit most recently polled on the
//! runner thread.

use super::UnitState;
use crate::{errors::TestError, helpers::panic_payload_message};
use labrat_metadata::FailureKind;
use std::{
    cell::{Cell, RefCell},
    future::Future,
    pin::Pin,
    rc::{Rc, Weak},
    sync::Once,
    task::{Context, Poll},
};

static INSTALL_HOOK: Once = Once::new();

thread_local! {
    static CURRENT_UNIT: RefCell<Option<Weak<UnitState>>> = const { RefCell::new(None) };
    // Nonzero while polling code whose panics are already caught by the boundary or the engine.
    static CAUGHT_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// Installs the panic hook. Later calls do nothing.
pub(crate) fn install_panic_hook() {
    INSTALL_HOOK.call_once(|| {
        let panic_hook = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            if let Some(state) = escaped_panic_owner() {
                state.escaped_panic(TestError::new(
                    FailureKind::UncaughtError,
                    panic_payload_message(info.payload()),
                ));
            }
            panic_hook(info);
        }));
    });
}

/// Forgets the unit most recently polled on this thread. Called once a run is over.
pub(crate) fn clear_current_unit() {
    _ = CURRENT_UNIT.try_with(|current| current.borrow_mut().take());
}

fn escaped_panic_owner() -> Option<Rc<UnitState>> {
    // Ignore access errors: this may run while thread locals are being torn down.
    if CAUGHT_DEPTH.try_with(Cell::get).ok()? > 0 {
        return None;
    }
    CURRENT_UNIT
        .try_with(|current| {
            let current = current.try_borrow().ok()?;
            current.as_ref()?.upgrade()
        })
        .ok()
        .flatten()
}

/// A future whose panics are caught by its owner.
///
/// Polling it marks the panic hook as inactive, and if it belongs to a unit, makes that unit the
/// owner of panics escaping from tasks polled afterwards.
#[derive(Debug)]
#[must_use = "futures do nothing unless polled"]
pub(crate) struct Caught<F> {
    unit: Option<Weak<UnitState>>,
    fut: F,
}

impl<F> Caught<F> {
    /// Wraps engine code that isn't tied to a unit.
    pub(crate) fn engine(fut: F) -> Self {
        Self { unit: None, fut }
    }

    /// Wraps code that runs on behalf of `state`.
    pub(crate) fn unit(state: &Rc<UnitState>, fut: F) -> Self {
        Self {
            unit: Some(Rc::downgrade(state)),
            fut,
        }
    }
}

impl<F: Future + Unpin> Future for Caught<F> {
    type Output = F::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if let Some(unit) = &this.unit {
            CURRENT_UNIT.with(|current| *current.borrow_mut() = Some(unit.clone()));
        }
        let _depth = DepthGuard::enter();
        Pin::new(&mut this.fut).poll(cx)
    }
}

struct DepthGuard(());

impl DepthGuard {
    fn enter() -> Self {
        CAUGHT_DEPTH.with(|depth| depth.set(depth.get() + 1));
        Self(())
    }
}

impl Drop for DepthGuard {
    fn drop(&mut self) {
        _ = CAUGHT_DEPTH.try_with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}
