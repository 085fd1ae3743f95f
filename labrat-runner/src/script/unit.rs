// Copyright (c) The labrat Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    errors::TestError,
    runner::{Done, Flags},
};
use futures::future::{FutureExt, LocalBoxFuture};
use std::{fmt, future::Future, rc::Rc};

/// The future returned by an asynchronous hook or test.
pub type UnitFuture = LocalBoxFuture<'static, Result<(), TestError>>;

/// A hook or test function.
///
/// Units come in two shapes, resolved once when the unit is registered:
///
/// * [`UnitFn::Async`]: the unit returns a future, and settling it is the completion signal.
/// * [`UnitFn::Callback`]: the unit is handed a [`Done`] handle and signals completion by calling
///   it, possibly later from a spawned task.
#[derive(Clone)]
pub enum UnitFn {
    /// A unit that returns a future.
    Async(Rc<dyn Fn(Flags) -> UnitFuture>),

    /// A unit that signals completion through a [`Done`] handle.
    Callback(Rc<dyn Fn(Flags, Done)>),
}

impl UnitFn {
    /// Creates a unit from a closure returning a future.
    pub fn from_async<F, Fut>(f: F) -> Self
    where
        F: Fn(Flags) -> Fut + 'static,
        Fut: Future<Output = Result<(), TestError>> + 'static,
    {
        Self::Async(Rc::new(move |flags| f(flags).boxed_local()))
    }

    /// Creates a unit from a closure that calls [`Done`] when finished.
    pub fn from_callback<F>(f: F) -> Self
    where
        F: Fn(Flags, Done) + 'static,
    {
        Self::Callback(Rc::new(f))
    }

    /// Returns the shape of this unit.
    pub fn shape(&self) -> UnitShape {
        match self {
            Self::Async(_) => UnitShape::Async,
            Self::Callback(_) => UnitShape::Callback,
        }
    }
}

impl fmt::Debug for UnitFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("UnitFn").field(&self.shape()).finish()
    }
}

/// The completion shape of a [`UnitFn`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum UnitShape {
    /// Completion is the settlement of a returned future.
    Async,

    /// Completion is a call to [`Done`].
    Callback,
}
