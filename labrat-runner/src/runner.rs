// Copyright (c) The labrat Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The test runner.
//!
//! The main structure in this module is [`TestRunner`]. Hooks and tests receive a [`Flags`]
//! handle, and callback-shaped units additionally receive a [`Done`] handle.

mod boundary;
mod context;
mod flags;
mod imp;
mod panic_hook;

pub(crate) use boundary::*;
pub use context::*;
pub use flags::{Done, Flags};
pub(crate) use flags::{UnitSignal, UnitState};
pub(crate) use panic_hook::{Caught, clear_current_unit, install_panic_hook};
pub use imp::*;
