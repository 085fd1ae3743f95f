// Copyright (c) The labrat Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

mod declaration;
mod filtering;
mod scheduling;
