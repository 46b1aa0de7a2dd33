// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Built-in native functions for the Lox VM.
//!
//! A native is a host function invoked synchronously with a window into the
//! operand stack holding its arguments. Natives do not get a call frame and
//! are assumed total: they always return a value.

#[cfg(test)]
mod natives_test;

use std::time::{SystemTime, UNIX_EPOCH};

use crate::value::Value;

/// Signature of a host-implemented callable.
pub type NativeFn = fn(args: &[Value]) -> Value;

/// `clock()` - wall-clock seconds since the Unix epoch, as a number.
#[must_use]
pub fn clock(_args: &[Value]) -> Value {
    let seconds = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0.0, |elapsed| elapsed.as_secs_f64());
    Value::Number(seconds)
}
