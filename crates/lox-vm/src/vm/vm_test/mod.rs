// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Tests for the bytecode VM.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod arithmetic_test;
mod closure_test;
mod error_test;
mod gc_test;

use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;

use super::*;

/// Writer appending into a shared buffer the test can read back.
#[derive(Clone, Default)]
pub struct SharedSink(Rc<RefCell<Vec<u8>>>);

impl SharedSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.borrow()).into_owned()
    }
}

impl Write for SharedSink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Create a VM with captured stdout and stderr.
pub fn setup() -> (Vm, SharedSink, SharedSink) {
    let out = SharedSink::new();
    let err = SharedSink::new();
    let vm = Vm::with_output(Box::new(out.clone()), Box::new(err.clone()));
    (vm, out, err)
}

/// Run a program on a fresh VM, returning the outcome plus captured
/// stdout and stderr.
pub fn run_source(source: &str) -> (Result<(), InterpretError>, String, String) {
    let (mut vm, out, err) = setup();
    let result = vm.interpret(source);
    (result, out.contents(), err.contents())
}

/// Assert a program runs to completion with exactly this stdout.
pub fn assert_prints(source: &str, expected: &str) {
    let (result, stdout, stderr) = run_source(source);
    assert_eq!(result, Ok(()), "unexpected failure:\n{stderr}");
    assert_eq!(stdout, expected);
}

/// Assert a program stops with a runtime error whose report contains the
/// given message.
pub fn assert_runtime_error(source: &str, message: &str) {
    let (result, _stdout, stderr) = run_source(source);
    assert_eq!(result, Err(InterpretError::Runtime));
    assert!(
        stderr.contains(message),
        "expected {message:?} in stderr:\n{stderr}"
    );
}
