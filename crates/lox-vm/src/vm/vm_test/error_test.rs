// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Runtime-error reporting, stack traces and recovery tests.

use super::{assert_runtime_error, run_source, setup};
use crate::vm::InterpretError;

#[test]
fn type_error_in_addition() {
    let (result, _stdout, stderr) = run_source("print 1 + \"a\";");
    assert_eq!(result, Err(InterpretError::Runtime));
    assert!(stderr.contains("Operands must be two numbers or two strings."));
    assert!(stderr.contains("[line 1] in script"));
}

#[test]
fn stack_trace_walks_frames_newest_first() {
    let (result, _stdout, stderr) = run_source(
        "fun boom() {\n  return 1 + nil;\n}\nboom();\n",
    );
    assert_eq!(result, Err(InterpretError::Runtime));
    assert!(stderr.contains("[line 2] in boom()"));
    assert!(stderr.contains("[line 4] in script"));
    let boom = stderr.find("in boom()").unwrap();
    let script = stderr.find("in script").unwrap();
    assert!(boom < script);
}

#[test]
fn side_effects_before_the_error_are_kept() {
    let (result, stdout, _stderr) = run_source("print 1;\nprint nil + 1;");
    assert_eq!(result, Err(InterpretError::Runtime));
    assert_eq!(stdout, "1\n");
}

#[test]
fn negate_requires_a_number() {
    assert_runtime_error("print -\"x\";", "Operand must be a number.");
}

#[test]
fn comparison_requires_numbers() {
    assert_runtime_error("print 1 < \"2\";", "Operands must be numbers.");
}

#[test]
fn undefined_global_read() {
    assert_runtime_error("print missing;", "Undefined variable 'missing'.");
}

#[test]
fn assignment_to_undefined_global() {
    assert_runtime_error("missing = 1;", "Undefined variable 'missing'.");
}

#[test]
fn calling_a_non_callable() {
    assert_runtime_error("var x = 1; x();", "Can only call functions and classes.");
}

#[test]
fn arity_mismatch() {
    assert_runtime_error(
        "fun f(a) { return a; } f(1, 2);",
        "Expected 1 arguments but got 2.",
    );
}

#[test]
fn arguments_to_class_without_init() {
    assert_runtime_error("class A {} A(1);", "Expected 0 arguments but got 1.");
}

#[test]
fn unbounded_recursion_overflows() {
    assert_runtime_error("fun f() { f(); } f();", "Stack overflow.");
}

#[test]
fn property_access_on_non_instance() {
    assert_runtime_error("var x = 1; print x.y;", "Only instances have properties.");
}

#[test]
fn field_write_on_non_instance() {
    assert_runtime_error("var x = 1; x.y = 2;", "Only instances have fields.");
}

#[test]
fn method_call_on_non_instance() {
    assert_runtime_error("var s = \"x\"; s.m();", "Only instances have methods.");
}

#[test]
fn undefined_property_read() {
    assert_runtime_error(
        "class A {} var a = A(); print a.b;",
        "Undefined property 'b'.",
    );
}

#[test]
fn undefined_method_invocation() {
    assert_runtime_error("class A {} A().m();", "Undefined property 'm'.");
}

#[test]
fn inheriting_from_a_non_class() {
    assert_runtime_error(
        "var NotClass = 1; class B < NotClass {}",
        "Superclass must be a class.",
    );
}

#[test]
fn compile_errors_are_reported() {
    let (result, _stdout, stderr) = run_source("print;");
    assert_eq!(result, Err(InterpretError::Compile));
    assert!(stderr.contains("Error"));
}

#[test]
fn vm_recovers_after_a_runtime_error() {
    let (mut vm, out, _err) = setup();
    assert_eq!(vm.interpret("print nil + 1;"), Err(InterpretError::Runtime));
    assert_eq!(vm.interpret("print \"still alive\";"), Ok(()));
    assert!(out.contents().contains("still alive\n"));
}

#[test]
fn vm_recovers_after_a_compile_error() {
    let (mut vm, out, _err) = setup();
    assert_eq!(vm.interpret("print ;"), Err(InterpretError::Compile));
    assert_eq!(vm.interpret("print 1;"), Ok(()));
    assert_eq!(out.contents(), "1\n");
}

#[test]
fn globals_persist_across_interpretations() {
    let (mut vm, out, _err) = setup();
    assert_eq!(vm.interpret("var a = 1;"), Ok(()));
    assert_eq!(vm.interpret("print a;"), Ok(()));
    assert_eq!(out.contents(), "1\n");
}
