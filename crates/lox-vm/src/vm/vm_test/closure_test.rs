// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Closure and upvalue tests.

use super::assert_prints;

#[test]
fn captured_variable_mutates_across_calls() {
    assert_prints(
        "fun make() { var x = 1; fun inc() { x = x + 1; return x; } return inc; } \
         var f = make(); print f(); print f();",
        "2\n3\n",
    );
}

#[test]
fn two_closures_share_one_upvalue() {
    assert_prints(
        "fun pair() { \
           var x = 0; \
           fun inc() { x = x + 1; return x; } \
           fun get() { return x; } \
           print inc(); print inc(); print get(); \
         } \
         pair();",
        "1\n2\n2\n",
    );
}

#[test]
fn upvalue_closes_on_scope_exit() {
    assert_prints(
        "var f; { var x = \"inside\"; fun g() { print x; } f = g; } f();",
        "inside\n",
    );
}

#[test]
fn open_upvalue_writes_are_visible_to_the_local() {
    assert_prints(
        "fun main() { var x = 1; fun setx() { x = 99; } setx(); print x; } main();",
        "99\n",
    );
}

#[test]
fn capture_composes_through_nested_closures() {
    assert_prints(
        "fun outer() { \
           var x = \"captured\"; \
           fun middle() { fun inner() { print x; } return inner; } \
           return middle; \
         } \
         outer()()();",
        "captured\n",
    );
}

#[test]
fn closures_from_same_factory_are_independent() {
    assert_prints(
        "fun make() { var n = 0; fun counter() { n = n + 1; return n; } return counter; } \
         var a = make(); var b = make(); \
         print a(); print a(); print b();",
        "1\n2\n1\n",
    );
}

#[test]
fn loop_variable_capture_sees_final_value() {
    // All three closures capture the same variable cell.
    assert_prints(
        "var fs; \
         { \
           var i = 0; \
           fun f() { return i; } \
           i = 10; \
           fs = f; \
         } \
         print fs();",
        "10\n",
    );
}

#[test]
fn closed_upvalue_survives_many_frame_pops() {
    assert_prints(
        "fun hold() { var v = \"kept\"; fun get() { return v; } return get; } \
         var g = hold(); \
         fun churn(n) { if (n > 0) churn(n - 1); } \
         churn(20); \
         print g();",
        "kept\n",
    );
}
