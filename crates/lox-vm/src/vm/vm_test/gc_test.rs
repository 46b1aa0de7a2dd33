// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Garbage-collection tests driven through whole programs.

use super::setup;

#[test]
fn stress_gc_survives_closure_churn() {
    let (mut vm, out, err) = setup();
    vm.set_stress_gc(true);
    let result = vm.interpret(
        "fun make(n) { fun inner() { return n; } return inner; } \
         var i = 0; \
         while (i < 10000) { \
           var f = make(i); \
           i = i + 1; \
         } \
         print i;",
    );
    assert_eq!(result, Ok(()), "stress run failed:\n{}", err.contents());
    assert_eq!(out.contents(), "10000\n");
    // Only a handful of objects are live once the loop is done.
    assert!(vm.heap().object_count() < 256, "heap not bounded: {} objects", vm.heap().object_count());
    assert!(vm.heap().bytes_allocated() < 1_000_000);
}

#[test]
fn stress_gc_with_growing_string_accumulator() {
    let (mut vm, out, err) = setup();
    vm.set_stress_gc(true);
    let result = vm.interpret(
        "var keep = \"\"; \
         var i = 0; \
         while (i < 500) { \
           keep = keep + \"x\"; \
           i = i + 1; \
         } \
         print keep == keep + \"\";",
    );
    assert_eq!(result, Ok(()), "stress run failed:\n{}", err.contents());
    assert_eq!(out.contents(), "true\n");
    // Every intermediate accumulator became garbage; the weak intern scan
    // must have dropped their pool entries instead of leaking them.
    assert!(vm.heap().object_count() < 128);
}

#[test]
fn stress_gc_keeps_instances_reachable_through_fields() {
    let (mut vm, out, err) = setup();
    vm.set_stress_gc(true);
    let result = vm.interpret(
        "class Node { init(v) { this.v = v; this.next = nil; } } \
         var head = Node(\"head\"); \
         var i = 0; \
         while (i < 200) { \
           var n = Node(\"n\"); \
           n.next = head; \
           head = n; \
           i = i + 1; \
         } \
         var walk = head; \
         var count = 0; \
         while (walk != nil) { count = count + 1; walk = walk.next; } \
         print count;",
    );
    assert_eq!(result, Ok(()), "stress run failed:\n{}", err.contents());
    assert_eq!(out.contents(), "201\n");
}

#[test]
fn collection_triggers_from_allocation_pressure() {
    // No stress mode: the threshold crossing itself must trigger cycles.
    let (mut vm, out, err) = setup();
    let result = vm.interpret(
        "fun make(n) { fun inner() { return n; } return inner; } \
         var i = 0; \
         while (i < 20000) { \
           var f = make(i); \
           i = i + 1; \
         } \
         print i;",
    );
    assert_eq!(result, Ok(()), "run failed:\n{}", err.contents());
    assert_eq!(out.contents(), "20000\n");
    // Without collections this loop would hold tens of thousands of dead
    // closures; the pressure trigger keeps the registry small.
    assert!(vm.heap().object_count() < 4096, "heap not bounded: {} objects", vm.heap().object_count());
}

#[test]
fn gc_preserves_upvalues_closed_during_collection_heavy_runs() {
    let (mut vm, out, err) = setup();
    vm.set_stress_gc(true);
    let result = vm.interpret(
        "fun hold(v) { fun get() { return v; } return get; } \
         var a = hold(\"first\"); \
         var b = hold(\"second\"); \
         var i = 0; \
         while (i < 100) { var junk = hold(i); i = i + 1; } \
         print a(); print b();",
    );
    assert_eq!(result, Ok(()), "stress run failed:\n{}", err.contents());
    assert_eq!(out.contents(), "first\nsecond\n");
}
