// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Tests for the value printer.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use super::{Value, value_to_string};
use crate::bytecode::Chunk;
use crate::heap::Heap;
use crate::object::{Class, Function, Instance, Native, Obj};
use crate::table::Table;

#[test]
fn prints_immediates() {
    let heap = Heap::new();
    assert_eq!(value_to_string(&heap, Value::Nil), "nil");
    assert_eq!(value_to_string(&heap, Value::Bool(true)), "true");
    assert_eq!(value_to_string(&heap, Value::Bool(false)), "false");
}

#[test]
fn prints_whole_numbers_without_fraction() {
    let heap = Heap::new();
    assert_eq!(value_to_string(&heap, Value::Number(7.0)), "7");
    assert_eq!(value_to_string(&heap, Value::Number(-3.0)), "-3");
    assert_eq!(value_to_string(&heap, Value::Number(2.5)), "2.5");
}

#[test]
fn prints_strings_raw() {
    let mut heap = Heap::new();
    let s = heap.intern("hello");
    assert_eq!(value_to_string(&heap, Value::Obj(s)), "hello");
}

#[test]
fn prints_functions_by_name() {
    let mut heap = Heap::new();
    let name = heap.intern("riddle");
    let named = heap.allocate(Obj::Function(Function {
        arity: 0,
        upvalue_count: 0,
        chunk: Chunk::new(),
        name: Some(name),
    }));
    let script = heap.allocate(Obj::Function(Function {
        arity: 0,
        upvalue_count: 0,
        chunk: Chunk::new(),
        name: None,
    }));
    assert_eq!(value_to_string(&heap, Value::Obj(named)), "<fn riddle>");
    assert_eq!(value_to_string(&heap, Value::Obj(script)), "<script>");
}

#[test]
fn prints_classes_and_instances() {
    let mut heap = Heap::new();
    let name = heap.intern("Point");
    let class = heap.allocate(Obj::Class(Class {
        name,
        methods: Table::new(),
    }));
    let instance = heap.allocate(Obj::Instance(Instance {
        class,
        fields: Table::new(),
    }));
    assert_eq!(value_to_string(&heap, Value::Obj(class)), "Point");
    assert_eq!(value_to_string(&heap, Value::Obj(instance)), "Point instance");
}

#[test]
fn prints_natives_opaquely() {
    let mut heap = Heap::new();
    let native = heap.allocate(Obj::Native(Native {
        function: crate::natives::clock,
    }));
    assert_eq!(value_to_string(&heap, Value::Obj(native)), "<native fn>");
}
