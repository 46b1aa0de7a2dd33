// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Printer for Lox values.
//!
//! Printing a heap value requires the heap to resolve object handles, so
//! this lives outside `Display`.

use std::io::{self, Write};

use super::Value;
use crate::heap::Heap;
use crate::object::{Obj, ObjRef};

/// Write a value to an output sink.
///
/// # Errors
///
/// Returns an error if the sink fails.
pub fn write_value<W: Write>(out: &mut W, heap: &Heap, value: Value) -> io::Result<()> {
    match value {
        Value::Nil => write!(out, "nil"),
        Value::Bool(b) => write!(out, "{b}"),
        Value::Number(n) => write!(out, "{n}"),
        Value::Obj(r) => write_object(out, heap, r),
    }
}

/// Render a value to a string.
#[must_use]
pub fn value_to_string(heap: &Heap, value: Value) -> String {
    let mut buffer = Vec::new();
    // Writing into a Vec cannot fail.
    let _ = write_value(&mut buffer, heap, value);
    String::from_utf8_lossy(&buffer).into_owned()
}

fn write_object<W: Write>(out: &mut W, heap: &Heap, r: ObjRef) -> io::Result<()> {
    match heap.get(r) {
        Obj::String(s) => write!(out, "{}", s.chars),
        Obj::Function(f) => write_function(out, heap, f.name),
        Obj::Native(_) => write!(out, "<native fn>"),
        Obj::Closure(c) => {
            let name = heap.function(c.function).name;
            write_function(out, heap, name)
        }
        Obj::Upvalue(_) => write!(out, "upvalue"),
        Obj::Class(c) => write!(out, "{}", heap.string(c.name).chars),
        Obj::Instance(i) => {
            let class_name = heap.class(i.class).name;
            write!(out, "{} instance", heap.string(class_name).chars)
        }
        Obj::BoundMethod(b) => {
            let name = heap.function(heap.closure(b.method).function).name;
            write_function(out, heap, name)
        }
    }
}

fn write_function<W: Write>(out: &mut W, heap: &Heap, name: Option<ObjRef>) -> io::Result<()> {
    match name {
        Some(name) => write!(out, "<fn {}>", heap.string(name).chars),
        None => write!(out, "<script>"),
    }
}
