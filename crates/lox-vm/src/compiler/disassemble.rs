// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Bytecode disassembler.
//!
//! Renders chunks as offset/line/mnemonic listings. Only the execution
//! tracer and debugging use this; nothing semantic depends on it.

use std::io::{self, Write};

use crate::bytecode::{Chunk, op};
use crate::heap::Heap;
use crate::value::value_to_string;

/// Write a full listing of a chunk under a header.
///
/// # Errors
///
/// Returns an error if the sink fails.
pub fn disassemble_chunk<W: Write>(
    out: &mut W,
    heap: &Heap,
    chunk: &Chunk,
    name: &str,
) -> io::Result<()> {
    writeln!(out, "== {name} ==")?;
    let mut offset = 0;
    while offset < chunk.code.len() {
        offset = disassemble_instruction(out, heap, chunk, offset)?;
    }
    Ok(())
}

/// Write one instruction at `offset`; returns the offset of the next one.
///
/// # Errors
///
/// Returns an error if the sink fails.
pub fn disassemble_instruction<W: Write>(
    out: &mut W,
    heap: &Heap,
    chunk: &Chunk,
    offset: usize,
) -> io::Result<usize> {
    write!(out, "{offset:04} ")?;
    if offset > 0 && chunk.line(offset) == chunk.line(offset - 1) {
        write!(out, "   | ")?;
    } else {
        write!(out, "{:4} ", chunk.line(offset))?;
    }

    let Some(&instruction) = chunk.code.get(offset) else {
        writeln!(out, "<end>")?;
        return Ok(offset + 1);
    };
    match instruction {
        op::CONSTANT => constant_instruction(out, heap, chunk, "CONSTANT", offset),
        op::NIL => simple_instruction(out, "NIL", offset),
        op::TRUE => simple_instruction(out, "TRUE", offset),
        op::FALSE => simple_instruction(out, "FALSE", offset),
        op::POP => simple_instruction(out, "POP", offset),
        op::GET_LOCAL => byte_instruction(out, chunk, "GET_LOCAL", offset),
        op::SET_LOCAL => byte_instruction(out, chunk, "SET_LOCAL", offset),
        op::GET_GLOBAL => constant_instruction(out, heap, chunk, "GET_GLOBAL", offset),
        op::DEFINE_GLOBAL => constant_instruction(out, heap, chunk, "DEFINE_GLOBAL", offset),
        op::SET_GLOBAL => constant_instruction(out, heap, chunk, "SET_GLOBAL", offset),
        op::GET_UPVALUE => byte_instruction(out, chunk, "GET_UPVALUE", offset),
        op::SET_UPVALUE => byte_instruction(out, chunk, "SET_UPVALUE", offset),
        op::GET_PROPERTY => constant_instruction(out, heap, chunk, "GET_PROPERTY", offset),
        op::SET_PROPERTY => constant_instruction(out, heap, chunk, "SET_PROPERTY", offset),
        op::GET_SUPER => constant_instruction(out, heap, chunk, "GET_SUPER", offset),
        op::EQUAL => simple_instruction(out, "EQUAL", offset),
        op::GREATER => simple_instruction(out, "GREATER", offset),
        op::LESS => simple_instruction(out, "LESS", offset),
        op::ADD => simple_instruction(out, "ADD", offset),
        op::SUBTRACT => simple_instruction(out, "SUBTRACT", offset),
        op::MULTIPLY => simple_instruction(out, "MULTIPLY", offset),
        op::DIVIDE => simple_instruction(out, "DIVIDE", offset),
        op::NOT => simple_instruction(out, "NOT", offset),
        op::NEGATE => simple_instruction(out, "NEGATE", offset),
        op::PRINT => simple_instruction(out, "PRINT", offset),
        op::JUMP => jump_instruction(out, chunk, "JUMP", 1, offset),
        op::JUMP_IF_FALSE => jump_instruction(out, chunk, "JUMP_IF_FALSE", 1, offset),
        op::LOOP => jump_instruction(out, chunk, "LOOP", -1, offset),
        op::CALL => byte_instruction(out, chunk, "CALL", offset),
        op::INVOKE => invoke_instruction(out, heap, chunk, "INVOKE", offset),
        op::SUPER_INVOKE => invoke_instruction(out, heap, chunk, "SUPER_INVOKE", offset),
        op::CLOSURE => closure_instruction(out, heap, chunk, offset),
        op::CLOSE_UPVALUE => simple_instruction(out, "CLOSE_UPVALUE", offset),
        op::RETURN => simple_instruction(out, "RETURN", offset),
        op::CLASS => constant_instruction(out, heap, chunk, "CLASS", offset),
        op::INHERIT => simple_instruction(out, "INHERIT", offset),
        op::METHOD => constant_instruction(out, heap, chunk, "METHOD", offset),
        other => {
            writeln!(out, "Unknown opcode {other}")?;
            Ok(offset + 1)
        }
    }
}

fn simple_instruction<W: Write>(out: &mut W, name: &str, offset: usize) -> io::Result<usize> {
    writeln!(out, "{name}")?;
    Ok(offset + 1)
}

fn byte_instruction<W: Write>(
    out: &mut W,
    chunk: &Chunk,
    name: &str,
    offset: usize,
) -> io::Result<usize> {
    let slot = chunk.code.get(offset + 1).copied().unwrap_or(0);
    writeln!(out, "{name:<16} {slot:4}")?;
    Ok(offset + 2)
}

fn constant_instruction<W: Write>(
    out: &mut W,
    heap: &Heap,
    chunk: &Chunk,
    name: &str,
    offset: usize,
) -> io::Result<usize> {
    let constant = chunk.code.get(offset + 1).copied().unwrap_or(0);
    let rendered = chunk
        .constants
        .get(constant as usize)
        .map_or_else(|| "?".to_owned(), |&value| value_to_string(heap, value));
    writeln!(out, "{name:<16} {constant:4} '{rendered}'")?;
    Ok(offset + 2)
}

fn jump_instruction<W: Write>(
    out: &mut W,
    chunk: &Chunk,
    name: &str,
    sign: i64,
    offset: usize,
) -> io::Result<usize> {
    let hi = chunk.code.get(offset + 1).copied().unwrap_or(0);
    let lo = chunk.code.get(offset + 2).copied().unwrap_or(0);
    let jump = i64::from((u16::from(hi) << 8) | u16::from(lo));
    let target = offset as i64 + 3 + sign * jump;
    writeln!(out, "{name:<16} {offset:4} -> {target}")?;
    Ok(offset + 3)
}

fn invoke_instruction<W: Write>(
    out: &mut W,
    heap: &Heap,
    chunk: &Chunk,
    name: &str,
    offset: usize,
) -> io::Result<usize> {
    let constant = chunk.code.get(offset + 1).copied().unwrap_or(0);
    let arg_count = chunk.code.get(offset + 2).copied().unwrap_or(0);
    let rendered = chunk
        .constants
        .get(constant as usize)
        .map_or_else(|| "?".to_owned(), |&value| value_to_string(heap, value));
    writeln!(out, "{name:<16} ({arg_count} args) {constant:4} '{rendered}'")?;
    Ok(offset + 3)
}

fn closure_instruction<W: Write>(
    out: &mut W,
    heap: &Heap,
    chunk: &Chunk,
    offset: usize,
) -> io::Result<usize> {
    let mut next = offset + 1;
    let constant = chunk.code.get(next).copied().unwrap_or(0);
    next += 1;
    let value = chunk.constants.get(constant as usize).copied();
    let rendered = value.map_or_else(|| "?".to_owned(), |value| value_to_string(heap, value));
    writeln!(out, "{:<16} {constant:4} {rendered}", "CLOSURE")?;

    let upvalue_count = value
        .and_then(|value| value.as_object())
        .map_or(0, |r| heap.function(r).upvalue_count as usize);
    for _ in 0..upvalue_count {
        let is_local = chunk.code.get(next).copied().unwrap_or(0);
        let index = chunk.code.get(next + 1).copied().unwrap_or(0);
        let kind = if is_local == 0 { "upvalue" } else { "local" };
        writeln!(out, "{:04}      |                     {kind} {index}", next)?;
        next += 2;
    }
    Ok(next)
}
