// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Bytecode virtual machine for Lox.
//!
//! The VM owns all execution state: the operand stack, the call frames, the
//! globals, the open-upvalue list and the object heap. A single dispatch
//! loop fetches one instruction from the current frame and executes it;
//! every malformed-state condition surfaces as a [`RuntimeError`] rather
//! than undefined behavior.
//!
//! Allocation goes through [`Vm::alloc`] and [`Vm::intern`], which run a
//! garbage collection when the heap reports pressure. Any value that must
//! survive an allocation is kept reachable through the operand stack or the
//! heap's protected-root stash before the allocation happens.

#[cfg(test)]
mod vm_test;

use std::fmt;
use std::io::{self, Write};

use crate::bytecode::op;
use crate::compiler::{self, CompileError};
use crate::heap::Heap;
use crate::natives::{self, NativeFn};
use crate::object::{BoundMethod, Class, Closure, Instance, Native, Obj, ObjRef};
use crate::object::{Upvalue, UpvalueState};
use crate::table::Table;
use crate::value::{Value, write_value};

/// Maximum call depth.
pub const FRAMES_MAX: usize = 64;

/// Maximum operand stack depth.
pub const STACK_MAX: usize = FRAMES_MAX * 256;

/// One active function invocation.
///
/// `base` indexes the callee's own slot on the operand stack; arguments and
/// locals follow it.
#[derive(Clone, Copy, Debug)]
struct CallFrame {
    /// The closure being executed.
    closure: ObjRef,
    /// Offset of the next instruction byte in the closure's chunk.
    ip: usize,
    /// Stack slot of the callee value itself.
    base: usize,
}

/// Runtime error during VM execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    /// Invalid opcode encountered.
    InvalidOpcode(u8),
    /// Instruction pointer ran off the current chunk.
    IpOutOfBounds,
    /// Constant operand missing or of an impossible variant.
    InvalidConstant,
    /// Operand stack or call depth limit exceeded.
    StackOverflow,
    /// An instruction needed more operands than the stack holds.
    StackUnderflow,
    /// Operand does not satisfy an instruction's type precondition.
    TypeError(&'static str),
    /// Read or assignment of a global that was never defined.
    UndefinedVariable(String),
    /// Property access that is neither a field nor a method.
    UndefinedProperty(String),
    /// The callee is not a closure, class, bound method or native.
    NotCallable,
    /// Wrong number of arguments in a call.
    ArityMismatch {
        /// Number of parameters the callee expects.
        expected: usize,
        /// Number of arguments actually provided.
        got: usize,
    },
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidOpcode(opcode) => write!(f, "Unknown opcode {opcode}."),
            Self::IpOutOfBounds => write!(f, "Instruction pointer out of bounds."),
            Self::InvalidConstant => write!(f, "Malformed constant reference in bytecode."),
            Self::StackOverflow => write!(f, "Stack overflow."),
            Self::StackUnderflow => write!(f, "Operand stack underflow."),
            Self::TypeError(message) => write!(f, "{message}"),
            Self::UndefinedVariable(name) => write!(f, "Undefined variable '{name}'."),
            Self::UndefinedProperty(name) => write!(f, "Undefined property '{name}'."),
            Self::NotCallable => write!(f, "Can only call functions and classes."),
            Self::ArityMismatch { expected, got } => {
                write!(f, "Expected {expected} arguments but got {got}.")
            }
        }
    }
}

impl std::error::Error for RuntimeError {}

/// Why [`Vm::interpret`] did not run to completion.
///
/// Diagnostics have already been written to the VM's error sink by the time
/// the caller sees this.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterpretError {
    /// The compiler reported one or more errors.
    Compile,
    /// Execution stopped on a runtime error.
    Runtime,
}

impl fmt::Display for InterpretError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Compile => write!(f, "compile error"),
            Self::Runtime => write!(f, "runtime error"),
        }
    }
}

impl std::error::Error for InterpretError {}

/// The virtual machine.
pub struct Vm {
    heap: Heap,
    stack: Vec<Value>,
    frames: Vec<CallFrame>,
    globals: Table,
    /// Head of the open-upvalue list, ordered by descending stack slot.
    open_upvalues: Option<ObjRef>,
    /// Interned `"init"`, used for constructor dispatch.
    init_string: ObjRef,
    out: Box<dyn Write>,
    err: Box<dyn Write>,
}

impl Vm {
    /// Create a VM writing program output to stdout and diagnostics to
    /// stderr.
    #[must_use]
    pub fn new() -> Self {
        Self::with_output(Box::new(io::stdout()), Box::new(io::stderr()))
    }

    /// Create a VM with explicit output and diagnostic sinks.
    #[must_use]
    pub fn with_output(out: Box<dyn Write>, err: Box<dyn Write>) -> Self {
        let mut heap = Heap::new();
        let init_string = heap.intern("init");
        let mut vm = Self {
            heap,
            stack: Vec::with_capacity(256),
            frames: Vec::with_capacity(FRAMES_MAX),
            globals: Table::new(),
            open_upvalues: None,
            init_string,
            out,
            err,
        };
        vm.define_native("clock", natives::clock);
        vm
    }

    /// Toggle collect-on-every-allocation, the stress mode normally enabled
    /// by the `stress-gc` feature.
    pub fn set_stress_gc(&mut self, stress: bool) {
        self.heap.set_stress(stress);
    }

    /// The VM's object heap.
    #[must_use]
    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub(crate) fn heap_mut(&mut self) -> &mut Heap {
        &mut self.heap
    }

    /// Sink for compiler and runtime diagnostics.
    pub(crate) fn diagnostics(&mut self) -> &mut dyn Write {
        &mut *self.err
    }

    /// Register a native function under a global name.
    pub fn define_native(&mut self, name: &str, function: NativeFn) {
        let name_ref = self.intern(name);
        // The name must survive the native's allocation.
        self.heap.push_root(Value::Obj(name_ref));
        let native = self.alloc(Obj::Native(Native { function }));
        self.heap.pop_root();
        let hash = self.heap.string(name_ref).hash;
        self.globals.set(name_ref, hash, Value::Obj(native));
    }

    /// Compile and run a program.
    ///
    /// # Errors
    ///
    /// Returns [`InterpretError::Compile`] if the source does not compile
    /// and [`InterpretError::Runtime`] if execution stops on a runtime
    /// error. Either way the diagnostics are already on the error sink, and
    /// the VM is reset and ready for the next program.
    pub fn interpret(&mut self, source: &str) -> Result<(), InterpretError> {
        let function =
            compiler::compile(self, source).map_err(|_: CompileError| InterpretError::Compile)?;
        match self.run_program(function) {
            Ok(()) => Ok(()),
            Err(error) => {
                self.report_runtime_error(&error);
                Err(InterpretError::Runtime)
            }
        }
    }

    /// Allocate an object, collecting first if the heap is under pressure.
    pub(crate) fn alloc(&mut self, obj: Obj) -> ObjRef {
        if self.heap.should_collect() {
            self.collect_garbage();
        }
        self.heap.allocate(obj)
    }

    /// Intern a string, collecting first if a new allocation is needed
    /// while the heap is under pressure.
    pub(crate) fn intern(&mut self, chars: &str) -> ObjRef {
        if let Some(existing) = self.heap.find_interned(chars) {
            return existing;
        }
        if self.heap.should_collect() {
            self.collect_garbage();
        }
        self.heap.intern(chars)
    }

    // --- Execution ---

    /// Wrap the top-level function in a closure, establish the first frame
    /// and run to completion.
    fn run_program(&mut self, function: ObjRef) -> Result<(), RuntimeError> {
        self.push(Value::Obj(function))?;
        let closure = self.alloc(Obj::Closure(Closure {
            function,
            upvalues: Vec::new(),
        }));
        self.pop()?;
        self.push(Value::Obj(closure))?;
        self.call_closure(closure, 0)?;
        self.run()
    }

    #[expect(clippy::too_many_lines, reason = "single dispatch loop, one arm per opcode")]
    fn run(&mut self) -> Result<(), RuntimeError> {
        loop {
            #[cfg(feature = "trace-execution")]
            self.trace_instruction();

            let instruction = self.read_byte()?;
            match instruction {
                op::CONSTANT => {
                    let constant = self.read_constant()?;
                    self.push(constant)?;
                }
                op::NIL => self.push(Value::Nil)?,
                op::TRUE => self.push(Value::Bool(true))?,
                op::FALSE => self.push(Value::Bool(false))?,
                op::POP => {
                    self.pop()?;
                }
                op::GET_LOCAL => {
                    let slot = self.read_byte()? as usize;
                    let base = self.frame()?.base;
                    let value = self
                        .stack
                        .get(base + slot)
                        .copied()
                        .ok_or(RuntimeError::StackUnderflow)?;
                    self.push(value)?;
                }
                op::SET_LOCAL => {
                    let slot = self.read_byte()? as usize;
                    let base = self.frame()?.base;
                    let value = self.peek(0)?;
                    *self
                        .stack
                        .get_mut(base + slot)
                        .ok_or(RuntimeError::StackUnderflow)? = value;
                }
                op::GET_GLOBAL => {
                    let name = self.read_string()?;
                    let hash = self.heap.string(name).hash;
                    let Some(value) = self.globals.get(name, hash) else {
                        return Err(RuntimeError::UndefinedVariable(
                            self.heap.string(name).chars.clone(),
                        ));
                    };
                    self.push(value)?;
                }
                op::DEFINE_GLOBAL => {
                    let name = self.read_string()?;
                    let hash = self.heap.string(name).hash;
                    let value = self.peek(0)?;
                    self.globals.set(name, hash, value);
                    self.pop()?;
                }
                op::SET_GLOBAL => {
                    let name = self.read_string()?;
                    let hash = self.heap.string(name).hash;
                    let value = self.peek(0)?;
                    if self.globals.set(name, hash, value) {
                        // The key was new: undo and report. Assignment never
                        // creates a global.
                        self.globals.delete(name, hash);
                        return Err(RuntimeError::UndefinedVariable(
                            self.heap.string(name).chars.clone(),
                        ));
                    }
                }
                op::GET_UPVALUE => {
                    let index = self.read_byte()? as usize;
                    let cell = self.upvalue_cell(index)?;
                    let value = match self.heap.upvalue(cell).state {
                        UpvalueState::Open(slot) => self
                            .stack
                            .get(slot)
                            .copied()
                            .ok_or(RuntimeError::StackUnderflow)?,
                        UpvalueState::Closed(value) => value,
                    };
                    self.push(value)?;
                }
                op::SET_UPVALUE => {
                    let index = self.read_byte()? as usize;
                    let cell = self.upvalue_cell(index)?;
                    let value = self.peek(0)?;
                    match self.heap.upvalue(cell).state {
                        UpvalueState::Open(slot) => {
                            *self
                                .stack
                                .get_mut(slot)
                                .ok_or(RuntimeError::StackUnderflow)? = value;
                        }
                        UpvalueState::Closed(_) => {
                            self.heap.upvalue_mut(cell).state = UpvalueState::Closed(value);
                        }
                    }
                }
                op::GET_PROPERTY => {
                    let name = self.read_string()?;
                    let Some(instance) = self.as_instance(self.peek(0)?) else {
                        return Err(RuntimeError::TypeError("Only instances have properties."));
                    };
                    let hash = self.heap.string(name).hash;
                    if let Some(value) = self.heap.instance(instance).fields.get(name, hash) {
                        self.pop()?;
                        self.push(value)?;
                    } else {
                        let class = self.heap.instance(instance).class;
                        self.bind_method(class, name)?;
                    }
                }
                op::SET_PROPERTY => {
                    let name = self.read_string()?;
                    let Some(instance) = self.as_instance(self.peek(1)?) else {
                        return Err(RuntimeError::TypeError("Only instances have fields."));
                    };
                    let hash = self.heap.string(name).hash;
                    let value = self.peek(0)?;
                    self.heap
                        .instance_mut(instance)
                        .fields
                        .set(name, hash, value);
                    let value = self.pop()?;
                    self.pop()?;
                    self.push(value)?;
                }
                op::GET_SUPER => {
                    let name = self.read_string()?;
                    let superclass = self
                        .pop()?
                        .as_object()
                        .ok_or(RuntimeError::InvalidConstant)?;
                    self.bind_method(superclass, name)?;
                }
                op::EQUAL => {
                    let b = self.pop()?;
                    let a = self.pop()?;
                    self.push(Value::Bool(a == b))?;
                }
                op::GREATER => self.binary_number_op(|a, b| Value::Bool(a > b))?,
                op::LESS => self.binary_number_op(|a, b| Value::Bool(a < b))?,
                op::ADD => {
                    if self.is_string(self.peek(0)?) && self.is_string(self.peek(1)?) {
                        self.concatenate()?;
                    } else if self.peek(0)?.is_number() && self.peek(1)?.is_number() {
                        self.binary_number_op(|a, b| Value::Number(a + b))?;
                    } else {
                        return Err(RuntimeError::TypeError(
                            "Operands must be two numbers or two strings.",
                        ));
                    }
                }
                op::SUBTRACT => self.binary_number_op(|a, b| Value::Number(a - b))?,
                op::MULTIPLY => self.binary_number_op(|a, b| Value::Number(a * b))?,
                op::DIVIDE => self.binary_number_op(|a, b| Value::Number(a / b))?,
                op::NOT => {
                    let value = self.pop()?;
                    self.push(Value::Bool(value.is_falsey()))?;
                }
                op::NEGATE => {
                    let Some(n) = self.peek(0)?.as_number() else {
                        return Err(RuntimeError::TypeError("Operand must be a number."));
                    };
                    self.pop()?;
                    self.push(Value::Number(-n))?;
                }
                op::PRINT => {
                    let value = self.pop()?;
                    let Self { out, heap, .. } = self;
                    let _ = write_value(out, heap, value);
                    let _ = writeln!(out);
                }
                op::JUMP => {
                    let offset = self.read_short()? as usize;
                    self.frame_mut()?.ip += offset;
                }
                op::JUMP_IF_FALSE => {
                    let offset = self.read_short()? as usize;
                    if self.peek(0)?.is_falsey() {
                        self.frame_mut()?.ip += offset;
                    }
                }
                op::LOOP => {
                    let offset = self.read_short()? as usize;
                    let frame = self.frame_mut()?;
                    frame.ip = frame
                        .ip
                        .checked_sub(offset)
                        .ok_or(RuntimeError::IpOutOfBounds)?;
                }
                op::CALL => {
                    let arg_count = self.read_byte()? as usize;
                    let callee = self.peek(arg_count)?;
                    self.call_value(callee, arg_count)?;
                }
                op::INVOKE => {
                    let name = self.read_string()?;
                    let arg_count = self.read_byte()? as usize;
                    self.invoke(name, arg_count)?;
                }
                op::SUPER_INVOKE => {
                    let name = self.read_string()?;
                    let arg_count = self.read_byte()? as usize;
                    let superclass = self
                        .pop()?
                        .as_object()
                        .ok_or(RuntimeError::InvalidConstant)?;
                    self.invoke_from_class(superclass, name, arg_count)?;
                }
                op::CLOSURE => {
                    let function = self
                        .read_constant()?
                        .as_object()
                        .ok_or(RuntimeError::InvalidConstant)?;
                    let upvalue_count = self.heap.function(function).upvalue_count as usize;
                    let closure = self.alloc(Obj::Closure(Closure {
                        function,
                        upvalues: Vec::with_capacity(upvalue_count),
                    }));
                    self.push(Value::Obj(closure))?;
                    for _ in 0..upvalue_count {
                        let is_local = self.read_byte()? != 0;
                        let index = self.read_byte()? as usize;
                        let captured = if is_local {
                            let base = self.frame()?.base;
                            self.capture_upvalue(base + index)
                        } else {
                            let enclosing = self.frame()?.closure;
                            self.heap
                                .closure(enclosing)
                                .upvalues
                                .get(index)
                                .copied()
                                .ok_or(RuntimeError::InvalidConstant)?
                        };
                        self.heap.closure_mut(closure).upvalues.push(captured);
                    }
                }
                op::CLOSE_UPVALUE => {
                    let top = self
                        .stack
                        .len()
                        .checked_sub(1)
                        .ok_or(RuntimeError::StackUnderflow)?;
                    self.close_upvalues(top);
                    self.pop()?;
                }
                op::RETURN => {
                    let result = self.pop()?;
                    let base = self.frame()?.base;
                    self.close_upvalues(base);
                    self.frames.pop();
                    if self.frames.is_empty() {
                        // Pop the script closure and halt.
                        self.pop()?;
                        return Ok(());
                    }
                    self.stack.truncate(base);
                    self.push(result)?;
                }
                op::CLASS => {
                    let name = self.read_string()?;
                    let class = self.alloc(Obj::Class(Class {
                        name,
                        methods: Table::new(),
                    }));
                    self.push(Value::Obj(class))?;
                }
                op::INHERIT => {
                    let Some(superclass) = self.as_class(self.peek(1)?) else {
                        return Err(RuntimeError::TypeError("Superclass must be a class."));
                    };
                    let subclass = self
                        .peek(0)?
                        .as_object()
                        .ok_or(RuntimeError::InvalidConstant)?;
                    // Copy-down inheritance: the subclass snapshots the
                    // superclass methods at declaration time.
                    let methods = self.heap.class(superclass).methods.clone();
                    self.heap.class_mut(subclass).methods.add_all(&methods);
                    self.pop()?;
                }
                op::METHOD => {
                    let name = self.read_string()?;
                    let method = self.peek(0)?;
                    let class = self
                        .peek(1)?
                        .as_object()
                        .ok_or(RuntimeError::InvalidConstant)?;
                    let hash = self.heap.string(name).hash;
                    self.heap.class_mut(class).methods.set(name, hash, method);
                    self.pop()?;
                }
                other => return Err(RuntimeError::InvalidOpcode(other)),
            }
        }
    }

    // --- Calling convention ---

    fn call_value(&mut self, callee: Value, arg_count: usize) -> Result<(), RuntimeError> {
        let Value::Obj(r) = callee else {
            return Err(RuntimeError::NotCallable);
        };
        match self.heap.get(r) {
            Obj::BoundMethod(bound) => {
                let receiver = bound.receiver;
                let method = bound.method;
                let slot = self.callee_slot(arg_count)?;
                self.stack[slot] = receiver;
                self.call_closure(method, arg_count)
            }
            Obj::Class(_) => {
                let instance = self.alloc(Obj::Instance(Instance {
                    class: r,
                    fields: Table::new(),
                }));
                let slot = self.callee_slot(arg_count)?;
                self.stack[slot] = Value::Obj(instance);
                let hash = self.heap.string(self.init_string).hash;
                match self.heap.class(r).methods.get(self.init_string, hash) {
                    Some(initializer) => {
                        let initializer = initializer
                            .as_object()
                            .ok_or(RuntimeError::InvalidConstant)?;
                        self.call_closure(initializer, arg_count)
                    }
                    None if arg_count != 0 => Err(RuntimeError::ArityMismatch {
                        expected: 0,
                        got: arg_count,
                    }),
                    None => Ok(()),
                }
            }
            Obj::Closure(_) => self.call_closure(r, arg_count),
            Obj::Native(native) => {
                let function = native.function;
                let first = self
                    .stack
                    .len()
                    .checked_sub(arg_count)
                    .ok_or(RuntimeError::StackUnderflow)?;
                let result = function(&self.stack[first..]);
                // Collapse the callee and argument window.
                self.stack.truncate(first.saturating_sub(1));
                self.push(result)
            }
            _ => Err(RuntimeError::NotCallable),
        }
    }

    fn call_closure(&mut self, closure: ObjRef, arg_count: usize) -> Result<(), RuntimeError> {
        let function = self.heap.closure(closure).function;
        let arity = self.heap.function(function).arity as usize;
        if arg_count != arity {
            return Err(RuntimeError::ArityMismatch {
                expected: arity,
                got: arg_count,
            });
        }
        if self.frames.len() == FRAMES_MAX {
            return Err(RuntimeError::StackOverflow);
        }
        let base = self.callee_slot(arg_count)?;
        self.frames.push(CallFrame {
            closure,
            ip: 0,
            base,
        });
        Ok(())
    }

    fn invoke(&mut self, name: ObjRef, arg_count: usize) -> Result<(), RuntimeError> {
        let Some(instance) = self.as_instance(self.peek(arg_count)?) else {
            return Err(RuntimeError::TypeError("Only instances have methods."));
        };
        let hash = self.heap.string(name).hash;
        // A field shadows any method of the same name.
        if let Some(field) = self.heap.instance(instance).fields.get(name, hash) {
            let slot = self.callee_slot(arg_count)?;
            self.stack[slot] = field;
            return self.call_value(field, arg_count);
        }
        let class = self.heap.instance(instance).class;
        self.invoke_from_class(class, name, arg_count)
    }

    fn invoke_from_class(
        &mut self,
        class: ObjRef,
        name: ObjRef,
        arg_count: usize,
    ) -> Result<(), RuntimeError> {
        let hash = self.heap.string(name).hash;
        let Some(method) = self.heap.class(class).methods.get(name, hash) else {
            return Err(RuntimeError::UndefinedProperty(
                self.heap.string(name).chars.clone(),
            ));
        };
        let method = method.as_object().ok_or(RuntimeError::InvalidConstant)?;
        self.call_closure(method, arg_count)
    }

    fn bind_method(&mut self, class: ObjRef, name: ObjRef) -> Result<(), RuntimeError> {
        let hash = self.heap.string(name).hash;
        let Some(method) = self.heap.class(class).methods.get(name, hash) else {
            return Err(RuntimeError::UndefinedProperty(
                self.heap.string(name).chars.clone(),
            ));
        };
        let method = method.as_object().ok_or(RuntimeError::InvalidConstant)?;
        let receiver = self.peek(0)?;
        let bound = self.alloc(Obj::BoundMethod(BoundMethod { receiver, method }));
        self.pop()?;
        self.push(Value::Obj(bound))
    }

    // --- Upvalues ---

    /// Find or create the upvalue covering a stack slot. The open list is
    /// ordered by descending slot, so the walk stops at the first cell at
    /// or below the target.
    fn capture_upvalue(&mut self, slot: usize) -> ObjRef {
        let mut prev: Option<ObjRef> = None;
        let mut current = self.open_upvalues;
        while let Some(r) = current {
            let upvalue = self.heap.upvalue(r);
            match upvalue.state {
                UpvalueState::Open(open_slot) if open_slot > slot => {
                    prev = Some(r);
                    current = upvalue.next;
                }
                _ => break,
            }
        }
        if let Some(r) = current {
            if matches!(self.heap.upvalue(r).state, UpvalueState::Open(s) if s == slot) {
                return r;
            }
        }
        let created = self.alloc(Obj::Upvalue(Upvalue {
            state: UpvalueState::Open(slot),
            next: current,
        }));
        match prev {
            None => self.open_upvalues = Some(created),
            Some(p) => self.heap.upvalue_mut(p).next = Some(created),
        }
        created
    }

    /// Close every open upvalue at or above `last`: copy the stack value
    /// into the cell, redirect it, and unlink it from the open list.
    fn close_upvalues(&mut self, last: usize) {
        while let Some(r) = self.open_upvalues {
            let upvalue = self.heap.upvalue(r);
            let UpvalueState::Open(slot) = upvalue.state else {
                break;
            };
            if slot < last {
                break;
            }
            let next = upvalue.next;
            let value = self.stack.get(slot).copied().unwrap_or(Value::Nil);
            let cell = self.heap.upvalue_mut(r);
            cell.state = UpvalueState::Closed(value);
            cell.next = None;
            self.open_upvalues = next;
        }
    }

    /// The current closure's upvalue cell at `index`.
    fn upvalue_cell(&self, index: usize) -> Result<ObjRef, RuntimeError> {
        let closure = self.frame()?.closure;
        self.heap
            .closure(closure)
            .upvalues
            .get(index)
            .copied()
            .ok_or(RuntimeError::InvalidConstant)
    }

    // --- Garbage collection ---

    /// Run one full stop-the-world collection cycle.
    fn collect_garbage(&mut self) {
        #[cfg(feature = "log-gc")]
        let before = self.heap.bytes_allocated();
        #[cfg(feature = "log-gc")]
        tracing::debug!(bytes = before, "gc begin");

        // Roots: the operand stack, every frame's closure, the open-upvalue
        // list, the globals, the init sentinel, and whatever the compiler
        // has stashed as protected.
        for index in 0..self.stack.len() {
            let value = self.stack[index];
            self.heap.mark_value(value);
        }
        for index in 0..self.frames.len() {
            let closure = self.frames[index].closure;
            self.heap.mark_object(closure);
        }
        let mut upvalue = self.open_upvalues;
        while let Some(r) = upvalue {
            self.heap.mark_object(r);
            upvalue = self.heap.upvalue(r).next;
        }
        self.heap.mark_table(&self.globals);
        self.heap.mark_object(self.init_string);
        self.heap.mark_protected();

        self.heap.trace_references();
        self.heap.remove_white_strings();
        self.heap.sweep();

        #[cfg(feature = "log-gc")]
        tracing::debug!(
            collected = before - self.heap.bytes_allocated(),
            remaining = self.heap.bytes_allocated(),
            "gc end"
        );
    }

    // --- Error reporting ---

    /// Print the error and a stack trace, newest frame first, then reset.
    fn report_runtime_error(&mut self, error: &RuntimeError) {
        let Self {
            err, heap, frames, ..
        } = self;
        let _ = writeln!(err, "{error}");
        for frame in frames.iter().rev() {
            let function = heap.function(heap.closure(frame.closure).function);
            let line = function.chunk.line(frame.ip.saturating_sub(1));
            match function.name {
                Some(name) => {
                    let _ = writeln!(err, "[line {line}] in {}()", heap.string(name).chars);
                }
                None => {
                    let _ = writeln!(err, "[line {line}] in script");
                }
            }
        }
        self.reset_stack();
    }

    fn reset_stack(&mut self) {
        self.stack.clear();
        self.frames.clear();
        self.open_upvalues = None;
    }

    // --- Stack and frame primitives ---

    fn push(&mut self, value: Value) -> Result<(), RuntimeError> {
        if self.stack.len() >= STACK_MAX {
            return Err(RuntimeError::StackOverflow);
        }
        self.stack.push(value);
        Ok(())
    }

    fn pop(&mut self) -> Result<Value, RuntimeError> {
        self.stack.pop().ok_or(RuntimeError::StackUnderflow)
    }

    fn peek(&self, distance: usize) -> Result<Value, RuntimeError> {
        self.stack
            .len()
            .checked_sub(1 + distance)
            .and_then(|index| self.stack.get(index))
            .copied()
            .ok_or(RuntimeError::StackUnderflow)
    }

    /// Stack slot of a callee sitting below `arg_count` arguments.
    fn callee_slot(&self, arg_count: usize) -> Result<usize, RuntimeError> {
        self.stack
            .len()
            .checked_sub(arg_count + 1)
            .ok_or(RuntimeError::StackUnderflow)
    }

    fn frame(&self) -> Result<&CallFrame, RuntimeError> {
        self.frames.last().ok_or(RuntimeError::IpOutOfBounds)
    }

    fn frame_mut(&mut self) -> Result<&mut CallFrame, RuntimeError> {
        self.frames.last_mut().ok_or(RuntimeError::IpOutOfBounds)
    }

    fn read_byte(&mut self) -> Result<u8, RuntimeError> {
        let index = self
            .frames
            .len()
            .checked_sub(1)
            .ok_or(RuntimeError::IpOutOfBounds)?;
        let frame = self.frames[index];
        let function = self.heap.closure(frame.closure).function;
        let byte = self
            .heap
            .function(function)
            .chunk
            .code
            .get(frame.ip)
            .copied()
            .ok_or(RuntimeError::IpOutOfBounds)?;
        self.frames[index].ip += 1;
        Ok(byte)
    }

    fn read_short(&mut self) -> Result<u16, RuntimeError> {
        let hi = self.read_byte()?;
        let lo = self.read_byte()?;
        Ok((u16::from(hi) << 8) | u16::from(lo))
    }

    fn read_constant(&mut self) -> Result<Value, RuntimeError> {
        let index = self.read_byte()? as usize;
        let frame = self.frame()?;
        let function = self.heap.closure(frame.closure).function;
        self.heap
            .function(function)
            .chunk
            .constants
            .get(index)
            .copied()
            .ok_or(RuntimeError::InvalidConstant)
    }

    /// Read a constant that names something; always a string by
    /// construction of the compiler.
    fn read_string(&mut self) -> Result<ObjRef, RuntimeError> {
        match self.read_constant()? {
            Value::Obj(r) if matches!(self.heap.get(r), Obj::String(_)) => Ok(r),
            _ => Err(RuntimeError::InvalidConstant),
        }
    }

    // --- Operand helpers ---

    fn binary_number_op(&mut self, apply: fn(f64, f64) -> Value) -> Result<(), RuntimeError> {
        let (Some(b), Some(a)) = (self.peek(0)?.as_number(), self.peek(1)?.as_number()) else {
            return Err(RuntimeError::TypeError("Operands must be numbers."));
        };
        self.pop()?;
        self.pop()?;
        self.push(apply(a, b))
    }

    /// Concatenate the two strings on top of the stack. The operands stay
    /// on the stack until the result is interned, so a collection triggered
    /// by the allocation cannot free them.
    fn concatenate(&mut self) -> Result<(), RuntimeError> {
        let b = self
            .peek(0)?
            .as_object()
            .ok_or(RuntimeError::StackUnderflow)?;
        let a = self
            .peek(1)?
            .as_object()
            .ok_or(RuntimeError::StackUnderflow)?;
        let mut chars =
            String::with_capacity(self.heap.string(a).chars.len() + self.heap.string(b).chars.len());
        chars.push_str(&self.heap.string(a).chars);
        chars.push_str(&self.heap.string(b).chars);
        let result = self.intern(&chars);
        self.pop()?;
        self.pop()?;
        self.push(Value::Obj(result))
    }

    fn is_string(&self, value: Value) -> bool {
        value
            .as_object()
            .is_some_and(|r| matches!(self.heap.get(r), Obj::String(_)))
    }

    fn as_instance(&self, value: Value) -> Option<ObjRef> {
        value
            .as_object()
            .filter(|&r| matches!(self.heap.get(r), Obj::Instance(_)))
    }

    fn as_class(&self, value: Value) -> Option<ObjRef> {
        value
            .as_object()
            .filter(|&r| matches!(self.heap.get(r), Obj::Class(_)))
    }

    #[cfg(feature = "trace-execution")]
    fn trace_instruction(&self) {
        use std::fmt::Write as _;

        let Some(frame) = self.frames.last() else {
            return;
        };
        let mut stack_repr = String::new();
        for value in &self.stack {
            let _ = write!(
                stack_repr,
                "[ {} ]",
                crate::value::value_to_string(&self.heap, *value)
            );
        }
        let function = self.heap.closure(frame.closure).function;
        let chunk = &self.heap.function(function).chunk;
        let mut listing = Vec::new();
        let _ = crate::compiler::disassemble::disassemble_instruction(
            &mut listing,
            &self.heap,
            chunk,
            frame.ip,
        );
        tracing::trace!(
            stack = %stack_repr,
            instruction = %String::from_utf8_lossy(&listing).trim_end(),
            "execute"
        );
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}
