// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Single-pass compiler from Lox source to bytecode.
//!
//! The parser is a Pratt parser that emits instructions as it goes; there
//! is no AST. Each function being compiled has its own compiler state
//! (locals, upvalues, scope depth) on a stack, and its half-built function
//! object already lives in the heap: the compiler keeps it reachable
//! through the heap's protected-root stash so a collection triggered by an
//! allocation mid-compile cannot free it.
//!
//! Errors are reported to the VM's diagnostic sink as they are found; the
//! parser then synchronizes to the next statement boundary and keeps going,
//! so one run surfaces as many errors as possible.


pub mod disassemble;
pub mod scanner;

use std::fmt;

use crate::bytecode::op;
use crate::object::{Function, Obj, ObjRef};
use crate::value::Value;
use crate::vm::Vm;
use self::scanner::{Scanner, Token, TokenKind};

/// Maximum locals per function: slots are one-byte operands.
const MAX_LOCALS: usize = 256;

/// Maximum upvalues per function: indices are one-byte operands.
const MAX_UPVALUES: usize = 256;

/// Compilation failed.
///
/// This is a marker: the diagnostics were already written to the VM's
/// error sink while parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompileError;

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "compile error")
    }
}

impl std::error::Error for CompileError {}

/// Compile a program into a top-level function object.
///
/// # Errors
///
/// Returns an error if the source contains any syntax error; the
/// diagnostics are on the VM's error sink.
pub fn compile(vm: &mut Vm, source: &str) -> Result<ObjRef, CompileError> {
    let mut parser = Parser::new(vm, source);
    parser.begin_compiler(FunctionKind::Script);
    parser.advance();
    while !parser.matches(TokenKind::Eof) {
        parser.declaration();
    }
    let function = parser.end_compiler();
    if parser.had_error {
        Err(CompileError)
    } else {
        Ok(function)
    }
}

/// Operator precedence, lowest to highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Precedence {
    None,
    Assignment,
    Or,
    And,
    Equality,
    Comparison,
    Term,
    Factor,
    Unary,
    Call,
    Primary,
}

impl Precedence {
    const fn next(self) -> Self {
        match self {
            Self::None => Self::Assignment,
            Self::Assignment => Self::Or,
            Self::Or => Self::And,
            Self::And => Self::Equality,
            Self::Equality => Self::Comparison,
            Self::Comparison => Self::Term,
            Self::Term => Self::Factor,
            Self::Factor => Self::Unary,
            Self::Unary | Self::Call | Self::Primary => Self::Primary,
        }
    }
}

/// What kind of function is being compiled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FunctionKind {
    /// The implicit top-level function.
    Script,
    /// A `fun` declaration.
    Function,
    /// A method; slot zero holds `this`.
    Method,
    /// An `init` method; returns `this` implicitly.
    Initializer,
}

/// A local variable in the current compiler.
struct Local<'a> {
    name: &'a str,
    /// Scope depth, or `None` while declared but not yet initialized.
    depth: Option<u32>,
    /// Whether any nested function captures this local.
    is_captured: bool,
}

/// An upvalue descriptor recorded while compiling a function.
#[derive(Clone, Copy, PartialEq, Eq)]
struct CompilerUpvalue {
    /// Slot in the enclosing function's locals, or index into its upvalues.
    index: u8,
    /// True if `index` refers to an enclosing local.
    is_local: bool,
}

/// Per-function compiler state.
struct FnCompiler<'a> {
    /// The function object under construction, already heap-allocated.
    function: ObjRef,
    kind: FunctionKind,
    locals: Vec<Local<'a>>,
    upvalues: Vec<CompilerUpvalue>,
    scope_depth: u32,
}

/// Per-class compiler state, for `this`/`super` validity checks.
struct ClassCompiler {
    has_superclass: bool,
}

struct Parser<'a> {
    vm: &'a mut Vm,
    scanner: Scanner<'a>,
    current: Token<'a>,
    previous: Token<'a>,
    had_error: bool,
    panic_mode: bool,
    compilers: Vec<FnCompiler<'a>>,
    classes: Vec<ClassCompiler>,
}

impl<'a> Parser<'a> {
    fn new(vm: &'a mut Vm, source: &'a str) -> Self {
        Self {
            vm,
            scanner: Scanner::new(source),
            current: Token::empty(),
            previous: Token::empty(),
            had_error: false,
            panic_mode: false,
            compilers: Vec::new(),
            classes: Vec::new(),
        }
    }

    // --- Compiler stack ---

    /// Start compiling a function. For everything but the script, the
    /// function is named after the token just consumed.
    fn begin_compiler(&mut self, kind: FunctionKind) {
        let name = if kind == FunctionKind::Script {
            None
        } else {
            Some(self.vm.intern(self.previous.lexeme))
        };
        // The name must survive the function's own allocation; afterwards
        // the function keeps it reachable.
        if let Some(name) = name {
            self.vm.heap_mut().push_root(Value::Obj(name));
        }
        let function = self.vm.alloc(Obj::Function(Function {
            arity: 0,
            upvalue_count: 0,
            chunk: crate::bytecode::Chunk::new(),
            name,
        }));
        if name.is_some() {
            self.vm.heap_mut().pop_root();
        }
        self.vm.heap_mut().push_root(Value::Obj(function));

        // Slot zero belongs to the callee: `this` inside methods, unusable
        // otherwise.
        let slot_zero = Local {
            name: if matches!(kind, FunctionKind::Method | FunctionKind::Initializer) {
                "this"
            } else {
                ""
            },
            depth: Some(0),
            is_captured: false,
        };
        self.compilers.push(FnCompiler {
            function,
            kind,
            locals: vec![slot_zero],
            upvalues: Vec::new(),
            scope_depth: 0,
        });
    }

    /// Finish the current function: emit its implicit return, record the
    /// upvalue count, and emit the `CLOSURE` instruction into the enclosing
    /// function if there is one.
    fn end_compiler(&mut self) -> ObjRef {
        self.emit_return();
        let Some(compiler) = self.compilers.pop() else {
            // begin/end are always paired.
            return ObjRef::new(0);
        };
        let function = compiler.function;
        self.vm.heap_mut().function_mut(function).upvalue_count = compiler.upvalues.len() as u8;

        if !self.compilers.is_empty() {
            let constant = self.make_constant(Value::Obj(function));
            self.emit_bytes(op::CLOSURE, constant);
            for upvalue in &compiler.upvalues {
                self.emit_byte(u8::from(upvalue.is_local));
                self.emit_byte(upvalue.index);
            }
        }
        // Safe to unroot: the function is now either a constant of the
        // enclosing (rooted) function, or about to be handed to the caller.
        self.vm.heap_mut().pop_root();
        function
    }

    fn current(&self) -> &FnCompiler<'a> {
        let index = self.compilers.len() - 1;
        &self.compilers[index]
    }

    fn current_mut(&mut self) -> &mut FnCompiler<'a> {
        let index = self.compilers.len() - 1;
        &mut self.compilers[index]
    }

    // --- Token plumbing ---

    fn advance(&mut self) {
        self.previous = self.current;
        loop {
            self.current = self.scanner.scan_token();
            if self.current.kind != TokenKind::Error {
                break;
            }
            let message = self.current.lexeme;
            self.error_at(self.current, message);
        }
    }

    fn consume(&mut self, kind: TokenKind, message: &str) {
        if self.current.kind == kind {
            self.advance();
        } else {
            self.error_at(self.current, message);
        }
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.current.kind == kind
    }

    fn matches(&mut self, kind: TokenKind) -> bool {
        if !self.check(kind) {
            return false;
        }
        self.advance();
        true
    }

    // --- Error reporting ---

    fn error(&mut self, message: &str) {
        self.error_at(self.previous, message);
    }

    fn error_at_current(&mut self, message: &str) {
        self.error_at(self.current, message);
    }

    fn error_at(&mut self, token: Token<'_>, message: &str) {
        if self.panic_mode {
            return;
        }
        self.panic_mode = true;
        self.had_error = true;
        let location = match token.kind {
            TokenKind::Eof => " at end".to_owned(),
            TokenKind::Error => String::new(),
            _ => format!(" at '{}'", token.lexeme),
        };
        let line = token.line;
        let _ = writeln!(
            self.vm.diagnostics(),
            "[line {line}] Error{location}: {message}"
        );
    }

    /// Skip tokens until a likely statement boundary, leaving panic mode.
    fn synchronize(&mut self) {
        self.panic_mode = false;
        while self.current.kind != TokenKind::Eof {
            if self.previous.kind == TokenKind::Semicolon {
                return;
            }
            match self.current.kind {
                TokenKind::Class
                | TokenKind::Fun
                | TokenKind::Var
                | TokenKind::For
                | TokenKind::If
                | TokenKind::While
                | TokenKind::Print
                | TokenKind::Return => return,
                _ => self.advance(),
            }
        }
    }

    // --- Bytecode emission ---

    fn emit_byte(&mut self, byte: u8) {
        let function = self.current().function;
        let line = self.previous.line;
        self.vm
            .heap_mut()
            .function_mut(function)
            .chunk
            .write(byte, line);
    }

    fn emit_bytes(&mut self, a: u8, b: u8) {
        self.emit_byte(a);
        self.emit_byte(b);
    }

    fn emit_return(&mut self) {
        if self.current().kind == FunctionKind::Initializer {
            // An initializer returns its receiver.
            self.emit_bytes(op::GET_LOCAL, 0);
        } else {
            self.emit_byte(op::NIL);
        }
        self.emit_byte(op::RETURN);
    }

    fn emit_constant(&mut self, value: Value) {
        let constant = self.make_constant(value);
        self.emit_bytes(op::CONSTANT, constant);
    }

    fn make_constant(&mut self, value: Value) -> u8 {
        let function = self.current().function;
        match self
            .vm
            .heap_mut()
            .function_mut(function)
            .chunk
            .add_constant(value)
        {
            Some(index) => index,
            None => {
                self.error("Too many constants in one chunk.");
                0
            }
        }
    }

    fn current_code_len(&self) -> usize {
        let function = self.current().function;
        self.vm.heap().function(function).chunk.code.len()
    }

    /// Emit a jump with a placeholder offset; returns the offset's position
    /// for [`Parser::patch_jump`].
    fn emit_jump(&mut self, instruction: u8) -> usize {
        self.emit_byte(instruction);
        self.emit_byte(0xff);
        self.emit_byte(0xff);
        self.current_code_len() - 2
    }

    fn patch_jump(&mut self, offset: usize) {
        // Jump distance from just past the operand to the current end.
        let jump = self.current_code_len() - offset - 2;
        if jump > u16::MAX as usize {
            self.error("Too much code to jump over.");
        }
        let function = self.current().function;
        let chunk = &mut self.vm.heap_mut().function_mut(function).chunk;
        chunk.code[offset] = ((jump >> 8) & 0xff) as u8;
        chunk.code[offset + 1] = (jump & 0xff) as u8;
    }

    fn emit_loop(&mut self, loop_start: usize) {
        self.emit_byte(op::LOOP);
        let offset = self.current_code_len() - loop_start + 2;
        if offset > u16::MAX as usize {
            self.error("Loop body too large.");
        }
        self.emit_byte(((offset >> 8) & 0xff) as u8);
        self.emit_byte((offset & 0xff) as u8);
    }

    // --- Declarations and statements ---

    fn declaration(&mut self) {
        if self.matches(TokenKind::Class) {
            self.class_declaration();
        } else if self.matches(TokenKind::Fun) {
            self.fun_declaration();
        } else if self.matches(TokenKind::Var) {
            self.var_declaration();
        } else {
            self.statement();
        }
        if self.panic_mode {
            self.synchronize();
        }
    }

    fn class_declaration(&mut self) {
        self.consume(TokenKind::Identifier, "Expect class name.");
        let class_name = self.previous;
        let name_constant = self.identifier_constant(class_name.lexeme);
        self.declare_variable();
        self.emit_bytes(op::CLASS, name_constant);
        self.define_variable(name_constant);

        self.classes.push(ClassCompiler {
            has_superclass: false,
        });

        if self.matches(TokenKind::Less) {
            self.consume(TokenKind::Identifier, "Expect superclass name.");
            self.variable(false);
            if class_name.lexeme == self.previous.lexeme {
                self.error("A class can't inherit from itself.");
            }
            // The superclass lives in a scoped local named `super`, which
            // methods capture as an upvalue for super-dispatch.
            self.begin_scope();
            self.add_local("super");
            self.define_variable(0);
            self.named_variable(class_name.lexeme, false);
            self.emit_byte(op::INHERIT);
            if let Some(class) = self.classes.last_mut() {
                class.has_superclass = true;
            }
        }

        self.named_variable(class_name.lexeme, false);
        self.consume(TokenKind::LeftBrace, "Expect '{' before class body.");
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.method();
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after class body.");
        self.emit_byte(op::POP);

        let has_superclass = self.classes.last().is_some_and(|c| c.has_superclass);
        if has_superclass {
            self.end_scope();
        }
        self.classes.pop();
    }

    fn method(&mut self) {
        self.consume(TokenKind::Identifier, "Expect method name.");
        let constant = self.identifier_constant(self.previous.lexeme);
        let kind = if self.previous.lexeme == "init" {
            FunctionKind::Initializer
        } else {
            FunctionKind::Method
        };
        self.function(kind);
        self.emit_bytes(op::METHOD, constant);
    }

    fn fun_declaration(&mut self) {
        let global = self.parse_variable("Expect function name.");
        // A function may refer to itself; it is initialized immediately.
        self.mark_initialized();
        self.function(FunctionKind::Function);
        self.define_variable(global);
    }

    fn function(&mut self, kind: FunctionKind) {
        self.begin_compiler(kind);
        self.begin_scope();

        self.consume(TokenKind::LeftParen, "Expect '(' after function name.");
        if !self.check(TokenKind::RightParen) {
            loop {
                let function = self.current().function;
                let arity = self.vm.heap().function(function).arity;
                if arity == u8::MAX {
                    self.error_at_current("Can't have more than 255 parameters.");
                } else {
                    self.vm.heap_mut().function_mut(function).arity = arity + 1;
                }
                let constant = self.parse_variable("Expect parameter name.");
                self.define_variable(constant);
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expect ')' after parameters.");
        self.consume(TokenKind::LeftBrace, "Expect '{' before function body.");
        self.block();

        // No end_scope: the whole compiler goes away with its locals.
        self.end_compiler();
    }

    fn var_declaration(&mut self) {
        let global = self.parse_variable("Expect variable name.");
        if self.matches(TokenKind::Equal) {
            self.expression();
        } else {
            self.emit_byte(op::NIL);
        }
        self.consume(
            TokenKind::Semicolon,
            "Expect ';' after variable declaration.",
        );
        self.define_variable(global);
    }

    fn statement(&mut self) {
        if self.matches(TokenKind::Print) {
            self.print_statement();
        } else if self.matches(TokenKind::For) {
            self.for_statement();
        } else if self.matches(TokenKind::If) {
            self.if_statement();
        } else if self.matches(TokenKind::Return) {
            self.return_statement();
        } else if self.matches(TokenKind::While) {
            self.while_statement();
        } else if self.matches(TokenKind::LeftBrace) {
            self.begin_scope();
            self.block();
            self.end_scope();
        } else {
            self.expression_statement();
        }
    }

    fn block(&mut self) {
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.declaration();
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after block.");
    }

    fn print_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "Expect ';' after value.");
        self.emit_byte(op::PRINT);
    }

    fn expression_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "Expect ';' after expression.");
        self.emit_byte(op::POP);
    }

    fn if_statement(&mut self) {
        self.consume(TokenKind::LeftParen, "Expect '(' after 'if'.");
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after condition.");

        let then_jump = self.emit_jump(op::JUMP_IF_FALSE);
        self.emit_byte(op::POP);
        self.statement();
        let else_jump = self.emit_jump(op::JUMP);
        self.patch_jump(then_jump);
        self.emit_byte(op::POP);
        if self.matches(TokenKind::Else) {
            self.statement();
        }
        self.patch_jump(else_jump);
    }

    fn while_statement(&mut self) {
        let loop_start = self.current_code_len();
        self.consume(TokenKind::LeftParen, "Expect '(' after 'while'.");
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after condition.");

        let exit_jump = self.emit_jump(op::JUMP_IF_FALSE);
        self.emit_byte(op::POP);
        self.statement();
        self.emit_loop(loop_start);
        self.patch_jump(exit_jump);
        self.emit_byte(op::POP);
    }

    fn for_statement(&mut self) {
        self.begin_scope();
        self.consume(TokenKind::LeftParen, "Expect '(' after 'for'.");
        if self.matches(TokenKind::Semicolon) {
            // No initializer.
        } else if self.matches(TokenKind::Var) {
            self.var_declaration();
        } else {
            self.expression_statement();
        }

        let mut loop_start = self.current_code_len();
        let mut exit_jump = None;
        if !self.matches(TokenKind::Semicolon) {
            self.expression();
            self.consume(TokenKind::Semicolon, "Expect ';' after loop condition.");
            exit_jump = Some(self.emit_jump(op::JUMP_IF_FALSE));
            self.emit_byte(op::POP);
        }

        if !self.matches(TokenKind::RightParen) {
            // The increment runs after the body, so jump over it now and
            // loop back to it from the body's end.
            let body_jump = self.emit_jump(op::JUMP);
            let increment_start = self.current_code_len();
            self.expression();
            self.emit_byte(op::POP);
            self.consume(TokenKind::RightParen, "Expect ')' after for clauses.");
            self.emit_loop(loop_start);
            loop_start = increment_start;
            self.patch_jump(body_jump);
        }

        self.statement();
        self.emit_loop(loop_start);
        if let Some(exit_jump) = exit_jump {
            self.patch_jump(exit_jump);
            self.emit_byte(op::POP);
        }
        self.end_scope();
    }

    fn return_statement(&mut self) {
        if self.current().kind == FunctionKind::Script {
            self.error("Can't return from top-level code.");
        }
        if self.matches(TokenKind::Semicolon) {
            self.emit_return();
        } else {
            if self.current().kind == FunctionKind::Initializer {
                self.error("Can't return a value from an initializer.");
            }
            self.expression();
            self.consume(TokenKind::Semicolon, "Expect ';' after return value.");
            self.emit_byte(op::RETURN);
        }
    }

    // --- Scopes and variables ---

    fn begin_scope(&mut self) {
        self.current_mut().scope_depth += 1;
    }

    fn end_scope(&mut self) {
        self.current_mut().scope_depth -= 1;
        loop {
            let pop_captured = {
                let scope_depth = self.current().scope_depth;
                match self.current().locals.last() {
                    Some(local) if local.depth.is_none_or(|depth| depth > scope_depth) => {
                        Some(local.is_captured)
                    }
                    _ => None,
                }
            };
            match pop_captured {
                // A captured local is hoisted into its upvalue cell instead
                // of being discarded.
                Some(true) => self.emit_byte(op::CLOSE_UPVALUE),
                Some(false) => self.emit_byte(op::POP),
                None => break,
            }
            self.current_mut().locals.pop();
        }
    }

    /// Consume a variable name and declare it; returns the constant index
    /// of its name for globals, 0 for locals.
    fn parse_variable(&mut self, message: &str) -> u8 {
        self.consume(TokenKind::Identifier, message);
        self.declare_variable();
        if self.current().scope_depth > 0 {
            return 0;
        }
        self.identifier_constant(self.previous.lexeme)
    }

    fn identifier_constant(&mut self, name: &str) -> u8 {
        let name = self.vm.intern(name);
        self.make_constant(Value::Obj(name))
    }

    fn declare_variable(&mut self) {
        if self.current().scope_depth == 0 {
            return;
        }
        let name = self.previous.lexeme;
        let mut duplicate = false;
        for local in self.current().locals.iter().rev() {
            if let Some(depth) = local.depth {
                if depth < self.current().scope_depth {
                    break;
                }
            }
            if local.name == name {
                duplicate = true;
                break;
            }
        }
        if duplicate {
            self.error("Already a variable with this name in this scope.");
        }
        self.add_local(name);
    }

    fn add_local(&mut self, name: &'a str) {
        if self.current().locals.len() == MAX_LOCALS {
            self.error("Too many local variables in function.");
            return;
        }
        self.current_mut().locals.push(Local {
            name,
            depth: None,
            is_captured: false,
        });
    }

    fn mark_initialized(&mut self) {
        if self.current().scope_depth == 0 {
            return;
        }
        let depth = self.current().scope_depth;
        if let Some(local) = self.current_mut().locals.last_mut() {
            local.depth = Some(depth);
        }
    }

    fn define_variable(&mut self, global: u8) {
        if self.current().scope_depth > 0 {
            self.mark_initialized();
            return;
        }
        self.emit_bytes(op::DEFINE_GLOBAL, global);
    }

    fn resolve_local(&mut self, level: usize, name: &str) -> Option<u8> {
        let mut found = None;
        for (slot, local) in self.compilers[level].locals.iter().enumerate().rev() {
            if local.name == name {
                found = Some((slot, local.depth.is_none()));
                break;
            }
        }
        let (slot, uninitialized) = found?;
        if uninitialized {
            self.error("Can't read local variable in its own initializer.");
        }
        Some(slot as u8)
    }

    /// Resolve a name against enclosing functions, recording upvalue
    /// descriptors through every intermediate closure.
    fn resolve_upvalue(&mut self, level: usize, name: &str) -> Option<u8> {
        if level == 0 {
            return None;
        }
        if let Some(local) = self.resolve_local(level - 1, name) {
            self.compilers[level - 1].locals[local as usize].is_captured = true;
            return self.add_upvalue(level, local, true);
        }
        if let Some(upvalue) = self.resolve_upvalue(level - 1, name) {
            return self.add_upvalue(level, upvalue, false);
        }
        None
    }

    fn add_upvalue(&mut self, level: usize, index: u8, is_local: bool) -> Option<u8> {
        let descriptor = CompilerUpvalue { index, is_local };
        if let Some(existing) = self.compilers[level]
            .upvalues
            .iter()
            .position(|&u| u == descriptor)
        {
            return Some(existing as u8);
        }
        if self.compilers[level].upvalues.len() == MAX_UPVALUES {
            self.error("Too many closure variables in function.");
            return Some(0);
        }
        self.compilers[level].upvalues.push(descriptor);
        Some((self.compilers[level].upvalues.len() - 1) as u8)
    }

    // --- Expressions ---

    fn expression(&mut self) {
        self.parse_precedence(Precedence::Assignment);
    }

    fn parse_precedence(&mut self, precedence: Precedence) {
        self.advance();
        let can_assign = precedence <= Precedence::Assignment;
        if !self.prefix(self.previous.kind, can_assign) {
            self.error("Expect expression.");
            return;
        }
        while precedence <= infix_precedence(self.current.kind) {
            self.advance();
            self.infix(self.previous.kind, can_assign);
        }
        if can_assign && self.matches(TokenKind::Equal) {
            self.error("Invalid assignment target.");
        }
    }

    /// Dispatch a prefix parselet; returns false when the token starts no
    /// expression.
    fn prefix(&mut self, kind: TokenKind, can_assign: bool) -> bool {
        match kind {
            TokenKind::LeftParen => self.grouping(),
            TokenKind::Minus | TokenKind::Bang => self.unary(),
            TokenKind::Number => self.number(),
            TokenKind::String => self.string(),
            TokenKind::Nil | TokenKind::True | TokenKind::False => self.literal(),
            TokenKind::Identifier => self.variable(can_assign),
            TokenKind::This => self.this_(),
            TokenKind::Super => self.super_(),
            _ => return false,
        }
        true
    }

    fn infix(&mut self, kind: TokenKind, can_assign: bool) {
        match kind {
            TokenKind::Minus
            | TokenKind::Plus
            | TokenKind::Slash
            | TokenKind::Star
            | TokenKind::BangEqual
            | TokenKind::EqualEqual
            | TokenKind::Greater
            | TokenKind::GreaterEqual
            | TokenKind::Less
            | TokenKind::LessEqual => self.binary(),
            TokenKind::And => self.and_(),
            TokenKind::Or => self.or_(),
            TokenKind::LeftParen => self.call(),
            TokenKind::Dot => self.dot(can_assign),
            _ => {}
        }
    }

    fn grouping(&mut self) {
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after expression.");
    }

    fn unary(&mut self) {
        let operator = self.previous.kind;
        self.parse_precedence(Precedence::Unary);
        match operator {
            TokenKind::Minus => self.emit_byte(op::NEGATE),
            TokenKind::Bang => self.emit_byte(op::NOT),
            _ => {}
        }
    }

    fn binary(&mut self) {
        let operator = self.previous.kind;
        self.parse_precedence(infix_precedence(operator).next());
        match operator {
            TokenKind::Plus => self.emit_byte(op::ADD),
            TokenKind::Minus => self.emit_byte(op::SUBTRACT),
            TokenKind::Star => self.emit_byte(op::MULTIPLY),
            TokenKind::Slash => self.emit_byte(op::DIVIDE),
            TokenKind::BangEqual => self.emit_bytes(op::EQUAL, op::NOT),
            TokenKind::EqualEqual => self.emit_byte(op::EQUAL),
            TokenKind::Greater => self.emit_byte(op::GREATER),
            TokenKind::GreaterEqual => self.emit_bytes(op::LESS, op::NOT),
            TokenKind::Less => self.emit_byte(op::LESS),
            TokenKind::LessEqual => self.emit_bytes(op::GREATER, op::NOT),
            _ => {}
        }
    }

    fn and_(&mut self) {
        let end_jump = self.emit_jump(op::JUMP_IF_FALSE);
        self.emit_byte(op::POP);
        self.parse_precedence(Precedence::And);
        self.patch_jump(end_jump);
    }

    fn or_(&mut self) {
        let else_jump = self.emit_jump(op::JUMP_IF_FALSE);
        let end_jump = self.emit_jump(op::JUMP);
        self.patch_jump(else_jump);
        self.emit_byte(op::POP);
        self.parse_precedence(Precedence::Or);
        self.patch_jump(end_jump);
    }

    fn call(&mut self) {
        let arg_count = self.argument_list();
        self.emit_bytes(op::CALL, arg_count);
    }

    fn argument_list(&mut self) -> u8 {
        let mut arg_count: u8 = 0;
        if !self.check(TokenKind::RightParen) {
            loop {
                self.expression();
                if arg_count == u8::MAX {
                    self.error("Can't have more than 255 arguments.");
                } else {
                    arg_count += 1;
                }
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expect ')' after arguments.");
        arg_count
    }

    fn dot(&mut self, can_assign: bool) {
        self.consume(TokenKind::Identifier, "Expect property name after '.'.");
        let name = self.identifier_constant(self.previous.lexeme);
        if can_assign && self.matches(TokenKind::Equal) {
            self.expression();
            self.emit_bytes(op::SET_PROPERTY, name);
        } else if self.matches(TokenKind::LeftParen) {
            // Fused property access + call.
            let arg_count = self.argument_list();
            self.emit_bytes(op::INVOKE, name);
            self.emit_byte(arg_count);
        } else {
            self.emit_bytes(op::GET_PROPERTY, name);
        }
    }

    fn number(&mut self) {
        match self.previous.lexeme.parse::<f64>() {
            Ok(value) => self.emit_constant(Value::Number(value)),
            Err(_) => self.error("Invalid number literal."),
        }
    }

    fn string(&mut self) {
        let lexeme = self.previous.lexeme;
        // Trim the surrounding quotes.
        let content = &lexeme[1..lexeme.len() - 1];
        let string = self.vm.intern(content);
        self.emit_constant(Value::Obj(string));
    }

    fn literal(&mut self) {
        match self.previous.kind {
            TokenKind::Nil => self.emit_byte(op::NIL),
            TokenKind::True => self.emit_byte(op::TRUE),
            TokenKind::False => self.emit_byte(op::FALSE),
            _ => {}
        }
    }

    fn variable(&mut self, can_assign: bool) {
        self.named_variable(self.previous.lexeme, can_assign);
    }

    fn named_variable(&mut self, name: &'a str, can_assign: bool) {
        let level = self.compilers.len() - 1;
        let (get_op, set_op, arg) = if let Some(slot) = self.resolve_local(level, name) {
            (op::GET_LOCAL, op::SET_LOCAL, slot)
        } else if let Some(index) = self.resolve_upvalue(level, name) {
            (op::GET_UPVALUE, op::SET_UPVALUE, index)
        } else {
            let constant = self.identifier_constant(name);
            (op::GET_GLOBAL, op::SET_GLOBAL, constant)
        };

        if can_assign && self.matches(TokenKind::Equal) {
            self.expression();
            self.emit_bytes(set_op, arg);
        } else {
            self.emit_bytes(get_op, arg);
        }
    }

    fn this_(&mut self) {
        if self.classes.is_empty() {
            self.error("Can't use 'this' outside of a class.");
            return;
        }
        self.variable(false);
    }

    fn super_(&mut self) {
        if self.classes.is_empty() {
            self.error("Can't use 'super' outside of a class.");
        } else if !self.classes.last().is_some_and(|c| c.has_superclass) {
            self.error("Can't use 'super' in a class with no superclass.");
        }

        self.consume(TokenKind::Dot, "Expect '.' after 'super'.");
        self.consume(TokenKind::Identifier, "Expect superclass method name.");
        let name = self.identifier_constant(self.previous.lexeme);

        self.named_variable("this", false);
        if self.matches(TokenKind::LeftParen) {
            let arg_count = self.argument_list();
            self.named_variable("super", false);
            self.emit_bytes(op::SUPER_INVOKE, name);
            self.emit_byte(arg_count);
        } else {
            self.named_variable("super", false);
            self.emit_bytes(op::GET_SUPER, name);
        }
    }
}

/// Precedence an infix token binds with; `None` for non-infix tokens.
const fn infix_precedence(kind: TokenKind) -> Precedence {
    match kind {
        TokenKind::Minus | TokenKind::Plus => Precedence::Term,
        TokenKind::Slash | TokenKind::Star => Precedence::Factor,
        TokenKind::BangEqual | TokenKind::EqualEqual => Precedence::Equality,
        TokenKind::Greater
        | TokenKind::GreaterEqual
        | TokenKind::Less
        | TokenKind::LessEqual => Precedence::Comparison,
        TokenKind::And => Precedence::And,
        TokenKind::Or => Precedence::Or,
        TokenKind::LeftParen | TokenKind::Dot => Precedence::Call,
        _ => Precedence::None,
    }
}
