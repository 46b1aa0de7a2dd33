// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! REPL (Read-Eval-Print Loop) for Lox.
//!
//! Reads one line at a time, compiles and runs it against a persistent VM,
//! and keeps going after errors: diagnostics were already written to the
//! VM's error sink, and the VM resets itself for the next line.


use std::io::{self, BufRead, Write};

use crate::vm::Vm;

/// Run the REPL over any line source until end of input.
///
/// # Errors
///
/// Returns an error if reading input or writing the prompt fails.
pub fn run<R: BufRead>(vm: &mut Vm, mut input: R) -> io::Result<()> {
    let mut stdout = io::stdout();
    let mut line = String::new();
    loop {
        write!(stdout, "> ")?;
        stdout.flush()?;

        line.clear();
        if input.read_line(&mut line)? == 0 {
            writeln!(stdout)?;
            return Ok(());
        }
        if line.trim().is_empty() {
            continue;
        }

        // Errors were already reported; the next line starts fresh.
        let _ = vm.interpret(&line);
    }
}
