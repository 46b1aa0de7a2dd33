// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Command-line front end for the Lox VM.
//!
//! Runs a script when given a path, otherwise starts a REPL. Exit codes
//! follow the sysexits convention: 65 for compile errors, 70 for runtime
//! errors, 74 for unreadable input.

use std::fs;
use std::io;
use std::path::PathBuf;
use std::process;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use lox_vm::{InterpretError, Vm, repl};

/// Lox bytecode virtual machine.
#[derive(Parser)]
#[command(name = "lox", version, about)]
struct Args {
    /// Script to execute; starts a REPL when omitted.
    script: Option<PathBuf>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();
    let mut vm = Vm::new();

    match args.script {
        Some(path) => {
            let source = match fs::read_to_string(&path) {
                Ok(source) => source,
                Err(error) => {
                    eprintln!("Could not read {}: {error}", path.display());
                    process::exit(74);
                }
            };
            match vm.interpret(&source) {
                Ok(()) => {}
                Err(InterpretError::Compile) => process::exit(65),
                Err(InterpretError::Runtime) => process::exit(70),
            }
        }
        None => {
            let stdin = io::stdin();
            if let Err(error) = repl::run(&mut vm, stdin.lock()) {
                eprintln!("{error}");
                process::exit(74);
            }
        }
    }
}
