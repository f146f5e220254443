//! Zym Core - language engine for the Zym scripting language
//!
//! This crate provides:
//! - Lexer and parser producing the AST
//! - Compiler lowering the AST to register-based bytecode
//! - Bytecode disassembler and serializer
//! - VM executing bytecode, with a mark-sweep garbage collected heap
//! - Module loader resolving imports into a single program

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Lexer module - tokenization of Zym source code
pub mod lexer;

/// Abstract Syntax Tree - parsed representation of Zym source code
pub mod ast;

/// Parser module - converts tokens into AST
pub mod parser;

/// Bytecode module - instruction set, disassembler and serializer
pub mod bytecode;

/// Compiler module - AST to bytecode
pub mod compiler;

/// Tagged values
pub mod value;

/// Heap object model
pub mod object;

/// Garbage collection module - mark-sweep heap
pub mod gc;

/// Virtual Machine module - bytecode execution
pub mod vm;

/// Module loader - import resolution
pub mod loader;

/// Configuration (`zym.toml`)
pub mod config;

/// Crate-level errors
pub mod error;

/// Test utilities - helpers for testing Zym code
pub mod testutil;

/// Convenience re-export of the compiler entry point
pub use compiler::{compile, CompileError, CompileOptions};

/// Convenience re-export of configuration
pub use config::{CompilerConfig, Config, GcConfig, TcoMode, VmConfig};

/// Convenience re-export of errors
pub use error::{Result, ZymError};

/// Convenience re-export of the loader
pub use loader::{load_program, FsProvider, MemoryProvider, Program, SourceProvider};

pub use value::Value;

/// Convenience re-export of VM
pub use vm::{ExecutionState, RuntimeError, Vm};

/// Convenience re-export of output capture utilities
pub use vm::{with_output_capture, OutputCapture};

use std::io::Write;

/// Compile `source` as module `module` and run it to completion
///
/// Diagnostics are written to `sink` as they are found.
///
/// # Errors
/// Returns the compile errors or the runtime error that stopped execution
pub fn run_source(
    vm: &mut Vm,
    source: &str,
    module: &str,
    config: CompilerConfig,
    sink: &mut dyn Write,
) -> Result<Value> {
    let options = CompileOptions::new(module).with_config(config);
    let function = compile(vm, source, options, sink)?;
    Ok(vm.run(function)?)
}

/// Load `entry` and its imports through `provider`, compile and run it
///
/// # Errors
/// Returns the load, compile or runtime error that stopped the program
pub fn run_program(
    vm: &mut Vm,
    entry: &str,
    provider: &dyn SourceProvider,
    config: CompilerConfig,
    sink: &mut dyn Write,
) -> Result<Value> {
    let program = load_program(entry, provider)?;
    let options = program.compile_options().with_config(config);
    let function = compile(vm, &program.source, options, sink)?;
    Ok(vm.run(function)?)
}
