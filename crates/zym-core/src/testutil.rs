//! Test utilities for Zym
//!
//! Helpers for compiling and running Zym source in tests, with `print`
//! output captured instead of written to stdout.

use crate::compiler::{compile, CompileOptions};
use crate::config::{CompilerConfig, VmConfig};
use crate::value::Value;
use crate::vm::{with_output_capture, Vm};

/// Result type for test helpers
pub type TestResult<T> = Result<T, String>;

/// Module name used for test sources
pub const TEST_MODULE: &str = "test";

/// Compile and run `source` on `vm`
///
/// # Errors
/// Returns the rendered compile diagnostics or runtime error
pub fn run_on(vm: &mut Vm, source: &str, config: CompilerConfig) -> TestResult<Value> {
    let mut sink = Vec::new();
    let options = CompileOptions::new(TEST_MODULE).with_config(config);
    let function = compile(vm, source, options, &mut sink).map_err(|errors| {
        let rendered: Vec<String> = errors.iter().map(ToString::to_string).collect();
        format!("Compile error: {}", rendered.join("\n"))
    })?;
    vm.run(function).map_err(|e| format!("Runtime error: {e}"))
}

/// Run a Zym program on a fresh VM and return the script's result
///
/// # Errors
/// Returns error if compilation or execution fails
pub fn run_source(source: &str) -> TestResult<Value> {
    let mut vm = Vm::new(VmConfig::default());
    run_on(&mut vm, source, CompilerConfig::default())
}

/// Run a Zym program and return the lines it printed
///
/// # Errors
/// Returns error if compilation or execution fails
pub fn run_capture(source: &str) -> TestResult<Vec<String>> {
    run_capture_with(source, CompilerConfig::default(), VmConfig::default())
}

/// [`run_capture`] with explicit compiler and VM configuration
///
/// # Errors
/// Returns error if compilation or execution fails
pub fn run_capture_with(
    source: &str,
    compiler: CompilerConfig,
    config: VmConfig,
) -> TestResult<Vec<String>> {
    let mut vm = Vm::new(config);
    let (result, output) = with_output_capture(|| run_on(&mut vm, source, compiler));
    result.map(|_| output.stdout)
}

/// Run a Zym program and expect a number result
///
/// # Errors
/// Returns error if execution fails or the result is not a number
pub fn eval_number(source: &str) -> TestResult<f64> {
    let value = run_source(source)?;
    value
        .as_number()
        .ok_or_else(|| format!("Expected number, got {}", value.primitive_type_name()))
}

/// Compile a program that must fail and return its rendered diagnostics
///
/// # Errors
/// Returns error if the program compiles
pub fn compile_errors(source: &str) -> TestResult<Vec<String>> {
    let mut vm = Vm::new(VmConfig::default());
    let mut sink = Vec::new();
    match compile(&mut vm, source, CompileOptions::new(TEST_MODULE), &mut sink) {
        Ok(_) => Err("Expected compile errors, but compilation succeeded".to_string()),
        Err(errors) => Ok(errors.iter().map(ToString::to_string).collect()),
    }
}

/// Run a program that must fail at runtime and return the error message
///
/// # Errors
/// Returns error if the program fails to compile or runs successfully
pub fn expect_runtime_error(source: &str) -> TestResult<String> {
    let mut vm = Vm::new(VmConfig::default());
    let mut sink = Vec::new();
    let function = compile(&mut vm, source, CompileOptions::new(TEST_MODULE), &mut sink)
        .map_err(|errors| format!("Compile error: {errors:?}"))?;
    let (result, _) = with_output_capture(|| vm.run(function));
    match result {
        Ok(value) => Err(format!("Expected runtime error, got {}", vm.format_value(value))),
        Err(error) => Ok(error.kind.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn captures_printed_lines() {
        let lines = run_capture("print(1)\nprint(\"two\")").unwrap();
        assert_eq!(lines, vec!["1", "two"]);
    }

    #[test]
    fn reports_compile_errors() {
        let errors = compile_errors("break").unwrap();
        assert_eq!(errors, vec!["[test] line 1: 'break' outside of a loop"]);
        assert!(compile_errors("var a = 1").is_err());
    }

    #[test]
    fn reports_runtime_errors() {
        let message = expect_runtime_error("var a = 1\na()").unwrap();
        assert!(message.contains("number"), "{message}");
    }
}
