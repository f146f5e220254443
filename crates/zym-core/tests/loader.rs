//! Programs assembled from several modules

use std::fs;

use zym_core::{
    load_program, run_program, with_output_capture, CompilerConfig, FsProvider, MemoryProvider,
    Vm, VmConfig, ZymError,
};

fn run_captured(entry: &str, provider: &MemoryProvider) -> Result<Vec<String>, ZymError> {
    let mut vm = Vm::new(VmConfig::default());
    let mut sink = Vec::new();
    let (result, output) = with_output_capture(|| {
        run_program(&mut vm, entry, provider, CompilerConfig::default(), &mut sink)
    });
    result.map(|_| output.stdout)
}

#[test]
fn test_imports_from_the_filesystem() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir(dir.path().join("lib")).unwrap();
    fs::write(
        dir.path().join("lib/math.zym"),
        "func square(x) { return x * x }\nreturn {square: square}\n",
    )
    .unwrap();
    let main = dir.path().join("main.zym");
    fs::write(&main, "import math from \"lib/math.zym\";\nprint(math.square(7))\n").unwrap();

    let mut vm = Vm::new(VmConfig::default());
    let mut sink = Vec::new();
    let entry = main.to_string_lossy();
    let (result, output) = with_output_capture(|| {
        run_program(&mut vm, &entry, &FsProvider, CompilerConfig::default(), &mut sink)
    });
    result.unwrap();
    assert_eq!(output.stdout, vec!["49"]);
}

#[test]
fn test_nested_relative_imports() {
    let provider = MemoryProvider::new()
        .with_module("main.zym", "import a from \"lib/a.zym\"\nprint(a.value)")
        .with_module("lib/a.zym", "import b from \"b.zym\"\nreturn {value: b.base + 1}")
        .with_module("lib/b.zym", "return {base: 41}");

    assert_eq!(run_captured("main.zym", &provider).unwrap(), vec!["42"]);

    let program = load_program("main.zym", &provider).unwrap();
    assert_eq!(program.modules, vec!["lib/b.zym", "lib/a.zym", "main.zym"]);
}

#[test]
fn test_module_bodies_run_on_every_import() {
    let provider = MemoryProvider::new()
        .with_module(
            "main.zym",
            "var first = import(\"counter.zym\")\nvar second = import(\"counter.zym\")\n\
             print(first == second)",
        )
        .with_module("counter.zym", "print(\"loading\")\nreturn []");

    assert_eq!(
        run_captured("main.zym", &provider).unwrap(),
        vec!["loading", "loading", "false"]
    );
}

#[test]
fn test_compile_errors_name_the_module() {
    let provider = MemoryProvider::new()
        .with_module("main.zym", "import lib from \"lib.zym\"\nprint(1)")
        .with_module("lib.zym", "var ok = 1\nbreak\nreturn ok");

    let error = run_captured("main.zym", &provider).unwrap_err();
    let ZymError::Compile(errors) = &error else {
        panic!("expected compile errors, got {error}");
    };
    let rendered: Vec<String> = errors.iter().map(ToString::to_string).collect();
    assert_eq!(rendered, vec!["[lib.zym] line 2: 'break' outside of a loop"]);
}

#[test]
fn test_runtime_trace_names_the_module() {
    let provider = MemoryProvider::new()
        .with_module("main.zym", "import lib from \"lib.zym\"\n\nlib.fail()")
        .with_module(
            "lib.zym",
            "func fail() {\n    return null + 1\n}\nreturn {fail: fail}",
        );

    let error = run_captured("main.zym", &provider).unwrap_err();
    let ZymError::Runtime(error) = &error else {
        panic!("expected a runtime error, got {error}");
    };
    let top = &error.stack_trace[0];
    assert_eq!(top.function_name, "fail");
    assert_eq!(top.module, "lib.zym");
    assert_eq!(top.line, 2);
    let last = &error.stack_trace[error.stack_trace.len() - 1];
    assert_eq!(last.module, "main.zym");
    assert_eq!(last.line, 3);
}

#[test]
fn test_load_errors() {
    let provider = MemoryProvider::new()
        .with_module("a.zym", "import b from \"b.zym\"")
        .with_module("b.zym", "import a from \"a.zym\"");
    let error = load_program("a.zym", &provider).unwrap_err();
    assert_eq!(error.to_string(), "circular import: a.zym -> b.zym -> a.zym");

    let provider = MemoryProvider::new().with_module("main.zym", "import gone from \"gone.zym\"");
    let error = load_program("main.zym", &provider).unwrap_err();
    assert!(error.to_string().starts_with("cannot read module 'gone.zym'"), "{error}");
}
