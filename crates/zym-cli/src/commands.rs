//! Subcommand implementations

use anyhow::{anyhow, bail, Context, Result};
use std::fs;
use std::io::{self, Write};
use std::path::Path;

use zym_core::bytecode::{decode_function, disassemble_function, read_function, write_function};
use zym_core::object::ObjRef;
use zym_core::{compile, load_program, Config, FsProvider, Value, Vm};

/// Name of the configuration file looked up next to the entry module
pub const CONFIG_FILE: &str = "zym.toml";

/// Configuration for one invocation: the config file (explicit, or found
/// next to `source`) with command-line overrides applied
pub fn load_config(
    explicit: Option<&Path>,
    source: &Path,
    tco: Option<&str>,
    stress_gc: bool,
) -> Result<Config> {
    let mut config = match explicit {
        Some(path) => Config::from_path(path)
            .with_context(|| format!("failed to load config '{}'", path.display()))?,
        None => {
            let candidate = source
                .parent()
                .unwrap_or_else(|| Path::new("."))
                .join(CONFIG_FILE);
            if candidate.is_file() {
                tracing::debug!(path = %candidate.display(), "using config file");
                Config::from_path(&candidate)
                    .with_context(|| format!("failed to load config '{}'", candidate.display()))?
            } else {
                Config::default()
            }
        }
    };
    if let Some(mode) = tco {
        config.compiler.tco = mode.parse()?;
    }
    if stress_gc {
        config.vm.gc.stress = true;
    }
    Ok(config)
}

/// Load and compile the program rooted at `path`. Diagnostics go to `sink`.
fn compile_entry(
    vm: &mut Vm,
    path: &Path,
    config: &Config,
    sink: &mut dyn Write,
) -> Result<ObjRef> {
    let entry = path.to_string_lossy();
    let program = load_program(&entry, &FsProvider)
        .with_context(|| format!("failed to load '{}'", path.display()))?;
    tracing::debug!(modules = program.modules.len(), "program loaded");

    let options = program.compile_options().with_config(config.compiler);
    match compile(vm, &program.source, options, sink) {
        Ok(function) => Ok(function),
        Err(errors) => bail!(
            "could not compile '{}' due to {} previous error(s)",
            path.display(),
            errors.len()
        ),
    }
}

fn run_compiled(vm: &mut Vm, function: ObjRef) -> Result<Value> {
    vm.run(function).map_err(|e| anyhow!("{e}"))
}

fn print_result(vm: &Vm, value: Value) {
    if value != Value::NULL {
        println!("{}", vm.format_value(value));
    }
}

/// `zym run`
pub fn run_file(path: &Path, config: &Config) -> Result<()> {
    let mut vm = Vm::new(config.vm);
    let function = compile_entry(&mut vm, path, config, &mut io::stderr())?;
    let value = run_compiled(&mut vm, function)?;
    print_result(&vm, value);
    Ok(())
}

/// `zym check`
pub fn check_file(path: &Path, config: &Config) -> Result<()> {
    let mut vm = Vm::new(config.vm);
    compile_entry(&mut vm, path, config, &mut io::stderr())?;
    println!("{}: ok", path.display());
    Ok(())
}

/// Text or JSON listing of the program's bytecode
pub fn disassembly(path: &Path, config: &Config, json: bool) -> Result<String> {
    let mut vm = Vm::new(config.vm);
    let function = compile_entry(&mut vm, path, config, &mut io::stderr())?;
    if json {
        let decoded = decode_function(vm.heap(), function)
            .ok_or_else(|| anyhow!("compiled program is not a function"))?;
        Ok(serde_json::to_string_pretty(&decoded)?)
    } else {
        Ok(disassemble_function(vm.heap(), function))
    }
}

/// `zym disasm`
pub fn disasm_file(path: &Path, config: &Config, json: bool) -> Result<()> {
    println!("{}", disassembly(path, config, json)?);
    Ok(())
}

/// `zym build`
pub fn build_file(path: &Path, output: &Path, config: &Config) -> Result<()> {
    let mut vm = Vm::new(config.vm);
    let function = compile_entry(&mut vm, path, config, &mut io::stderr())?;
    let bytes = write_function(&vm, function)
        .with_context(|| format!("failed to serialize '{}'", path.display()))?;
    fs::write(output, &bytes)
        .with_context(|| format!("failed to write '{}'", output.display()))?;
    tracing::info!(output = %output.display(), bytes = bytes.len(), "bytecode written");
    Ok(())
}

/// Load a bytecode file and run it, returning the program's result
pub fn exec_bytes(vm: &mut Vm, path: &Path) -> Result<Value> {
    let bytes = fs::read(path).with_context(|| format!("failed to read '{}'", path.display()))?;
    let function = read_function(vm, &bytes)
        .with_context(|| format!("failed to load bytecode '{}'", path.display()))?;
    run_compiled(vm, function)
}

/// `zym exec`
pub fn exec_file(path: &Path, config: &Config) -> Result<()> {
    let mut vm = Vm::new(config.vm);
    let value = exec_bytes(&mut vm, path)?;
    print_result(&vm, value);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use zym_core::TcoMode;

    fn write(dir: &Path, name: &str, text: &str) -> std::path::PathBuf {
        let path = dir.join(name);
        fs::write(&path, text).unwrap();
        path
    }

    #[test]
    fn config_is_found_next_to_the_source() {
        let dir = tempfile::tempdir().unwrap();
        let main = write(dir.path(), "main.zym", "print(1)");
        assert_eq!(load_config(None, &main, None, false).unwrap(), Config::default());

        write(dir.path(), CONFIG_FILE, "[compiler]\ntco = \"smart\"\n");
        let config = load_config(None, &main, None, true).unwrap();
        assert_eq!(config.compiler.tco, TcoMode::Smart);
        assert!(config.vm.gc.stress);

        let config = load_config(None, &main, Some("off"), false).unwrap();
        assert_eq!(config.compiler.tco, TcoMode::Off);
        assert!(load_config(None, &main, Some("sometimes"), false).is_err());
    }

    #[test]
    fn compile_errors_are_written_to_the_sink() {
        let dir = tempfile::tempdir().unwrap();
        let main = write(dir.path(), "main.zym", "var a = 1\nbreak\n");
        let mut vm = Vm::default();
        let mut sink = Vec::new();
        let error = compile_entry(&mut vm, &main, &Config::default(), &mut sink).unwrap_err();
        assert!(error.to_string().contains("1 previous error"), "{error}");
        let diagnostics = String::from_utf8(sink).unwrap();
        assert!(diagnostics.contains("line 2: 'break' outside of a loop"), "{diagnostics}");
    }

    #[test]
    fn built_bytecode_runs() {
        let dir = tempfile::tempdir().unwrap();
        let main = write(
            dir.path(),
            "main.zym",
            "import util from \"util.zym\"\nreturn util.twice(21)\n",
        );
        write(dir.path(), "util.zym", "func twice(x) { return x * 2 }\nreturn {twice: twice}\n");
        let output = dir.path().join("main.zymb");

        build_file(&main, &output, &Config::default()).unwrap();
        let bytes = fs::read(&output).unwrap();
        assert_eq!(&bytes[..4], b"ZYMB");

        let mut vm = Vm::default();
        assert_eq!(exec_bytes(&mut vm, &output).unwrap(), Value::number(42.0));
    }

    #[test]
    fn disassembly_as_json() {
        let dir = tempfile::tempdir().unwrap();
        let main = write(dir.path(), "main.zym", "func add(a, b) { return a + b }\nadd(1, 2)\n");
        let json = disassembly(&main, &Config::default(), true).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["functions"][0]["name"], "add");
        assert_eq!(parsed["functions"][0]["arity"], 2);

        let text = disassembly(&main, &Config::default(), false).unwrap();
        assert!(text.contains("ADD"), "{text}");
    }
}
