//! Module loader
//!
//! Imports are resolved textually before compilation. Every imported
//! module becomes a zero-argument function named after its encoded path,
//! and each import is rewritten into a call of that function:
//!
//! ```text
//! import math from "lib/math.zym";   =>  var math = __mod_lib_2fmath_2ezym();
//! var m = import("lib/math.zym");     =>  var m = __mod_lib_2fmath_2ezym();
//! ```
//!
//! Module functions are emitted dependencies first, followed by the entry
//! module's own code. Rewriting never changes the number of lines, so the
//! [`LineMap`] attributes each combined line to its module and line.
//! Calling a module function runs its body again; results are not cached.

mod line_map;

use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

use crate::compiler::CompileOptions;
use crate::error::{fatal, FatalError};

pub use line_map::LineMap;

/// Errors raised while assembling a program from its modules
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("cannot read module '{module}': {source}")]
    Read {
        module: String,
        #[source]
        source: io::Error,
    },

    #[error("circular import: {}", .chain.join(" -> "))]
    CircularImport { chain: Vec<String> },

    #[error("[{module}] line {line}: '{name}' is already imported")]
    DuplicateImport {
        module: String,
        line: u32,
        name: String,
    },
}

/// Where module sources come from
pub trait SourceProvider {
    /// Identity of the module `path` names when imported by `importer`
    /// (`None` for the entry module)
    fn resolve(&self, importer: Option<&str>, path: &str) -> String;

    /// Source text of a resolved module
    fn read(&self, module: &str) -> io::Result<String>;
}

/// Modules on the filesystem, imported relative to the importing file
#[derive(Debug, Clone, Copy, Default)]
pub struct FsProvider;

impl SourceProvider for FsProvider {
    fn resolve(&self, importer: Option<&str>, path: &str) -> String {
        resolve_relative(importer, path)
    }

    fn read(&self, module: &str) -> io::Result<String> {
        std::fs::read_to_string(module)
    }
}

/// In-memory modules keyed by normalized path
#[derive(Debug, Clone, Default)]
pub struct MemoryProvider {
    modules: HashMap<String, String>,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_module(mut self, path: &str, source: &str) -> Self {
        self.insert(path, source);
        self
    }

    pub fn insert(&mut self, path: &str, source: &str) {
        self.modules
            .insert(resolve_relative(None, path), source.to_string());
    }
}

impl SourceProvider for MemoryProvider {
    fn resolve(&self, importer: Option<&str>, path: &str) -> String {
        resolve_relative(importer, path)
    }

    fn read(&self, module: &str) -> io::Result<String> {
        self.modules.get(module).cloned().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("no module named '{module}'"))
        })
    }
}

/// `path` joined to the directory of `importer` and normalized lexically
fn resolve_relative(importer: Option<&str>, path: &str) -> String {
    let joined = match importer.and_then(|i| Path::new(i).parent()) {
        Some(dir) => dir.join(path),
        None => PathBuf::from(path),
    };
    let mut normalized = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if matches!(normalized.components().next_back(), Some(Component::Normal(_))) {
                    normalized.pop();
                } else {
                    normalized.push("..");
                }
            }
            other => normalized.push(other),
        }
    }
    normalized.to_string_lossy().into_owned()
}

/// Name of the function wrapping `module`. Letters and digits are kept,
/// `_` doubles and every other byte becomes `_` plus two hex digits.
pub fn module_function_name(module: &str) -> String {
    let mut name = String::from("__mod_");
    for byte in module.bytes() {
        match byte {
            b'_' => name.push_str("__"),
            b if b.is_ascii_alphanumeric() => name.push(char::from(b)),
            b => name.push_str(&format!("_{b:02x}")),
        }
    }
    name
}

/// A program assembled from its entry module and everything it imports
#[derive(Debug, Clone)]
pub struct Program {
    /// Resolved entry module
    pub entry: String,
    /// Combined source handed to the compiler
    pub source: String,
    pub line_map: LineMap,
    /// Every module, dependencies before their importers
    pub modules: Vec<String>,
}

impl Program {
    /// Compiler options attributing diagnostics through the line map
    pub fn compile_options(&self) -> CompileOptions<'_> {
        CompileOptions::new(&self.entry).with_line_map(&self.line_map)
    }
}

/// Resolve every import reachable from `entry` into one program
///
/// # Errors
/// Returns the first unreadable module, circular import or duplicate
/// symbol import found.
pub fn load_program(entry: &str, provider: &dyn SourceProvider) -> Result<Program, LoadError> {
    let entry = provider.resolve(None, entry);
    let mut loader = Loader {
        provider,
        in_progress: Vec::new(),
        loaded: HashSet::new(),
        modules: Vec::new(),
        source: String::new(),
        line_map: LineMap::new(),
    };
    loader.load(&entry, true)?;
    tracing::debug!(
        entry = %entry,
        modules = loader.modules.len(),
        lines = loader.line_map.len(),
        "program assembled"
    );
    Ok(Program {
        entry,
        source: loader.source,
        line_map: loader.line_map,
        modules: loader.modules,
    })
}

/// `import name from "path";`
const STATEMENT_IMPORT: &str =
    r#"\bimport[ \t]+([A-Za-z_][A-Za-z0-9_]*)[ \t]+from[ \t]*"([^"\n]*)"[ \t]*;?"#;

/// `import("path")`
const EXPRESSION_IMPORT: &str = r#"\bimport[ \t]*\([ \t]*"([^"\n]*)"[ \t]*\)"#;

fn compiled(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| {
        Regex::new(pattern).unwrap_or_else(|e| {
            fatal(FatalError::Internal(format!("invalid import pattern: {e}")))
        })
    })
}

fn statement_import() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    compiled(&PATTERN, STATEMENT_IMPORT)
}

fn expression_import() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    compiled(&PATTERN, EXPRESSION_IMPORT)
}

/// One import found in a module's text
struct Import {
    start: usize,
    end: usize,
    /// Bound name for `import name from "path"`
    name: Option<String>,
    path: String,
}

struct Loader<'p> {
    provider: &'p dyn SourceProvider,
    in_progress: Vec<String>,
    loaded: HashSet<String>,
    modules: Vec<String>,
    source: String,
    line_map: LineMap,
}

impl Loader<'_> {
    fn load(&mut self, module: &str, is_entry: bool) -> Result<(), LoadError> {
        if let Some(start) = self.in_progress.iter().position(|m| m == module) {
            let mut chain: Vec<String> = self.in_progress.iter().skip(start).cloned().collect();
            chain.push(module.to_string());
            tracing::debug!(chain = %chain.join(" -> "), "circular import");
            return Err(LoadError::CircularImport { chain });
        }
        if self.loaded.contains(module) {
            return Ok(());
        }

        tracing::debug!(module, "loading module");
        let text = self.provider.read(module).map_err(|source| LoadError::Read {
            module: module.to_string(),
            source,
        })?;

        self.in_progress.push(module.to_string());
        let rewritten = self.rewrite(module, &text)?;
        self.in_progress.pop();

        self.loaded.insert(module.to_string());
        self.modules.push(module.to_string());
        self.emit(module, &rewritten, is_entry);
        Ok(())
    }

    /// Load every import of `module` and replace it by a call
    fn rewrite(&mut self, module: &str, text: &str) -> Result<String, LoadError> {
        let imports = find_imports(module, text)?;
        let mut out = String::with_capacity(text.len());
        let mut last = 0;
        for import in imports {
            let resolved = self.provider.resolve(Some(module), &import.path);
            tracing::trace!(from = module, path = %import.path, %resolved, "import");
            self.load(&resolved, false)?;

            out.push_str(&text[last..import.start]);
            let call = module_function_name(&resolved);
            match import.name {
                Some(name) => out.push_str(&format!("var {name} = {call}();")),
                None => out.push_str(&format!("{call}()")),
            }
            last = import.end;
        }
        out.push_str(&text[last..]);
        Ok(out)
    }

    fn emit(&mut self, module: &str, text: &str, is_entry: bool) {
        let index = self.line_map.module_index(module);
        let mut count = 0;
        if !is_entry {
            self.source.push_str(&format!("func {}() {{\n", module_function_name(module)));
            self.line_map.push(index, 1);
        }
        for (i, line) in text.lines().enumerate() {
            self.source.push_str(line);
            self.source.push('\n');
            count = u32::try_from(i + 1).unwrap_or(u32::MAX);
            self.line_map.push(index, count);
        }
        if !is_entry {
            self.source.push_str("}\n");
            self.line_map.push(index, count.max(1));
        }
    }
}

/// Imports of `text` in source order
fn find_imports(module: &str, text: &str) -> Result<Vec<Import>, LoadError> {
    let mut imports: Vec<Import> = statement_import()
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            Some(Import {
                start: whole.start(),
                end: whole.end(),
                name: Some(caps.get(1)?.as_str().to_string()),
                path: caps.get(2)?.as_str().to_string(),
            })
        })
        .collect();
    imports.extend(expression_import().captures_iter(text).filter_map(|caps| {
        let whole = caps.get(0)?;
        Some(Import {
            start: whole.start(),
            end: whole.end(),
            name: None,
            path: caps.get(1)?.as_str().to_string(),
        })
    }));
    imports.sort_by_key(|import| import.start);

    let mut names = HashSet::new();
    for import in &imports {
        if let Some(name) = &import.name {
            if !names.insert(name.as_str()) {
                return Err(LoadError::DuplicateImport {
                    module: module.to_string(),
                    line: line_of(text, import.start),
                    name: name.clone(),
                });
            }
        }
    }
    Ok(imports)
}

fn line_of(text: &str, offset: usize) -> u32 {
    let newlines = text.bytes().take(offset).filter(|b| *b == b'\n').count();
    u32::try_from(newlines + 1).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoded_names_are_identifiers() {
        assert_eq!(module_function_name("lib/math.zym"), "__mod_lib_2fmath_2ezym");
        assert_eq!(module_function_name("a_b"), "__mod_a__b");
        assert_ne!(module_function_name("a_2f"), module_function_name("a/"));
    }

    #[test]
    fn paths_resolve_relative_to_importer() {
        assert_eq!(resolve_relative(Some("lib/a.zym"), "b.zym"), "lib/b.zym");
        assert_eq!(resolve_relative(Some("lib/a.zym"), "../c.zym"), "c.zym");
        assert_eq!(resolve_relative(Some("a.zym"), "./b.zym"), "b.zym");
        assert_eq!(resolve_relative(None, "../x.zym"), "../x.zym");
    }

    #[test]
    fn imports_become_module_calls() {
        let provider = MemoryProvider::new()
            .with_module("main.zym", "import util from \"util.zym\";\nprint(util)\n")
            .with_module("util.zym", "return 42\n");
        let program = load_program("main.zym", &provider).unwrap();
        let expected = "func __mod_util_2ezym() {\nreturn 42\n}\n\
                        var util = __mod_util_2ezym();\nprint(util)\n";
        assert_eq!(program.source, expected);
        assert_eq!(program.modules, vec!["util.zym", "main.zym"]);
        assert_eq!(program.line_map.resolve(2), Some(("util.zym", 1)));
        assert_eq!(program.line_map.resolve(5), Some(("main.zym", 2)));
    }

    #[test]
    fn expression_imports_are_rewritten_in_place() {
        let provider = MemoryProvider::new()
            .with_module("main.zym", "var x = import( \"lib.zym\" ) + 1\n")
            .with_module("lib.zym", "return 1\n");
        let program = load_program("main.zym", &provider).unwrap();
        assert!(program.source.ends_with("var x = __mod_lib_2ezym() + 1\n"));
    }

    #[test]
    fn shared_dependencies_load_once() {
        let provider = MemoryProvider::new()
            .with_module("main.zym", "import a from \"a.zym\"\nimport b from \"b.zym\"\n")
            .with_module("a.zym", "import c from \"c.zym\"\nreturn c\n")
            .with_module("b.zym", "import c from \"c.zym\"\nreturn c\n")
            .with_module("c.zym", "return 3\n");
        let program = load_program("main.zym", &provider).unwrap();
        assert_eq!(program.modules, vec!["c.zym", "a.zym", "b.zym", "main.zym"]);
        assert_eq!(program.source.matches("func __mod_c_2ezym()").count(), 1);
    }

    #[test]
    fn cycles_report_the_chain() {
        let provider = MemoryProvider::new()
            .with_module("a.zym", "import b from \"b.zym\"\n")
            .with_module("b.zym", "import a from \"a.zym\"\n");
        let error = load_program("a.zym", &provider).unwrap_err();
        assert_eq!(error.to_string(), "circular import: a.zym -> b.zym -> a.zym");
    }

    #[test]
    fn duplicate_symbol_imports_are_rejected() {
        let provider = MemoryProvider::new()
            .with_module("main.zym", "import m from \"a.zym\"\n\nimport m from \"b.zym\"\n")
            .with_module("a.zym", "")
            .with_module("b.zym", "");
        let error = load_program("main.zym", &provider).unwrap_err();
        assert!(matches!(
            error,
            LoadError::DuplicateImport { ref name, line: 3, .. } if name == "m"
        ));
    }

    #[test]
    fn missing_modules_name_the_path() {
        let provider = MemoryProvider::new().with_module("main.zym", "import(\"gone.zym\")\n");
        let error = load_program("main.zym", &provider).unwrap_err();
        assert!(error.to_string().starts_with("cannot read module 'gone.zym'"));
    }
}
