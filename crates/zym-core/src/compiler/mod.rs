//! Register-based bytecode compiler
//!
//! Lowers the AST to one [`Function`] per function body. Every function gets
//! a flat register file: R0 holds the running closure, parameters follow,
//! locals keep a stable register for their whole scope and temporaries are
//! allocated above them in LIFO order.
//!
//! Compilation runs in two passes per block: hoisting declares every
//! function, struct and enum of the block (so forward calls and mutual
//! recursion compile), then bodies are lowered. Diagnostics are written to
//! the error sink as they are found and compilation continues; any error
//! fails the whole unit and no bytecode is returned.

mod error;
mod expr;
mod goto;
mod overload;
mod reference;
mod roots;
mod scope;
mod stmt;
mod tailcall;
mod upvalue;

pub use error::{CompileError, CompileErrorKind};
pub use scope::{mangle, LocalKind};

use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::rc::Rc;

use crate::ast::{FunctionDecl, Ident, Program, Stmt, StmtKind};
use crate::bytecode::{Chunk, Instruction, OpCode};
use crate::config::{CompilerConfig, TcoMode};
use crate::error::{fatal, FatalError};
use crate::lexer::{LineIndex, Span};
use crate::loader::LineMap;
use crate::object::{Function, Obj, ObjRef, Qualifier, StructSchema};
use crate::parser::Parser;
use crate::value::Value;
use crate::vm::Vm;

use goto::LabelTable;
use overload::OverloadSets;
use roots::CompilerRoots;
use tailcall::PendingTailCall;
use scope::{BindingInfo, Scopes, MAX_REGISTER};
use upvalue::UpvalueTable;

/// Options for one compilation
#[derive(Debug, Clone, Copy)]
pub struct CompileOptions<'a> {
    /// Module name for lines the line map does not cover
    pub module: &'a str,
    /// Attribution of combined-source lines back to their modules
    pub line_map: Option<&'a LineMap>,
    pub config: CompilerConfig,
}

impl<'a> CompileOptions<'a> {
    pub fn new(module: &'a str) -> Self {
        Self {
            module,
            line_map: None,
            config: CompilerConfig::default(),
        }
    }

    #[must_use]
    pub fn with_line_map(mut self, line_map: &'a LineMap) -> Self {
        self.line_map = Some(line_map);
        self
    }

    #[must_use]
    pub fn with_config(mut self, config: CompilerConfig) -> Self {
        self.config = config;
        self
    }
}

/// Compile `source` into a script function
///
/// The returned function is not rooted; wrap it in a closure (or otherwise
/// root it) before the next allocation.
pub fn compile<'a>(
    vm: &'a mut Vm,
    source: &str,
    options: CompileOptions<'a>,
    sink: &'a mut dyn Write,
) -> Result<ObjRef, Vec<CompileError>> {
    let mut compiler = Compiler::new(vm, source, options, sink);
    match Parser::parse_program(source) {
        Ok(program) => compiler.compile_program(&program),
        Err(errors) => {
            for error in errors {
                compiler.set_line(error.span);
                compiler.error(CompileErrorKind::Parse(error.kind));
            }
            Err(compiler.errors)
        }
    }
}

/// A struct or enum type visible to the compiler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TypeDef {
    Struct(ObjRef),
    Enum(ObjRef),
}

impl TypeDef {
    fn schema(self) -> ObjRef {
        match self {
            TypeDef::Struct(r) | TypeDef::Enum(r) => r,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct TypeBinding {
    name: String,
    depth: u32,
    def: TypeDef,
}

/// A global known to this compilation
#[derive(Debug, Clone)]
pub(crate) struct GlobalBinding {
    slot: u16,
    info: BindingInfo,
}

/// Loop information for break/continue
#[derive(Debug)]
struct LoopState {
    /// Continue target, when it precedes the body
    start: Option<usize>,

    /// Scope depth outside the loop body
    depth: u32,

    /// Jumps to patch to the loop exit
    breaks: Vec<usize>,

    /// Jumps to patch to the continue target once it is known
    continues: Vec<usize>,
}

/// Compiler state for a single function
pub(crate) struct FunctionState {
    chunk: Chunk,

    /// Source name; a call to it with the same arity is a self-call
    name: Option<String>,
    name_ref: Option<ObjRef>,
    module_ref: Option<ObjRef>,
    qualifiers: Vec<Qualifier>,

    scopes: Scopes,
    upvalues: UpvalueTable,
    loops: Vec<LoopState>,
    labels: LabelTable,

    /// Struct and enum types declared inside this function
    types: Vec<TypeBinding>,

    /// Tail-call mode currently in effect
    tco: TcoMode,

    /// Self tail calls to demote if the function ends up capturing anything
    safe_tail_calls: Vec<PendingTailCall>,

    is_script: bool,

    /// Register exhaustion already reported
    exhausted: bool,
}

impl FunctionState {
    fn new(
        name: Option<String>,
        name_ref: Option<ObjRef>,
        module_ref: Option<ObjRef>,
        tco: TcoMode,
        is_script: bool,
    ) -> Self {
        Self {
            chunk: Chunk::new(),
            name,
            name_ref,
            module_ref,
            qualifiers: Vec::new(),
            scopes: Scopes::new(),
            upvalues: UpvalueTable::new(),
            loops: Vec::new(),
            labels: LabelTable::new(),
            types: Vec::new(),
            tco,
            safe_tail_calls: Vec::new(),
            is_script,
            exhausted: false,
        }
    }
}

/// How a name resolved
#[derive(Debug, Clone)]
enum Resolved {
    Local { register: u8, info: BindingInfo },
    Upvalue { slot: u8, info: BindingInfo },
    /// The function being compiled, held in R0
    SelfRef,
    Type(TypeDef),
    Global { slot: u16, info: BindingInfo },
    /// Several overloads and no arity to choose one
    Overloads(Vec<Resolved>),
}

impl Resolved {
    fn info(&self) -> Option<&BindingInfo> {
        match self {
            Resolved::Local { info, .. }
            | Resolved::Upvalue { info, .. }
            | Resolved::Global { info, .. } => Some(info),
            _ => None,
        }
    }
}

/// Bytecode compiler
pub(crate) struct Compiler<'a> {
    vm: &'a mut Vm,
    sink: &'a mut dyn Write,
    options: CompileOptions<'a>,
    lines: LineIndex,

    /// Combined-source line of the node being compiled
    line: u32,

    /// Function being compiled last, its enclosing functions before it
    states: Vec<FunctionState>,

    overloads: OverloadSets,
    globals: HashMap<String, GlobalBinding>,
    global_types: Vec<TypeBinding>,

    errors: Vec<CompileError>,
}

impl<'a> Compiler<'a> {
    fn new(
        vm: &'a mut Vm,
        source: &str,
        options: CompileOptions<'a>,
        sink: &'a mut dyn Write,
    ) -> Self {
        Self {
            vm,
            sink,
            options,
            lines: LineIndex::new(source),
            line: 1,
            states: Vec::new(),
            overloads: OverloadSets::new(),
            globals: HashMap::new(),
            global_types: Vec::new(),
            errors: Vec::new(),
        }
    }

    fn compile_program(mut self, program: &Program) -> Result<ObjRef, Vec<CompileError>> {
        let module_ref = self.intern(self.options.module);
        let tco = self.options.config.tco;
        self.states
            .push(FunctionState::new(None, None, Some(module_ref), tco, true));

        self.hoist(&program.stmts);
        self.statements(&program.stmts, false);
        self.emit_abc(OpCode::ReturnNull, 0, 0, 0);
        let function = self.finish_function();

        if self.errors.is_empty() {
            Ok(function)
        } else {
            tracing::debug!(errors = self.errors.len(), "compilation failed");
            Err(self.errors)
        }
    }

    // ===== State access =====

    fn state(&self) -> &FunctionState {
        match self.states.last() {
            Some(state) => state,
            None => fatal(FatalError::Internal("no function being compiled".into())),
        }
    }

    fn state_mut(&mut self) -> &mut FunctionState {
        match self.states.last_mut() {
            Some(state) => state,
            None => fatal(FatalError::Internal("no function being compiled".into())),
        }
    }

    fn at_top_level(&self) -> bool {
        let state = self.state();
        state.is_script && state.scopes.depth() == 0
    }

    // ===== Diagnostics =====

    fn set_line(&mut self, span: Span) {
        self.line = self.lines.line(span.start);
    }

    /// Module and original line of a combined-source line
    fn locate(&self, line: u32) -> (&str, u32) {
        self.options
            .line_map
            .and_then(|map| map.resolve(line))
            .unwrap_or((self.options.module, line))
    }

    fn error(&mut self, kind: CompileErrorKind) {
        self.error_on_line(self.line, kind);
    }

    fn error_on_line(&mut self, line: u32, kind: CompileErrorKind) {
        let (module, original) = self.locate(line);
        let error = CompileError::new(kind, module, original);
        if let Err(e) = writeln!(self.sink, "{error}") {
            tracing::warn!(error = %e, "failed to write diagnostic");
        }
        self.errors.push(error);
    }

    // ===== Heap =====

    fn alloc(&mut self, obj: Obj) -> ObjRef {
        let roots = CompilerRoots {
            states: &self.states,
            global_types: &self.global_types,
            globals: &self.globals,
        };
        self.vm.alloc_with(obj, &[&roots])
    }

    fn intern(&mut self, text: &str) -> ObjRef {
        let roots = CompilerRoots {
            states: &self.states,
            global_types: &self.global_types,
            globals: &self.globals,
        };
        self.vm.intern_with(text, &[&roots])
    }

    // ===== Emission =====

    fn chunk_line(&self) -> u32 {
        if self.options.config.include_line_info {
            self.locate(self.line).1
        } else {
            0
        }
    }

    fn current_offset(&self) -> usize {
        self.state().chunk.current_offset()
    }

    fn emit(&mut self, instruction: Instruction) -> usize {
        let line = self.chunk_line();
        self.state_mut().chunk.write(instruction, line)
    }

    fn emit_abc(&mut self, op: OpCode, a: u8, b: u8, c: u8) -> usize {
        self.emit(Instruction::abc(op, a, b, c))
    }

    fn emit_abx(&mut self, op: OpCode, a: u8, bx: u16) -> usize {
        self.emit(Instruction::abx(op, a, bx))
    }

    fn emit_asbx(&mut self, op: OpCode, a: u8, sbx: i16) -> usize {
        self.emit(Instruction::asbx(op, a, sbx))
    }

    fn emit_word(&mut self, word: u32) {
        let line = self.chunk_line();
        self.state_mut().chunk.write_word(word, line);
    }

    fn emit_literal(&mut self, value: f64) {
        let line = self.chunk_line();
        self.state_mut().chunk.write_literal(value, line);
    }

    fn emit_move(&mut self, dst: u8, src: u8) {
        if dst != src {
            self.emit_abc(OpCode::Move, dst, src, 0);
        }
    }

    /// Emit a jump with a placeholder offset
    fn emit_jump(&mut self, op: OpCode, a: u8) -> usize {
        self.emit_asbx(op, a, 0)
    }

    /// Point the jump at `offset` to the next instruction
    fn patch_jump(&mut self, offset: usize) {
        let target = self.current_offset();
        self.patch_jump_to(offset, target);
    }

    fn patch_jump_to(&mut self, offset: usize, target: usize) {
        let distance = target as i64 - (offset as i64 + 1);
        let Ok(sbx) = i16::try_from(distance) else {
            self.error(CompileErrorKind::JumpTooLarge);
            return;
        };
        let chunk = &mut self.state_mut().chunk;
        match chunk.instruction(offset) {
            Some(jump) => chunk.patch(offset, jump.with_sbx(sbx)),
            None => fatal(FatalError::Internal(format!("no jump at offset {offset}"))),
        }
    }

    /// Emit a jump back to `target`
    fn emit_loop(&mut self, op: OpCode, a: u8, target: usize) {
        let offset = self.emit_jump(op, a);
        self.patch_jump_to(offset, target);
    }

    fn make_constant(&mut self, value: Value) -> u16 {
        match self.state_mut().chunk.add_constant(value) {
            Some(index) => index,
            None => {
                self.error(CompileErrorKind::TooManyConstants);
                0
            }
        }
    }

    fn string_constant(&mut self, text: &str) -> u16 {
        let r = self.intern(text);
        self.make_constant(Value::object(r))
    }

    fn load_constant(&mut self, dst: u8, value: Value) {
        let index = self.make_constant(value);
        self.emit_abx(OpCode::LoadK, dst, index);
    }

    // ===== Registers =====

    fn alloc_reg(&mut self) -> u8 {
        match self.state_mut().scopes.alloc() {
            Ok(register) => register,
            Err(kind) => {
                if !self.state().exhausted {
                    self.state_mut().exhausted = true;
                    self.error(kind);
                }
                (MAX_REGISTER - 1) as u8
            }
        }
    }

    fn temp_top(&self) -> u16 {
        self.state().scopes.save_temp_top()
    }

    fn restore_temps(&mut self, saved: u16) {
        self.state_mut().scopes.restore_temp_top(saved);
    }

    /// Whether `dst` can start a contiguous window that grows upward
    fn is_window_start(&self, dst: u8) -> bool {
        let scopes = &self.state().scopes;
        u16::from(dst) + 1 == scopes.temp_top() && !scopes.is_local_register(dst)
    }

    /// Claim registers up to `register` for a window being filled
    fn reserve_through(&mut self, register: u8) {
        if let Err(kind) = self.state_mut().scopes.reserve_through(register) {
            if !self.state().exhausted {
                self.state_mut().exhausted = true;
                self.error(kind);
            }
        }
    }

    // ===== Scopes =====

    fn begin_scope(&mut self) {
        self.state_mut().scopes.begin_scope();
    }

    /// Close the innermost scope, emitting upvalue cleanup when needed
    fn end_scope(&mut self) {
        let state = self.state_mut();
        let exit = state.scopes.end_scope();
        let depth = state.scopes.depth();
        state.types.retain(|t| t.depth <= depth);
        if let Some(register) = exit.close_from {
            self.emit_abc(OpCode::CloseUpvals, register, 0, 0);
        }
    }

    /// Declare a local in the register just allocated for it
    fn declare_local(&mut self, name: &Ident, register: u8, info: BindingInfo) {
        if let Err(kind) = self.state_mut().scopes.declare(&name.name, register, info) {
            self.set_line(name.span);
            self.error(kind);
        }
    }

    fn global_slot(&mut self, name: &str) -> u16 {
        let name_ref = self.intern(name);
        match self.vm.global_slot(name_ref) {
            Some(slot) => slot,
            None => {
                self.error(CompileErrorKind::TooManyGlobals);
                0
            }
        }
    }

    // ===== Types =====

    fn bind_type(&mut self, name: &str, def: TypeDef) {
        let binding = TypeBinding {
            name: name.to_string(),
            depth: self.state().scopes.depth(),
            def,
        };
        if self.at_top_level() {
            self.global_types.push(binding);
        } else {
            self.state_mut().types.push(binding);
        }
    }

    fn lookup_type(&self, name: &str) -> Option<TypeDef> {
        self.states
            .iter()
            .rev()
            .flat_map(|s| s.types.iter().rev())
            .chain(self.global_types.iter().rev())
            .find(|t| t.name == name)
            .map(|t| t.def)
    }

    fn declare_struct(&mut self, name: &Ident, fields: &[Ident]) {
        let mut seen = HashSet::new();
        for field in fields {
            if !seen.insert(field.name.as_str()) {
                self.set_line(field.span);
                self.error(CompileErrorKind::DuplicateFieldDecl {
                    name: name.name.clone(),
                    field: field.name.clone(),
                });
            }
        }

        let name_ref = self.intern(&name.name);
        self.vm.push_temp_root(Value::object(name_ref));
        let mut field_refs = Vec::with_capacity(fields.len());
        for field in fields {
            let r = self.intern(&field.name);
            self.vm.push_temp_root(Value::object(r));
            field_refs.push(r);
        }
        let schema = self.alloc(Obj::StructSchema(StructSchema::new(name_ref, field_refs)));
        self.vm.pop_temp_roots(fields.len() + 1);
        self.bind_type(&name.name, TypeDef::Struct(schema));
    }

    fn declare_enum(&mut self, name: &Ident, variants: &[Ident]) {
        if variants.len() > usize::from(u16::MAX) + 1 {
            self.error(CompileErrorKind::TooManyVariants(name.name.clone()));
            return;
        }
        let name_ref = self.intern(&name.name);
        self.vm.push_temp_root(Value::object(name_ref));
        let mut variant_refs = Vec::with_capacity(variants.len());
        for variant in variants {
            let r = self.intern(&variant.name);
            self.vm.push_temp_root(Value::object(r));
            variant_refs.push(r);
        }
        let roots = CompilerRoots {
            states: &self.states,
            global_types: &self.global_types,
            globals: &self.globals,
        };
        let schema = self.vm.new_enum_type(name_ref, variant_refs, &[&roots]);
        self.vm.pop_temp_roots(variants.len() + 1);
        match schema {
            Some(schema) => self.bind_type(&name.name, TypeDef::Enum(schema)),
            None => self.error(CompileErrorKind::EnumOverflow),
        }
    }

    // ===== Hoisting =====

    /// Declare the types and functions of a block before compiling it
    fn hoist(&mut self, stmts: &[Stmt]) {
        for stmt in stmts {
            self.set_line(stmt.span);
            match &stmt.kind {
                StmtKind::Struct { name, fields } => self.declare_struct(name, fields),
                StmtKind::Enum { name, variants } => self.declare_enum(name, variants),
                _ => {}
            }
        }

        let functions: Vec<&Rc<FunctionDecl>> = stmts
            .iter()
            .filter_map(|stmt| match &stmt.kind {
                StmtKind::Function(decl) if decl.name.is_some() => Some(decl),
                _ => None,
            })
            .collect();
        if functions.is_empty() {
            return;
        }

        if self.at_top_level() {
            self.hoist_globals(&functions);
        } else {
            for decl in functions {
                let Some(name) = &decl.name else { continue };
                self.set_line(name.span);
                let register = self.alloc_reg();
                self.emit_abc(OpCode::LoadNull, register, 0, 0);
                let info = BindingInfo {
                    signature: Some(decl.qualifiers().into()),
                    ..BindingInfo::default()
                };
                let symbol = mangle(&name.name, decl.arity());
                if self
                    .state_mut()
                    .scopes
                    .declare(&symbol, register, info)
                    .is_err()
                {
                    self.error(CompileErrorKind::DuplicateFunction {
                        name: name.name.clone(),
                        arity: decl.arity(),
                    });
                }
            }
        }
    }

    /// Register top-level overload sets and define a null placeholder
    /// global for every overload so forward calls resolve
    fn hoist_globals(&mut self, functions: &[&Rc<FunctionDecl>]) {
        let mut names: Vec<String> = Vec::new();
        for decl in functions {
            let Some(name) = &decl.name else { continue };
            self.set_line(name.span);
            if let Err(kind) = self.overloads.register(&name.name, decl.qualifiers()) {
                self.error(kind);
            } else if !names.contains(&name.name) {
                names.push(name.name.clone());
            }
        }

        let saved = self.temp_top();
        let register = self.alloc_reg();
        for name in names {
            for signature in self.overloads.overloads(&name).to_vec() {
                let symbol = self.overloads.symbol(&name, signature.arity);
                let slot = self.global_slot(&symbol);
                self.globals.insert(
                    symbol,
                    GlobalBinding {
                        slot,
                        info: BindingInfo {
                            signature: Some(signature.qualifiers),
                            ..BindingInfo::default()
                        },
                    },
                );
                self.emit_abc(OpCode::LoadNull, register, 0, 0);
                self.emit_abx(OpCode::DefineGlobal, register, slot);
            }
        }
        self.restore_temps(saved);
    }

    // ===== Functions =====

    /// Compile a function body, returning the finished function object
    fn function(&mut self, decl: &FunctionDecl, name: Option<&str>) -> ObjRef {
        self.set_line(decl.span);
        let tco = self.state().tco;

        let name_ref = name.map(|n| self.intern(n));
        if let Some(r) = name_ref {
            self.vm.push_temp_root(Value::object(r));
        }
        let module = self.locate(self.line).0.to_string();
        let module_ref = self.intern(&module);
        self.states.push(FunctionState::new(
            name.map(str::to_string),
            name_ref,
            Some(module_ref),
            tco,
            false,
        ));
        if name_ref.is_some() {
            self.vm.pop_temp_roots(1);
        }

        self.begin_scope();
        if decl.params.len() > usize::from(u8::MAX) {
            self.error(CompileErrorKind::TooManyParameters);
        }
        let mut seen = HashSet::new();
        for param in &decl.params {
            if !seen.insert(param.name.name.as_str()) {
                self.set_line(param.name.span);
                self.error(CompileErrorKind::DuplicateParameter(param.name.name.clone()));
                continue;
            }
            let register = self.alloc_reg();
            let kind = match param.qualifier {
                Qualifier::Ref => LocalKind::Reference,
                Qualifier::Slot => LocalKind::Slot,
                Qualifier::Normal | Qualifier::Val | Qualifier::Clone => LocalKind::Plain,
            };
            self.declare_local(&param.name, register, BindingInfo::of_kind(kind));
            match param.qualifier {
                Qualifier::Val => {
                    self.emit_abc(OpCode::CloneValue, register, register, 0);
                }
                Qualifier::Clone => {
                    self.emit_abc(OpCode::DeepClone, register, register, 0);
                }
                _ => {}
            }
        }
        self.state_mut().qualifiers = decl.qualifiers();

        self.hoist(&decl.body.stmts);
        self.statements(&decl.body.stmts, true);
        self.emit_abc(OpCode::ReturnNull, 0, 0, 0);
        self.finish_function()
    }

    /// Pop the innermost function state and allocate its function object
    fn finish_function(&mut self) -> ObjRef {
        for goto in self.state_mut().labels.take_unresolved() {
            self.error_on_line(goto.line, CompileErrorKind::UndefinedLabel(goto.label));
        }

        let Some(mut state) = self.states.pop() else {
            fatal(FatalError::Internal("no function being compiled".into()));
        };
        if !state.upvalues.is_empty() {
            for pending in std::mem::take(&mut state.safe_tail_calls) {
                let offset = pending.offset;
                if let Some(call) = state.chunk.instruction(offset) {
                    let demoted = Instruction::abc(pending.fallback, call.a(), call.b(), 0);
                    state.chunk.patch(offset, demoted);
                    tracing::trace!(offset, op = %pending.fallback, "self tail call demoted");
                }
            }
        }

        let function = Function {
            name: state.name_ref,
            arity: state.qualifiers.len() as u8,
            max_registers: state.scopes.max_registers(),
            upvalues: state.upvalues.descriptors(),
            qualifiers: state.qualifiers,
            module: state.module_ref,
            chunk: Rc::new(state.chunk),
        };
        tracing::debug!(
            function = state.name.as_deref().unwrap_or("<script>"),
            registers = function.max_registers,
            upvalues = function.upvalues.len(),
            words = function.chunk.len(),
            "compiled function"
        );
        self.alloc(Obj::Function(function))
    }

    // ===== Name resolution =====

    /// Resolve `name`, preferring the overload of `arity` when it is a call
    fn resolve_name(&mut self, name: &str, arity: Option<usize>) -> Resolved {
        {
            let state = self.state();
            let scopes = &state.scopes;
            let local = scopes
                .resolve(name)
                .or_else(|| arity.and_then(|a| scopes.resolve(&mangle(name, a))));
            if let Some(local) = local {
                return Resolved::Local {
                    register: local.register,
                    info: local.info.clone(),
                };
            }
            let mangled = scopes.mangled(name);
            match mangled.as_slice() {
                [] => {}
                [local] => {
                    return Resolved::Local {
                        register: local.register,
                        info: local.info.clone(),
                    }
                }
                several => {
                    return Resolved::Overloads(
                        several
                            .iter()
                            .rev()
                            .map(|l| Resolved::Local {
                                register: l.register,
                                info: l.info.clone(),
                            })
                            .collect(),
                    )
                }
            }

            if !state.is_script
                && state.name.as_deref() == Some(name)
                && arity == Some(state.qualifiers.len())
            {
                return Resolved::SelfRef;
            }
        }

        let current = self.states.len() - 1;
        if let Some((slot, info)) = self.resolve_upvalue(current, name) {
            return Resolved::Upvalue { slot, info };
        }
        if let Some(a) = arity {
            if let Some((slot, info)) = self.resolve_upvalue(current, &mangle(name, a)) {
                return Resolved::Upvalue { slot, info };
            }
        }

        if let Some(def) = self.lookup_type(name) {
            return Resolved::Type(def);
        }

        if self.overloads.contains(name) {
            let chosen = arity.and_then(|a| self.overloads.find(name, a)).cloned();
            if let Some(signature) = chosen {
                let symbol = self.overloads.symbol(name, signature.arity);
                return self.resolve_global(&symbol);
            }
            if self.overloads.is_overloaded(name) {
                let symbols = self.overloads.symbols(name);
                return Resolved::Overloads(
                    symbols.iter().map(|s| self.resolve_global(s)).collect(),
                );
            }
        }
        self.resolve_global(name)
    }

    fn resolve_global(&mut self, name: &str) -> Resolved {
        if let Some(global) = self.globals.get(name) {
            return Resolved::Global {
                slot: global.slot,
                info: global.info.clone(),
            };
        }
        // Late bound: natives and globals of earlier compilations
        let slot = self.global_slot(name);
        Resolved::Global {
            slot,
            info: BindingInfo::default(),
        }
    }

    /// Resolve `name` as a variable captured by the function at `state`
    fn resolve_upvalue(&mut self, state: usize, name: &str) -> Option<(u8, BindingInfo)> {
        if state == 0 {
            return None;
        }
        let enclosing = state - 1;
        let local = {
            let scopes = &self.states[enclosing].scopes;
            scopes
                .resolve(name)
                .or_else(|| scopes.unique_mangled(name))
                .map(|l| (l.register, l.info.clone()))
        };
        if let Some((register, info)) = local {
            self.states[enclosing].scopes.mark_captured(register);
            return self.add_upvalue(state, register, true, info);
        }
        let (slot, info) = self.resolve_upvalue(enclosing, name)?;
        self.add_upvalue(state, slot, false, info)
    }

    fn add_upvalue(
        &mut self,
        state: usize,
        index: u8,
        is_local: bool,
        info: BindingInfo,
    ) -> Option<(u8, BindingInfo)> {
        match self.states[state]
            .upvalues
            .add(index, is_local, info.clone())
        {
            Ok(slot) => Some((slot, info)),
            Err(kind) => {
                self.error(kind);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::disassemble_function;
    use crate::config::VmConfig;

    fn compile_ok(vm: &mut Vm, source: &str) -> ObjRef {
        let mut sink = Vec::new();
        match compile(vm, source, CompileOptions::new("main"), &mut sink) {
            Ok(function) => function,
            Err(errors) => panic!("unexpected errors: {errors:?}"),
        }
    }

    fn errors_of(source: &str) -> (Vec<CompileError>, String) {
        let mut vm = Vm::new(VmConfig::default());
        let mut sink = Vec::new();
        let errors = compile(&mut vm, source, CompileOptions::new("main"), &mut sink)
            .expect_err("compilation should fail");
        (errors, String::from_utf8(sink).unwrap())
    }

    /// Disassembly of the first function constant of the script
    fn inner_listing(vm: &mut Vm, source: &str) -> String {
        let script = compile_ok(vm, source);
        let heap = vm.heap();
        let function = heap.as_function(script).unwrap();
        let inner = function
            .chunk
            .constants()
            .iter()
            .filter_map(|c| c.as_object())
            .find(|r| heap.as_function(*r).is_some())
            .expect("nested function");
        disassemble_function(heap, inner)
    }

    #[test]
    fn parameters_take_registers_after_closure() {
        let mut vm = Vm::new(VmConfig::default());
        let listing = inner_listing(&mut vm, "func add(a, b) { return a + b }");
        assert!(listing.contains("ADD"), "{listing}");
        assert!(listing.contains("3 1 2"), "{listing}");
        assert!(listing.contains("RETURN"), "{listing}");
    }

    #[test]
    fn diagnostics_are_written_with_module_and_line() {
        let (errors, output) = errors_of("var a = 1\nbreak\ncontinue\n");
        assert_eq!(errors.len(), 2);
        assert!(output.contains("[main] line 2: 'break' outside of a loop"), "{output}");
        assert!(output.contains("[main] line 3: 'continue' outside of a loop"), "{output}");
        assert!(errors.iter().all(|e| e.module == "main"));
    }

    #[test]
    fn parse_errors_surface_as_compile_errors() {
        let (errors, output) = errors_of("var = 3");
        assert!(matches!(errors[0].kind, CompileErrorKind::Parse(_)));
        assert!(output.starts_with("[main] line 1:"));
    }

    #[test]
    fn safe_mode_self_tail_call() {
        let mut vm = Vm::new(VmConfig::default());
        let listing = inner_listing(
            &mut vm,
            "func count(n) { if (n == 0) return 0\n return count(n - 1) }",
        );
        assert!(listing.contains("TAIL_CALL"), "{listing}");
        assert!(listing.contains("CLOSE_UPVALS"), "{listing}");
    }

    #[test]
    fn capturing_function_keeps_plain_self_call() {
        let mut vm = Vm::new(VmConfig::default());
        let script = compile_ok(
            &mut vm,
            "func outer() {
                var k = 1
                func loop(n) { if (n == 0) return k
                    return loop(n - 1) }
                return loop(3)
            }",
        );
        let heap = vm.heap();
        let outer = heap
            .as_function(script)
            .unwrap()
            .chunk
            .constants()
            .iter()
            .filter_map(|c| c.as_object())
            .find(|r| heap.as_function(*r).is_some())
            .unwrap();
        let inner = heap
            .as_function(outer)
            .unwrap()
            .chunk
            .constants()
            .iter()
            .filter_map(|c| c.as_object())
            .find(|r| heap.as_function(*r).is_some())
            .unwrap();
        let listing = disassemble_function(heap, inner);
        assert!(!listing.contains("TAIL_CALL"), "{listing}");
        assert!(listing.contains("CALL"), "{listing}");
    }

    #[test]
    fn undefined_label_is_reported() {
        let (errors, _) = errors_of("func f() { goto nowhere }");
        assert_eq!(
            errors[0].kind,
            CompileErrorKind::UndefinedLabel("nowhere".into())
        );
    }

    #[test]
    fn duplicate_overload_is_reported() {
        let (errors, _) = errors_of("func f(a) {}\nfunc f(b) {}");
        assert_eq!(
            errors[0].kind,
            CompileErrorKind::DuplicateFunction {
                name: "f".into(),
                arity: 1
            }
        );
        assert_eq!(errors[0].line, 2);
    }
}
