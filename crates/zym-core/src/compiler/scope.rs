//! Register allocation and lexical scopes
//!
//! R0 holds the running closure and parameters follow it. Locals keep the
//! register they were declared in until their scope closes; temporaries live
//! above the highest local and are released in LIFO order.

use std::rc::Rc;

use crate::object::{ObjRef, Qualifier};

use super::error::CompileErrorKind;

/// Highest register index a frame may use
pub const MAX_REGISTER: u16 = 255;

/// How reads and writes of a binding are lowered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LocalKind {
    /// Holds its value directly
    #[default]
    Plain,
    /// Holds a reference; reads deref one level, writes go through the chain
    Reference,
    /// A `slot` binding; like `Reference`, but `slot x = v` rebinds it
    Slot,
}

impl LocalKind {
    pub fn is_indirect(self) -> bool {
        !matches!(self, LocalKind::Plain)
    }
}

/// What the compiler knows about a binding. Travels with it through
/// upvalue capture.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BindingInfo {
    pub kind: LocalKind,

    /// Struct schema known for the value, enabling indexed field access
    pub struct_type: Option<ObjRef>,

    /// Parameter qualifiers when the binding holds a known function
    pub signature: Option<Rc<[Qualifier]>>,
}

impl BindingInfo {
    pub fn of_kind(kind: LocalKind) -> Self {
        Self {
            kind,
            ..Self::default()
        }
    }
}

/// A local variable in scope
#[derive(Debug, Clone)]
pub struct Local {
    pub name: String,

    /// Scope depth (1 = function body)
    pub depth: u32,

    pub register: u8,

    pub info: BindingInfo,

    /// Whether a closure or reference captured the register
    pub captured: bool,

    /// Monotonic declaration number, used by goto validation
    pub id: u32,
}

#[derive(Debug, Clone, Copy)]
struct ScopeMark {
    id: u32,
    locals: usize,
    temp_top: u16,
}

/// Locals, scopes and the temporary-register frontier of one function
#[derive(Debug)]
pub struct Scopes {
    locals: Vec<Local>,
    marks: Vec<ScopeMark>,
    next_scope_id: u32,
    next_local_id: u32,
    temp_top: u16,
    max_registers: u16,
}

/// What leaving a scope requires the emitter to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScopeExit {
    /// Lowest register to close upvalues from, when any local was captured
    pub close_from: Option<u8>,
}

impl Default for Scopes {
    fn default() -> Self {
        Self::new()
    }
}

impl Scopes {
    pub fn new() -> Self {
        Self {
            locals: Vec::new(),
            marks: Vec::new(),
            next_scope_id: 1,
            next_local_id: 0,
            temp_top: 1,
            max_registers: 1,
        }
    }

    pub fn depth(&self) -> u32 {
        self.marks.len() as u32
    }

    /// Id of the innermost open scope (0 for the function level)
    pub fn scope_id(&self) -> u32 {
        self.marks.last().map_or(0, |m| m.id)
    }

    /// Ids of every open scope, outermost first
    pub fn scope_chain(&self) -> Vec<u32> {
        std::iter::once(0)
            .chain(self.marks.iter().map(|m| m.id))
            .collect()
    }

    pub fn temp_top(&self) -> u16 {
        self.temp_top
    }

    pub fn max_registers(&self) -> u16 {
        self.max_registers
    }

    pub fn next_local_id(&self) -> u32 {
        self.next_local_id
    }

    pub fn locals(&self) -> &[Local] {
        &self.locals
    }

    pub fn begin_scope(&mut self) {
        let id = self.next_scope_id;
        self.next_scope_id += 1;
        self.marks.push(ScopeMark {
            id,
            locals: self.locals.len(),
            temp_top: self.temp_top,
        });
    }

    /// Pop the innermost scope, releasing its locals and temporaries
    pub fn end_scope(&mut self) -> ScopeExit {
        let Some(mark) = self.marks.pop() else {
            return ScopeExit { close_from: None };
        };
        let close_from = self.locals[mark.locals..]
            .iter()
            .filter(|l| l.captured)
            .map(|l| l.register)
            .min();
        self.locals.truncate(mark.locals);
        self.temp_top = mark.temp_top;
        ScopeExit { close_from }
    }

    /// Reserve the next free register
    pub fn alloc(&mut self) -> Result<u8, CompileErrorKind> {
        if self.temp_top >= MAX_REGISTER {
            return Err(CompileErrorKind::TooManyRegisters);
        }
        let register = self.temp_top as u8;
        self.temp_top += 1;
        self.max_registers = self.max_registers.max(self.temp_top);
        Ok(register)
    }

    pub fn save_temp_top(&self) -> u16 {
        self.temp_top
    }

    /// Release every temporary allocated since `saved`. Registers of live
    /// locals are never released.
    pub fn restore_temp_top(&mut self, saved: u16) {
        let floor = self.locals.last().map_or(1, |l| u16::from(l.register) + 1);
        self.temp_top = saved.max(floor);
    }

    /// Make sure registers up to `register` count as used
    pub fn reserve_through(&mut self, register: u8) -> Result<(), CompileErrorKind> {
        let needed = u16::from(register) + 1;
        if needed > MAX_REGISTER {
            return Err(CompileErrorKind::TooManyRegisters);
        }
        self.temp_top = self.temp_top.max(needed);
        self.max_registers = self.max_registers.max(self.temp_top);
        Ok(())
    }

    /// Bind `name` to `register`, which must be the highest allocated one
    pub fn declare(
        &mut self,
        name: &str,
        register: u8,
        info: BindingInfo,
    ) -> Result<&mut Local, CompileErrorKind> {
        let depth = self.depth();
        if self
            .locals
            .iter()
            .rev()
            .take_while(|l| l.depth == depth)
            .any(|l| l.name == name)
        {
            return Err(CompileErrorKind::DuplicateVariable(name.to_string()));
        }
        if self.locals.len() >= usize::from(MAX_REGISTER) {
            return Err(CompileErrorKind::TooManyLocals);
        }
        debug_assert!(self.locals.last().map_or(true, |l| l.register < register));
        let id = self.next_local_id;
        self.next_local_id += 1;
        self.locals.push(Local {
            name: name.to_string(),
            depth,
            register,
            info,
            captured: false,
            id,
        });
        self.temp_top = self.temp_top.max(u16::from(register) + 1);
        let index = self.locals.len() - 1;
        Ok(&mut self.locals[index])
    }

    /// Innermost local named `name`
    pub fn resolve(&self, name: &str) -> Option<&Local> {
        self.locals.iter().rev().find(|l| l.name == name)
    }

    pub fn resolve_mut(&mut self, name: &str) -> Option<&mut Local> {
        self.locals.iter_mut().rev().find(|l| l.name == name)
    }

    /// Locals named `name@<digits>`, innermost first
    pub fn mangled(&self, name: &str) -> Vec<&Local> {
        self.locals
            .iter()
            .rev()
            .filter(|l| is_mangled_of(&l.name, name))
            .collect()
    }

    /// The single local named `name@<digits>`, if exactly one exists
    pub fn unique_mangled(&self, name: &str) -> Option<&Local> {
        let mut found = self.locals.iter().filter(|l| is_mangled_of(&l.name, name));
        let first = found.next()?;
        found.next().is_none().then_some(first)
    }

    pub fn mark_captured(&mut self, register: u8) {
        if let Some(local) = self.locals.iter_mut().find(|l| l.register == register) {
            local.captured = true;
        }
    }

    pub fn is_local_register(&self, register: u8) -> bool {
        self.locals.iter().any(|l| l.register == register)
    }

    /// Lowest register of a local deeper than `depth`
    pub fn lowest_register_below(&self, depth: u32) -> Option<u8> {
        self.locals
            .iter()
            .filter(|l| l.depth > depth)
            .map(|l| l.register)
            .min()
    }
}

/// Whether `symbol` is `name@<digits>`
pub fn is_mangled_of(symbol: &str, name: &str) -> bool {
    symbol
        .strip_prefix(name)
        .and_then(|rest| rest.strip_prefix('@'))
        .is_some_and(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
}

/// Storage name of an overload
pub fn mangle(name: &str, arity: usize) -> String {
    format!("{name}@{arity}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_zero_is_reserved() {
        let mut scopes = Scopes::new();
        assert_eq!(scopes.alloc().unwrap(), 1);
    }

    #[test]
    fn locals_keep_their_register_while_scope_is_open() {
        let mut scopes = Scopes::new();
        scopes.begin_scope();
        let r = scopes.alloc().unwrap();
        scopes.declare("x", r, BindingInfo::default()).unwrap();

        let saved = scopes.save_temp_top();
        let t1 = scopes.alloc().unwrap();
        let t2 = scopes.alloc().unwrap();
        assert!(t1 > r && t2 > t1);
        scopes.restore_temp_top(saved);

        // A smaller saved frontier never releases a live local
        scopes.restore_temp_top(0);
        assert_eq!(scopes.alloc().unwrap(), r + 1);
        assert_eq!(scopes.resolve("x").unwrap().register, r);
    }

    #[test]
    fn empty_scopes_leave_frontier_unchanged() {
        let mut scopes = Scopes::new();
        let before = scopes.temp_top();
        for _ in 0..32 {
            scopes.begin_scope();
        }
        for _ in 0..32 {
            assert_eq!(scopes.end_scope().close_from, None);
        }
        assert_eq!(scopes.temp_top(), before);
    }

    #[test]
    fn end_scope_reports_lowest_captured_register() {
        let mut scopes = Scopes::new();
        scopes.begin_scope();
        for name in ["a", "b", "c"] {
            let r = scopes.alloc().unwrap();
            scopes.declare(name, r, BindingInfo::default()).unwrap();
        }
        scopes.mark_captured(3);
        scopes.mark_captured(2);
        assert_eq!(scopes.end_scope().close_from, Some(2));
        assert_eq!(scopes.temp_top(), 1);
    }

    #[test]
    fn redeclaration_in_same_scope_fails() {
        let mut scopes = Scopes::new();
        scopes.begin_scope();
        let r = scopes.alloc().unwrap();
        scopes.declare("x", r, BindingInfo::default()).unwrap();
        let r2 = scopes.alloc().unwrap();
        assert_eq!(
            scopes.declare("x", r2, BindingInfo::default()).unwrap_err(),
            CompileErrorKind::DuplicateVariable("x".into())
        );

        // Shadowing in a nested scope is fine
        scopes.begin_scope();
        let r3 = scopes.alloc().unwrap();
        scopes.declare("x", r3, BindingInfo::default()).unwrap();
        assert_eq!(scopes.resolve("x").unwrap().register, r3);
    }

    #[test]
    fn register_exhaustion_is_an_error() {
        let mut scopes = Scopes::new();
        for _ in 1..MAX_REGISTER {
            scopes.alloc().unwrap();
        }
        assert_eq!(scopes.alloc(), Err(CompileErrorKind::TooManyRegisters));
    }

    #[test]
    fn mangled_names() {
        assert!(is_mangled_of("f@2", "f"));
        assert!(!is_mangled_of("f@", "f"));
        assert!(!is_mangled_of("fg@2", "f"));
        assert!(!is_mangled_of("f@x", "f"));
        assert_eq!(mangle("sum", 3), "sum@3");

        let mut scopes = Scopes::new();
        scopes.begin_scope();
        let r = scopes.alloc().unwrap();
        scopes.declare("f@1", r, BindingInfo::default()).unwrap();
        assert_eq!(scopes.unique_mangled("f").unwrap().register, r);
        let r = scopes.alloc().unwrap();
        scopes.declare("f@2", r, BindingInfo::default()).unwrap();
        assert!(scopes.unique_mangled("f").is_none());
        assert_eq!(scopes.mangled("f").len(), 2);
    }
}
