//! Callable objects: functions, closures, natives and upvalues

use std::fmt;
use std::rc::Rc;

use super::ObjRef;
use crate::bytecode::Chunk;
use crate::value::Value;
use crate::vm::Vm;

/// Parameter / binding qualifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Qualifier {
    /// Plain value semantics
    #[default]
    Normal,
    /// Reference to the argument's storage; reads deref, writes go through
    Ref,
    /// Shallow clone on bind
    Val,
    /// Like `ref`, but `slot x = v` rebinds instead of writing through
    Slot,
    /// Deep clone on bind
    Clone,
}

impl Qualifier {
    pub fn keyword(self) -> &'static str {
        match self {
            Qualifier::Normal => "",
            Qualifier::Ref => "ref",
            Qualifier::Val => "val",
            Qualifier::Slot => "slot",
            Qualifier::Clone => "clone",
        }
    }

    pub(crate) fn to_byte(self) -> u8 {
        match self {
            Qualifier::Normal => 0,
            Qualifier::Ref => 1,
            Qualifier::Val => 2,
            Qualifier::Slot => 3,
            Qualifier::Clone => 4,
        }
    }

    pub(crate) fn from_byte(byte: u8) -> Option<Self> {
        Some(match byte {
            0 => Qualifier::Normal,
            1 => Qualifier::Ref,
            2 => Qualifier::Val,
            3 => Qualifier::Slot,
            4 => Qualifier::Clone,
            _ => return None,
        })
    }

    /// Whether the argument must be an l-value at the call site
    pub fn needs_lvalue(self) -> bool {
        matches!(self, Qualifier::Ref | Qualifier::Slot)
    }
}

/// How a closure obtains one upvalue when it is created
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpvalueDesc {
    /// Register in the enclosing frame, or upvalue slot of the enclosing closure
    pub index: u8,
    /// True when `index` names a register of the immediately enclosing frame
    pub is_local: bool,
}

/// A compiled function
pub struct Function {
    pub name: Option<ObjRef>,
    pub arity: u8,
    /// Registers the frame needs, including R0
    pub max_registers: u16,
    pub upvalues: Vec<UpvalueDesc>,
    pub qualifiers: Vec<Qualifier>,
    /// Name of the module the function was declared in
    pub module: Option<ObjRef>,
    pub chunk: Rc<Chunk>,
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Function")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .field("max_registers", &self.max_registers)
            .field("upvalues", &self.upvalues.len())
            .field("code_len", &self.chunk.len())
            .finish()
    }
}

/// A function paired with its captured variables
#[derive(Debug, Clone)]
pub struct Closure {
    pub function: ObjRef,
    pub upvalues: Vec<ObjRef>,
}

/// A captured variable
#[derive(Debug, Clone, Copy)]
pub enum Upvalue {
    /// Still living in the value stack at this absolute slot
    Open(usize),
    /// Hoisted off the stack after its frame returned
    Closed(Value),
}

/// Native function signature. Natives get the whole VM so they can allocate.
pub type NativeFn = fn(&mut Vm, &[Value]) -> Result<Value, String>;

/// Native closure signature; the second argument is the captured context
pub type NativeClosureFn = fn(&mut Vm, Value, &[Value]) -> Result<Value, String>;

/// Control-transfer builtins that manipulate frames directly
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlOp {
    WithPrompt,
    Capture,
    Resume,
    Abort,
}

#[derive(Clone, Copy)]
pub enum NativeKind {
    Plain(NativeFn),
    Control(ControlOp),
}

/// A host function
#[derive(Clone)]
pub struct NativeFunction {
    pub name: &'static str,
    /// `None` for variadic natives
    pub arity: Option<u8>,
    pub qualifiers: Vec<Qualifier>,
    pub kind: NativeKind,
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<native {}>", self.name)
    }
}

/// A host function bound to a context value
#[derive(Clone)]
pub struct NativeClosure {
    pub name: &'static str,
    pub arity: Option<u8>,
    pub qualifiers: Vec<Qualifier>,
    pub function: NativeClosureFn,
    pub context: Value,
}

impl fmt::Debug for NativeClosure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<native closure {}>", self.name)
    }
}
