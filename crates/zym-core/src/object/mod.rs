//! Heap object model
//!
//! Every heap object is one variant of the closed [`Obj`] enum. Objects live
//! in the [`Heap`](crate::gc::Heap) arena and are addressed by generational
//! [`ObjRef`] handles, never by raw pointers, so a handle stays valid while
//! the value stack or any container grows.

mod control;
mod function;
mod structure;

pub use control::{Continuation, PromptTag, SavedFrame};
pub use function::{
    Closure, ControlOp, Function, NativeClosure, NativeClosureFn, NativeFn, NativeFunction,
    NativeKind, Qualifier, Upvalue, UpvalueDesc,
};
pub use structure::{EnumSchema, RefTarget, Reference, StructInstance, StructSchema};

use std::collections::HashMap;
use std::fmt;
use std::mem::size_of;
use std::rc::Rc;

use crate::value::Value;

/// Maximum overload candidates a dispatcher can hold
pub const MAX_DISPATCH_CANDIDATES: usize = 16;

/// Generational handle to a heap object
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjRef {
    index: u32,
    generation: u16,
}

impl ObjRef {
    #[inline]
    pub const fn new(index: u32, generation: u16) -> Self {
        Self { index, generation }
    }

    #[inline]
    pub const fn index(self) -> u32 {
        self.index
    }

    #[inline]
    pub const fn generation(self) -> u16 {
        self.generation
    }

    #[inline]
    pub(crate) const fn to_payload(self) -> u64 {
        ((self.generation as u64) << 32) | self.index as u64
    }

    #[inline]
    pub(crate) const fn from_payload(payload: u64) -> Self {
        Self {
            index: payload as u32,
            generation: (payload >> 32) as u16,
        }
    }
}

impl fmt::Debug for ObjRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}g{}", self.index, self.generation)
    }
}

/// An interned, immutable string
#[derive(Debug, Clone)]
pub struct ObjString {
    text: Rc<str>,
    char_count: usize,
    hash: u32,
}

impl ObjString {
    pub fn new(text: Rc<str>) -> Self {
        let char_count = text.chars().count();
        let hash = hash_bytes(text.as_bytes());
        Self {
            text,
            char_count,
            hash,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub(crate) fn shared(&self) -> Rc<str> {
        Rc::clone(&self.text)
    }

    /// Number of Unicode scalar values
    pub fn char_count(&self) -> usize {
        self.char_count
    }

    pub fn hash(&self) -> u32 {
        self.hash
    }
}

/// FNV-1a over the raw bytes
pub fn hash_bytes(bytes: &[u8]) -> u32 {
    let mut hash: u32 = 2_166_136_261;
    for byte in bytes {
        hash ^= u32::from(*byte);
        hash = hash.wrapping_mul(16_777_619);
    }
    hash
}

/// A growable array of values
#[derive(Debug, Clone, Default)]
pub struct List {
    pub items: Vec<Value>,
}

/// A string-keyed hash map. Keys are interned, so handle identity is string
/// equality.
#[derive(Debug, Clone, Default)]
pub struct Map {
    pub entries: HashMap<ObjRef, Value>,
}

/// A set of same-named overloads picked by argument count at call time
#[derive(Debug, Clone, Default)]
pub struct Dispatcher {
    pub name: Option<ObjRef>,
    pub candidates: Vec<ObjRef>,
}

/// A heap object
#[derive(Debug)]
pub enum Obj {
    Str(ObjString),
    Function(Function),
    Native(NativeFunction),
    NativeClosure(NativeClosure),
    Closure(Closure),
    Upvalue(Upvalue),
    List(List),
    Map(Map),
    Dispatcher(Dispatcher),
    Reference(Reference),
    StructSchema(StructSchema),
    StructInstance(StructInstance),
    EnumSchema(EnumSchema),
    PromptTag(PromptTag),
    Continuation(Continuation),
}

impl Obj {
    /// User-facing type name
    pub fn type_name(&self) -> &'static str {
        match self {
            Obj::Str(_) => "string",
            Obj::Function(_) | Obj::Closure(_) => "function",
            Obj::Native(_) | Obj::NativeClosure(_) => "native",
            Obj::Upvalue(_) => "upvalue",
            Obj::List(_) => "list",
            Obj::Map(_) => "map",
            Obj::Dispatcher(_) => "dispatcher",
            Obj::Reference(_) => "reference",
            Obj::StructSchema(_) => "struct schema",
            Obj::StructInstance(_) => "struct",
            Obj::EnumSchema(_) => "enum schema",
            Obj::PromptTag(_) => "prompt tag",
            Obj::Continuation(_) => "continuation",
        }
    }

    /// Approximate number of bytes this object keeps alive, used for the
    /// collection threshold
    pub fn size_estimate(&self) -> usize {
        let owned = match self {
            Obj::Str(s) => s.as_str().len(),
            Obj::Function(f) => {
                f.chunk.code().len() * size_of::<u32>()
                    + f.chunk.constants().len() * size_of::<Value>()
                    + f.upvalues.len() * size_of::<UpvalueDesc>()
            }
            Obj::Native(n) => n.qualifiers.len(),
            Obj::NativeClosure(n) => n.qualifiers.len(),
            Obj::Closure(c) => c.upvalues.len() * size_of::<ObjRef>(),
            Obj::Upvalue(_) | Obj::Reference(_) | Obj::PromptTag(_) => 0,
            Obj::List(l) => l.items.capacity() * size_of::<Value>(),
            Obj::Map(m) => m.entries.capacity() * (size_of::<ObjRef>() + size_of::<Value>()),
            Obj::Dispatcher(d) => d.candidates.len() * size_of::<ObjRef>(),
            Obj::StructSchema(s) => {
                s.fields.len() * (size_of::<ObjRef>() * 2 + size_of::<usize>())
            }
            Obj::StructInstance(i) => i.fields.len() * size_of::<Value>(),
            Obj::EnumSchema(e) => e.variants.len() * size_of::<ObjRef>(),
            Obj::Continuation(k) => {
                k.frames.len() * size_of::<SavedFrame>() + k.stack.len() * size_of::<Value>()
            }
        };
        size_of::<Obj>() + owned
    }

    /// Visit every value this object references directly
    pub fn for_each_child(&self, mut visit: impl FnMut(Value)) {
        let mut object = |r: ObjRef| visit(Value::object(r));
        match self {
            Obj::Str(_) => {}
            Obj::Function(f) => {
                if let Some(name) = f.name {
                    object(name);
                }
                if let Some(module) = f.module {
                    object(module);
                }
                for constant in f.chunk.constants() {
                    if let Some(r) = constant.as_object() {
                        object(r);
                    }
                }
            }
            Obj::Native(_) => {}
            Obj::NativeClosure(n) => {
                if let Some(r) = n.context.as_object() {
                    object(r);
                }
            }
            Obj::Closure(c) => {
                object(c.function);
                for upvalue in &c.upvalues {
                    object(*upvalue);
                }
            }
            Obj::Upvalue(Upvalue::Closed(v)) => {
                if let Some(r) = v.as_object() {
                    object(r);
                }
            }
            Obj::Upvalue(Upvalue::Open(_)) => {}
            Obj::List(l) => {
                for item in &l.items {
                    if let Some(r) = item.as_object() {
                        object(r);
                    }
                }
            }
            Obj::Map(m) => {
                for (key, value) in &m.entries {
                    object(*key);
                    if let Some(r) = value.as_object() {
                        object(r);
                    }
                }
            }
            Obj::Dispatcher(d) => {
                if let Some(name) = d.name {
                    object(name);
                }
                for candidate in &d.candidates {
                    object(*candidate);
                }
            }
            Obj::Reference(r) => match r.target {
                RefTarget::Local { cell } | RefTarget::Upvalue { cell } => object(cell),
                RefTarget::Global { .. } => {}
                RefTarget::Index { container, .. } => object(container),
                RefTarget::Key { container, key } => {
                    object(container);
                    object(key);
                }
            },
            Obj::StructSchema(s) => {
                object(s.name);
                for field in &s.fields {
                    object(*field);
                }
            }
            Obj::StructInstance(i) => {
                object(i.schema);
                for field in &i.fields {
                    if let Some(r) = field.as_object() {
                        object(r);
                    }
                }
            }
            Obj::EnumSchema(e) => {
                object(e.name);
                for variant in &e.variants {
                    object(*variant);
                }
            }
            Obj::PromptTag(p) => {
                if let Some(name) = p.name {
                    object(name);
                }
            }
            Obj::Continuation(k) => {
                object(k.tag);
                for frame in &k.frames {
                    object(frame.closure);
                }
                for value in &k.stack {
                    if let Some(r) = value.as_object() {
                        object(r);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_payload_round_trip() {
        let r = ObjRef::new(0xdead_beef, 0x1234);
        assert_eq!(ObjRef::from_payload(r.to_payload()), r);
    }

    #[test]
    fn string_caches_char_count_and_hash() {
        let s = ObjString::new(Rc::from("héllo"));
        assert_eq!(s.char_count(), 5);
        assert_eq!(s.as_str().len(), 6);
        assert_eq!(s.hash(), hash_bytes("héllo".as_bytes()));
    }

    #[test]
    fn children_of_instance_include_schema_and_fields() {
        let schema = ObjRef::new(1, 0);
        let nested = ObjRef::new(2, 0);
        let obj = Obj::StructInstance(StructInstance {
            schema,
            fields: vec![Value::number(1.0), Value::object(nested)],
        });
        let mut seen = Vec::new();
        obj.for_each_child(|v| seen.push(v));
        assert_eq!(seen, vec![Value::object(schema), Value::object(nested)]);
    }
}
