//! Structs, enums and references

use std::collections::HashMap;

use super::ObjRef;
use crate::value::Value;

/// Field layout shared by every instance of a struct
#[derive(Debug, Clone)]
pub struct StructSchema {
    pub name: ObjRef,
    /// Interned field names in declaration order
    pub fields: Vec<ObjRef>,
    pub index: HashMap<ObjRef, usize>,
}

impl StructSchema {
    pub fn new(name: ObjRef, fields: Vec<ObjRef>) -> Self {
        let index = fields
            .iter()
            .enumerate()
            .map(|(i, field)| (*field, i))
            .collect();
        Self {
            name,
            fields,
            index,
        }
    }

    pub fn field_index(&self, field: ObjRef) -> Option<usize> {
        self.index.get(&field).copied()
    }
}

#[derive(Debug, Clone)]
pub struct StructInstance {
    pub schema: ObjRef,
    pub fields: Vec<Value>,
}

#[derive(Debug, Clone)]
pub struct EnumSchema {
    pub name: ObjRef,
    pub variants: Vec<ObjRef>,
    pub type_id: u16,
}

impl EnumSchema {
    pub fn variant_index(&self, variant: ObjRef) -> Option<u16> {
        self.variants
            .iter()
            .position(|v| *v == variant)
            .map(|i| i as u16)
    }
}

/// Where a reference points
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefTarget {
    /// A local register, tracked through the upvalue cell capturing it so the
    /// reference survives the frame
    Local { cell: ObjRef },
    /// A global slot
    Global { slot: u16 },
    /// An element of a list
    Index { container: ObjRef, index: usize },
    /// A map entry or struct field
    Key { container: ObjRef, key: ObjRef },
    /// A variable captured by the running closure
    Upvalue { cell: ObjRef },
}

/// A first-class l-value
#[derive(Debug, Clone, Copy)]
pub struct Reference {
    pub target: RefTarget,
}
