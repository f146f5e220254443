//! Binary format for compiled functions
//!
//! ```text
//! magic    "ZYMB"
//! version  u16
//! structs  u32 count, then (name, field names) per schema
//! enums    u32 count, then (type id, name, variant names) per enum type
//! function name?, module?, arity u8, registers u16, upvalues, qualifiers,
//!          code words, line runs, tagged constants
//! ```
//!
//! Integers are little-endian; strings are a u32 byte length and UTF-8.
//! Schemas live in file-level tables so every function that refers to a
//! schema gets the same object back. Enum types are given fresh type ids
//! when loaded and enum constants are rewritten to match.

use std::collections::HashMap;
use std::rc::Rc;

use thiserror::Error;

use super::chunk::Chunk;
use crate::object::{Function, Obj, ObjRef, Qualifier, StructSchema, UpvalueDesc};
use crate::value::Value;
use crate::vm::Vm;

const MAGIC: &[u8; 4] = b"ZYMB";
const VERSION: u16 = 1;

const TAG_NUMBER: u8 = 0;
const TAG_STRING: u8 = 1;
const TAG_NULL: u8 = 2;
const TAG_TRUE: u8 = 3;
const TAG_FALSE: u8 = 4;
const TAG_FUNCTION: u8 = 5;
const TAG_STRUCT: u8 = 6;
const TAG_ENUM: u8 = 7;
const TAG_ENUM_VALUE: u8 = 8;

/// Errors reading or writing the binary format
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SerializeError {
    #[error("not a compiled Zym file")]
    BadMagic,

    #[error("unsupported bytecode version {0}")]
    UnsupportedVersion(u16),

    #[error("unexpected end of data")]
    UnexpectedEof,

    #[error("string is not valid UTF-8")]
    InvalidUtf8,

    #[error("unknown constant tag {0}")]
    InvalidTag(u8),

    #[error("invalid {0}")]
    Invalid(&'static str),

    #[error("a {0} cannot be serialized")]
    Unserializable(&'static str),

    #[error("enum type {0} is not registered")]
    UnknownEnum(u16),

    #[error("too many enum types")]
    TooManyEnumTypes,
}

type SerializeResult<T> = Result<T, SerializeError>;

// ===== Writing =====

/// Serialize `function` and everything in its constant pool
pub fn write_function(vm: &Vm, function: ObjRef) -> SerializeResult<Vec<u8>> {
    let mut tables = Tables::default();
    tables.collect(vm, function)?;

    let mut w = ByteWriter::default();
    w.bytes(MAGIC);
    w.u16(VERSION);

    w.u32(tables.structs.len() as u32);
    for schema in &tables.structs {
        let schema = vm
            .heap()
            .as_struct_schema(*schema)
            .ok_or(SerializeError::Invalid("struct schema"))?;
        w.string(str_of(vm, schema.name)?);
        w.u32(schema.fields.len() as u32);
        for field in &schema.fields {
            w.string(str_of(vm, *field)?);
        }
    }

    w.u32(tables.enums.len() as u32);
    for type_id in &tables.enums {
        let schema = vm
            .enum_schema(*type_id)
            .and_then(|r| vm.heap().as_enum_schema(r))
            .ok_or(SerializeError::UnknownEnum(*type_id))?;
        w.u16(*type_id);
        w.string(str_of(vm, schema.name)?);
        w.u32(schema.variants.len() as u32);
        for variant in &schema.variants {
            w.string(str_of(vm, *variant)?);
        }
    }

    write_body(vm, &tables, &mut w, function)?;
    Ok(w.finish())
}

fn str_of(vm: &Vm, r: ObjRef) -> SerializeResult<&str> {
    vm.heap()
        .as_str(r)
        .ok_or(SerializeError::Invalid("string constant"))
}

/// Struct schemas and enum types referenced anywhere in the function tree
#[derive(Default)]
struct Tables {
    structs: Vec<ObjRef>,
    struct_index: HashMap<ObjRef, u32>,
    enums: Vec<u16>,
    enum_index: HashMap<u16, u32>,
}

impl Tables {
    fn collect(&mut self, vm: &Vm, function: ObjRef) -> SerializeResult<()> {
        let mut pending = vec![function];
        while let Some(function) = pending.pop() {
            let function = vm
                .heap()
                .as_function(function)
                .ok_or(SerializeError::Invalid("function"))?;
            for constant in function.chunk.constants() {
                if let Some((type_id, _)) = constant.as_enum() {
                    self.add_enum(type_id);
                    continue;
                }
                let Some(r) = constant.as_object() else {
                    continue;
                };
                match vm.heap().get(r) {
                    Obj::Function(_) => pending.push(r),
                    Obj::StructSchema(_) => {
                        if !self.struct_index.contains_key(&r) {
                            self.struct_index.insert(r, self.structs.len() as u32);
                            self.structs.push(r);
                        }
                    }
                    Obj::EnumSchema(e) => self.add_enum(e.type_id),
                    _ => {}
                }
            }
        }
        Ok(())
    }

    fn enum_position(&self, type_id: u16) -> SerializeResult<u32> {
        self.enum_index
            .get(&type_id)
            .copied()
            .ok_or(SerializeError::UnknownEnum(type_id))
    }

    fn add_enum(&mut self, type_id: u16) {
        if !self.enum_index.contains_key(&type_id) {
            self.enum_index.insert(type_id, self.enums.len() as u32);
            self.enums.push(type_id);
        }
    }
}

fn write_body(
    vm: &Vm,
    tables: &Tables,
    w: &mut ByteWriter,
    function: ObjRef,
) -> SerializeResult<()> {
    let f = vm
        .heap()
        .as_function(function)
        .ok_or(SerializeError::Invalid("function"))?;
    w.optional_string(f.name.map(|n| str_of(vm, n)).transpose()?);
    w.optional_string(f.module.map(|m| str_of(vm, m)).transpose()?);
    w.u8(f.arity);
    w.u16(f.max_registers);

    w.u32(f.upvalues.len() as u32);
    for upvalue in &f.upvalues {
        w.u8(upvalue.index);
        w.u8(u8::from(upvalue.is_local));
    }
    w.u32(f.qualifiers.len() as u32);
    for qualifier in &f.qualifiers {
        w.u8(qualifier.to_byte());
    }

    let chunk = &f.chunk;
    w.u32(chunk.code().len() as u32);
    for word in chunk.code() {
        w.u32(*word);
    }
    w.u32(chunk.lines().len() as u32);
    for (line, count) in chunk.lines() {
        w.u32(*line);
        w.u32(*count);
    }

    w.u32(chunk.constants().len() as u32);
    for constant in chunk.constants() {
        write_constant(vm, tables, w, *constant)?;
    }
    Ok(())
}

fn write_constant(
    vm: &Vm,
    tables: &Tables,
    w: &mut ByteWriter,
    value: Value,
) -> SerializeResult<()> {
    if let Some(n) = value.as_number() {
        w.u8(TAG_NUMBER);
        w.u64(n.to_bits());
    } else if value.is_null() {
        w.u8(TAG_NULL);
    } else if let Some(b) = value.as_bool() {
        w.u8(if b { TAG_TRUE } else { TAG_FALSE });
    } else if let Some((type_id, variant)) = value.as_enum() {
        w.u8(TAG_ENUM_VALUE);
        w.u32(tables.enum_position(type_id)?);
        w.u16(variant);
    } else if let Some(r) = value.as_object() {
        match vm.heap().get(r) {
            Obj::Str(s) => {
                w.u8(TAG_STRING);
                w.string(s.as_str());
            }
            Obj::Function(_) => {
                w.u8(TAG_FUNCTION);
                write_body(vm, tables, w, r)?;
            }
            Obj::StructSchema(_) => {
                w.u8(TAG_STRUCT);
                let index = tables
                    .struct_index
                    .get(&r)
                    .ok_or(SerializeError::Invalid("struct schema"))?;
                w.u32(*index);
            }
            Obj::EnumSchema(e) => {
                w.u8(TAG_ENUM);
                w.u32(tables.enum_position(e.type_id)?);
            }
            other => return Err(SerializeError::Unserializable(other.type_name())),
        }
    }
    Ok(())
}

#[derive(Default)]
struct ByteWriter {
    data: Vec<u8>,
}

impl ByteWriter {
    fn finish(self) -> Vec<u8> {
        self.data
    }

    fn bytes(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    fn u8(&mut self, v: u8) {
        self.data.push(v);
    }

    fn u16(&mut self, v: u16) {
        self.bytes(&v.to_le_bytes());
    }

    fn u32(&mut self, v: u32) {
        self.bytes(&v.to_le_bytes());
    }

    fn u64(&mut self, v: u64) {
        self.bytes(&v.to_le_bytes());
    }

    fn string(&mut self, s: &str) {
        self.u32(s.len() as u32);
        self.bytes(s.as_bytes());
    }

    fn optional_string(&mut self, s: Option<&str>) {
        match s {
            Some(s) => {
                self.u8(1);
                self.string(s);
            }
            None => self.u8(0),
        }
    }
}

// ===== Reading =====

/// Load a serialized function into `vm`. The result is not rooted; run it
/// or root it before allocating again.
pub fn read_function(vm: &mut Vm, bytes: &[u8]) -> SerializeResult<ObjRef> {
    let mut r = ByteReader { data: bytes, pos: 0 };
    if r.take(MAGIC.len())? != MAGIC {
        return Err(SerializeError::BadMagic);
    }
    let version = r.u16()?;
    if version != VERSION {
        return Err(SerializeError::UnsupportedVersion(version));
    }

    let mut loader = Loader {
        vm,
        structs: Vec::new(),
        enums: Vec::new(),
        rooted: 0,
    };
    let result = loader.read_file(&mut r);
    let rooted = loader.rooted;
    vm.pop_temp_roots(rooted);
    let function = result?;
    tracing::debug!(bytes = bytes.len(), "bytecode loaded");
    Ok(function)
}

struct Loader<'v> {
    vm: &'v mut Vm,
    structs: Vec<ObjRef>,
    /// New type id by position in the file's enum table
    enums: Vec<u16>,
    rooted: usize,
}

impl Loader<'_> {
    fn root(&mut self, r: ObjRef) -> ObjRef {
        self.vm.push_temp_root(Value::object(r));
        self.rooted += 1;
        r
    }

    fn intern(&mut self, text: &str) -> ObjRef {
        let r = self.vm.intern(text);
        self.root(r)
    }

    fn read_file(&mut self, r: &mut ByteReader<'_>) -> SerializeResult<ObjRef> {
        let count = r.u32()?;
        for _ in 0..count {
            let name = self.intern(r.string()?);
            let fields = self.read_names(r)?;
            let schema = self.vm.alloc(Obj::StructSchema(StructSchema::new(name, fields)));
            let schema = self.root(schema);
            self.structs.push(schema);
        }

        let count = r.u32()?;
        for _ in 0..count {
            let _original_id = r.u16()?;
            let name = self.intern(r.string()?);
            let variants = self.read_names(r)?;
            if variants.len() > usize::from(u16::MAX) + 1 {
                return Err(SerializeError::Invalid("enum variant count"));
            }
            let schema = self
                .vm
                .new_enum_type(name, variants, &[])
                .ok_or(SerializeError::TooManyEnumTypes)?;
            let type_id = self
                .vm
                .heap()
                .as_enum_schema(schema)
                .map(|e| e.type_id)
                .ok_or(SerializeError::Invalid("enum schema"))?;
            self.enums.push(type_id);
        }

        self.read_body(r)
    }

    /// Interned names, each rooted as soon as it exists
    fn read_names(&mut self, r: &mut ByteReader<'_>) -> SerializeResult<Vec<ObjRef>> {
        let count = r.u32()?;
        let mut names = Vec::new();
        for _ in 0..count {
            names.push(self.intern(r.string()?));
        }
        Ok(names)
    }

    fn read_body(&mut self, r: &mut ByteReader<'_>) -> SerializeResult<ObjRef> {
        let name = match r.optional_string()? {
            Some(name) => Some(self.intern(name)),
            None => None,
        };
        let module = match r.optional_string()? {
            Some(module) => Some(self.intern(module)),
            None => None,
        };
        let arity = r.u8()?;
        let max_registers = r.u16()?;

        let count = r.u32()?;
        let mut upvalues = Vec::new();
        for _ in 0..count {
            let index = r.u8()?;
            let is_local = r.u8()? != 0;
            upvalues.push(UpvalueDesc { index, is_local });
        }
        let count = r.u32()?;
        let mut qualifiers = Vec::new();
        for _ in 0..count {
            let qualifier =
                Qualifier::from_byte(r.u8()?).ok_or(SerializeError::Invalid("qualifier"))?;
            qualifiers.push(qualifier);
        }

        let count = r.u32()?;
        let mut code = Vec::new();
        for _ in 0..count {
            code.push(r.u32()?);
        }
        let count = r.u32()?;
        let mut lines = Vec::new();
        for _ in 0..count {
            lines.push((r.u32()?, r.u32()?));
        }

        let count = r.u32()?;
        if count > u32::from(u16::MAX) + 1 {
            return Err(SerializeError::Invalid("constant count"));
        }
        let mut constants = Vec::new();
        for _ in 0..count {
            let constant = self.read_constant(r)?;
            constants.push(constant);
        }

        let function = self.vm.alloc(Obj::Function(Function {
            name,
            arity,
            max_registers,
            upvalues,
            qualifiers,
            module,
            chunk: Rc::new(Chunk::from_parts(code, constants, lines)),
        }));
        Ok(self.root(function))
    }

    fn read_constant(&mut self, r: &mut ByteReader<'_>) -> SerializeResult<Value> {
        let tag = r.u8()?;
        Ok(match tag {
            TAG_NUMBER => Value::number(f64::from_bits(r.u64()?)),
            TAG_STRING => Value::object(self.intern(r.string()?)),
            TAG_NULL => Value::NULL,
            TAG_TRUE => Value::TRUE,
            TAG_FALSE => Value::FALSE,
            TAG_FUNCTION => Value::object(self.read_body(r)?),
            TAG_STRUCT => {
                let index = r.u32()? as usize;
                let schema = self
                    .structs
                    .get(index)
                    .ok_or(SerializeError::Invalid("struct index"))?;
                Value::object(*schema)
            }
            TAG_ENUM => {
                let type_id = self.enum_type(r.u32()?)?;
                let schema = self
                    .vm
                    .enum_schema(type_id)
                    .ok_or(SerializeError::UnknownEnum(type_id))?;
                Value::object(schema)
            }
            TAG_ENUM_VALUE => {
                let type_id = self.enum_type(r.u32()?)?;
                let variant = r.u16()?;
                Value::enum_variant(type_id, variant)
            }
            other => return Err(SerializeError::InvalidTag(other)),
        })
    }

    fn enum_type(&self, index: u32) -> SerializeResult<u16> {
        self.enums
            .get(index as usize)
            .copied()
            .ok_or(SerializeError::Invalid("enum index"))
    }
}

struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn take(&mut self, len: usize) -> SerializeResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or(SerializeError::UnexpectedEof)?;
        let bytes = &self.data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn array<const N: usize>(&mut self) -> SerializeResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u8(&mut self) -> SerializeResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> SerializeResult<u16> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    fn u32(&mut self) -> SerializeResult<u32> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    fn u64(&mut self) -> SerializeResult<u64> {
        Ok(u64::from_le_bytes(self.array()?))
    }

    fn string(&mut self) -> SerializeResult<&'a str> {
        let len = self.u32()? as usize;
        std::str::from_utf8(self.take(len)?).map_err(|_| SerializeError::InvalidUtf8)
    }

    fn optional_string(&mut self) -> SerializeResult<Option<&'a str>> {
        match self.u8()? {
            0 => Ok(None),
            1 => self.string().map(Some),
            _ => Err(SerializeError::Invalid("optional string flag")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{Instruction, OpCode};
    use crate::object::{NativeFunction, NativeKind};

    fn script(vm: &mut Vm, constants: Vec<Value>) -> ObjRef {
        let mut chunk = Chunk::from_parts(Vec::new(), constants, Vec::new());
        chunk.write(Instruction::abc(OpCode::ReturnNull, 0, 0, 0), 1);
        vm.alloc(Obj::Function(Function {
            name: None,
            arity: 0,
            max_registers: 1,
            upvalues: Vec::new(),
            qualifiers: Vec::new(),
            module: None,
            chunk: Rc::new(chunk),
        }))
    }

    #[test]
    fn rejects_bad_magic() {
        let mut vm = Vm::default();
        assert_eq!(
            read_function(&mut vm, b"NOPE\x01\x00"),
            Err(SerializeError::BadMagic)
        );
        assert_eq!(
            read_function(&mut vm, b"ZY"),
            Err(SerializeError::UnexpectedEof)
        );
    }

    #[test]
    fn rejects_natives_in_constants() {
        let mut vm = Vm::default();
        let print = vm.global("print").unwrap();
        let function = script(&mut vm, vec![print]);
        assert_eq!(
            write_function(&vm, function),
            Err(SerializeError::Unserializable("native"))
        );
    }

    #[test]
    fn enum_constants_get_fresh_type_ids() {
        let mut vm = Vm::default();
        let name = vm.intern("Color");
        let red = vm.intern("Red");
        let blue = vm.intern("Blue");
        let schema = vm.new_enum_type(name, vec![red, blue], &[]).unwrap();
        let type_id = vm.heap().as_enum_schema(schema).unwrap().type_id;
        let function = script(&mut vm, vec![Value::enum_variant(type_id, 1)]);
        let bytes = write_function(&vm, function).unwrap();

        let mut fresh = Vm::default();
        let other = fresh.intern("Other");
        fresh.new_enum_type(other, Vec::new(), &[]).unwrap();
        let loaded = read_function(&mut fresh, &bytes).unwrap();
        let constant = fresh.heap().as_function(loaded).unwrap().chunk.constants()[0];
        assert_eq!(constant.as_enum(), Some((1, 1)));
        assert_eq!(fresh.format_value(constant), "Color.Blue");
    }

    #[test]
    fn nested_native_is_rejected() {
        let mut vm = Vm::default();
        let native = vm.alloc(Obj::Native(NativeFunction {
            name: "host",
            arity: Some(0),
            qualifiers: Vec::new(),
            kind: NativeKind::Plain(|_, _| Ok(Value::NULL)),
        }));
        vm.push_temp_root(Value::object(native));
        let inner = script(&mut vm, vec![Value::object(native)]);
        vm.push_temp_root(Value::object(inner));
        let outer = script(&mut vm, vec![Value::object(inner)]);
        assert!(matches!(
            write_function(&vm, outer),
            Err(SerializeError::Unserializable(_))
        ));
    }
}
