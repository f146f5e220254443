//! Indexing, field access and first-class references

use crate::object::{Obj, ObjRef, RefTarget, Reference};
use crate::value::Value;

use super::{OpResult, RuntimeErrorKind, Vm};

/// Longest chain of references a write will follow
const MAX_REF_CHAIN: usize = 1024;

impl Vm {
    // ===== Indexing =====

    /// `container[index]`
    pub(super) fn index_get(&mut self, container: Value, index: Value) -> OpResult<Value> {
        let Some(target) = container.as_object() else {
            return Err(RuntimeErrorKind::NotIndexable(self.heap.type_name(container)));
        };
        match self.heap.get(target) {
            Obj::List(list) => {
                let position = self.list_position(index, list.items.len())?;
                Ok(list.items[position])
            }
            Obj::Map(map) => {
                let key = self.map_key(index)?;
                Ok(map.entries.get(&key).copied().unwrap_or(Value::NULL))
            }
            Obj::StructInstance(_) => {
                let key = self.struct_key(index)?;
                self.field_get(container, key)
            }
            Obj::Str(text) => {
                let position = self.list_position(index, text.char_count())?;
                let ch: String = text.as_str().chars().nth(position).into_iter().collect();
                Ok(Value::object(self.intern(&ch)))
            }
            other => Err(RuntimeErrorKind::NotIndexable(other.type_name())),
        }
    }

    /// `container[index] = value`
    pub(super) fn index_set(
        &mut self,
        container: Value,
        index: Value,
        value: Value,
    ) -> OpResult<()> {
        let Some(target) = container.as_object() else {
            return Err(RuntimeErrorKind::NotIndexable(self.heap.type_name(container)));
        };
        match self.heap.get(target) {
            Obj::List(list) => {
                let position = self.list_position(index, list.items.len())?;
                if let Some(list) = self.heap.as_list_mut(target) {
                    list.items[position] = value;
                }
                Ok(())
            }
            Obj::Map(_) => {
                let key = self.map_key(index)?;
                self.map_insert(target, key, value);
                Ok(())
            }
            Obj::StructInstance(_) => {
                let key = self.struct_key(index)?;
                self.field_set(container, key, value)
            }
            other => Err(RuntimeErrorKind::NotIndexable(other.type_name())),
        }
    }

    /// Validate a list or string index against `length`
    fn list_position(&self, index: Value, length: usize) -> OpResult<usize> {
        let Some(n) = index.as_number() else {
            return Err(RuntimeErrorKind::InvalidIndexType {
                container: "list",
                got: self.heap.type_name(index),
            });
        };
        if n.fract() != 0.0 || n < 0.0 || n >= length as f64 {
            return Err(RuntimeErrorKind::IndexOutOfBounds {
                index: n as i64,
                length,
            });
        }
        Ok(n as usize)
    }

    fn map_key(&self, index: Value) -> OpResult<ObjRef> {
        self.string_handle(index)
            .ok_or_else(|| RuntimeErrorKind::InvalidIndexType {
                container: "map",
                got: self.heap.type_name(index),
            })
    }

    fn struct_key(&self, index: Value) -> OpResult<ObjRef> {
        self.string_handle(index)
            .ok_or_else(|| RuntimeErrorKind::InvalidIndexType {
                container: "struct",
                got: self.heap.type_name(index),
            })
    }

    fn string_handle(&self, value: Value) -> Option<ObjRef> {
        value.as_object().filter(|r| self.heap.as_str(*r).is_some())
    }

    fn map_insert(&mut self, map: ObjRef, key: ObjRef, value: Value) {
        if let Some(map) = self.heap.as_map_mut(map) {
            map.entries.insert(key, value);
        }
        self.heap.refresh_size(map);
    }

    // ===== Fields =====

    fn undefined_field(&self, target: Value, field: ObjRef) -> RuntimeErrorKind {
        let type_name = match target
            .as_object()
            .and_then(|r| self.heap.as_instance(r))
            .and_then(|i| self.heap.as_struct_schema(i.schema))
            .and_then(|s| self.heap.as_str(s.name))
        {
            Some(name) => name.to_string(),
            None => self.heap.type_name(target).to_string(),
        };
        RuntimeErrorKind::UndefinedField {
            type_name,
            field: self.heap.as_str(field).unwrap_or("?").to_string(),
        }
    }

    /// `target.field`, by name
    pub(super) fn field_get(&self, target: Value, field: ObjRef) -> OpResult<Value> {
        let found = match target.as_object().map(|r| self.heap.get(r)) {
            Some(Obj::StructInstance(instance)) => self
                .heap
                .as_struct_schema(instance.schema)
                .and_then(|s| s.field_index(field))
                .and_then(|i| instance.fields.get(i).copied()),
            Some(Obj::Map(map)) => Some(map.entries.get(&field).copied().unwrap_or(Value::NULL)),
            _ => None,
        };
        found.ok_or_else(|| self.undefined_field(target, field))
    }

    /// `target.field = value`, by name
    pub(super) fn field_set(
        &mut self,
        target: Value,
        field: ObjRef,
        value: Value,
    ) -> OpResult<()> {
        let Some(object) = target.as_object() else {
            return Err(self.undefined_field(target, field));
        };
        match self.heap.get(object) {
            Obj::StructInstance(instance) => {
                let slot = self
                    .heap
                    .as_struct_schema(instance.schema)
                    .and_then(|s| s.field_index(field));
                match slot {
                    Some(slot) => {
                        if let Some(instance) = self.heap.as_instance_mut(object) {
                            instance.fields[slot] = value;
                        }
                        Ok(())
                    }
                    None => Err(self.undefined_field(target, field)),
                }
            }
            Obj::Map(_) => {
                self.map_insert(object, field, value);
                Ok(())
            }
            _ => Err(self.undefined_field(target, field)),
        }
    }

    /// Field `index` of an instance of `schema`. Values of any other shape
    /// fall back to a lookup by the field's name.
    pub(super) fn field_get_indexed(
        &self,
        target: Value,
        index: u8,
        schema: ObjRef,
    ) -> OpResult<Value> {
        let instance = target.as_object().and_then(|r| self.heap.as_instance(r));
        if let Some(instance) = instance.filter(|i| i.schema == schema) {
            if let Some(value) = instance.fields.get(usize::from(index)) {
                return Ok(*value);
            }
        }
        let field = self.schema_field(schema, index)?;
        self.field_get(target, field)
    }

    pub(super) fn field_set_indexed(
        &mut self,
        target: Value,
        index: u8,
        schema: ObjRef,
        value: Value,
    ) -> OpResult<()> {
        if let Some(object) = target.as_object() {
            if let Some(instance) = self.heap.as_instance_mut(object) {
                if instance.schema == schema {
                    if let Some(field) = instance.fields.get_mut(usize::from(index)) {
                        *field = value;
                        return Ok(());
                    }
                }
            }
        }
        let field = self.schema_field(schema, index)?;
        self.field_set(target, field, value)
    }

    fn schema_field(&self, schema: ObjRef, index: u8) -> OpResult<ObjRef> {
        self.heap
            .as_struct_schema(schema)
            .and_then(|s| s.fields.get(usize::from(index)))
            .copied()
            .ok_or_else(|| RuntimeErrorKind::Internal(format!("schema has no field {index}")))
    }

    // ===== References =====

    fn new_reference(&mut self, target: RefTarget) -> Value {
        Value::object(self.alloc(Obj::Reference(Reference { target })))
    }

    /// Reference to register `register` of the running frame
    pub(super) fn ref_local(&mut self, register: u8) -> Value {
        let slot = self.frame().base + usize::from(register);
        let cell = self.capture_upvalue(slot);
        self.new_reference(RefTarget::Local { cell })
    }

    pub(super) fn ref_upvalue(&mut self, index: u8) -> OpResult<Value> {
        let cell = self.upvalue_cell(index)?;
        Ok(self.new_reference(RefTarget::Upvalue { cell }))
    }

    pub(super) fn ref_global(&mut self, slot: u16) -> Value {
        self.new_reference(RefTarget::Global { slot })
    }

    /// Reference to `container[index]`; the element must exist for lists
    pub(super) fn ref_index(&mut self, container: Value, index: Value) -> OpResult<Value> {
        let Some(object) = container.as_object() else {
            return Err(RuntimeErrorKind::NotIndexable(self.heap.type_name(container)));
        };
        let target = match self.heap.get(object) {
            Obj::List(list) => {
                let index = self.list_position(index, list.items.len())?;
                RefTarget::Index {
                    container: object,
                    index,
                }
            }
            Obj::Map(_) => RefTarget::Key {
                container: object,
                key: self.map_key(index)?,
            },
            Obj::StructInstance(_) => {
                let key = self.struct_key(index)?;
                self.field_get(container, key)?;
                RefTarget::Key {
                    container: object,
                    key,
                }
            }
            other => return Err(RuntimeErrorKind::NotIndexable(other.type_name())),
        };
        Ok(self.new_reference(target))
    }

    /// Reference to `container.field`
    pub(super) fn ref_field(&mut self, container: Value, field: ObjRef) -> OpResult<Value> {
        self.field_get(container, field)?;
        let Some(object) = container.as_object() else {
            return Err(self.undefined_field(container, field));
        };
        Ok(self.new_reference(RefTarget::Key {
            container: object,
            key: field,
        }))
    }

    pub(super) fn reference_target(&self, value: Value) -> Option<RefTarget> {
        value
            .as_object()
            .and_then(|r| self.heap.as_reference(r))
            .map(|r| r.target)
    }

    /// One level of dereference; anything that is not a reference reads as
    /// itself
    pub(super) fn deref(&self, value: Value) -> OpResult<Value> {
        match self.reference_target(value) {
            Some(target) => self.read_target(target),
            None => Ok(value),
        }
    }

    /// Store `value` through the reference in `R[a]`, following references
    /// stored at each target until one holds a plain value. A register that
    /// holds no reference is assigned directly.
    pub(super) fn set_deref(&mut self, a: u8, value: Value) -> OpResult<()> {
        let Some(mut target) = self.reference_target(self.reg(a)) else {
            self.set_reg(a, value);
            return Ok(());
        };
        for _ in 0..MAX_REF_CHAIN {
            let current = self.read_target(target)?;
            match self.reference_target(current) {
                Some(next) => target = next,
                None => return self.write_target(target, value),
            }
        }
        Err(RuntimeErrorKind::ReferenceCycle)
    }

    pub(super) fn read_target(&self, target: RefTarget) -> OpResult<Value> {
        match target {
            RefTarget::Local { cell } | RefTarget::Upvalue { cell } => Ok(self.read_cell(cell)),
            RefTarget::Global { slot } => self
                .globals
                .values
                .get(usize::from(slot))
                .copied()
                .flatten()
                .ok_or_else(|| RuntimeErrorKind::UndefinedVariable(self.global_name(slot))),
            RefTarget::Index { container, index } => {
                let list = self.heap.as_list(container).ok_or_else(|| {
                    RuntimeErrorKind::Internal("list reference to a non-list".into())
                })?;
                list.items
                    .get(index)
                    .copied()
                    .ok_or(RuntimeErrorKind::IndexOutOfBounds {
                        index: index as i64,
                        length: list.items.len(),
                    })
            }
            RefTarget::Key { container, key } => self.field_get(Value::object(container), key),
        }
    }

    pub(super) fn write_target(&mut self, target: RefTarget, value: Value) -> OpResult<()> {
        match target {
            RefTarget::Local { cell } | RefTarget::Upvalue { cell } => {
                self.write_cell(cell, value);
                Ok(())
            }
            RefTarget::Global { slot } => match self.globals.values.get_mut(usize::from(slot)) {
                Some(entry) => {
                    *entry = Some(value);
                    Ok(())
                }
                None => Err(RuntimeErrorKind::UndefinedVariable(self.global_name(slot))),
            },
            RefTarget::Index { container, index } => {
                let list = self.heap.as_list_mut(container).ok_or_else(|| {
                    RuntimeErrorKind::Internal("list reference to a non-list".into())
                })?;
                let length = list.items.len();
                match list.items.get_mut(index) {
                    Some(item) => {
                        *item = value;
                        Ok(())
                    }
                    None => Err(RuntimeErrorKind::IndexOutOfBounds {
                        index: index as i64,
                        length,
                    }),
                }
            }
            RefTarget::Key { container, key } => {
                self.field_set(Value::object(container), key, value)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{List, StructInstance, StructSchema};

    fn list_of(vm: &mut Vm, items: &[f64]) -> Value {
        let items = items.iter().map(|n| Value::number(*n)).collect();
        Value::object(vm.alloc(Obj::List(List { items })))
    }

    #[test]
    fn list_indexing_checks_bounds() {
        let mut vm = Vm::default();
        let list = list_of(&mut vm, &[1.0, 2.0]);
        assert_eq!(
            vm.index_get(list, Value::number(1.0)),
            Ok(Value::number(2.0))
        );
        assert_eq!(
            vm.index_get(list, Value::number(2.0)),
            Err(RuntimeErrorKind::IndexOutOfBounds {
                index: 2,
                length: 2
            })
        );
        assert_eq!(
            vm.index_get(list, Value::number(-1.0)),
            Err(RuntimeErrorKind::IndexOutOfBounds {
                index: -1,
                length: 2
            })
        );
    }

    #[test]
    fn missing_map_key_reads_null() {
        let mut vm = Vm::default();
        let map = Value::object(vm.alloc(Obj::Map(Default::default())));
        let key = Value::object(vm.intern("missing"));
        assert_eq!(vm.index_get(map, key), Ok(Value::NULL));
        vm.index_set(map, key, Value::TRUE).unwrap();
        assert_eq!(vm.index_get(map, key), Ok(Value::TRUE));
    }

    #[test]
    fn string_index_yields_one_character() {
        let mut vm = Vm::default();
        let text = Value::object(vm.intern("héllo"));
        let ch = vm.index_get(text, Value::number(1.0)).unwrap();
        assert_eq!(vm.heap().value_as_str(ch), Some("é"));
    }

    #[test]
    fn indexed_field_falls_back_to_name() {
        let mut vm = Vm::default();
        let point = vm.intern("Point");
        let other = vm.intern("Other");
        let x = vm.intern("x");
        let y = vm.intern("y");
        let point_schema = vm.alloc(Obj::StructSchema(StructSchema::new(point, vec![x, y])));
        let other_schema = vm.alloc(Obj::StructSchema(StructSchema::new(other, vec![y, x])));
        let instance = Value::object(vm.alloc(Obj::StructInstance(StructInstance {
            schema: other_schema,
            fields: vec![Value::number(20.0), Value::number(10.0)],
        })));
        assert_eq!(
            vm.field_get_indexed(instance, 0, point_schema),
            Ok(Value::number(10.0))
        );
        vm.field_set_indexed(instance, 1, point_schema, Value::number(5.0))
            .unwrap();
        assert_eq!(vm.field_get(instance, y), Ok(Value::number(5.0)));
    }

    #[test]
    fn writes_follow_reference_chains() {
        let mut vm = Vm::default();
        let list = list_of(&mut vm, &[1.0]);
        vm.push_temp_root(list);
        let inner = vm.ref_index(list, Value::number(0.0)).unwrap();
        vm.push_temp_root(inner);
        let holder = Value::object(vm.alloc(Obj::List(List { items: vec![inner] })));
        vm.push_temp_root(holder);
        let outer = vm.ref_index(holder, Value::number(0.0)).unwrap();

        vm.stack.push(outer);
        vm.frames.push(super::super::CallFrame {
            closure: ObjRef::new(0, 0),
            chunk: Default::default(),
            ip: 0,
            base: 0,
            registers: 1,
        });
        vm.set_deref(0, Value::number(42.0)).unwrap();
        assert_eq!(vm.deref(outer), Ok(inner));
        assert_eq!(vm.deref(inner), Ok(Value::number(42.0)));
    }
}
