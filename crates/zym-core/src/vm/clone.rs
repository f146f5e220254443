//! `val` and `clone`: shallow and deep copies of containers

use std::collections::HashMap;

use crate::object::{List, Map, Obj, ObjRef, StructInstance};
use crate::value::Value;

use super::Vm;

impl Vm {
    /// New list, map or struct instance holding the same element values.
    /// Anything else is immutable or shared and copies as itself.
    pub(super) fn shallow_clone(&mut self, value: Value) -> Value {
        let Some(source) = value.as_object() else {
            return value;
        };
        let copy = match self.heap.get(source) {
            Obj::List(list) => Obj::List(list.clone()),
            Obj::Map(map) => Obj::Map(map.clone()),
            Obj::StructInstance(instance) => Obj::StructInstance(instance.clone()),
            _ => return value,
        };
        Value::object(self.alloc(copy))
    }

    /// Copy the whole container graph reachable from `value`. Shared
    /// sub-objects stay shared in the copy and cycles are reproduced.
    /// Strings, functions and references are not containers and are shared.
    pub(super) fn deep_clone(&mut self, value: Value) -> Value {
        let rooted = self.temp_roots.len();
        let mut copies = HashMap::new();
        let mut pending = Vec::new();
        let result = self.copy_shell(value, &mut copies, &mut pending);

        while let Some((source, copy)) = pending.pop() {
            let children = self.children_of(source);
            for (position, child) in children {
                let child = self.copy_shell(child, &mut copies, &mut pending);
                self.store_child(copy, position, child);
            }
            self.heap.refresh_size(copy);
        }

        self.temp_roots.truncate(rooted);
        result
    }

    /// The copy of `value`, allocating an empty one and queueing it to be
    /// filled the first time a container is seen
    fn copy_shell(
        &mut self,
        value: Value,
        copies: &mut HashMap<ObjRef, ObjRef>,
        pending: &mut Vec<(ObjRef, ObjRef)>,
    ) -> Value {
        let Some(source) = value.as_object() else {
            return value;
        };
        if let Some(copy) = copies.get(&source) {
            return Value::object(*copy);
        }
        let shell = match self.heap.get(source) {
            Obj::List(list) => Obj::List(List {
                items: vec![Value::NULL; list.items.len()],
            }),
            Obj::Map(map) => Obj::Map(Map {
                entries: HashMap::with_capacity(map.entries.len()),
            }),
            Obj::StructInstance(instance) => Obj::StructInstance(StructInstance {
                schema: instance.schema,
                fields: vec![Value::NULL; instance.fields.len()],
            }),
            _ => return value,
        };
        let copy = self.alloc(shell);
        self.temp_roots.push(Value::object(copy));
        copies.insert(source, copy);
        pending.push((source, copy));
        Value::object(copy)
    }

    fn children_of(&self, source: ObjRef) -> Vec<(Slot, Value)> {
        match self.heap.get(source) {
            Obj::List(list) => list
                .items
                .iter()
                .enumerate()
                .map(|(i, v)| (Slot::Position(i), *v))
                .collect(),
            Obj::Map(map) => map
                .entries
                .iter()
                .map(|(k, v)| (Slot::Key(*k), *v))
                .collect(),
            Obj::StructInstance(instance) => instance
                .fields
                .iter()
                .enumerate()
                .map(|(i, v)| (Slot::Position(i), *v))
                .collect(),
            _ => Vec::new(),
        }
    }

    fn store_child(&mut self, copy: ObjRef, slot: Slot, child: Value) {
        match (self.heap.get_mut(copy), slot) {
            (Obj::List(list), Slot::Position(i)) => list.items[i] = child,
            (Obj::StructInstance(instance), Slot::Position(i)) => instance.fields[i] = child,
            (Obj::Map(map), Slot::Key(key)) => {
                map.entries.insert(key, child);
            }
            _ => {}
        }
    }
}

/// Where a child sits in its container
#[derive(Debug, Clone, Copy)]
enum Slot {
    Position(usize),
    Key(ObjRef),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list_of(vm: &mut Vm, items: Vec<Value>) -> ObjRef {
        vm.alloc(Obj::List(List { items }))
    }

    #[test]
    fn shallow_clone_shares_elements() {
        let mut vm = Vm::default();
        let inner = list_of(&mut vm, vec![Value::number(1.0)]);
        let outer = list_of(&mut vm, vec![Value::object(inner)]);
        let copy = vm.shallow_clone(Value::object(outer)).as_object().unwrap();
        assert_ne!(copy, outer);
        assert_eq!(
            vm.heap().as_list(copy).unwrap().items,
            vec![Value::object(inner)]
        );
    }

    #[test]
    fn deep_clone_preserves_aliasing() {
        let mut vm = Vm::default();
        let shared = list_of(&mut vm, vec![Value::number(1.0)]);
        let outer = list_of(&mut vm, vec![Value::object(shared), Value::object(shared)]);
        let copy = vm.deep_clone(Value::object(outer)).as_object().unwrap();
        let items = vm.heap().as_list(copy).unwrap().items.clone();
        assert_eq!(items[0], items[1]);
        assert_ne!(items[0], Value::object(shared));
        let inner = items[0].as_object().unwrap();
        assert_eq!(vm.heap().as_list(inner).unwrap().items, vec![Value::number(1.0)]);
    }

    #[test]
    fn deep_clone_reproduces_cycles() {
        let mut vm = Vm::default();
        let list = list_of(&mut vm, Vec::new());
        vm.heap_mut()
            .as_list_mut(list)
            .unwrap()
            .items
            .push(Value::object(list));
        let copy = vm.deep_clone(Value::object(list)).as_object().unwrap();
        assert_ne!(copy, list);
        assert_eq!(
            vm.heap().as_list(copy).unwrap().items,
            vec![Value::object(copy)]
        );
    }

    #[test]
    fn strings_are_shared() {
        let mut vm = Vm::default();
        let text = Value::object(vm.intern("same"));
        assert_eq!(vm.deep_clone(text), text);
        assert_eq!(vm.shallow_clone(text), text);
    }
}
