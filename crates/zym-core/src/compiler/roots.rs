//! GC roots held by a compilation in progress
//!
//! Constants, names and schemas of functions that are still being compiled
//! live only in compiler state until the finished function is allocated.

use std::collections::HashMap;

use crate::gc::{GcRoots, Marker};

use super::{FunctionState, GlobalBinding, TypeBinding};

pub(crate) struct CompilerRoots<'c> {
    pub states: &'c [FunctionState],
    pub global_types: &'c [TypeBinding],
    pub globals: &'c HashMap<String, GlobalBinding>,
}

impl GcRoots for CompilerRoots<'_> {
    fn mark_roots(&self, marker: &mut Marker<'_>) {
        for state in self.states {
            marker.mark_values(state.chunk.constants());
            for r in state.name_ref.iter().chain(state.module_ref.iter()) {
                marker.mark_object(*r);
            }
            for local in state.scopes.locals() {
                if let Some(schema) = local.info.struct_type {
                    marker.mark_object(schema);
                }
            }
            for schema in state.upvalues.struct_types() {
                marker.mark_object(schema);
            }
            for binding in &state.types {
                marker.mark_object(binding.def.schema());
            }
        }
        for binding in self.global_types {
            marker.mark_object(binding.def.schema());
        }
        for global in self.globals.values() {
            if let Some(schema) = global.info.struct_type {
                marker.mark_object(schema);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::scope::BindingInfo;
    use crate::compiler::TypeDef;
    use crate::config::{GcConfig, TcoMode};
    use crate::gc::Heap;
    use crate::object::{List, Obj, StructSchema};
    use crate::value::Value;

    #[test]
    fn open_function_state_keeps_its_objects_alive() {
        let mut heap = Heap::new(GcConfig::default());
        let name = heap.insert_string("Point");
        let schema = heap.insert(Obj::StructSchema(StructSchema::new(name, Vec::new())));
        let constant = heap.insert(Obj::List(List::default()));
        let local_type = heap.insert(Obj::StructSchema(StructSchema::new(name, Vec::new())));
        let garbage = heap.insert(Obj::List(List::default()));

        let mut state = FunctionState::new(None, None, None, TcoMode::Safe, false);
        state.chunk.add_constant(Value::object(constant)).unwrap();
        state.scopes.begin_scope();
        let register = state.scopes.alloc().unwrap();
        state
            .scopes
            .declare(
                "p",
                register,
                BindingInfo {
                    struct_type: Some(local_type),
                    ..BindingInfo::default()
                },
            )
            .unwrap();
        let global_types = vec![TypeBinding {
            name: "Point".into(),
            depth: 0,
            def: TypeDef::Struct(schema),
        }];
        let globals = HashMap::new();
        let states = vec![state];

        let roots = CompilerRoots {
            states: &states,
            global_types: &global_types,
            globals: &globals,
        };
        heap.collect(&[&roots]);

        for kept in [name, schema, constant, local_type] {
            assert!(heap.contains(kept));
        }
        assert!(!heap.contains(garbage));
    }
}
