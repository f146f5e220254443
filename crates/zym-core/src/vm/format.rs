//! Display form of values, as `print` and `str` show them

use std::fmt::Write as _;

use crate::gc::Heap;
use crate::object::{Obj, ObjRef};
use crate::value::Value;

use super::Vm;

/// Nesting depth past which containers print as `...`
const MAX_DEPTH: usize = 64;

/// Format `value` without a VM. Enum names are found by scanning the heap.
pub fn format_value(heap: &Heap, value: Value) -> String {
    let mut printer = Printer {
        heap,
        enums: None,
        active: Vec::new(),
    };
    let mut out = String::new();
    printer.write(&mut out, value, false);
    out
}

impl Vm {
    /// Format `value` the way `print` shows it
    pub fn format_value(&self, value: Value) -> String {
        let mut printer = Printer {
            heap: &self.heap,
            enums: Some(&self.enums),
            active: Vec::new(),
        };
        let mut out = String::new();
        printer.write(&mut out, value, false);
        out
    }
}

/// Integers print without a fractional part
pub(crate) fn format_number(n: f64) -> String {
    if n.is_nan() {
        "nan".to_string()
    } else if n.is_infinite() {
        String::from(if n > 0.0 { "inf" } else { "-inf" })
    } else if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

struct Printer<'a> {
    heap: &'a Heap,
    enums: Option<&'a [ObjRef]>,
    /// Containers currently being printed, for cycle detection
    active: Vec<ObjRef>,
}

impl Printer<'_> {
    fn write(&mut self, out: &mut String, value: Value, nested: bool) {
        if let Some(n) = value.as_number() {
            out.push_str(&format_number(n));
        } else if value.is_null() {
            out.push_str("null");
        } else if let Some(b) = value.as_bool() {
            out.push_str(if b { "true" } else { "false" });
        } else if let Some((type_id, variant)) = value.as_enum() {
            self.write_enum(out, type_id, variant);
        } else if let Some(r) = value.as_object() {
            self.write_object(out, r, nested);
        }
    }

    fn name(&self, r: Option<ObjRef>) -> &str {
        r.and_then(|r| self.heap.as_str(r)).unwrap_or("?")
    }

    fn write_enum(&mut self, out: &mut String, type_id: u16, variant: u16) {
        let schema = match self.enums {
            Some(enums) => enums
                .get(usize::from(type_id))
                .and_then(|r| self.heap.as_enum_schema(*r)),
            None => self.heap.objects().find_map(|(_, obj)| match obj {
                Obj::EnumSchema(schema) if schema.type_id == type_id => Some(schema),
                _ => None,
            }),
        };
        match schema {
            Some(schema) => {
                let variant_name = self.name(schema.variants.get(usize::from(variant)).copied());
                let _ = write!(out, "{}.{}", self.name(Some(schema.name)), variant_name);
            }
            None => {
                let _ = write!(out, "<enum {type_id}.{variant}>");
            }
        }
    }

    fn write_object(&mut self, out: &mut String, r: ObjRef, nested: bool) {
        if !self.heap.contains(r) {
            out.push_str("<freed>");
            return;
        }
        let heap = self.heap;
        match heap.get(r) {
            Obj::Str(s) => {
                if nested {
                    let _ = write!(out, "{:?}", s.as_str());
                } else {
                    out.push_str(s.as_str());
                }
            }
            Obj::Function(f) => match f.name {
                Some(name) => {
                    let _ = write!(out, "<fn {}>", self.name(Some(name)));
                }
                None => out.push_str("<script>"),
            },
            Obj::Closure(c) => self.write_object(out, c.function, nested),
            Obj::Native(n) => {
                let _ = write!(out, "<native {}>", n.name);
            }
            Obj::NativeClosure(n) => {
                let _ = write!(out, "<native {}>", n.name);
            }
            Obj::Upvalue(_) => out.push_str("<upvalue>"),
            Obj::Dispatcher(d) => {
                let _ = write!(out, "<dispatcher {}>", self.name(d.name));
            }
            Obj::Reference(_) => out.push_str("<ref>"),
            Obj::StructSchema(s) => {
                let _ = write!(out, "<struct {}>", self.name(Some(s.name)));
            }
            Obj::EnumSchema(e) => {
                let _ = write!(out, "<enum {}>", self.name(Some(e.name)));
            }
            Obj::PromptTag(p) => match p.name {
                Some(name) => {
                    let _ = write!(out, "<prompt {}>", self.name(Some(name)));
                }
                None => {
                    let _ = write!(out, "<prompt #{}>", p.id);
                }
            },
            Obj::Continuation(_) => out.push_str("<continuation>"),
            Obj::List(_) | Obj::Map(_) | Obj::StructInstance(_) => {
                if self.active.contains(&r) || self.active.len() >= MAX_DEPTH {
                    out.push_str("...");
                    return;
                }
                self.active.push(r);
                self.write_container(out, r);
                self.active.pop();
            }
        }
    }

    fn write_container(&mut self, out: &mut String, r: ObjRef) {
        let heap = self.heap;
        match heap.get(r) {
            Obj::List(list) => {
                out.push('[');
                for (i, item) in list.items.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    self.write(out, *item, true);
                }
                out.push(']');
            }
            Obj::Map(map) => {
                let mut entries: Vec<(&str, Value)> = map
                    .entries
                    .iter()
                    .map(|(key, value)| (heap.as_str(*key).unwrap_or("?"), *value))
                    .collect();
                entries.sort_by(|a, b| a.0.cmp(b.0));
                out.push('{');
                for (i, (key, value)) in entries.into_iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    let _ = write!(out, "{key}: ");
                    self.write(out, value, true);
                }
                out.push('}');
            }
            Obj::StructInstance(instance) => {
                let Some(schema) = heap.as_struct_schema(instance.schema) else {
                    out.push_str("<struct>");
                    return;
                };
                let _ = write!(out, "{} {{", self.name(Some(schema.name)));
                for (i, (field, value)) in schema.fields.iter().zip(&instance.fields).enumerate() {
                    out.push_str(if i > 0 { ", " } else { " " });
                    let _ = write!(out, "{}: ", self.name(Some(*field)));
                    self.write(out, *value, true);
                }
                out.push_str(if instance.fields.is_empty() { "}" } else { " }" });
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{List, StructInstance, StructSchema};

    #[test]
    fn numbers() {
        assert_eq!(format_number(5.0), "5");
        assert_eq!(format_number(-0.0), "0");
        assert_eq!(format_number(2.5), "2.5");
        assert_eq!(format_number(f64::NAN), "nan");
        assert_eq!(format_number(f64::NEG_INFINITY), "-inf");
        assert_eq!(format_number(1e20), "100000000000000000000");
    }

    #[test]
    fn strings_are_quoted_only_inside_containers() {
        let mut vm = Vm::default();
        let text = vm.intern("hi");
        let list = vm.alloc(Obj::List(List {
            items: vec![Value::object(text), Value::NULL, Value::TRUE],
        }));
        assert_eq!(vm.format_value(Value::object(text)), "hi");
        assert_eq!(vm.format_value(Value::object(list)), r#"["hi", null, true]"#);
    }

    #[test]
    fn struct_instances_show_fields() {
        let mut vm = Vm::default();
        let name = vm.intern("Point");
        let x = vm.intern("x");
        let y = vm.intern("y");
        let schema = vm.alloc(Obj::StructSchema(StructSchema::new(name, vec![x, y])));
        let point = vm.alloc(Obj::StructInstance(StructInstance {
            schema,
            fields: vec![Value::number(1.0), Value::number(2.0)],
        }));
        assert_eq!(vm.format_value(Value::object(point)), "Point { x: 1, y: 2 }");
    }

    #[test]
    fn cycles_print_ellipsis() {
        let mut vm = Vm::default();
        let list = vm.alloc(Obj::List(List::default()));
        vm.heap_mut()
            .as_list_mut(list)
            .unwrap()
            .items
            .push(Value::object(list));
        assert_eq!(vm.format_value(Value::object(list)), "[...]");
    }

    #[test]
    fn enum_variants_by_name() {
        let mut vm = Vm::default();
        let color = vm.intern("Color");
        let red = vm.intern("Red");
        let green = vm.intern("Green");
        let schema = vm.new_enum_type(color, vec![red, green], &[]).unwrap();
        let type_id = vm.heap().as_enum_schema(schema).unwrap().type_id;
        let value = Value::enum_variant(type_id, 1);
        assert_eq!(vm.format_value(value), "Color.Green");
        assert_eq!(format_value(vm.heap(), value), "Color.Green");
    }
}
