//! Built-in native functions
//!
//! Natives get the VM and a copy of their arguments. Every argument is also
//! still on the value stack, so natives may allocate freely.

use crate::object::{ControlOp, List, NativeKind, Obj};
use crate::value::Value;

use super::output::capture_line;
use super::Vm;

/// Result type for native functions
pub type NativeResult = Result<Value, String>;

impl Vm {
    pub(super) fn register_natives(&mut self) {
        self.define_native("print", None, native_print);
        self.define_native("len", Some(1), native_len);
        self.define_native("push", Some(2), native_push);
        self.define_native("pop", Some(1), native_pop);
        self.define_native("keys", Some(1), native_keys);
        self.define_native("str", Some(1), native_str);
        self.define_native("type", Some(1), native_type);
        self.define_native("assert", None, native_assert);
        self.define_native("gc", Some(0), native_gc);
        self.define_native("newPrompt", None, native_new_prompt);

        let control = [
            ("withPrompt", 2, ControlOp::WithPrompt),
            ("capture", 1, ControlOp::Capture),
            ("resume", 2, ControlOp::Resume),
            ("abort", 2, ControlOp::Abort),
        ];
        for (name, arity, op) in control {
            self.define_native_kind(name, Some(arity), Vec::new(), NativeKind::Control(op));
        }
    }
}

fn native_print(vm: &mut Vm, args: &[Value]) -> NativeResult {
    let line = args
        .iter()
        .map(|value| vm.format_value(*value))
        .collect::<Vec<_>>()
        .join(" ");
    if !capture_line(&line) {
        println!("{line}");
    }
    Ok(Value::NULL)
}

fn native_len(vm: &mut Vm, args: &[Value]) -> NativeResult {
    let value = args[0];
    let length = match value.as_object().map(|r| vm.heap.get(r)) {
        Some(Obj::Str(s)) => s.char_count(),
        Some(Obj::List(list)) => list.items.len(),
        Some(Obj::Map(map)) => map.entries.len(),
        _ => {
            return Err(format!(
                "expected a string, list or map, got {}",
                vm.heap.type_name(value)
            ))
        }
    };
    Ok(Value::number(length as f64))
}

fn native_push(vm: &mut Vm, args: &[Value]) -> NativeResult {
    let list = args[0]
        .as_object()
        .filter(|r| vm.heap.as_list(*r).is_some())
        .ok_or_else(|| format!("expected a list, got {}", vm.heap.type_name(args[0])))?;
    let length = match vm.heap.as_list_mut(list) {
        Some(l) => {
            l.items.push(args[1]);
            l.items.len()
        }
        None => 0,
    };
    vm.heap.refresh_size(list);
    Ok(Value::number(length as f64))
}

fn native_pop(vm: &mut Vm, args: &[Value]) -> NativeResult {
    let popped = match args[0].as_object().and_then(|r| vm.heap.as_list_mut(r)) {
        Some(list) => list.items.pop(),
        None => return Err(format!("expected a list, got {}", vm.heap.type_name(args[0]))),
    };
    popped.ok_or_else(|| "pop from an empty list".to_string())
}

fn native_keys(vm: &mut Vm, args: &[Value]) -> NativeResult {
    let Some(map) = args[0].as_object().and_then(|r| vm.heap.as_map(r)) else {
        return Err(format!("expected a map, got {}", vm.heap.type_name(args[0])));
    };
    let mut keys: Vec<_> = map.entries.keys().copied().collect();
    keys.sort_by(|a, b| vm.heap.as_str(*a).cmp(&vm.heap.as_str(*b)));
    let items = keys.into_iter().map(Value::object).collect();
    Ok(Value::object(vm.alloc(Obj::List(List { items }))))
}

fn native_str(vm: &mut Vm, args: &[Value]) -> NativeResult {
    if vm.heap.value_as_str(args[0]).is_some() {
        return Ok(args[0]);
    }
    let text = vm.format_value(args[0]);
    Ok(Value::object(vm.intern(&text)))
}

fn native_type(vm: &mut Vm, args: &[Value]) -> NativeResult {
    let name = vm.heap.type_name(args[0]);
    Ok(Value::object(vm.intern(name)))
}

fn native_assert(vm: &mut Vm, args: &[Value]) -> NativeResult {
    let (condition, message) = match args {
        [condition] => (*condition, None),
        [condition, message] => (*condition, Some(*message)),
        _ => return Err(format!("expected 1 or 2 arguments, got {}", args.len())),
    };
    if condition.is_truthy() {
        return Ok(Value::NULL);
    }
    Err(match message {
        Some(message) => vm.format_value(message),
        None => "assertion failed".to_string(),
    })
}

fn native_gc(vm: &mut Vm, _args: &[Value]) -> NativeResult {
    let report = vm.collect_garbage();
    Ok(Value::number(report.freed as f64))
}

fn native_new_prompt(vm: &mut Vm, args: &[Value]) -> NativeResult {
    let name = match args {
        [] => None,
        [name] => match name.as_object().filter(|r| vm.heap.as_str(*r).is_some()) {
            Some(name) => Some(name),
            None => return Err(format!("expected a string, got {}", vm.heap.type_name(*name))),
        },
        _ => return Err(format!("expected 0 or 1 arguments, got {}", args.len())),
    };
    Ok(Value::object(vm.new_prompt_tag(name)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::with_output_capture;

    fn list(vm: &mut Vm, items: &[f64]) -> Value {
        let items = items.iter().map(|n| Value::number(*n)).collect();
        Value::object(vm.alloc(Obj::List(List { items })))
    }

    #[test]
    fn print_joins_arguments() {
        let mut vm = Vm::default();
        let hello = Value::object(vm.intern("hello"));
        let (result, output) =
            with_output_capture(|| native_print(&mut vm, &[hello, Value::number(42.0)]));
        assert_eq!(result, Ok(Value::NULL));
        assert_eq!(output.stdout, vec!["hello 42"]);
    }

    #[test]
    fn push_and_pop() {
        let mut vm = Vm::default();
        let items = list(&mut vm, &[1.0]);
        assert_eq!(
            native_push(&mut vm, &[items, Value::TRUE]),
            Ok(Value::number(2.0))
        );
        assert_eq!(native_pop(&mut vm, &[items]), Ok(Value::TRUE));
        assert_eq!(native_len(&mut vm, &[items]), Ok(Value::number(1.0)));
        native_pop(&mut vm, &[items]).unwrap();
        assert!(native_pop(&mut vm, &[items]).is_err());
    }

    #[test]
    fn len_counts_characters() {
        let mut vm = Vm::default();
        let text = Value::object(vm.intern("naïve"));
        assert_eq!(native_len(&mut vm, &[text]), Ok(Value::number(5.0)));
        assert!(native_len(&mut vm, &[Value::NULL]).is_err());
    }

    #[test]
    fn type_names() {
        let mut vm = Vm::default();
        let name = native_type(&mut vm, &[Value::number(1.0)]).unwrap();
        assert_eq!(vm.heap().value_as_str(name), Some("number"));
        let items = list(&mut vm, &[]);
        let name = native_type(&mut vm, &[items]).unwrap();
        assert_eq!(vm.heap().value_as_str(name), Some("list"));
    }

    #[test]
    fn assert_reports_message() {
        let mut vm = Vm::default();
        let message = Value::object(vm.intern("boom"));
        assert_eq!(native_assert(&mut vm, &[Value::TRUE]), Ok(Value::NULL));
        assert_eq!(
            native_assert(&mut vm, &[Value::FALSE, message]),
            Err("boom".to_string())
        );
        assert_eq!(
            native_assert(&mut vm, &[Value::NULL]),
            Err("assertion failed".to_string())
        );
    }

    #[test]
    fn gc_reports_freed_objects() {
        let mut vm = Vm::default();
        list(&mut vm, &[1.0, 2.0]);
        let freed = native_gc(&mut vm, &[]).unwrap();
        assert!(freed.as_number().unwrap() >= 1.0);
    }
}
