//! Garbage collection under real programs

use zym_core::object::{List, Obj};
use zym_core::testutil::{run_capture_with, run_on};
use zym_core::{CompilerConfig, GcConfig, Value, Vm, VmConfig};

fn stress() -> VmConfig {
    VmConfig {
        gc: GcConfig {
            stress: true,
            ..GcConfig::default()
        },
        ..VmConfig::default()
    }
}

#[test]
fn test_programs_survive_stress_collection() {
    let source = r#"
struct Pair { left, right }
func build(n) {
    var out = []
    for (var i = 0; i < n; i += 1) {
        push(out, Pair { "item" + i, {index: i, tags: [i, i * 2]} })
    }
    return out
}
func counter() {
    var n = 0
    return func() {
        n += 1
        return n
    }
}
var items = build(20)
var next = counter()
next()
print(len(items), items[19].left, items[7].right.tags, next())
var copy = clone items
print(copy[3].right.index, copy[3] == items[3])
"#;
    let lines =
        run_capture_with(source, CompilerConfig::default(), stress()).unwrap();
    assert_eq!(lines, vec!["20 item19 [7, 14] 2", "3 false"]);
}

#[test]
fn test_stress_collection_while_compiling() {
    let mut vm = Vm::new(stress());
    let source = r#"
func a() { return "alpha" + "beta" }
func b() { return [a(), "gamma", {delta: "epsilon"}] }
return b()
"#;
    let value = run_on(&mut vm, source, CompilerConfig::default()).unwrap();
    assert_eq!(vm.format_value(value), r#"["alphabeta", "gamma", {delta: "epsilon"}]"#);
    assert!(vm.heap().stats().collections > 0);
}

#[test]
fn test_unreachable_objects_are_freed() {
    let mut vm = Vm::new(VmConfig::default());
    let garbage = vm.alloc(Obj::List(List { items: Vec::new() }));
    let kept = vm.alloc(Obj::List(List { items: Vec::new() }));
    vm.define_global("kept", Value::object(kept));

    let report = vm.collect_garbage();
    assert!(report.freed >= 1, "{report:?}");
    assert!(!vm.heap().contains(garbage));
    assert!(vm.heap().contains(kept));
}

#[test]
fn test_temp_roots_keep_objects_alive() {
    let mut vm = Vm::new(VmConfig::default());
    let held = vm.alloc(Obj::List(List { items: Vec::new() }));
    vm.push_temp_root(Value::object(held));
    vm.collect_garbage();
    assert!(vm.heap().contains(held));

    vm.pop_temp_roots(1);
    vm.collect_garbage();
    assert!(!vm.heap().contains(held));
}

#[test]
fn test_gc_native_reports_freed_objects() {
    let source = r"
func churn() {
    for (var i = 0; i < 50; i += 1) {
        var scratch = [i, [i]]
    }
}
churn()
return gc()
";
    let mut vm = Vm::new(VmConfig::default());
    let freed = run_on(&mut vm, source, CompilerConfig::default()).unwrap();
    assert!(freed.as_number().is_some_and(|n| n >= 50.0), "{freed:?}");
}

#[test]
fn test_interned_strings_are_pruned() {
    let mut vm = Vm::new(VmConfig::default());
    run_on(&mut vm, "var s = \"left\" + \"over\"\ns = null", CompilerConfig::default())
        .unwrap();
    assert!(vm.heap().find_interned("leftover").is_some());
    let report = vm.collect_garbage();
    assert!(report.strings_pruned >= 1, "{report:?}");
    assert!(vm.heap().find_interned("leftover").is_none());
}
