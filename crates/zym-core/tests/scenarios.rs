//! End-to-end language scenarios

use zym_core::bytecode::disassemble_function;
use zym_core::testutil::{compile_errors, eval_number, expect_runtime_error, run_capture, run_on};
use zym_core::{compile, CompileOptions, CompilerConfig, Value, Vm, VmConfig};

#[test]
fn test_add_function() {
    let mut vm = Vm::new(VmConfig::default());
    let mut sink = Vec::new();
    let source = "func add(a, b) { return a + b }\nreturn add(2, 3)";
    let script = compile(&mut vm, source, CompileOptions::new("main"), &mut sink).unwrap();

    let heap = vm.heap();
    let add = heap
        .as_function(script)
        .unwrap()
        .chunk
        .constants()
        .iter()
        .filter_map(|c| c.as_object())
        .find(|r| heap.as_function(*r).is_some())
        .unwrap();
    assert_eq!(heap.as_function(add).unwrap().arity, 2);
    let listing = disassemble_function(heap, add);
    assert!(listing.contains("ADD"), "{listing}");
    assert!(listing.contains("1 2"), "{listing}");

    assert_eq!(vm.run(script).unwrap(), Value::number(5.0));
}

#[test]
fn test_reference_assignment_writes_through() {
    let lines = run_capture("var x = 5\nvar r = ref x\nr = 10\nprint(x)\nprint(r)").unwrap();
    assert_eq!(lines, vec!["10", "10"]);
}

#[test]
fn test_overloads_dispatch_by_arity() {
    let source = r#"
func f(a) { return "one" }
func f(a, b) { return "two" }
print(f(1))
print(f(1, 2))
var g = f
print(g(1), g(1, 2))
"#;
    let mut vm = Vm::new(VmConfig::default());
    let (result, output) =
        zym_core::with_output_capture(|| run_on(&mut vm, source, CompilerConfig::default()));
    result.unwrap();
    assert_eq!(output.stdout, vec!["one", "two", "one two"]);

    let g = vm.global("g").unwrap().as_object().unwrap();
    let dispatcher = vm.heap().as_dispatcher(g).unwrap();
    assert_eq!(dispatcher.candidates.len(), 2);
}

#[test]
fn test_dispatcher_without_matching_arity() {
    let message = expect_runtime_error(
        "func f(a) { return 1 }\nfunc f(a, b) { return 2 }\nvar g = f\ng(1, 2, 3)",
    )
    .unwrap();
    assert_eq!(message, "no overload of 'f' takes 3 arguments");
}

#[test]
fn test_closures_keep_their_variables() {
    let source = r"
func counter() {
    var n = 0
    return func() {
        n += 1
        return n
    }
}
var a = counter()
var b = counter()
a()
a()
print(a(), b())
";
    assert_eq!(run_capture(source).unwrap(), vec!["3 1"]);
}

#[test]
fn test_loops_break_and_continue() {
    let source = r"
var total = 0
for (var i = 0; i < 10; i += 1) {
    if (i == 3) continue
    if (i == 7) break
    total += i
}
print(total)
var n = 0
do { n += 2 } while (n < 5)
print(n)
var w = 3
while (w > 0) w -= 1
print(w)
";
    assert_eq!(run_capture(source).unwrap(), vec!["18", "6", "0"]);
}

#[test]
fn test_structs_and_enums() {
    let source = r"
struct Point { x, y }
enum Color { Red, Green, Blue }
var p = Point { 1, 2 }
p.x = 10
var q = Point { y: 4 }
print(p)
print(q.x, q.y)
print(Color.Blue)
print(Color.Red == Color.Red, Color.Red == Color.Green)
var copy = val p
copy.y = 99
print(p.y, copy.y)
";
    assert_eq!(
        run_capture(source).unwrap(),
        vec!["Point { x: 10, y: 2 }", "null 4", "Color.Blue", "true false", "2 99"]
    );
}

#[test]
fn test_maps_lists_and_strings() {
    let source = r#"
var m = {a: 1}
m.b = 2
m["c"] = 3
print(m)
print(m.missing)
print(keys(m))
var xs = [1, 2]
push(xs, 3)
print(xs, len(xs))
xs[0] = "first"
print(xs[0] + "!", pop(xs))
print("n=" + 4, len("héllo"), "abc"[1])
print(type(m), type(xs), type(1), type(null))
"#;
    assert_eq!(
        run_capture(source).unwrap(),
        vec![
            "{a: 1, b: 2, c: 3}",
            "null",
            r#"["a", "b", "c"]"#,
            "[1, 2, 3] 3",
            "first! 3",
            "n=4 5 b",
            "map list number null",
        ]
    );
}

#[test]
fn test_arithmetic_and_bitwise() {
    assert_eq!(eval_number("return 7 % 3 + 2 * 3 - 1").unwrap(), 6.0);
    assert_eq!(eval_number("var a = 6\nreturn (a & 3) | (1 << 4)").unwrap(), 18.0);
    assert_eq!(eval_number("var big = 100000\nreturn big * 3 + 0.5").unwrap(), 300000.5);
    assert_eq!(eval_number("return ~0 ^ 5").unwrap(), -6.0);
}

#[test]
fn test_logical_operators_yield_operands() {
    let lines = run_capture("print(null or 3, 1 and 2, false && 9, !0)").unwrap();
    assert_eq!(lines, vec!["3 2 false false"]);
}

#[test]
fn test_runtime_errors() {
    assert_eq!(expect_runtime_error("var z = 0\nprint(1 / z)").unwrap(), "division by zero");
    assert_eq!(
        expect_runtime_error("print(missing)").unwrap(),
        "undefined variable 'missing'"
    );
    assert_eq!(
        expect_runtime_error("var xs = [1]\nprint(xs[5])").unwrap(),
        "index 5 out of bounds for length 1"
    );
    assert_eq!(
        expect_runtime_error("func f(a) { return a }\nvar g = f\ng()").unwrap(),
        "expected 1 arguments, got 0"
    );
    assert_eq!(
        expect_runtime_error("assert(1 == 2, \"math\")").unwrap(),
        "assert: math"
    );
}

#[test]
fn test_runtime_error_trace() {
    let mut vm = Vm::new(VmConfig::default());
    let mut sink = Vec::new();
    let source = "func inner() {\n    return null + 1\n}\nfunc outer() {\n    inner()\n}\nouter()";
    let script = compile(&mut vm, source, CompileOptions::new("trace"), &mut sink).unwrap();
    let error = vm.run(script).unwrap_err();
    let names: Vec<&str> = error
        .stack_trace
        .iter()
        .map(|f| f.function_name.as_str())
        .collect();
    assert_eq!(names, vec!["inner", "outer", "<script>"]);
    assert_eq!(error.stack_trace[0].line, 2);
    let text = error.to_string();
    assert!(text.starts_with("RuntimeError: "), "{text}");
    assert!(text.contains("[trace] line 2 in inner"), "{text}");
}

#[test]
fn test_compile_errors_are_collected() {
    let errors = compile_errors(
        "struct P { x, x }\n\
         func f() { struct Q { a } }\n\
         var a = Q { 1 }\n\
         var p = P { 1, 2, 3 }\n\
         ref r = 1 + 2",
    )
    .unwrap();
    assert_eq!(
        errors,
        vec![
            "[test] line 1: duplicate field 'x' in struct 'P'",
            "[test] line 3: undefined struct 'Q'",
            "[test] line 4: struct 'P' has 2 fields but 3 values were given",
            "[test] line 5: cannot take a reference to a temporary value; \
             'ref' needs a variable, element or field",
        ]
    );
}

#[test]
fn test_globals_persist_across_compilations() {
    let mut vm = Vm::new(VmConfig::default());
    run_on(&mut vm, "var shared = 41", CompilerConfig::default()).unwrap();
    let value = run_on(&mut vm, "return shared + 1", CompilerConfig::default()).unwrap();
    assert_eq!(value, Value::number(42.0));
}

#[test]
fn test_native_closure_context() {
    fn add_context(_vm: &mut Vm, context: Value, args: &[Value]) -> Result<Value, String> {
        let base = context.as_number().ok_or("context is not a number")?;
        let arg = args[0].as_number().ok_or("argument is not a number")?;
        Ok(Value::number(base + arg))
    }

    let mut vm = Vm::new(VmConfig::default());
    vm.define_native_closure("addTen", Some(1), add_context, Value::number(10.0));
    let value = run_on(&mut vm, "return addTen(5)", CompilerConfig::default()).unwrap();
    assert_eq!(value, Value::number(15.0));
}
