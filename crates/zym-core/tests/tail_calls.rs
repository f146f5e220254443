//! Tail-call modes

use zym_core::testutil::{run_capture_with, run_on};
use zym_core::{with_output_capture, CompilerConfig, TcoMode, Value, Vm, VmConfig};

const SUM: &str = r"
func sum(n, acc) {
    if (n == 0) return acc
    return sum(n - 1, acc + n)
}
print(sum(10000, 0))
";

fn with_mode(tco: TcoMode) -> CompilerConfig {
    CompilerConfig {
        tco,
        ..CompilerConfig::default()
    }
}

#[test]
fn test_safe_self_recursion_runs_in_one_frame() {
    let mut vm = Vm::new(VmConfig::default());
    let (result, output) =
        with_output_capture(|| run_on(&mut vm, SUM, with_mode(TcoMode::Safe)));
    result.unwrap();
    assert_eq!(output.stdout, vec!["50005000"]);

    let stats = vm.stats();
    assert!(stats.tail_calls >= 10000, "{stats:?}");
    assert!(stats.max_frame_depth <= 3, "{stats:?}");
}

#[test]
fn test_off_mode_overflows() {
    let error = run_capture_with(SUM, with_mode(TcoMode::Off), VmConfig::default()).unwrap_err();
    assert!(error.contains("stack overflow"), "{error}");
}

#[test]
fn test_directive_overrides_configured_mode() {
    let source = format!("@tco safe\n{SUM}");
    let lines = run_capture_with(&source, with_mode(TcoMode::Off), VmConfig::default()).unwrap();
    assert_eq!(lines, vec!["50005000"]);
}

#[test]
fn test_safe_mode_keeps_frames_of_capturing_functions() {
    let source = r"
func outer(limit) {
    func count(n) {
        if (n == limit) return n
        return count(n + 1)
    }
    return count(0)
}
print(outer(10000))
";
    let error =
        run_capture_with(source, with_mode(TcoMode::Safe), VmConfig::default()).unwrap_err();
    assert!(error.contains("stack overflow"), "{error}");

    let shallow = source.replace("10000", "100");
    let lines =
        run_capture_with(&shallow, with_mode(TcoMode::Safe), VmConfig::default()).unwrap();
    assert_eq!(lines, vec!["100"]);

    let lines =
        run_capture_with(source, with_mode(TcoMode::Aggressive), VmConfig::default()).unwrap();
    assert_eq!(lines, vec!["10000"]);
}

const MUTUAL: &str = r"
func isEven(n) {
    if (n == 0) return true
    return isOdd(n - 1)
}
func isOdd(n) {
    if (n == 0) return false
    return isEven(n - 1)
}
print(isEven(10001), isOdd(10001))
";

#[test]
fn test_smart_mode_handles_mutual_recursion() {
    let lines =
        run_capture_with(MUTUAL, with_mode(TcoMode::Smart), VmConfig::default()).unwrap();
    assert_eq!(lines, vec!["false true"]);
}

#[test]
fn test_safe_mode_does_not_optimize_mutual_recursion() {
    let error =
        run_capture_with(MUTUAL, with_mode(TcoMode::Safe), VmConfig::default()).unwrap_err();
    assert!(error.contains("stack overflow"), "{error}");
}

#[test]
fn test_aggressive_expression_statement_returns_callee_value() {
    let source = r"
func five() { return 5 }
func wrapper() { five() }
print(wrapper())
";
    let aggressive =
        run_capture_with(source, with_mode(TcoMode::Aggressive), VmConfig::default()).unwrap();
    assert_eq!(aggressive, vec!["5"]);

    let safe = run_capture_with(source, with_mode(TcoMode::Safe), VmConfig::default()).unwrap();
    assert_eq!(safe, vec!["null"]);
}

#[test]
fn test_tail_calls_close_captured_variables() {
    let source = r"
var saved = null
func step(n) {
    if (n == 0) return saved()
    var seen = n
    if (n == 1) saved = func() { return seen }
    return step(n - 1)
}
return step(3)
";
    let mut vm = Vm::new(VmConfig::default());
    let value = run_on(&mut vm, source, with_mode(TcoMode::Aggressive)).unwrap();
    assert_eq!(value, Value::number(1.0));
}

const ALL_MODES: [TcoMode; 4] = [
    TcoMode::Off,
    TcoMode::Safe,
    TcoMode::Smart,
    TcoMode::Aggressive,
];

#[test]
fn test_tail_call_arguments_see_writes_through_refs() {
    let source = r"
func f(n, acc) {
    if (n == 0) return acc
    var x = 1
    ref r = x
    return f(n - 1, (r = 5) + x)
}
print(f(1, 0))
";
    for mode in ALL_MODES {
        let lines = run_capture_with(source, with_mode(mode), VmConfig::default()).unwrap();
        assert_eq!(lines, vec!["10"], "{mode}");
    }
}

#[test]
fn test_tail_call_arguments_see_writes_from_closures() {
    let source = r"
func f(n, acc) {
    if (n == 0) return acc
    var x = 1
    func bump() {
        x = 5
        return 0
    }
    return f(n - 1, bump() + x)
}
print(f(2, 0))
";
    for mode in ALL_MODES {
        let lines = run_capture_with(source, with_mode(mode), VmConfig::default()).unwrap();
        assert_eq!(lines, vec!["5"], "{mode}");
    }
}
