//! Bounded execution, preemption and limits

use std::sync::atomic::Ordering;

use zym_core::testutil::{run_capture_with, run_on};
use zym_core::{compile, CompileOptions, CompilerConfig, ExecutionState, Value, Vm, VmConfig};

const LOOP: &str = r"
var total = 0
for (var i = 0; i < 1000; i += 1) total += i
return total
";

fn load(vm: &mut Vm, source: &str) {
    let mut sink = Vec::new();
    let script = compile(vm, source, CompileOptions::new("exec"), &mut sink).unwrap();
    vm.load(script).unwrap();
}

#[test]
fn test_run_in_slices() {
    let mut vm = Vm::new(VmConfig::default());
    load(&mut vm, LOOP);

    let mut slices = 0;
    let result = loop {
        slices += 1;
        match vm.run_slice(100).unwrap() {
            ExecutionState::Suspended => {
                assert!(vm.is_running());
            }
            ExecutionState::Completed(value) => break value,
        }
    };
    assert_eq!(result, Value::number(499_500.0));
    assert!(slices > 1, "{slices}");
    assert!(vm.stats().instructions >= 100 * (slices - 1));
}

#[test]
fn test_resume_uses_configured_timeslice() {
    let mut vm = Vm::new(VmConfig {
        timeslice: Some(50),
        ..VmConfig::default()
    });
    load(&mut vm, LOOP);

    let mut state = vm.resume().unwrap();
    let mut slices = 1;
    while state == ExecutionState::Suspended {
        state = vm.resume().unwrap();
        slices += 1;
    }
    assert_eq!(state, ExecutionState::Completed(Value::number(499_500.0)));
    assert!(slices > 10, "{slices}");
}

#[test]
fn test_preempt_before_slice() {
    let mut vm = Vm::new(VmConfig::default());
    load(&mut vm, LOOP);

    let handle = vm.preempt_handle();
    handle.store(true, Ordering::Relaxed);
    assert_eq!(vm.run_slice(u64::MAX).unwrap(), ExecutionState::Suspended);
    assert!(!handle.load(Ordering::Relaxed));
    assert_eq!(
        vm.run_slice(u64::MAX).unwrap(),
        ExecutionState::Completed(Value::number(499_500.0))
    );
}

#[test]
fn test_native_requests_preemption() {
    fn pause(vm: &mut Vm, _args: &[Value]) -> Result<Value, String> {
        vm.preempt_handle().store(true, Ordering::Relaxed);
        Ok(Value::NULL)
    }

    let mut vm = Vm::new(VmConfig::default());
    vm.define_native("pause", Some(0), pause);
    load(&mut vm, "var stage = 1\npause()\nstage = 2\nreturn stage");

    assert_eq!(vm.run_slice(u64::MAX).unwrap(), ExecutionState::Suspended);
    assert_eq!(vm.global("stage"), Some(Value::number(1.0)));
    assert_eq!(
        vm.run_slice(u64::MAX).unwrap(),
        ExecutionState::Completed(Value::number(2.0))
    );
    assert!(!vm.is_running());
}

#[test]
fn test_unbounded_recursion_overflows() {
    let source = "func down(n) { return 1 + down(n + 1) }\ndown(0)";
    let error = run_capture_with(source, CompilerConfig::default(), VmConfig::default())
        .unwrap_err();
    assert!(error.contains("stack overflow"), "{error}");

    let small = VmConfig {
        max_frames: 16,
        ..VmConfig::default()
    };
    let source = "func depth(n) {\n    if (n == 0) return 0\n    return 1 + depth(n - 1)\n}\n\
                  print(depth(20))";
    let error = run_capture_with(source, CompilerConfig::default(), small).unwrap_err();
    assert!(error.contains("stack overflow"), "{error}");
}

#[test]
fn test_stats_count_calls() {
    let mut vm = Vm::new(VmConfig::default());
    let source = "func id(x) { return x }\nvar a = id(1)\nvar b = id(2)\nreturn a + b";
    let value = run_on(&mut vm, source, CompilerConfig::default()).unwrap();
    assert_eq!(value, Value::number(3.0));
    let stats = vm.stats();
    assert!(stats.calls >= 2, "{stats:?}");
    assert_eq!(stats.max_frame_depth, 2);

    vm.reset_stats();
    assert_eq!(vm.stats().calls, 0);
}
