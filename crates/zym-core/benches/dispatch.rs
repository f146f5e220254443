//! Benchmark suite for the Zym interpreter
//!
//! Covers the hot paths of the register machine:
//! - arithmetic loops (instruction dispatch)
//! - calls and tail calls under each tail-call mode
//! - allocation-heavy code with the collector running

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use zym_core::{compile, CompileOptions, CompilerConfig, GcConfig, TcoMode, Vm, VmConfig};

/// Compile `source` once, then run it on the same VM every iteration
fn run_repeatedly(c: &mut Criterion, name: &str, source: &str, compiler: CompilerConfig) {
    let mut vm = Vm::new(VmConfig::default());
    let mut sink = Vec::new();
    let options = CompileOptions::new("bench").with_config(compiler);
    let script = compile(&mut vm, source, options, &mut sink).expect("benchmark source compiles");
    vm.define_global("__bench_script", zym_core::Value::object(script));

    c.bench_function(name, |b| {
        b.iter(|| black_box(vm.run(script).expect("benchmark source runs")));
    });
}

/// Benchmark a tight arithmetic loop
fn bench_arithmetic_loop(c: &mut Criterion) {
    let mut group = c.benchmark_group("arithmetic_loop");

    for size in [1_000, 10_000, 100_000].iter() {
        let source = format!(
            "var total = 0\nfor (var i = 0; i < {size}; i += 1) total += i * 2 % 7\nreturn total"
        );
        let mut vm = Vm::new(VmConfig::default());
        let mut sink = Vec::new();
        let script = compile(&mut vm, &source, CompileOptions::new("bench"), &mut sink)
            .expect("benchmark source compiles");
        vm.define_global("__bench_script", zym_core::Value::object(script));

        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| black_box(vm.run(script).expect("benchmark source runs")));
        });
    }

    group.finish();
}

/// Benchmark recursive calls
fn bench_calls(c: &mut Criterion) {
    let source = r"
func fib(n) {
    if (n < 2) return n
    return fib(n - 1) + fib(n - 2)
}
return fib(20)
";
    run_repeatedly(c, "fib_20", source, CompilerConfig::default());
}

/// Benchmark self tail calls in each mode that optimizes them
fn bench_tail_calls(c: &mut Criterion) {
    let source = r"
func sum(n, acc) {
    if (n == 0) return acc
    return sum(n - 1, acc + n)
}
return sum(3000, 0)
";
    for mode in [TcoMode::Off, TcoMode::Safe, TcoMode::Smart, TcoMode::Aggressive] {
        let config = CompilerConfig {
            tco: mode,
            ..CompilerConfig::default()
        };
        run_repeatedly(c, &format!("tail_sum_{mode}"), source, config);
    }
}

/// Benchmark allocation with a small collection threshold
fn bench_allocation(c: &mut Criterion) {
    let source = r"
var keep = []
for (var i = 0; i < 2000; i += 1) {
    var pair = [i, {value: i}]
    if (i % 100 == 0) push(keep, pair)
}
return len(keep)
";
    let mut vm = Vm::new(VmConfig {
        gc: GcConfig {
            initial_threshold: 64 * 1024,
            ..GcConfig::default()
        },
        ..VmConfig::default()
    });
    let mut sink = Vec::new();
    let script = compile(&mut vm, source, CompileOptions::new("bench"), &mut sink)
        .expect("benchmark source compiles");
    vm.define_global("__bench_script", zym_core::Value::object(script));

    c.bench_function("allocation_churn", |b| {
        b.iter(|| black_box(vm.run(script).expect("benchmark source runs")));
    });
}

criterion_group!(
    benches,
    bench_arithmetic_loop,
    bench_calls,
    bench_tail_calls,
    bench_allocation,
);

criterion_main!(benches);
