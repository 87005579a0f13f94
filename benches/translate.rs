//! Benchmarks for translation and execution of translated bytecode
//!
//! The arithmetic groups compare functions whose operand types are known
//! statically (typed `AddInt`) against the same code with unannotated
//! arguments (dynamic `BinaryOp` dispatch).

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use pytron::config::TranslatorConfig;
use pytron::runtime::Value;
use pytron::source::{Constant, DialectVersion, FunctionBuilder, FunctionRecord};
use pytron::translator::{FunctionArtifact, Translator};
use pytron::vm::BytecodeVM;
use std::time::Duration;

/// def chain(x): return x + 0 + 1 + ... + (depth - 1)
fn arithmetic_chain(depth: usize, typed: bool) -> FunctionRecord {
    let mut builder = FunctionBuilder::new("chain", DialectVersion::V3_11)
        .args(&["x"])
        .constants((0..depth as i64).map(Constant::Int).collect());
    if typed {
        builder = builder.annotate("x", "int").annotate("return", "int");
    }
    builder = builder.op("RESUME", 0).op("LOAD_FAST", 0);
    for i in 0..depth {
        builder = builder.op("LOAD_CONST", i as u32).op("BINARY_OP", 0);
    }
    builder.op("RETURN_VALUE", 0).build()
}

/// def count(n: int) -> int:
///     i = 0
///     while i < n: i += 1
///     return i
fn counting_loop() -> FunctionRecord {
    FunctionBuilder::new("count", DialectVersion::V3_11)
        .args(&["n"])
        .locals(&["i"])
        .annotate("n", "int")
        .annotate("return", "int")
        .constants(vec![Constant::None, Constant::Int(0), Constant::Int(1)])
        .op("RESUME", 0)
        .op("LOAD_CONST", 1)
        .op("STORE_FAST", 1)
        .op("LOAD_FAST", 1)
        .op("LOAD_FAST", 0)
        .op("COMPARE_OP", 0)
        .op("POP_JUMP_FORWARD_IF_FALSE", 5)
        .op("LOAD_FAST", 1)
        .op("LOAD_CONST", 2)
        .op("BINARY_OP", 13)
        .op("STORE_FAST", 1)
        .op("JUMP_BACKWARD", 9)
        .op("LOAD_FAST", 1)
        .op("RETURN_VALUE", 0)
        .build()
}

fn translate(translator: &Translator, record: &FunctionRecord) -> FunctionArtifact {
    translator.translate(record, DialectVersion::V3_11).expect("translation failed")
}

fn bench_translate_arithmetic(c: &mut Criterion) {
    let mut group = c.benchmark_group("translate_arithmetic");
    group.measurement_time(Duration::from_secs(5));
    let translator = Translator::new(TranslatorConfig::default());

    for depth in [5, 20, 100].iter() {
        let record = arithmetic_chain(*depth, true);
        group.throughput(Throughput::Elements(record.instructions.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(depth), &record, |b, record| {
            b.iter(|| translate(&translator, black_box(record)))
        });
    }

    group.finish();
}

fn bench_translate_loop(c: &mut Criterion) {
    let translator = Translator::new(TranslatorConfig::default());
    let record = counting_loop();
    c.bench_function("translate_loop", |b| b.iter(|| translate(&translator, black_box(&record))));
}

fn bench_run_arithmetic(c: &mut Criterion) {
    let mut group = c.benchmark_group("run_arithmetic");
    let translator = Translator::new(TranslatorConfig::default());

    for depth in [5, 20, 100].iter() {
        for typed in [true, false] {
            let artifact = translate(&translator, &arithmetic_chain(*depth, typed));
            let label = if typed { "typed" } else { "dynamic" };
            group.bench_with_input(BenchmarkId::new(label, depth), &artifact, |b, artifact| {
                let mut vm = BytecodeVM::new(translator.registry().clone());
                b.iter(|| vm.call_function(artifact, vec![Value::Int(black_box(1))]).expect("VM execution failed"))
            });
        }
    }

    group.finish();
}

fn bench_run_loop(c: &mut Criterion) {
    let mut group = c.benchmark_group("run_loop");
    let translator = Translator::new(TranslatorConfig::default());
    let artifact = translate(&translator, &counting_loop());

    for n in [10, 1_000, 100_000].iter() {
        group.throughput(Throughput::Elements(*n as u64));
        group.bench_with_input(BenchmarkId::from_parameter(n), n, |b, &n| {
            let mut vm = BytecodeVM::new(translator.registry().clone());
            b.iter(|| vm.call_function(&artifact, vec![Value::Int(black_box(n))]).expect("VM execution failed"))
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_translate_arithmetic,
    bench_translate_loop,
    bench_run_arithmetic,
    bench_run_loop,
);
criterion_main!(benches);
