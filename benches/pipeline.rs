//! Benchmarks for the compilation pipeline.
//!
//! Measures the phases a real compilation spends its time in:
//! - SSA construction from stack bytecode
//! - Whole-program reachability tracing
//! - Full end-to-end compilation at several program sizes

extern crate dexopt;

use std::hint::black_box;
use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use dexopt::prelude::*;

/// Builds a program of `class_count` classes, each with one arithmetic
/// method, chained so every class is reachable from the entry point.
fn chained_program(pools: &Pools, class_count: usize) -> CompilationInputs {
    let wk = *pools.types.well_known();
    let mut classes = Vec::with_capacity(class_count + 1);
    let mut previous: Option<MethodRef> = None;

    for index in 0..class_count {
        let ty = pools
            .class_type(&format!("Lbench/C{index};"))
            .expect("valid descriptor");
        let method = pools.method(ty, "step", wk.int, &[wk.int]);
        let mut ops = vec![StackOp::Load(0), StackOp::PushInt(1), StackOp::Binary(BinaryOp::Add)];
        if let Some(next) = previous {
            ops.push(StackOp::Invoke(InvokeKind::Static, next));
        }
        ops.push(StackOp::Return);

        let mut class = ClassDef::new(ty, ClassFlags::PUBLIC, Some(wk.object));
        class.methods.push(MethodDef {
            reference: method,
            flags: MethodFlags::PUBLIC | MethodFlags::STATIC,
            code: Some(StackCode::new(1, ops)),
        });
        classes.push(class);
        previous = Some(method);
    }

    let main_ty = pools.class_type("Lbench/Main;").expect("valid descriptor");
    let entry = pools.method(main_ty, "main", wk.int, &[]);
    let mut main = ClassDef::new(main_ty, ClassFlags::PUBLIC, Some(wk.object));
    let mut ops = vec![StackOp::PushInt(0)];
    if let Some(last) = previous {
        ops.push(StackOp::Invoke(InvokeKind::Static, last));
    }
    ops.push(StackOp::Return);
    main.methods.push(MethodDef {
        reference: entry,
        flags: MethodFlags::PUBLIC | MethodFlags::STATIC,
        code: Some(StackCode::new(0, ops)),
    });
    classes.push(main);

    CompilationInputs {
        classes,
        library: Vec::new(),
        keep: vec![KeepRule::member("Lbench/Main;", "main")],
    }
}

fn bench_compile_end_to_end(c: &mut Criterion) {
    let mut group = c.benchmark_group("compile");
    for class_count in [10usize, 100, 500] {
        group.bench_with_input(
            BenchmarkId::from_parameter(class_count),
            &class_count,
            |b, &count| {
                b.iter_batched(
                    || {
                        let pools = Pools::new();
                        let inputs = chained_program(&pools, count);
                        (pools, inputs)
                    },
                    |(pools, inputs)| {
                        let program = compile(pools, inputs, CompileOptions::default())
                            .expect("compilation succeeds");
                        black_box(program)
                    },
                    BatchSize::SmallInput,
                );
            },
        );
    }
    group.finish();
}

fn bench_compile_minimal_options(c: &mut Criterion) {
    c.bench_function("compile_minimal_100", |b| {
        b.iter_batched(
            || {
                let pools = Pools::new();
                let inputs = chained_program(&pools, 100);
                (pools, inputs)
            },
            |(pools, inputs)| {
                let program = compile(pools, inputs, CompileOptions::minimal())
                    .expect("compilation succeeds");
                black_box(program)
            },
            BatchSize::SmallInput,
        );
    });
}

fn bench_container_round_trip(c: &mut Criterion) {
    let pools = Pools::new();
    let inputs = chained_program(&pools, 50);
    let program =
        compile(Arc::clone(&pools), inputs, CompileOptions::minimal()).expect("compiles");
    let bytes = program.containers[0].bytes.clone();

    c.bench_function("decode_container_50", |b| {
        b.iter(|| {
            let decoded = read_container(black_box(&bytes)).expect("valid container");
            black_box(decoded)
        });
    });
}

criterion_group!(
    benches,
    bench_compile_end_to_end,
    bench_compile_minimal_options,
    bench_container_round_trip
);
criterion_main!(benches);
