//! Decoding and Evaluation Benchmarks
//!
//! Measures the two costs a solver interface pays for every nonlinear equation:
//!
//! ### 1. Decoding (`benchmark_decode`)
//! Turning instruction streams into expression trees. Streams are synthetic but shaped
//! like real model rows: long linear chains, products of variables and mixed
//! nonlinear terms.
//!
//! ### 2. Evaluation (`benchmark_eval`)
//! Evaluating a decoded tree with the JIT-compiled function against walking the tree
//! directly. Compilation happens during setup and is excluded.
//!
//! ## Usage
//!
//! Run with: `cargo bench --bench decode`

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use nlcode_jit::prelude::*;

/// `c0*x0 + c1*x1 + ... + c{n-1}*x{n-1}`
fn linear_chain(n: usize) -> Vec<Instruction> {
    let mut instructions = vec![Instruction::push_var(0), Instruction::mul_const(0)];
    for i in 1..n {
        instructions.push(Instruction::push_var(i));
        instructions.push(Instruction::mul_const_add(i));
    }
    instructions
}

/// `Σ exp(x_i) * x_{i+1}^2 - sqrt(x_i)`
fn mixed_terms(n: usize) -> Vec<Instruction> {
    let mut instructions = vec![Instruction::push_zero()];
    for i in 0..n {
        instructions.extend([
            Instruction::push_var(i),
            Instruction::call1(FuncCode::Exp),
            Instruction::push_var(i + 1),
            Instruction::call1(FuncCode::Sqr),
            Instruction::mul(),
            Instruction::add(),
            Instruction::push_var(i),
            Instruction::call1(FuncCode::Sqrt),
            Instruction::sub(),
        ]);
    }
    instructions
}

fn constants(n: usize) -> Vec<f64> {
    (0..n).map(|i| 1.0 + i as f64 * 0.25).collect()
}

fn benchmark_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");

    for n in [10, 100, 1000] {
        let resolver = ColumnMap::continuous(n + 1);
        let values = constants(n);

        let linear = linear_chain(n);
        group.bench_with_input(BenchmarkId::new("linear", n), &linear, |b, stream| {
            b.iter(|| {
                let mut model = RecordingModel::new(n + 1);
                decode(black_box(stream), &values, &resolver, &mut model).unwrap()
            })
        });

        let mixed = mixed_terms(n);
        group.bench_with_input(BenchmarkId::new("mixed", n), &mixed, |b, stream| {
            b.iter(|| {
                let mut model = RecordingModel::new(n + 1);
                decode(black_box(stream), &values, &resolver, &mut model).unwrap()
            })
        });
    }

    group.finish();
}

fn benchmark_eval(c: &mut Criterion) {
    let mut group = c.benchmark_group("eval");

    for n in [10, 100] {
        let resolver = ColumnMap::continuous(n + 1);
        let mut model = RecordingModel::new(n + 1);
        let eq = Equation::decode(&mixed_terms(n), &constants(n), &resolver, &mut model).unwrap();
        let point: Vec<f64> = (0..=n).map(|i| 0.5 + i as f64 * 0.01).collect();

        group.bench_with_input(BenchmarkId::new("jit", n), &point, |b, point| {
            b.iter(|| eq.eval(black_box(point)).unwrap())
        });
        group.bench_with_input(BenchmarkId::new("interpret", n), &point, |b, point| {
            b.iter(|| eq.interpret(black_box(point)).unwrap())
        });
    }

    group.finish();
}

criterion_group!(benches, benchmark_decode, benchmark_eval);
criterion_main!(benches);
