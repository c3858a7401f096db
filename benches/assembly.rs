//! Gradient Assembly Benchmarks
//!
//! Measures one full `calc_gradient` pass (local derivatives, assembly and LU solve) on a
//! chain of expression components, in both direct and adjoint mode. The setup is cached
//! after the first pass, so the numbers reflect the per-pass cost only.
//!
//! ## Usage
//!
//! Run with: `cargo bench --bench assembly`

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use evalexpr_analytic::prelude::*;

/// Builds a chain `c0 -> c1 -> ... -> c{n-1}` of quadratic components.
fn chain(n: usize) -> (Assembly, Problem) {
    let mut model = Assembly::new("top");
    for i in 0..n {
        model.add(
            ExprComponent::new(format!("c{i}"))
                .input("x", 0.5)
                .input("w", 1.0)
                .output("y", "0.5*x^2 + w*x")
                .unwrap(),
        );
    }
    for i in 1..n {
        model
            .connect(&format!("c{}.y", i - 1), &format!("c{i}.x"))
            .unwrap();
    }
    let problem = Problem::new()
        .parameter("c0.x")
        .parameter("c0.w")
        .objective("f", &format!("c{}.y", n - 1))
        .unwrap()
        .constraint("g", &format!("c{}.y <= 1", n / 2))
        .unwrap();
    (model, problem)
}

fn benchmark_calc_gradient(c: &mut Criterion) {
    let mut group = c.benchmark_group("calc_gradient");
    for n in [10, 50, 200] {
        for mode in [Mode::Direct, Mode::Adjoint] {
            let (mut model, problem) = chain(n);
            let mut analytic = Analytic::new(problem, DifferentiatorConfig::default().with_mode(mode));
            analytic.calc_gradient(&mut model).unwrap();
            group.bench_with_input(BenchmarkId::new(mode.to_string(), n), &n, |b, _| {
                b.iter(|| {
                    analytic.calc_gradient(black_box(&mut model)).unwrap();
                    black_box(analytic.gradient_matrix().unwrap()[(0, 0)])
                })
            });
        }
    }
    group.finish();
}

fn benchmark_setup(c: &mut Criterion) {
    let mut group = c.benchmark_group("setup");
    for n in [10, 50, 200] {
        let (model, problem) = chain(n);
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, _| {
            b.iter(|| {
                let mut analytic = Analytic::new(problem.clone(), DifferentiatorConfig::default());
                analytic.setup(black_box(&model)).unwrap();
                analytic
            })
        });
    }
    group.finish();
}

criterion_group!(benches, benchmark_calc_gradient, benchmark_setup);
criterion_main!(benches);
