use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use acvmc::{
    allocate_samples_acv, allocate_samples_acv_best_kl, allocate_samples_mfmc,
    allocate_samples_mlmc, Acv, AllocationConfig, OptimMethod,
};

mod common;
use common::*;

const TARGET_COST: f64 = 1e3;

fn bench_closed_form(c: &mut Criterion) {
    let mut group = c.benchmark_group("closed_form");
    for n in [3, 10, 30] {
        let cov = ar1_covariance(n, 0.95);
        let costs = geometric_costs(n);
        group.bench_function(BenchmarkId::new("mlmc", n), |b| {
            b.iter(|| black_box(allocate_samples_mlmc(&cov, &costs, TARGET_COST, true)))
        });
        group.bench_function(BenchmarkId::new("mfmc", n), |b| {
            b.iter(|| black_box(allocate_samples_mfmc(&cov, &costs, TARGET_COST, true)))
        });
    }
    group.finish();
}

fn bench_acv_optimization(c: &mut Criterion) {
    let mut group = c.benchmark_group("acv_optimization");
    group.sample_size(20);
    for n in [3, 5] {
        let est = Acv::mf(ar1_covariance(n, 0.95), geometric_costs(n)).unwrap();
        for method in [OptimMethod::Sqp, OptimMethod::TrustRegion] {
            let config = AllocationConfig {
                method,
                ..AllocationConfig::default()
            };
            group.bench_function(BenchmarkId::new(method.to_string(), n), |b| {
                b.iter(|| black_box(allocate_samples_acv(&est, TARGET_COST, None, &config)))
            });
        }
    }
    group.finish();
}

fn bench_best_kl(c: &mut Criterion) {
    let mut group = c.benchmark_group("best_kl");
    group.sample_size(10);
    let n = 4;
    let cov = ar1_covariance(n, 0.95);
    let costs = geometric_costs(n);
    let config = AllocationConfig::default();
    group.bench_function(BenchmarkId::new("search", n), |b| {
        b.iter(|| black_box(allocate_samples_acv_best_kl(&cov, &costs, TARGET_COST, &config)))
    });
    group.finish();
}

criterion_group!(benches, bench_closed_form, bench_acv_optimization, bench_best_kl);
criterion_main!(benches);
