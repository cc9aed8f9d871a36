//! Criterion benchmarks for trial scheduling.
//!
//! Run with:
//!   cargo bench
//!
//! Results are saved to target/criterion/

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use operant::prelude::*;
use operant::persist::encode_state;

fn continuum(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("morph_{i:03}.wav")).collect()
}

/// Pull from sampling policies through a queue handler.
fn bench_policies(c: &mut Criterion) {
    let mut group = c.benchmark_group("policy_pull");

    for size in [4usize, 64, 1024].iter() {
        group.throughput(Throughput::Elements(1));

        group.bench_with_input(BenchmarkId::new("weighted", size), size, |b, &size| {
            let weights: Vec<f64> = (1..=size).map(|w| w as f64).collect();
            let mut q = QueueHandler::from_config(
                (0..size).collect::<Vec<_>>(),
                QueueConfig::weighted(weights, None),
                42,
            )
            .unwrap();
            b.iter(|| black_box(q.pull().unwrap()));
        });

        group.bench_with_input(BenchmarkId::new("block", size), size, |b, &size| {
            let mut q = QueueHandler::from_config(
                (0..size).collect::<Vec<_>>(),
                QueueConfig::block(1, true),
                42,
            )
            .unwrap();
            b.iter(|| {
                if q.is_consumed() {
                    q.reset().unwrap();
                }
                black_box(q.pull().unwrap())
            });
        });
    }

    group.finish();
}

/// One full pull/report cycle on each adaptive procedure.
fn bench_adaptive(c: &mut Criterion) {
    let mut group = c.benchmark_group("adaptive_cycle");

    group.bench_function("kaernbach", |b| {
        let cfg = KaernbachConfig::default().with_criterion(u32::MAX - 1, CritMethod::Trials);
        let mut s = KaernbachStaircase::new(&cfg).unwrap();
        let mut correct = false;
        b.iter(|| {
            let v = s.pull().unwrap();
            correct = !correct;
            s.report_outcome(Outcome::new(correct, false)).unwrap();
            black_box(v)
        });
    });

    group.bench_function("reinforced_double_log", |b| {
        let cfg = ReinforcedConfig::default().with_log_sampling(true).with_seed(7);
        let mut s = ReinforcedDoubleStaircase::new(continuum(256), &cfg).unwrap();
        b.iter(|| {
            let p = s.pull().unwrap();
            s.report_outcome(Outcome::correct()).unwrap();
            black_box(p)
        });
    });

    group.finish();
}

/// Snapshot encoding cost, paid after every reported outcome.
fn bench_snapshot(c: &mut Criterion) {
    let mut group = c.benchmark_group("snapshot_encode");

    for size in [32usize, 512].iter() {
        let state = DoubleStaircase::new(continuum(*size), &DoubleStaircaseConfig::default())
            .unwrap()
            .snapshot();
        group.bench_with_input(BenchmarkId::from_parameter(size), &state, |b, state| {
            b.iter(|| black_box(encode_state(state).unwrap()));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_policies, bench_adaptive, bench_snapshot);
criterion_main!(benches);
