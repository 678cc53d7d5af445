//! Benchmarks for session validation under a populated store

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;
use std::thread;
use voxgate_core::auth::{Role, SessionStore};

fn populated(size: usize) -> (SessionStore, Vec<String>) {
    let store = SessionStore::from_hours(24);
    let tokens = (0..size)
        .map(|i| store.create(&format!("user-{i}"), Role::User))
        .collect();
    (store, tokens)
}

fn bench_validate(c: &mut Criterion) {
    let mut group = c.benchmark_group("session_validate");

    for size in [100, 1_000, 10_000].iter() {
        let (store, tokens) = populated(*size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &tokens, |b, tokens| {
            let mut i = 0;
            b.iter(|| {
                i = (i + 1) % tokens.len();
                black_box(store.validate(&tokens[i]))
            });
        });
    }

    group.finish();
}

fn bench_contended_validate(c: &mut Criterion) {
    let (store, tokens) = populated(1_000);
    let store = Arc::new(store);
    let tokens = Arc::new(tokens);

    c.bench_function("session_validate_4_threads", |b| {
        b.iter(|| {
            let workers: Vec<_> = (0..4)
                .map(|t| {
                    let store = Arc::clone(&store);
                    let tokens = Arc::clone(&tokens);
                    thread::spawn(move || {
                        for token in tokens.iter().skip(t).step_by(4).take(64) {
                            black_box(store.validate(token));
                        }
                    })
                })
                .collect();
            for worker in workers {
                worker.join().unwrap();
            }
        });
    });
}

fn bench_sweep(c: &mut Criterion) {
    c.bench_function("session_sweep_10000_live", |b| {
        let (store, _tokens) = populated(10_000);
        b.iter(|| black_box(store.sweep()));
    });
}

criterion_group!(benches, bench_validate, bench_contended_validate, bench_sweep);
criterion_main!(benches);
