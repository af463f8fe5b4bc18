//! Criterion benchmarks for the pricing hot path.
//!
//! - `price_pure`: uncached exponential pricing across a level range.
//! - `engine_warm`: cached lookups, the scheduler's steady state.
//! - `engine_cold`: cache cleared before each sweep.

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use ladder_core::cost::{CostEngine, DEFAULT_CACHE_CAPACITY, price};
use ladder_core::test_utils::*;

fn bench_price_pure(c: &mut Criterion) {
    let def = root("rankup", 500);
    c.bench_function("price_pure", |b| {
        b.iter(|| {
            for level in 0..500u64 {
                black_box(price(&def, black_box(level), 0));
            }
        })
    });
}

fn bench_engine_warm(c: &mut Criterion) {
    let chain = standard_chain();
    let engine = CostEngine::new(&chain, DEFAULT_CACHE_CAPACITY);
    let ids: Vec<_> = chain.order().to_vec();
    for &id in &ids {
        for level in 0..500u64 {
            engine.cost(id, level, 0);
        }
    }

    c.bench_function("engine_warm", |b| {
        b.iter(|| {
            for &id in &ids {
                for level in 0..500u64 {
                    black_box(engine.cost(id, black_box(level), 0));
                }
            }
        })
    });
}

fn bench_engine_cold(c: &mut Criterion) {
    let chain = standard_chain();
    let engine = CostEngine::new(&chain, DEFAULT_CACHE_CAPACITY);
    let ids: Vec<_> = chain.order().to_vec();

    c.bench_function("engine_cold", |b| {
        b.iter(|| {
            engine.clear();
            for &id in &ids {
                for level in 0..500u64 {
                    black_box(engine.cost(id, black_box(level), 0));
                }
            }
        })
    });
}

criterion_group!(
    benches,
    bench_price_pure,
    bench_engine_warm,
    bench_engine_cold
);
criterion_main!(benches);
