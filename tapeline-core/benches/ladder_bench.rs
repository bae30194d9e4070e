//! Ladder operation benchmarks
//!
//! Upsert/remove throughput across the top and deep regions. The pipeline
//! targets >= 300k delta applications per second per worker, which needs
//! single-digit-microsecond ladder operations.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use tapeline_core::core::{BookSide, FixedDecimal};
use tapeline_core::orderbook::BoundedLadder;

fn dec(v: i64) -> FixedDecimal {
    FixedDecimal::from_int(v)
}

fn bench_upsert_top_region(c: &mut Criterion) {
    c.bench_function("ladder_upsert_top_region", |b| {
        let mut ladder = BoundedLadder::new(BookSide::Bid, 20, 10_000);
        for p in 0..20 {
            ladder.upsert(dec(1_000 + p), dec(1));
        }
        let mut i = 0i64;
        b.iter(|| {
            // Update an existing top level in place
            ladder.upsert(black_box(dec(1_000 + (i % 20))), black_box(dec(2 + i % 7)));
            i += 1;
        });
    });
}

fn bench_upsert_with_churn(c: &mut Criterion) {
    c.bench_function("ladder_upsert_promote_demote", |b| {
        let mut ladder = BoundedLadder::new(BookSide::Ask, 20, 10_000);
        for p in 0..200 {
            ladder.upsert(dec(2_000 + p), dec(1));
        }
        let mut i = 0i64;
        b.iter(|| {
            let price = dec(2_000 + (i % 200));
            if i % 3 == 0 {
                ladder.remove(black_box(price));
            } else {
                ladder.upsert(black_box(price), black_box(dec(1 + i % 4)));
            }
            i += 1;
        });
    });
}

fn bench_snapshot_levels(c: &mut Criterion) {
    c.bench_function("ladder_snapshot_levels_200", |b| {
        let mut ladder = BoundedLadder::new(BookSide::Bid, 20, 10_000);
        for p in 0..200 {
            ladder.upsert(dec(5_000 + p), dec(3));
        }
        b.iter(|| black_box(ladder.snapshot_levels()));
    });
}

criterion_group!(
    benches,
    bench_upsert_top_region,
    bench_upsert_with_churn,
    bench_snapshot_levels
);
criterion_main!(benches);
