use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};

use firn::aggregator::AggSetting;
use firn::cluster::primary_role;
use firn::telemetry::noop_event_listener;
use firn::{ChunkStore, NullStore, SeriesRing};

use std::sync::Arc;

fn bench_ring(agg: &[AggSetting]) -> SeriesRing {
    SeriesRing::new(
        Arc::new(NullStore) as Arc<dyn ChunkStore>,
        primary_role(),
        noop_event_listener(),
        "bench.series",
        600,
        8,
        3600,
        agg,
    )
}

fn ingest(c: &mut Criterion) {
    c.bench_function("ingest_10k_points", |b| {
        b.iter_batched_ref(
            || bench_ring(&[]),
            |ring| {
                for ts in 1..=10_000u32 {
                    ring.add(black_box(ts), black_box(f64::from(ts) * 0.5)).unwrap();
                }
            },
            BatchSize::SmallInput,
        );
    });
}

fn ingest_with_rollups(c: &mut Criterion) {
    let settings = [AggSetting {
        span: 1200,
        chunk_span: 6000,
        num_chunks: 4,
        ttl: 3600,
    }];
    c.bench_function("ingest_10k_points_with_rollup", |b| {
        b.iter_batched_ref(
            || bench_ring(&settings),
            |ring| {
                for ts in 1..=10_000u32 {
                    ring.add(black_box(ts), black_box(f64::from(ts) * 0.5)).unwrap();
                }
            },
            BatchSize::SmallInput,
        );
    });
}

fn range_query(c: &mut Criterion) {
    let ring = bench_ring(&[]);
    for ts in 1..=4800u32 {
        ring.add(ts, f64::from(ts)).unwrap();
    }
    c.bench_function("get_full_ring", |b| {
        b.iter(|| {
            let (mem_start, iters) = ring.get(black_box(1), black_box(4800)).unwrap();
            let points: usize = iters.into_iter().map(|it| it.count()).sum();
            black_box((mem_start, points))
        });
    });
}

criterion_group!(benches, ingest, ingest_with_rollups, range_query);
criterion_main!(benches);
