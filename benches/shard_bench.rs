use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use robin_shard_map::{Config, FnHasher, Shard};
use std::time::Duration;

fn lcg(mut s: u64) -> impl Iterator<Item = u64> {
    std::iter::from_fn(move || {
        s = s.wrapping_mul(6364136223846793005).wrapping_add(1);
        Some(s)
    })
}

// Insert cost of a single shard across load factors; lower factors trade
// memory for shorter probe chains.
fn bench_insert_by_load_factor(c: &mut Criterion) {
    let keys: Vec<u64> = lcg(3).take(50_000).collect();
    let mut group = c.benchmark_group("shard_insert_50k");
    for lf in [0.25, 0.5, 0.75, 0.9] {
        let cfg = Config::default().with_load_factor(lf);
        group.bench_with_input(BenchmarkId::from_parameter(lf), &cfg, |b, cfg| {
            b.iter_batched(
                || Shard::<u64, u64>::with_config(*cfg),
                |mut s| {
                    for &k in &keys {
                        s.insert(k, k);
                    }
                    black_box(s)
                },
                BatchSize::LargeInput,
            )
        });
    }
    group.finish();
}

fn bench_find_by_load_factor(c: &mut Criterion) {
    let keys: Vec<u64> = lcg(5).take(50_000).collect();
    let mut group = c.benchmark_group("shard_find_hit");
    for lf in [0.25, 0.5, 0.75, 0.9] {
        let mut s = Shard::<u64, u64>::with_config(Config::default().with_load_factor(lf));
        for &k in &keys {
            s.insert(k, k);
        }
        let mut it = keys.iter().cycle();
        group.bench_function(BenchmarkId::from_parameter(lf), |b| {
            b.iter(|| black_box(s.get(it.next().unwrap())))
        });
    }
    group.finish();
}

// Identity hashing over sequential keys: each key is at home, the best
// case for probing.
fn bench_sequential_identity(c: &mut Criterion) {
    c.bench_function("shard_identity_erase_reinsert", |b| {
        let mut s = Shard::with_hasher(FnHasher::new(|k: &u64| *k));
        for k in 0..10_000u64 {
            s.insert(k, k);
        }
        let mut ks = (0..10_000u64).cycle();
        b.iter(|| {
            let k = ks.next().unwrap();
            let v = s.remove(&k).unwrap();
            black_box(s.insert(k, v));
        })
    });
}

fn bench_config() -> Criterion {
    Criterion::default()
        .sample_size(50)
        .measurement_time(Duration::from_secs(8))
        .warm_up_time(Duration::from_secs(2))
}

criterion_group! {
    name = benches;
    config = bench_config();
    targets = bench_insert_by_load_factor, bench_find_by_load_factor, bench_sequential_identity
}
criterion_main!(benches);
