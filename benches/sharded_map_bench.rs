use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use robin_shard_map::ShardedMap;
use std::collections::HashMap;
use std::time::Duration;

fn lcg(mut s: u64) -> impl Iterator<Item = u64> {
    std::iter::from_fn(move || {
        s = s.wrapping_mul(6364136223846793005).wrapping_add(1);
        Some(s)
    })
}

fn key(n: u64) -> String {
    format!("k{:016x}", n)
}

fn filled(seed: u64, n: usize) -> (ShardedMap<String, u64>, Vec<String>) {
    let keys: Vec<_> = lcg(seed).take(n).map(key).collect();
    let mut m = ShardedMap::new();
    for (i, k) in keys.iter().enumerate() {
        m.insert(k.clone(), i as u64);
    }
    (m, keys)
}

fn bench_insert(c: &mut Criterion) {
    let keys: Vec<_> = lcg(1).take(10_000).map(key).collect();
    c.bench_function("sharded_map_insert_10k", |b| {
        b.iter_batched(
            || (ShardedMap::<String, u64>::new(), keys.clone()),
            |(mut m, keys)| {
                for (i, k) in keys.into_iter().enumerate() {
                    m.insert(k, i as u64);
                }
                black_box(m)
            },
            BatchSize::SmallInput,
        )
    });
    c.bench_function("std_hashmap_insert_10k", |b| {
        b.iter_batched(
            || (HashMap::<String, u64>::new(), keys.clone()),
            |(mut m, keys)| {
                for (i, k) in keys.into_iter().enumerate() {
                    m.entry(k).or_insert(i as u64);
                }
                black_box(m)
            },
            BatchSize::SmallInput,
        )
    });
}

fn bench_get_hit(c: &mut Criterion) {
    c.bench_function("sharded_map_get_hit", |b| {
        let (m, keys) = filled(7, 20_000);
        let mut it = keys.iter().cycle();
        b.iter(|| {
            let k = it.next().unwrap();
            black_box(m.get(k.as_str()).unwrap());
        })
    });
}

fn bench_get_miss(c: &mut Criterion) {
    c.bench_function("sharded_map_get_miss", |b| {
        let (m, _) = filled(11, 10_000);
        let mut miss = lcg(0xdead_beef);
        b.iter(|| {
            // generate keys unlikely in map
            let k = key(miss.next().unwrap());
            black_box(m.get(&k));
        })
    });
}

fn bench_upsert_erase_churn(c: &mut Criterion) {
    c.bench_function("sharded_map_upsert_erase_churn", |b| {
        let (mut m, _) = filled(13, 10_000);
        let mut ks = lcg(17).map(|x| x % 20_000);
        b.iter(|| {
            let k = key(ks.next().unwrap());
            *m.get_or_insert_default(k.clone()) += 1;
            black_box(m.erase(&k));
        })
    });
}

fn bench_iterate(c: &mut Criterion) {
    c.bench_function("sharded_map_iterate_10k", |b| {
        let (m, _) = filled(19, 10_000);
        b.iter(|| black_box(m.values().fold(0u64, |acc, v| acc.wrapping_add(*v))))
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
    targets = bench_insert, bench_get_hit, bench_get_miss, bench_upsert_erase_churn, bench_iterate
}
criterion_main!(benches);
