use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use meshsplat::sort::{depth_key, RadixSort};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;

// ── Helpers ──────────────────────────────────────────────────────────────────

fn random_depth_keys(n: usize) -> Vec<u32> {
    let mut rng = StdRng::seed_from_u64(42);
    (0..n).map(|_| depth_key(rng.gen_range(0.1f32..100.0))).collect()
}

// ── Benchmarks ───────────────────────────────────────────────────────────────

fn bench_radix_sort(c: &mut Criterion) {
    let mut group = c.benchmark_group("radix_sort");
    group.measurement_time(Duration::from_secs(3));

    for &n in &[64 * 64, 512 * 512, 1024 * 1024] {
        let keys = random_depth_keys(n);
        let values: Vec<u32> = (0..n as u32).collect();
        let mut sorter = RadixSort::new();
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, _| {
            b.iter(|| {
                let mut k = keys.clone();
                let mut v = values.clone();
                sorter.sort_pairs(&mut k, &mut v).unwrap();
                black_box(v)
            })
        });
    }
    group.finish();
}

fn bench_std_sort_baseline(c: &mut Criterion) {
    let mut group = c.benchmark_group("std_sort_by_key");
    group.measurement_time(Duration::from_secs(3));

    let n = 512 * 512;
    let keys = random_depth_keys(n);
    group.bench_function(&format!("{}", n), |b| {
        b.iter(|| {
            let mut v: Vec<u32> = (0..n as u32).collect();
            v.sort_by_key(|&i| keys[i as usize]);
            black_box(v)
        })
    });
    group.finish();
}

criterion_group!(benches, bench_radix_sort, bench_std_sort_baseline);
criterion_main!(benches);
