use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use large_init::allocation::sample_counts;
use large_init::{build_grid, AreaShape};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use scenario_schema::Point;

fn bench_grid(c: &mut Criterion) {
    let mut group = c.benchmark_group("grid");

    for extent in [200.0f64, 1_000.0, 4_000.0] {
        group.bench_with_input(
            BenchmarkId::new("build", extent as u32),
            &extent,
            |b, &extent| {
                b.iter(|| {
                    build_grid(
                        AreaShape::new(extent, extent),
                        Point::default(),
                        50.0,
                        100.0,
                    )
                })
            },
        );
    }

    group.finish();
}

fn bench_allocation(c: &mut Criterion) {
    let mut group = c.benchmark_group("allocation");

    for regions in [25usize, 400, 3_200] {
        let ratios: Vec<f64> = (0..regions).map(|i| ((i * 37) % 100) as f64 / 100.0).collect();
        group.bench_with_input(
            BenchmarkId::new("sample_counts", regions),
            &ratios,
            |b, ratios| {
                let mut rng = ChaCha8Rng::seed_from_u64(0);
                b.iter(|| sample_counts(black_box(ratios), regions * 10, &mut rng))
            },
        );
    }

    group.finish();
}

criterion_group!(grid_benches, bench_grid, bench_allocation);
criterion_main!(grid_benches);
