// Benchmark for the geometry pipeline run before every job
// Run with: cargo bench

use criterion::{criterion_group, criterion_main, Criterion};
use penplot_rs::geometry::{Pattern, Point, Shape, Stroke};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::hint::black_box;

fn scattered_pattern(strokes: usize) -> Pattern {
    let mut rng = StdRng::seed_from_u64(7);
    let strokes = (0..strokes)
        .map(|i| {
            let x = rng.random_range(0.0..290.0);
            let y = rng.random_range(0.0..235.0);
            let points = (0..8)
                .map(|k| Point::new(x + k as f64, y + rng.random_range(0.0..10.0)))
                .collect();
            Stroke::new(points, (i % 4) as u32)
        })
        .collect();
    Pattern::from_strokes(strokes)
}

fn bench_nearest_neighbour(c: &mut Criterion) {
    let pattern = scattered_pattern(2_000);
    c.bench_function("nn order 2k strokes", |b| {
        b.iter(|| {
            let mut work = pattern.clone();
            black_box(work.optimize_order_nn(Point::ORIGIN));
        });
    });
}

fn bench_resample(c: &mut Criterion) {
    let mut pattern = Pattern::new();
    for i in 0..200 {
        let center = Point::new(50.0 + (i % 20) as f64 * 10.0, 50.0 + (i / 20) as f64 * 10.0);
        pattern.add(&Shape::circle(center, 4.0), 0, 0.05).unwrap();
    }
    c.bench_function("resample 200 circles at 0.5mm", |b| {
        b.iter(|| {
            let mut work = pattern.clone();
            black_box(work.resample_polylines(0.5).unwrap());
        });
    });
}

fn bench_merge_chains(c: &mut Criterion) {
    // one long path chopped into touching segments
    let strokes = (0..1_000)
        .map(|i| Stroke::new(vec![Point::new(i as f64 * 0.05, 0.0), Point::new((i + 1) as f64 * 0.05, 0.0)], 0))
        .collect();
    let pattern = Pattern::from_strokes(strokes);
    c.bench_function("merge 1k touching segments", |b| {
        b.iter(|| {
            let mut work = pattern.clone();
            let report = work.merge_chains(0.01);
            assert_eq!(report.strokes_after, 1);
        });
    });
}

criterion_group!(benches, bench_nearest_neighbour, bench_resample, bench_merge_chains);
criterion_main!(benches);
