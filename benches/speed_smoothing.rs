use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

use bhulan::smoothing::{SmootherConfig, SmoothingMethod, SpeedSmoother};

/// Constant 15 m/s cruise with σ = 2 m/s Gaussian noise.
fn noisy_series(rng: &mut StdRng, n: usize) -> Vec<f64> {
    let normal = Normal::new(0.0, 2.0).unwrap();
    (0..n).map(|_| 15.0 + normal.sample(rng)).collect()
}

fn bench_methods(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(0x5EED);
    let mut group = c.benchmark_group("speed_smoothing");

    for method in [SmoothingMethod::Kalman, SmoothingMethod::Savgol] {
        let smoother = SpeedSmoother::new(SmootherConfig::builder().method(method).build().unwrap());
        for n in [1_000usize, 100_000] {
            group.bench_with_input(BenchmarkId::new(method.as_str(), n), &n, |b, &n| {
                b.iter_batched(
                    || noisy_series(&mut rng, n),
                    |speeds| black_box(smoother.smooth_speed_series(&speeds).unwrap()),
                    BatchSize::LargeInput,
                )
            });
        }
    }
    group.finish();
}

/// Savitzky–Golay cost as the window grows (one hat matrix per call).
fn bench_savgol_windows(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(0xBADF00D);
    let speeds = noisy_series(&mut rng, 10_000);
    let mut group = c.benchmark_group("savgol_window");

    for window in [5usize, 11, 31, 101] {
        let smoother = SpeedSmoother::new(
            SmootherConfig::builder()
                .method(SmoothingMethod::Savgol)
                .savgol_window_length(window)
                .savgol_polyorder(3)
                .build()
                .unwrap(),
        );
        group.bench_function(BenchmarkId::from_parameter(window), |b| {
            b.iter(|| black_box(smoother.smooth_speed_series(black_box(&speeds)).unwrap()))
        });
    }
    group.finish();
}

criterion_group!(
    name = benches;
    config = Criterion::default();
    targets = bench_methods, bench_savgol_windows
);
criterion_main!(benches);
