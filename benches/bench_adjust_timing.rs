// benches/bench_adjust_timing.rs
use criterion::{
    black_box, criterion_group, criterion_main, AxisScale, Criterion, PlotConfiguration,
};
use intersection_control::config::TimingConfig;
use intersection_control::control_system::{compute_green_times, IntersectionSignal};
use intersection_control::shared_data::DirectionalCounts;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;

// Pre-generated traffic samples so the RNG stays out of the measurement.
fn sample_counts(n: usize) -> Vec<DirectionalCounts> {
    let mut rng = StdRng::seed_from_u64(7);
    (0..n)
        .map(|_| {
            DirectionalCounts::new(
                rng.random_range(0..50),
                rng.random_range(0..60),
                rng.random_range(0..30),
                rng.random_range(0..45),
            )
        })
        .collect()
}

fn bench_compute_green_times(c: &mut Criterion) {
    let mut group = c.benchmark_group("compute_green_times");
    group.sample_size(100);
    group.measurement_time(Duration::from_secs(5));
    group.warm_up_time(Duration::from_secs(2));
    group.plot_config(PlotConfiguration::default().summary_scale(AxisScale::Linear));

    let samples = sample_counts(1024);
    group.bench_function("random_traffic", |b| {
        let mut i = 0;
        b.iter(|| {
            let counts = &samples[i % samples.len()];
            i += 1;
            black_box(compute_green_times(black_box(counts), 10.0, 60.0))
        });
    });
    group.bench_function("no_traffic", |b| {
        let empty = DirectionalCounts::default();
        b.iter(|| black_box(compute_green_times(black_box(&empty), 10.0, 60.0)));
    });
    group.finish();
}

fn bench_signal_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("intersection_signal");
    group.sample_size(100);
    group.measurement_time(Duration::from_secs(5));

    let timing = TimingConfig::default();
    let samples = sample_counts(1024);

    // One adjustment per phase change, as under steady detection traffic.
    for &adjust_every in [1usize, 10, 100].iter() {
        group.bench_function(format!("adjust_every_{}", adjust_every), |b| {
            let mut signal = IntersectionSignal::new("Bench", &timing);
            let mut i = 0;
            b.iter(|| {
                if i % adjust_every == 0 {
                    signal.adjust_timing(&samples[i % samples.len()]);
                }
                i += 1;
                black_box(signal.advance());
                black_box(signal.phase_duration());
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_compute_green_times, bench_signal_cycle);
criterion_main!(benches);
