use criterion::{
    black_box, criterion_group, criterion_main, AxisScale, BenchmarkId, Criterion,
    PlotConfiguration,
};

use smart_traffic_engine::forecaster::{
    CongestionForecaster, LearningMode, PatternSample, RiskConditions, WeatherCondition,
};

const START: u64 = 1_704_067_200_000;

/// One sample per hour with a daily swing.
fn hourly_samples(count: usize) -> Vec<PatternSample> {
    (0..count)
        .map(|i| PatternSample {
            timestamp: START + i as u64 * 3_600_000,
            congestion_level: 0.2 + ((i % 24) as f64 / 24.0) * 0.6,
        })
        .collect()
}

/// Benchmarks predict at growing horizons and analyze_patterns over growing
/// sample sets, plus a single risk assessment.
fn bench_congestion_forecaster(c: &mut Criterion) {
    let forecaster = CongestionForecaster::default();

    let mut group = c.benchmark_group("Congestion_Forecaster_Benchmarks");
    group.plot_config(PlotConfiguration::default().summary_scale(AxisScale::Linear));

    for &hours in [1u64, 6, 24].iter() {
        group.bench_with_input(BenchmarkId::new("predict", hours), &hours, |b, &hours| {
            b.iter(|| {
                let _ = black_box(forecaster.predict(
                    black_box("downtown"),
                    hours * 3_600_000,
                    START,
                ));
            });
        });
    }

    for &size in [100usize, 1_000, 10_000].iter() {
        let samples = hourly_samples(size);
        group.bench_with_input(
            BenchmarkId::new("analyze_patterns", size),
            &size,
            |b, _| {
                b.iter(|| {
                    let _ = black_box(
                        forecaster.analyze_patterns(black_box(&samples), LearningMode::Supervised),
                    );
                });
            },
        );
    }

    let conditions = RiskConditions {
        traffic_flow: 32.0,
        weather: Some(WeatherCondition::Rain),
        time: None,
    };
    group.bench_function("assess_risk", |b| {
        b.iter(|| {
            let _ = black_box(forecaster.assess_risk("downtown", black_box(&conditions), START));
        });
    });
    group.finish();
}

criterion_group!(benches, bench_congestion_forecaster);
criterion_main!(benches);
