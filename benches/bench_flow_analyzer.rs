use criterion::{
    black_box, criterion_group, criterion_main, AxisScale, BenchmarkId, Criterion,
    PlotConfiguration,
};

use smart_traffic_engine::flow_analyzer::FlowAnalyzer;

const START: u64 = 1_704_097_800_000;

/// Analyzer with `intersections` full histories of sawtooth counts.
fn populated_analyzer(intersections: usize) -> FlowAnalyzer {
    let mut analyzer = FlowAnalyzer::default();
    for i in 0..intersections {
        let id = format!("Intersection_{}", i);
        for step in 0..100u64 {
            let count = 5 + ((step + i as u64) % 12) as u32 * 4;
            let _ = analyzer.record(&id, count, START + step * 60_000);
        }
    }
    analyzer
}

/// Benchmarks record, detect_patterns and optimize across growing
/// intersection counts.
fn bench_flow_analyzer(c: &mut Criterion) {
    let sizes = [50, 100, 200];

    let mut group = c.benchmark_group("Flow_Analyzer_Benchmarks");
    group.plot_config(PlotConfiguration::default().summary_scale(AxisScale::Linear));

    for &size in sizes.iter() {
        let mut analyzer = populated_analyzer(size);
        let now = START + 100 * 60_000;

        group.bench_with_input(BenchmarkId::new("record", size), &size, |b, &size| {
            let mut tick = 0u64;
            b.iter(|| {
                tick += 1;
                for i in 0..size {
                    let id = format!("Intersection_{}", i);
                    let insight = analyzer.record(black_box(&id), black_box(27), now + tick);
                    let _ = black_box(insight);
                }
            });
        });

        group.bench_with_input(
            BenchmarkId::new("detect_patterns", size),
            &size,
            |b, &size| {
                b.iter(|| {
                    for i in 0..size {
                        let id = format!("Intersection_{}", i);
                        black_box(analyzer.detect_patterns(&id, black_box(3_600_000), now));
                    }
                });
            },
        );

        group.bench_with_input(BenchmarkId::new("optimize", size), &size, |b, &size| {
            b.iter(|| {
                for i in 0..size {
                    let id = format!("Intersection_{}", i);
                    let _ = black_box(analyzer.optimize(&id));
                }
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_flow_analyzer);
criterion_main!(benches);
