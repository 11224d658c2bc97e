use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::hint::black_box;
use telemetry_manager::pipeline::{
    MetricInput, MetricPipelineSpec, NameSelector, ObjectMeta, OtlpOutput, Pipeline,
    PipelineKind, PipelineOutput, PipelineSpec, PrometheusInput, RuntimeInput,
};
use telemetry_manager::synthesis::{synthesize, SynthesisOptions};

fn metric_pipelines(count: usize) -> Vec<Pipeline> {
    (0..count)
        .map(|index| {
            let input = MetricInput {
                runtime: Some(RuntimeInput {
                    enabled: true,
                    namespaces: NameSelector::excluding([format!("team-{}", index % 7)]),
                    ..RuntimeInput::default()
                }),
                prometheus: (index % 2 == 0).then(|| PrometheusInput {
                    enabled: true,
                    ..PrometheusInput::default()
                }),
                ..MetricInput::default()
            };
            Pipeline::new(
                ObjectMeta::named(format!("pipeline-{index}")),
                PipelineSpec::Metric(MetricPipelineSpec {
                    input,
                    output: Some(PipelineOutput::otlp(OtlpOutput::grpc(format!(
                        "https://backend-{}.example:4317",
                        index % 5
                    )))),
                }),
            )
        })
        .collect()
}

fn bench_synthesis(c: &mut Criterion) {
    let options = SynthesisOptions::default();
    let mut group = c.benchmark_group("synthesize_metrics");
    for count in [1usize, 5, 25] {
        let pipelines = metric_pipelines(count);
        group.bench_with_input(BenchmarkId::from_parameter(count), &pipelines, |b, pipelines| {
            b.iter(|| {
                let synthesized = synthesize(PipelineKind::Metrics, black_box(pipelines), &options)
                    .expect("synthesis benchmark success");
                synthesized.artifact().expect("render")
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_synthesis);
criterion_main!(benches);
