//! Benchmarks for graph compilation and rendering.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use podflow::compiler::PipelineCompiler;
use podflow::config::{NodeMergeStrategy, VolumeConfig};
use podflow::testing::fixtures;
use podflow::workflow::render;

fn compile_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("compile");
    for width in [10, 100, 500] {
        let graph = fixtures::fan_in(width);
        let per_node = PipelineCompiler::new(
            "bench",
            "base",
            fixtures::run_config().with_volume(VolumeConfig::default()),
        );
        let merged = PipelineCompiler::new(
            "bench",
            "base",
            fixtures::run_config().with_node_merge_strategy(NodeMergeStrategy::Full),
        );

        group.bench_with_input(BenchmarkId::new("per_node", width), &graph, |b, graph| {
            b.iter(|| per_node.compile(black_box(graph)))
        });
        group.bench_with_input(BenchmarkId::new("merged", width), &graph, |b, graph| {
            b.iter(|| merged.compile(black_box(graph)))
        });
    }
    group.finish();
}

fn render_benchmark(c: &mut Criterion) {
    let names: Vec<String> = (0..200).map(|i| format!("step_{i}")).collect();
    let graph = fixtures::chain(names);
    let Ok(compiled) = PipelineCompiler::new("bench", "base", fixtures::run_config()).compile(&graph) else {
        return;
    };

    c.bench_function("render_chain_200", |b| {
        b.iter(|| render(black_box(&compiled)).map(|workflow| workflow.to_yaml()))
    });
}

criterion_group!(benches, compile_benchmark, render_benchmark);
criterion_main!(benches);
