use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use patchc::cycles::validate_cycles;
use patchc::dep_graph::build_dep_graph;
use patchc::normalize::normalize;
use patchc::pass::PassId;
use patchc::patch::{Block, Bus, CombineMode, Edge, Endpoint, Patch, TransformStep, Value};
use patchc::pipeline::{compile, run_pipeline, CompilationState, CompileOptions};
use patchc::registry::Registries;
use patchc::type_graph::build_type_graph;

// KPI-aligned benchmark scenarios.
// All scenarios compile without errors against the built-in registry.

fn clock() -> Block {
    Block::new("clock", "CycleTimeRoot").with_param("periodMs", Value::Float(4000.0))
}

fn simple_patch() -> Patch {
    Patch::new()
        .block(clock())
        .block(Block::new("osc", "Sin"))
        .edge(
            Edge::wire("e0", ("clock", "phase"), ("osc", "in"))
                .with_adapter(TransformStep::new("phaseToFloat")),
        )
}

fn bus_patch() -> Patch {
    let mut p = Patch::new()
        .block(clock())
        .block(Block::new("listen", "Sin"))
        .bus(Bus::new("energy", "Signal<float>").with_combine(CombineMode::Sum))
        .edge(Edge::new("l0", Endpoint::bus("energy"), Endpoint::port("listen", "in")));
    for i in 0..8 {
        let id = format!("src{}", i);
        p = p
            .block(Block::new(id.as_str(), "Const").with_param("value", Value::Float(i as f64)))
            .edge(
                Edge::new(format!("p{}", i), Endpoint::port(id.as_str(), "out"), Endpoint::bus("energy"))
                    .with_lens(TransformStep::new("scale").with_param("factor", Value::Float(0.5))),
            );
    }
    p
}

fn feedback_patch() -> Patch {
    Patch::new()
        .block(clock())
        .block(Block::new("mix", "Add"))
        .block(Block::new("hold", "Delay"))
        .block(Block::new("shape", "Sin"))
        .edge(
            Edge::wire("in", ("clock", "phase"), ("mix", "a"))
                .with_adapter(TransformStep::new("phaseToFloat")),
        )
        .edge(Edge::wire("fb", ("hold", "out"), ("mix", "b")))
        .edge(Edge::wire("fw", ("mix", "out"), ("shape", "in")))
        .edge(Edge::wire("loop", ("shape", "out"), ("hold", "in")))
}

fn render_patch() -> Patch {
    Patch::new()
        .block(clock())
        .block(Block::new("grid", "GridDomain").with_param("count", Value::Int(1024)))
        .block(Block::new("size", "Const").with_param("value", Value::Float(3.0)))
        .block(Block::new("out", "RenderInstances"))
        .block(Block::new("cam", "Camera3D"))
        .edge(Edge::wire("d", ("grid", "domain"), ("out", "domain")))
        .edge(Edge::wire("s", ("size", "out"), ("out", "size")))
}

fn scenarios() -> [(&'static str, Patch); 4] {
    [
        ("simple", simple_patch()),
        ("bus", bus_patch()),
        ("feedback", feedback_patch()),
        ("render", render_patch()),
    ]
}

/// Chain of `n` blocks with a Delay-closed feedback loop every ten blocks
/// and every fifth block publishing to a shared bus.
fn generate_scaling_patch(n_blocks: usize) -> Patch {
    let mut p = Patch::new()
        .block(clock())
        .bus(Bus::new("sum", "Signal<float>").with_combine(CombineMode::Sum));
    for i in 0..n_blocks {
        let id = format!("b{:04}", i);
        let kind = if i % 10 == 9 { "Delay" } else { "Add" };
        p = p.block(Block::new(id.as_str(), kind));
        if i == 0 {
            p = p.edge(
                Edge::wire("w0000", ("clock", "phase"), (id.as_str(), "a"))
                    .with_adapter(TransformStep::new("phaseToFloat")),
            );
        } else {
            let prev = format!("b{:04}", i - 1);
            let port = if kind == "Delay" { "in" } else { "a" };
            p = p.edge(Edge::wire(format!("w{:04}", i), (prev.as_str(), "out"), (id.as_str(), port)));
        }
        if kind == "Delay" {
            let head = format!("b{:04}", i - 9);
            p = p.edge(Edge::wire(format!("f{:04}", i), (id.as_str(), "out"), (head.as_str(), "b")));
        }
        if i % 5 == 0 {
            p = p.edge(Edge::new(format!("p{:04}", i), Endpoint::port(id.as_str(), "out"), Endpoint::bus("sum")));
        }
    }
    p
}

fn compile_full(patch: &Patch, registries: &Registries) {
    let out = compile(patch, registries, CompileOptions::default());
    assert!(out.is_ok(), "benchmark scenario must compile");
    black_box(&out.linked);
}

// KPI: end-to-end compile latency.
fn bench_kpi_full_compile_latency(c: &mut Criterion) {
    let registries = Registries::builtin();
    let mut group = c.benchmark_group("kpi/full_compile_latency");
    for (name, patch) in scenarios() {
        group.bench_with_input(BenchmarkId::from_parameter(name), &patch, |b, patch| {
            b.iter(|| compile_full(black_box(patch), &registries));
        });
    }
    group.finish();
}

// KPI: phase-level latency on a non-trivial patch.
fn bench_kpi_phase_latency(c: &mut Criterion) {
    let registries = Registries::builtin();
    let patch = generate_scaling_patch(100);

    // normalize
    {
        let mut group = c.benchmark_group("kpi/phase_latency/normalize");
        group.bench_function("chain100", |b| {
            b.iter(|| {
                let r = normalize(black_box(&patch), &registries);
                black_box(&r.normalized);
            });
        });
        group.finish();
    }

    // type graph (setup: normalize)
    {
        let mut group = c.benchmark_group("kpi/phase_latency/type_graph");
        group.bench_function("chain100", |b| {
            b.iter_batched(
                || normalize(&patch, &registries).normalized,
                |normalized| {
                    let r = build_type_graph(black_box(&normalized), &registries);
                    black_box(&r.typed);
                },
                BatchSize::SmallInput,
            );
        });
        group.finish();
    }

    // dependency graph + cycle check (setup: normalize)
    {
        let mut group = c.benchmark_group("kpi/phase_latency/cycle_check");
        group.bench_function("chain100", |b| {
            b.iter_batched(
                || normalize(&patch, &registries).normalized,
                |normalized| {
                    let g = build_dep_graph(black_box(&normalized), &registries);
                    let r = validate_cycles(&g.graph, &normalized, &registries);
                    black_box(&r.validated);
                },
                BatchSize::SmallInput,
            );
        });
        group.finish();
    }

    // pipeline prefixes, one per terminal pass
    {
        let mut group = c.benchmark_group("kpi/phase_latency/prefix");
        for terminal in [PassId::CycleCheck, PassId::LowerBlocks, PassId::LowerBuses, PassId::Link] {
            group.bench_with_input(
                BenchmarkId::from_parameter(format!("{:?}", terminal)),
                &terminal,
                |b, &terminal| {
                    b.iter(|| {
                        let mut state =
                            CompilationState::new(&patch, &registries, CompileOptions::default());
                        let r = run_pipeline(&mut state, terminal, |_, _| {});
                        assert!(r.is_ok());
                        black_box(&state.artifacts);
                    });
                },
            );
        }
        group.finish();
    }
}

// KPI: compile scaling vs number of blocks.
fn bench_kpi_compile_scaling(c: &mut Criterion) {
    let registries = Registries::builtin();
    let mut group = c.benchmark_group("kpi/compile_scaling");

    for n_blocks in [10_usize, 50, 100, 500, 1000] {
        let patch = generate_scaling_patch(n_blocks);
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{}blocks", n_blocks)),
            &patch,
            |b, patch| {
                b.iter(|| compile_full(black_box(patch), &registries));
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_kpi_full_compile_latency,
    bench_kpi_phase_latency,
    bench_kpi_compile_scaling,
);
criterion_main!(benches);
