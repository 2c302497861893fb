// Snapshot tests: lock rendered diagnostics and IR summaries.
//
// Uses the library API and snapshots the Display output of diagnostics as a
// user sees it on stderr, plus one-line program summaries. Snapshots are
// inline so a changed message shows up in the diff of this file.
//
// Run `cargo insta review` after intentional output changes to update baselines.

use patchc::diag::Diagnostic;
use patchc::pass::PassId;
use patchc::patch::{Block, Bus, Edge, Patch, TransformStep, Value};
use patchc::pipeline::{compile, run_pipeline, CompilationState, CompileOptions};
use patchc::registry::Registries;

fn clock() -> Block {
    Block::new("clock", "CycleTimeRoot")
}

/// Run the full pipeline and render every diagnostic, one blank line apart.
fn rendered(patch: &Patch) -> String {
    let regs = Registries::builtin();
    let mut state = CompilationState::new(patch, &regs, CompileOptions::default());
    let _ = run_pipeline(&mut state, PassId::Link, |_, _| {});
    render(&state.diagnostics)
}

fn render(diags: &[Diagnostic]) -> String {
    diags
        .iter()
        .map(|d| d.to_string())
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn summary(patch: &Patch) -> String {
    let out = compile(patch, &Registries::builtin(), CompileOptions::default());
    let linked = out
        .linked
        .unwrap_or_else(|| panic!("no IR: {}", render(&out.diagnostics)));
    linked.program.summary()
}

// ── Front-stage diagnostics ─────────────────────────────────────────────────

#[test]
fn snapshot_missing_time_root() {
    let p = Patch::new().block(Block::new("s", "Sin"));
    insta::assert_snapshot!(rendered(&p), @r"
error[E0200]: patch has no time root block
  --> patch
  hint: add a FiniteTimeRoot, CycleTimeRoot, or InfiniteTimeRoot
");
}

#[test]
fn snapshot_no_conversion_path() {
    let p = Patch::new()
        .block(clock())
        .block(Block::new("v", "ConstVec2"))
        .block(Block::new("s", "Sin"))
        .edge(Edge::wire("e1", ("v", "out"), ("s", "in")));
    insta::assert_snapshot!(rendered(&p), @r"
error[E0103]: no conversion path from Signal<vec2> to Signal<float> on edge 'e1'
  --> edge 'e1'
  note: source (port 'v.out')
  note: target (port 's.in')
");
}

#[test]
fn snapshot_missing_block() {
    let p = Patch::new()
        .block(clock())
        .block(Block::new("s", "Sin"))
        .edge(Edge::wire("e1", ("ghost", "out"), ("s", "in")));
    insta::assert_snapshot!(rendered(&p), @r"
error[E0300]: edge 'e1' references missing block 'ghost'
  --> edge 'e1'
  note: missing block (block 'ghost')
");
}

#[test]
fn snapshot_illegal_cycle() {
    let p = Patch::new()
        .block(clock())
        .block(Block::new("A", "Sin"))
        .block(Block::new("B", "Sin"))
        .edge(Edge::wire("ab", ("A", "out"), ("B", "in")))
        .edge(Edge::wire("ba", ("B", "out"), ("A", "in")));
    insta::assert_snapshot!(rendered(&p), @r"
error[E0400]: illegal cycle without a state boundary through b0 'A', b1 'B'
  --> block 'A'
  note: in cycle (block 'B')
  hint: insert a state-boundary block such as Delay on one of the edges
");
}

// ── Lowering diagnostics ────────────────────────────────────────────────────

#[test]
fn snapshot_silent_bus_warning_has_code() {
    let p = Patch::new()
        .block(clock())
        .bus(Bus::new("energy", "Signal<float>").with_default(Value::Float(0.0)));
    let out = compile(&p, &Registries::builtin(), CompileOptions::default());
    let codes: Vec<String> = out
        .diagnostics
        .iter()
        .map(|d| format!("{:?} {}", d.level, d.code.map(|c| c.0).unwrap_or("-")))
        .collect();
    insta::assert_snapshot!(codes.join("\n"), @"Warning W0500");
}

// ── IR summaries ────────────────────────────────────────────────────────────

#[test]
fn snapshot_finite_root_summary() {
    let p = Patch::new()
        .block(Block::new("root", "FiniteTimeRoot").with_param("durationMs", Value::Float(8000.0)));
    insta::assert_snapshot!(
        summary(&p),
        @"consts=0 signals=1 fields=0 events=0 slots=1 states=0 handles=0 sinks=0 cameras=0 steps=1"
    );
}

#[test]
fn snapshot_cyclic_root_summary() {
    let p = Patch::new().block(clock());
    insta::assert_snapshot!(
        summary(&p),
        @"consts=0 signals=2 fields=0 events=1 slots=3 states=0 handles=0 sinks=0 cameras=0 steps=1"
    );
}

#[test]
fn snapshot_finite_root_schedule_json() {
    let p = Patch::new()
        .block(Block::new("root", "FiniteTimeRoot").with_param("durationMs", Value::Float(8000.0)));
    let out = compile(&p, &Registries::builtin(), CompileOptions::default());
    let program = out.linked.expect("linked IR").program;
    let json = serde_json::json!({
        "timeModel": program.time_model,
        "schedule": program.schedule,
    });
    insta::assert_snapshot!(
        json.to_string(),
        @r#"{"schedule":[{"block":0,"step":"blockEval"}],"timeModel":{"durationMs":8000.0,"kind":"finite"}}"#
    );
}

#[test]
fn snapshot_adapter_chain_compiles_clean() {
    let p = Patch::new()
        .block(clock())
        .block(Block::new("s", "Sin"))
        .edge(
            Edge::wire("e", ("clock", "phase"), ("s", "in"))
                .with_adapter(TransformStep::new("phaseToFloat")),
        );
    insta::assert_snapshot!(rendered(&p), @"");
}
