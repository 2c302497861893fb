// pipeline.rs — Compilation state and pass orchestration
//
// Holds every stage artifact and runs the minimal set of passes for a given
// terminal PassId. Stages 1–5 stop the run on the first stage that reports
// an error; stages 6–8 accumulate errors and still build the partial IR.
//
// Preconditions: patch and registries are set before calling run_pipeline.
// Postconditions: artifacts for all required passes are populated, or
//   `failed_pass` names the first stage that reported an error.
// Failure modes: any pass emitting error-level diagnostics; IR cert failure.
// Side effects: calls on_pass_complete after each pass for immediate display.

use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, error};

use crate::bus_lower::{lower_buses, reserve_bus_slots, BusOutcome};
use crate::cycles::{validate_cycles, ValidatedGraph};
use crate::dep_graph::{build_dep_graph, DependencyGraph};
use crate::diag::{codes, has_errors, Diagnostic, Locator};
use crate::id::SlotId;
use crate::ir::ConstPool;
use crate::ir_builder::IrBuilder;
use crate::link::{link, verify_ir, IrCert, LinkedIr};
use crate::lower::{lower_blocks, LowerEnv, LoweredBlocks};
use crate::normalize::{normalize, NormalizedPatch};
use crate::pass::{descriptor, required_passes, PassId, StageCert};
use crate::patch::Patch;
use crate::registry::Registries;
use crate::time_topology::{resolve_time, TimeResolved};
use crate::type_graph::{build_type_graph, TypedPatch};

pub use crate::link::CompileOptions;

// ── Artifact storage ───────────────────────────────────────────────────────

#[derive(Default)]
pub struct Artifacts {
    pub normalized: Option<NormalizedPatch>,
    /// Taken by the lowering stage to seed the IR builder.
    pub consts: Option<ConstPool>,
    pub typed: Option<TypedPatch>,
    pub time: Option<TimeResolved>,
    pub graph: Option<DependencyGraph>,
    pub validated: Option<ValidatedGraph>,
    pub bus_slots: Option<Vec<Option<SlotId>>>,
    pub lowered: Option<LoweredBlocks>,
    pub buses: Option<Vec<BusOutcome>>,
    pub linked: Option<LinkedIr>,
    pub cert: Option<IrCert>,
}

/// Provenance metadata for reproducible builds and cache-key use.
///
/// `patch_hash`: SHA-256 of the canonical patch JSON.
/// `registry_fingerprint`: SHA-256 of `Registries::canonical_json()`.
/// `compiler_version`: crate version from `Cargo.toml`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provenance {
    pub patch_hash: [u8; 32],
    pub registry_fingerprint: [u8; 32],
    pub compiler_version: &'static str,
}

impl Provenance {
    /// Hex string of the patch hash (64 characters).
    pub fn patch_hash_hex(&self) -> String {
        bytes_to_hex(&self.patch_hash)
    }

    /// Hex string of the registry fingerprint (64 characters).
    pub fn registry_fingerprint_hex(&self) -> String {
        bytes_to_hex(&self.registry_fingerprint)
    }

    /// Serialize provenance as a JSON string for `--emit build-info`.
    pub fn to_json(&self) -> String {
        format!(
            "{{\n  \"patch_hash\": \"{}\",\n  \"registry_fingerprint\": \"{}\",\n  \"manifest_schema_version\": 1,\n  \"compiler_version\": \"{}\"\n}}\n",
            self.patch_hash_hex(),
            self.registry_fingerprint_hex(),
            self.compiler_version,
        )
    }
}

fn bytes_to_hex(bytes: &[u8; 32]) -> String {
    let mut s = String::with_capacity(64);
    for b in bytes {
        use std::fmt::Write;
        let _ = write!(s, "{:02x}", b);
    }
    s
}

fn sha256(text: &str) -> [u8; 32] {
    use sha2::{Digest, Sha256};

    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let result = hasher.finalize();
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&result);
    hash
}

/// Compute provenance from a patch and the registries it compiles against.
///
/// Both hashes are taken over compact canonical JSON, so key order and
/// whitespace in the input files do not matter.
pub fn compute_provenance(patch: &Patch, registries: &Registries) -> Provenance {
    Provenance {
        patch_hash: sha256(&patch.canonical_json()),
        registry_fingerprint: sha256(&registries.canonical_json()),
        compiler_version: env!("CARGO_PKG_VERSION"),
    }
}

/// Holds all compilation artifacts and accumulated diagnostics.
pub struct CompilationState<'a> {
    pub patch: &'a Patch,
    pub registries: &'a Registries,
    pub options: CompileOptions,
    pub artifacts: Artifacts,
    /// Live between `LowerBlocks` and `Link`.
    builder: Option<IrBuilder>,
    pub diagnostics: Vec<Diagnostic>,
    pub has_error: bool,
    /// First pass that reported an error.
    pub failed_pass: Option<PassId>,
    pub provenance: Option<Provenance>,
}

impl<'a> CompilationState<'a> {
    pub fn new(patch: &'a Patch, registries: &'a Registries, options: CompileOptions) -> Self {
        Self {
            patch,
            registries,
            options,
            artifacts: Artifacts::default(),
            builder: None,
            diagnostics: Vec::new(),
            has_error: false,
            failed_pass: None,
            provenance: None,
        }
    }
}

// ── Error type ─────────────────────────────────────────────────────────────

/// Pipeline execution failed due to error-level diagnostics in a pass.
/// The specific diagnostics are available in `CompilationState.diagnostics`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("compilation failed in pass {failing_pass:?}")]
pub struct PipelineError {
    /// The pass that produced the error.
    pub failing_pass: PassId,
}

/// An artifact a pass depends on is absent; only reachable by running a
/// pass without its prerequisites.
fn require<T>(artifact: &Option<T>, pass: PassId) -> Result<&T, PipelineError> {
    artifact.as_ref().ok_or_else(|| {
        error!(pass = descriptor(pass).name, "prerequisite artifact missing");
        PipelineError { failing_pass: pass }
    })
}

// ── Pass bookkeeping ───────────────────────────────────────────────────────

/// Per-pass post-processing: callback, accumulate, log. Returns whether the
/// pass reported an error.
fn finish_pass_core(
    all_diags: &mut Vec<Diagnostic>,
    has_error: &mut bool,
    failed_pass: &mut Option<PassId>,
    pass_id: PassId,
    diags: Vec<Diagnostic>,
    elapsed: Duration,
    on_pass_complete: &mut impl FnMut(PassId, &[Diagnostic]),
) -> bool {
    on_pass_complete(pass_id, &diags);
    let is_err = has_errors(&diags);
    debug!(
        pass = descriptor(pass_id).name,
        elapsed_ms = elapsed.as_secs_f64() * 1000.0,
        diagnostics = diags.len(),
        "pass complete"
    );
    all_diags.extend(diags);
    if is_err {
        *has_error = true;
        failed_pass.get_or_insert(pass_id);
    }
    is_err
}

/// Finish a front stage: errors stop the run.
fn finish_pass(
    state: &mut CompilationState<'_>,
    pass_id: PassId,
    diags: Vec<Diagnostic>,
    elapsed: Duration,
    on_pass_complete: &mut impl FnMut(PassId, &[Diagnostic]),
) -> Result<(), PipelineError> {
    let failed = finish_pass_core(
        &mut state.diagnostics,
        &mut state.has_error,
        &mut state.failed_pass,
        pass_id,
        diags,
        elapsed,
        on_pass_complete,
    );
    if failed {
        return Err(PipelineError {
            failing_pass: pass_id,
        });
    }
    Ok(())
}

/// Finish a lowering stage: errors are recorded and the run continues.
fn finish_lowering_pass(
    state: &mut CompilationState<'_>,
    pass_id: PassId,
    diags: Vec<Diagnostic>,
    elapsed: Duration,
    on_pass_complete: &mut impl FnMut(PassId, &[Diagnostic]),
) {
    finish_pass_core(
        &mut state.diagnostics,
        &mut state.has_error,
        &mut state.failed_pass,
        pass_id,
        diags,
        elapsed,
        on_pass_complete,
    );
}

fn lower_env<'s>(
    artifacts: &'s Artifacts,
    registries: &'s Registries,
    pass: PassId,
) -> Result<LowerEnv<'s>, PipelineError> {
    Ok(LowerEnv {
        normalized: require(&artifacts.normalized, pass)?,
        typed: require(&artifacts.typed, pass)?,
        time: require(&artifacts.time, pass)?,
        graph: require(&artifacts.graph, pass)?,
        validated: require(&artifacts.validated, pass)?,
        registries,
    })
}

// ── Pipeline runner ────────────────────────────────────────────────────────

/// Run the minimal set of passes to produce `terminal`.
///
/// Per-pass sequence: execute → on_pass_complete(callback) → log → error check.
///
/// Preconditions: `state.patch` and `state.registries` are set.
/// Postconditions: artifacts for all passes in `required_passes(terminal)` are
///   populated, or the error names the stage that stopped the run.
/// Failure modes: front-stage errors stop immediately; lowering-stage errors
///   are reported after `Link` has built the partial IR.
/// Side effects: calls `on_pass_complete` after each pass.
pub fn run_pipeline(
    state: &mut CompilationState<'_>,
    terminal: PassId,
    mut on_pass_complete: impl FnMut(PassId, &[Diagnostic]),
) -> Result<(), PipelineError> {
    let registries = state.registries;
    for pass_id in required_passes(terminal) {
        let t = Instant::now();
        match pass_id {
            PassId::Normalize => {
                let result = normalize(state.patch, registries);
                state.artifacts.normalized = Some(result.normalized);
                state.artifacts.consts = Some(result.consts);
                finish_pass(state, pass_id, Vec::new(), t.elapsed(), &mut on_pass_complete)?;
            }
            PassId::TypeGraph => {
                let normalized = require(&state.artifacts.normalized, pass_id)?;
                let result = build_type_graph(normalized, registries);
                state.artifacts.typed = Some(result.typed);
                finish_pass(state, pass_id, result.diagnostics, t.elapsed(), &mut on_pass_complete)?;
            }
            PassId::TimeTopology => {
                let normalized = require(&state.artifacts.normalized, pass_id)?;
                let result = resolve_time(normalized, registries);
                state.artifacts.time = result.resolved;
                finish_pass(state, pass_id, result.diagnostics, t.elapsed(), &mut on_pass_complete)?;
            }
            PassId::DepGraph => {
                let normalized = require(&state.artifacts.normalized, pass_id)?;
                let result = build_dep_graph(normalized, registries);
                state.artifacts.graph = Some(result.graph);
                finish_pass(state, pass_id, result.diagnostics, t.elapsed(), &mut on_pass_complete)?;
            }
            PassId::CycleCheck => {
                let normalized = require(&state.artifacts.normalized, pass_id)?;
                let graph = require(&state.artifacts.graph, pass_id)?;
                let result = validate_cycles(graph, normalized, registries);
                state.artifacts.validated = Some(result.validated);
                finish_pass(state, pass_id, result.diagnostics, t.elapsed(), &mut on_pass_complete)?;
            }
            PassId::LowerBlocks => {
                let consts = state
                    .artifacts
                    .consts
                    .take()
                    .ok_or(PipelineError { failing_pass: pass_id })?;
                let env = lower_env(&state.artifacts, registries, pass_id)?;
                let mut builder = IrBuilder::new(consts);
                builder.set_time_model(env.time.model);
                let bus_slots = reserve_bus_slots(env.normalized, env.typed, &mut builder);
                let result = lower_blocks(&env, &mut builder, &bus_slots);
                state.builder = Some(builder);
                state.artifacts.bus_slots = Some(bus_slots);
                state.artifacts.lowered = Some(result.lowered);
                finish_lowering_pass(state, pass_id, result.diagnostics, t.elapsed(), &mut on_pass_complete);
            }
            PassId::LowerBuses => {
                let env = lower_env(&state.artifacts, registries, pass_id)?;
                let bus_slots = require(&state.artifacts.bus_slots, pass_id)?;
                let lowered = require(&state.artifacts.lowered, pass_id)?;
                let Some(builder) = state.builder.as_mut() else {
                    return Err(PipelineError { failing_pass: pass_id });
                };
                let result = lower_buses(&env, builder, bus_slots, lowered);
                state.artifacts.buses = Some(result.buses);
                finish_lowering_pass(state, pass_id, result.diagnostics, t.elapsed(), &mut on_pass_complete);
            }
            PassId::Link => {
                let builder = state
                    .builder
                    .take()
                    .ok_or(PipelineError { failing_pass: pass_id })?;
                let env = lower_env(&state.artifacts, registries, pass_id)?;
                let bus_slots = require(&state.artifacts.bus_slots, pass_id)?;
                let lowered = require(&state.artifacts.lowered, pass_id)?;
                let buses = require(&state.artifacts.buses, pass_id)?;
                let result = link(&env, builder, bus_slots, lowered, buses, &state.options);
                let mut diags = result.diagnostics;
                let cert = verify_ir(&result.linked);
                // A failed cert is only meaningful for IR that compiled cleanly.
                if !state.has_error && !has_errors(&diags) && !cert.all_pass() {
                    let failed: Vec<_> = cert
                        .obligations()
                        .iter()
                        .filter(|(_, ok)| !ok)
                        .map(|(name, _)| *name)
                        .collect();
                    diags.push(Diagnostic::error(
                        codes::E0600,
                        Locator::Patch,
                        format!("IR verification failed: {}", failed.join(", ")),
                    ));
                }
                state.artifacts.linked = Some(result.linked);
                state.artifacts.cert = Some(cert);
                finish_lowering_pass(state, pass_id, diags, t.elapsed(), &mut on_pass_complete);
            }
        }
    }
    match state.failed_pass {
        Some(failing_pass) => Err(PipelineError { failing_pass }),
        None => Ok(()),
    }
}

// ── One-shot compile ───────────────────────────────────────────────────────

/// Everything a caller gets back from `compile`, successful or not.
pub struct CompileOutput {
    /// Present whenever stages 1–5 succeeded, even if lowering reported errors.
    pub linked: Option<LinkedIr>,
    pub diagnostics: Vec<Diagnostic>,
    pub provenance: Provenance,
    pub error: Option<PipelineError>,
}

impl CompileOutput {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Run all eight stages on `patch`.
pub fn compile(patch: &Patch, registries: &Registries, options: CompileOptions) -> CompileOutput {
    let mut state = CompilationState::new(patch, registries, options);
    let error = run_pipeline(&mut state, PassId::Link, |_, _| {}).err();
    CompileOutput {
        linked: state.artifacts.linked.take(),
        diagnostics: state.diagnostics,
        provenance: compute_provenance(patch, registries),
        error,
    }
}
