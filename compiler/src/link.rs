// link.rs — Stage 8: link resolution, port tables, and IR verification
//
// Closes what stages 6–7 left open. Forward slots are bound to the outputs
// they stand for; inputs of blocks that were never lowered are resolved
// (wire, then bus, then default) so inspection tools still see them; output
// registration and bus publishers are checked; the schedule is appended
// and the builder is consumed.
//
// Preconditions: stages 6 and 7 ran against `builder`.
// Postconditions: `LinkedIr` holds the built program plus flat input and
//   output tables ordered by (block, port index).
// Failure modes: E0501, E0502, E0503, E0506, E0507, W0500 (error when
//   publishers are required).
// Side effects: consumes the builder.

use serde::Serialize;
use tracing::{debug, trace};

use crate::bus_lower::BusOutcome;
use crate::dep_graph::DepNode;
use crate::diag::{codes, DiagLevel, Diagnostic, Locator};
use crate::id::{BlockIndex, SlotId};
use crate::ir::{
    EventExpr, FieldExpr, IrProgram, ScheduleStep, SigExpr, SlotSource, SpecialRef, ValueRef,
};
use crate::ir_builder::IrBuilder;
use crate::lower::{
    check_combine_policy, default_const, finish_term, LowerEnv, LoweredBlocks, ResolvedInputs,
};
use crate::pass::StageCert;
use crate::types::{IrKind, TypeDesc};
use crate::writers::{enumerate_writers, Writer};

// ── Linked artifact ─────────────────────────────────────────────────────────

/// One resolved value at a block port.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PortBinding {
    pub block: BlockIndex,
    /// Position of the port in the block declaration.
    pub port_index: u32,
    pub port: String,
    pub ty: Option<TypeDesc>,
    pub value: ValueRef,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkedIr {
    pub program: IrProgram,
    /// Block identifiers by `BlockIndex`.
    pub block_ids: Vec<String>,
    /// Bus identifiers by `BusIndex`.
    pub bus_ids: Vec<String>,
    pub inputs: Vec<PortBinding>,
    pub outputs: Vec<PortBinding>,
}

impl LinkedIr {
    pub fn input(&self, block: BlockIndex, port: &str) -> Option<&PortBinding> {
        self.inputs
            .iter()
            .find(|b| b.block == block && b.port == port)
    }

    pub fn output(&self, block: BlockIndex, port: &str) -> Option<&PortBinding> {
        self.outputs
            .iter()
            .find(|b| b.block == block && b.port == port)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Caller-facing knobs that change diagnostics, never IR shape.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompileOptions {
    /// Report buses without publishers as errors instead of warnings.
    pub require_bus_publishers: bool,
}

pub struct LinkResult {
    pub linked: LinkedIr,
    pub diagnostics: Vec<Diagnostic>,
}

// ── Link ────────────────────────────────────────────────────────────────────

pub fn link(
    env: &LowerEnv<'_>,
    mut builder: IrBuilder,
    bus_slots: &[Option<SlotId>],
    lowered: &LoweredBlocks,
    buses: &[BusOutcome],
    options: &CompileOptions,
) -> LinkResult {
    let mut diagnostics = Vec::new();
    let normalized = env.normalized;

    // Forward references inside legal cycles.
    for fwd in &lowered.forward_slots {
        let source = lowered
            .output(fwd.block, &fwd.port)
            .and_then(|v| builder.source_of(v));
        match source {
            Some(source) => {
                builder.bind_slot(fwd.slot, source);
            }
            None => {
                let id = &normalized.block(fwd.block).id;
                diagnostics.push(Diagnostic::error(
                    codes::E0501,
                    Locator::port(id, &fwd.port),
                    format!(
                        "output '{}.{}' is read inside a cycle but was never registered",
                        id, fwd.port
                    ),
                ));
            }
        }
    }

    // Inputs of blocks without IR lowering.
    let mut resolved: Vec<Option<ResolvedInputs>> = vec![None; normalized.block_count()];
    for ix in normalized.block_indices() {
        if lowered.outcomes[ix.index()].attempted {
            continue;
        }
        let inputs = fallback_inputs(env, &mut builder, bus_slots, lowered, ix, &mut diagnostics);
        resolved[ix.index()] = Some(inputs);
    }

    check_output_registration(env, &builder, lowered, &mut diagnostics);

    for (ix, outcome) in normalized.bus_indices().zip(buses) {
        if outcome.failed || outcome.effective > 0 {
            continue;
        }
        let bus = &normalized.bus(ix).id;
        let level = if options.require_bus_publishers {
            DiagLevel::Error
        } else {
            DiagLevel::Warning
        };
        diagnostics.push(
            Diagnostic::new(
                level,
                Locator::bus(bus),
                format!("bus '{}' has no publishers; it holds its default value", bus),
            )
            .with_code(codes::W0500),
        );
    }

    for &node in &lowered.node_order {
        match env.graph.node(node) {
            DepNode::BlockEval(block) => {
                if lowered.outcomes[block.index()].outputs.is_some() {
                    builder.push_step(ScheduleStep::BlockEval { block });
                }
            }
            DepNode::BusValue(bus) => {
                if buses.get(bus.index()).is_some_and(|b| b.value.is_some()) {
                    builder.push_step(ScheduleStep::BusCombine { bus });
                }
            }
        }
    }

    let (inputs, outputs) = port_tables(env, lowered, &resolved);
    let program = builder.build();
    debug!(summary = %program.summary(), "linked");
    LinkResult {
        linked: LinkedIr {
            program,
            block_ids: normalized.blocks.iter().map(|b| b.id.clone()).collect(),
            bus_ids: normalized.buses.iter().map(|b| b.id.clone()).collect(),
            inputs,
            outputs,
        },
        diagnostics,
    }
}

/// First writer that yields a value, in wire, bus, default order. The
/// input's combine policy is checked first; a rejected input stays unbound.
fn fallback_inputs(
    env: &LowerEnv<'_>,
    builder: &mut IrBuilder,
    bus_slots: &[Option<SlotId>],
    lowered: &LoweredBlocks,
    ix: BlockIndex,
    diagnostics: &mut Vec<Diagnostic>,
) -> ResolvedInputs {
    let mut inputs = ResolvedInputs::default();
    let Some(decl) = env
        .registries
        .blocks
        .decl(&env.normalized.block(ix).type_name)
    else {
        return inputs;
    };
    for input in &decl.inputs {
        let Some(ty) = env.typed.input_type(ix, &input.id) else {
            continue;
        };
        let writers = enumerate_writers(env.normalized, ix, &input.id);
        let policy = input.combine.unwrap_or_default();
        let locator = Locator::port(&env.normalized.block(ix).id, &input.id);
        if let Some(d) = check_combine_policy(ty, &policy, &writers, locator) {
            diagnostics.push(d);
            continue;
        }
        for writer in writers {
            let value = match &writer {
                Writer::Wire { edge, from, port, .. } => {
                    let Some(value) = lowered.output(*from, port).cloned() else {
                        continue;
                    };
                    let edge = &env.normalized.edges[*edge];
                    finish_term(value, Some(edge), ty, env.registries, builder, diagnostics)
                }
                Writer::Bus { edge, bus, .. } => {
                    let Some(value) = bus_slots
                        .get(bus.index())
                        .copied()
                        .flatten()
                        .and_then(|slot| builder.read_slot(slot))
                    else {
                        continue;
                    };
                    let edge = &env.normalized.edges[*edge];
                    finish_term(value, Some(edge), ty, env.registries, builder, diagnostics)
                }
                Writer::Default { constant, .. } => finish_term(
                    default_const(*constant, ty),
                    None,
                    ty,
                    env.registries,
                    builder,
                    diagnostics,
                ),
            };
            if let Some(value) = value {
                trace!(writer = writer.identifier(), port = %input.id, "resolved at link");
                inputs.insert(input.id.clone(), value);
                break;
            }
        }
    }
    inputs
}

/// Every continuous or event output of a lowered block must be slotted.
fn check_output_registration(
    env: &LowerEnv<'_>,
    builder: &IrBuilder,
    lowered: &LoweredBlocks,
    diagnostics: &mut Vec<Diagnostic>,
) {
    for ix in env.normalized.block_indices() {
        let Some(produced) = &lowered.outcomes[ix.index()].outputs else {
            continue;
        };
        let Some(ports) = env.typed.ports(ix) else {
            continue;
        };
        let id = &env.normalized.block(ix).id;
        for (port, ty) in &ports.outputs {
            let Some(ty) = ty else { continue };
            if !matches!(ty.ir_kind(), IrKind::Signal | IrKind::Field | IrKind::Event) {
                continue;
            }
            let registered = produced
                .get(port)
                .and_then(ValueRef::slot)
                .is_some_and(|slot| builder.slot_bound(slot));
            if !registered {
                diagnostics.push(Diagnostic::error(
                    codes::E0501,
                    Locator::port(id, port),
                    format!("output '{}.{}' ({}) was not registered to a slot", id, port, ty),
                ));
            }
        }
    }
}

fn port_tables(
    env: &LowerEnv<'_>,
    lowered: &LoweredBlocks,
    resolved: &[Option<ResolvedInputs>],
) -> (Vec<PortBinding>, Vec<PortBinding>) {
    let mut inputs = Vec::new();
    let mut outputs = Vec::new();
    for ix in env.normalized.block_indices() {
        let Some(decl) = env
            .registries
            .blocks
            .decl(&env.normalized.block(ix).type_name)
        else {
            continue;
        };
        let outcome = &lowered.outcomes[ix.index()];
        let values = resolved[ix.index()].as_ref().unwrap_or(&outcome.inputs);
        for (i, input) in decl.inputs.iter().enumerate() {
            if let Some(value) = values.get(&input.id) {
                inputs.push(PortBinding {
                    block: ix,
                    port_index: i as u32,
                    port: input.id.clone(),
                    ty: env.typed.input_type(ix, &input.id).cloned(),
                    value: value.clone(),
                });
            }
        }
        let Some(produced) = &outcome.outputs else {
            continue;
        };
        for (i, output) in decl.outputs.iter().enumerate() {
            if let Some(value) = produced.get(&output.id) {
                outputs.push(PortBinding {
                    block: ix,
                    port_index: i as u32,
                    port: output.id.clone(),
                    ty: env.typed.output_type(ix, &output.id).cloned(),
                    value: value.clone(),
                });
            }
        }
    }
    (inputs, outputs)
}

// ── Verification ────────────────────────────────────────────────────────────

/// Machine-checkable evidence for linked IR postconditions (R1-R3).
#[derive(Debug, Clone)]
pub struct IrCert {
    /// R1: every slot has a source.
    pub r1_slots_registered: bool,
    /// R2: every id inside an expression, slot, state, or table is in bounds.
    pub r2_expr_refs_in_bounds: bool,
    /// R3: every input binding is typed and matches its type's IR kind.
    pub r3_inputs_typed: bool,
}

impl StageCert for IrCert {
    fn all_pass(&self) -> bool {
        self.r1_slots_registered && self.r2_expr_refs_in_bounds && self.r3_inputs_typed
    }

    fn obligations(&self) -> Vec<(&'static str, bool)> {
        vec![
            ("R1_slots_registered", self.r1_slots_registered),
            ("R2_expr_refs_in_bounds", self.r2_expr_refs_in_bounds),
            ("R3_inputs_typed", self.r3_inputs_typed),
        ]
    }
}

pub fn verify_ir(linked: &LinkedIr) -> IrCert {
    let p = &linked.program;
    IrCert {
        r1_slots_registered: p.slots.iter().all(|s| s.source != SlotSource::Unbound),
        r2_expr_refs_in_bounds: refs_in_bounds(linked),
        r3_inputs_typed: linked.inputs.iter().all(|b| {
            b.ty
                .as_ref()
                .is_some_and(|ty| kind_matches(ty.ir_kind(), &b.value))
        }),
    }
}

fn kind_matches(kind: IrKind, value: &ValueRef) -> bool {
    matches!(
        (kind, value),
        (IrKind::Const, ValueRef::Const { .. })
            | (IrKind::Signal, ValueRef::Sig { .. })
            | (IrKind::Field, ValueRef::Field { .. })
            | (IrKind::Event, ValueRef::Event { .. })
            | (IrKind::Handle, ValueRef::Special { .. })
    )
}

fn refs_in_bounds(linked: &LinkedIr) -> bool {
    let p = &linked.program;
    let sig = |i: crate::id::SigExprId| i.index() < p.signals.len();
    let field = |i: crate::id::FieldExprId| i.index() < p.fields.len();
    let event = |i: crate::id::EventExprId| i.index() < p.events.len();
    let slot = |i: SlotId| i.index() < p.slots.len();
    let state = |i: crate::id::StateId| i.index() < p.states.len();
    let konst = |i: crate::id::ConstId| i.index() < p.consts.len();
    let handle = |i: crate::id::HandleId| i.index() < p.handles.len();

    let value_ok = |v: &ValueRef| match v {
        ValueRef::Const { id, .. } => konst(*id),
        ValueRef::Sig { expr, slot: s } => sig(*expr) && slot(*s),
        ValueRef::Field { expr, slot: s } => field(*expr) && slot(*s),
        ValueRef::Event { expr, slot: s } => event(*expr) && slot(*s),
        ValueRef::Special { special } => match special {
            SpecialRef::Domain(h) | SpecialRef::RenderSink(h) | SpecialRef::Camera(h) => handle(*h),
        },
    };

    let signals_ok = p.signals.iter().all(|e| match e {
        SigExpr::Const { value } => konst(*value),
        SigExpr::TimeAbsMs | SigExpr::TimeModelMs | SigExpr::Phase01 => true,
        SigExpr::SlotRead { slot: s } => slot(*s),
        SigExpr::Map { src, .. } => sig(*src),
        SigExpr::Zip { a, b, .. } => sig(*a) && sig(*b),
        SigExpr::Delay { state: s, input } | SigExpr::Integrate { state: s, input } => {
            state(*s) && sig(*input)
        }
        SigExpr::SampleHold {
            state: s,
            input,
            trigger,
        } => state(*s) && sig(*input) && trigger.map_or(true, event),
        SigExpr::Combine { terms, .. } => terms.iter().all(|t| sig(*t)),
    });
    let fields_ok = p.fields.iter().all(|e| match e {
        FieldExpr::Const { value } => konst(*value),
        FieldExpr::Broadcast { src } => sig(*src),
        FieldExpr::SlotRead { slot: s } => slot(*s),
        FieldExpr::Map { src, .. } => field(*src),
        FieldExpr::Zip { a, b, .. } => field(*a) && field(*b),
        FieldExpr::Combine { terms, .. } => terms.iter().all(|t| field(*t)),
    });
    let events_ok = p.events.iter().all(|e| match e {
        EventExpr::Never | EventExpr::Wrap => true,
        EventExpr::SlotRead { slot: s } => slot(*s),
        EventExpr::Merge { terms } | EventExpr::Override { terms } => {
            terms.iter().all(|t| event(*t))
        }
    });
    let slots_ok = p.slots.iter().all(|s| match s.source {
        SlotSource::Unbound => true,
        SlotSource::Sig(e) => sig(e),
        SlotSource::Field(e) => field(e),
        SlotSource::Event(e) => event(e),
    });
    let states_ok = p.states.iter().all(|s| konst(s.init));
    let sinks_ok = p
        .render_sinks
        .iter()
        .chain(&p.cameras)
        .all(|s| handle(s.handle) && s.inputs.values().all(value_ok));
    let tables_ok = linked
        .inputs
        .iter()
        .chain(&linked.outputs)
        .all(|b| b.block.index() < linked.block_ids.len() && value_ok(&b.value));

    signals_ok && fields_ok && events_ok && slots_ok && states_ok && sinks_ok && tables_ok
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus_lower::{lower_buses, reserve_bus_slots};
    use crate::lower::lower_blocks;
    use crate::patch::{Block, Bus, Edge, Endpoint, Patch, TransformStep, Value};
    use crate::testing::{clock, stage, stage_with, Staged};

    fn run_with(s: &Staged, require_bus_publishers: bool) -> LinkResult {
        let env = s.env();
        let mut b = s.builder();
        let slots = reserve_bus_slots(&s.n, &s.typed, &mut b);
        let blocks = lower_blocks(&env, &mut b, &slots);
        let buses = lower_buses(&env, &mut b, &slots, &blocks.lowered);
        link(
            &env,
            b,
            &slots,
            &blocks.lowered,
            &buses.buses,
            &CompileOptions {
                require_bus_publishers,
            },
        )
    }

    fn run(s: &Staged) -> LinkResult {
        run_with(s, false)
    }

    #[test]
    fn cycle_forward_slot_is_bound_and_verified() {
        let p = Patch::new()
            .block(clock())
            .block(Block::new("A", "Add"))
            .block(Block::new("B", "Sin"))
            .block(Block::new("D", "Delay"))
            .edge(Edge::wire("ad", ("A", "out"), ("D", "in")))
            .edge(Edge::wire("db", ("D", "out"), ("B", "in")))
            .edge(Edge::wire("ba", ("B", "out"), ("A", "a")));
        let s = stage(&p);
        let r = run(&s);
        assert!(r.diagnostics.is_empty(), "{:?}", r.diagnostics);
        let cert = verify_ir(&r.linked);
        assert!(cert.all_pass(), "{:?}", cert.obligations());
        let steps = r.linked.program.schedule.len();
        assert_eq!(steps, 4);
    }

    #[test]
    fn probe_inputs_resolve_at_link() {
        let p = Patch::new()
            .block(clock())
            .block(Block::new("a", "Const").with_param("value", Value::Float(2.0)))
            .block(Block::new("probe", "Probe"))
            .edge(
                Edge::wire("w", ("a", "out"), ("probe", "in"))
                    .with_lens(TransformStep::new("scale").with_param("factor", Value::Float(3.0))),
            );
        let s = stage(&p);
        let r = run(&s);
        assert!(r.diagnostics.is_empty(), "{:?}", r.diagnostics);
        let probe = s.n.block_index("probe").unwrap();
        let binding = r.linked.input(probe, "in").unwrap();
        assert_eq!(binding.port_index, 0);
        assert!(matches!(binding.value, ValueRef::Sig { .. }));
        // Probe has no lowering, so it is not scheduled.
        assert!(!r
            .linked
            .program
            .schedule
            .contains(&ScheduleStep::BlockEval { block: probe }));
    }

    #[test]
    fn probe_with_uncompilable_lens_reports_at_link() {
        let p = Patch::new()
            .block(clock())
            .block(Block::new("a", "Const"))
            .block(Block::new("probe", "Probe"))
            .edge(
                Edge::wire("w", ("a", "out"), ("probe", "in"))
                    .with_lens(TransformStep::new("legacyEase")),
            );
        let s = stage(&p);
        let r = run(&s);
        let got: Vec<_> = r.diagnostics.iter().map(|d| d.code).collect();
        assert_eq!(got, vec![Some(codes::E0503)]);
        assert_eq!(r.diagnostics[0].locator, Locator::edge("w"));
    }

    fn stage_manifest(p: &Patch, manifest: &str) -> Staged {
        let mut regs = crate::registry::Registries::builtin();
        regs.load_manifest_str(manifest, "test.json").unwrap();
        stage_with(p, regs)
    }

    #[test]
    fn unlowered_block_checks_combine_mode_against_port_type() {
        let manifest = r#"{ "blocks": [ { "type": "Tint",
            "inputs": [ { "id": "c", "type": "Signal<color>",
                          "default": [1.0, 0.5, 0.0, 1.0],
                          "combine": { "when": "multi", "mode": "sum" } } ] } ] }"#;
        let p = Patch::new().block(clock()).block(Block::new("T", "Tint"));
        let s = stage_manifest(&p, manifest);
        let r = run(&s);
        let got: Vec<_> = r.diagnostics.iter().map(|d| d.code).collect();
        assert_eq!(got, vec![Some(codes::E0506)]);
        assert_eq!(r.diagnostics[0].locator, Locator::port("T", "c"));
        let tint = s.n.block_index("T").unwrap();
        assert!(r.linked.input(tint, "c").is_none());
    }

    #[test]
    fn unlowered_block_rejects_second_writer_in_error_mode() {
        let manifest = r#"{ "blocks": [ { "type": "Pair",
            "inputs": [ { "id": "in", "type": "Signal<float>",
                          "combine": { "when": "multi", "mode": "error" } } ] } ] }"#;
        let p = Patch::new()
            .block(clock())
            .block(Block::new("a", "Const"))
            .block(Block::new("b", "Const"))
            .block(Block::new("pair", "Pair"))
            .edge(Edge::wire("w1", ("a", "out"), ("pair", "in")))
            .edge(Edge::wire("w2", ("b", "out"), ("pair", "in")));
        let s = stage_manifest(&p, manifest);
        let r = run(&s);
        let got: Vec<_> = r.diagnostics.iter().map(|d| d.code).collect();
        assert_eq!(got, vec![Some(codes::E0507)]);
        assert_eq!(r.diagnostics[0].locator, Locator::port("pair", "in"));
        assert_eq!(r.diagnostics[0].related.len(), 2);
        // No writer is picked silently.
        let pair = s.n.block_index("pair").unwrap();
        assert!(r.linked.input(pair, "in").is_none());
    }

    #[test]
    fn silent_bus_warns_or_fails_per_options() {
        let p = Patch::new()
            .block(clock())
            .bus(Bus::new("level", "Signal<float>"));
        let s = stage(&p);
        let r = run(&s);
        assert_eq!(r.diagnostics.len(), 1);
        assert_eq!(r.diagnostics[0].code, Some(codes::W0500));
        assert_eq!(r.diagnostics[0].level, DiagLevel::Warning);

        let r = run_with(&s, true);
        assert_eq!(r.diagnostics[0].level, DiagLevel::Error);
        assert_eq!(r.diagnostics[0].code, Some(codes::W0500));
    }

    #[test]
    fn bus_combine_is_scheduled_after_publishers() {
        let p = Patch::new()
            .block(clock())
            .block(Block::new("a", "Const"))
            .block(Block::new("s", "Sin"))
            .bus(Bus::new("energy", "Signal<float>"))
            .edge(Edge::new("p", Endpoint::port("a", "out"), Endpoint::bus("energy")))
            .edge(Edge::new("l", Endpoint::bus("energy"), Endpoint::port("s", "in")));
        let s = stage(&p);
        let r = run(&s);
        assert!(r.diagnostics.is_empty(), "{:?}", r.diagnostics);
        let sched = &r.linked.program.schedule;
        let pos = |step: ScheduleStep| sched.iter().position(|s| *s == step).unwrap();
        let a = s.n.block_index("a").unwrap();
        let sin = s.n.block_index("s").unwrap();
        let bus = s.n.bus_index("energy").unwrap();
        assert!(pos(ScheduleStep::BlockEval { block: a }) < pos(ScheduleStep::BusCombine { bus }));
        assert!(pos(ScheduleStep::BusCombine { bus }) < pos(ScheduleStep::BlockEval { block: sin }));
        assert!(verify_ir(&r.linked).all_pass());
    }

    #[test]
    fn cert_flags_unbound_slot() {
        let p = Patch::new().block(clock());
        let s = stage(&p);
        let mut linked = run(&s).linked;
        assert!(verify_ir(&linked).all_pass());
        linked.program.slots.push(crate::ir::SlotMeta {
            id: SlotId(linked.program.slots.len() as u32),
            ty: TypeDesc::signal(crate::types::Domain::Float),
            source: SlotSource::Unbound,
        });
        let cert = verify_ir(&linked);
        assert!(!cert.r1_slots_registered);
        assert!(cert.r2_expr_refs_in_bounds);
    }
}
