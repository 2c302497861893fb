// lower.rs — Stage 6: block lowering with writer/combine resolution
//
// Walks blocks in dependency order (SCCs dependency-first; inside a legal
// cycle, a Kahn order over wires that ignores edges entering state-boundary
// blocks). For every input the writers are enumerated, validated against
// the port's combine policy, transformed, coerced, and reduced to one value;
// the block's registered lowering then turns resolved inputs into outputs.
//
// Preconditions: stages 1–5 passed; bus slots reserved in the builder.
// Postconditions: one `BlockOutcome` per block; every forward slot names
//   an upstream output that link resolution will bind.
// Failure modes: E0500, E0502, E0503, E0505, E0506, E0507, E0508 (batch).
// Side effects: appends expressions, slots, state, and handles to the builder.

use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;
use tracing::{trace, warn};

use crate::combine;
use crate::cycles::{Scc, ValidatedGraph};
use crate::dep_graph::{DepEdgeKind, DepNode, DependencyGraph};
use crate::diag::{codes, Diagnostic, Locator};
use crate::id::{BlockIndex, NodeIx, SlotId};
use crate::ir::{EventExpr, FieldExpr, SigExpr, ValueRef};
use crate::ir_builder::IrBuilder;
use crate::normalize::NormalizedPatch;
use crate::patch::{CombineMode, CombinePolicy, Edge, Value};
use crate::registry::{BlockDecl, Registries};
use crate::time_topology::TimeResolved;
use crate::transforms::apply_chain;
use crate::type_graph::TypedPatch;
use crate::types::{combine_mode_allowed, IrKind, TypeDesc, World};
use crate::writers::{enumerate_writers, Writer};

// ── Lowering contract ───────────────────────────────────────────────────────

/// Turns a block's resolved inputs into IR.
///
/// Implementations must return one value per produced output. Outputs with
/// no IR representation may be omitted.
pub trait BlockLowering: Send + Sync {
    fn lower(
        &self,
        ctx: &mut LowerCtx<'_>,
        inputs: &ResolvedInputs,
        config: &BlockConfig<'_>,
    ) -> Result<LoweredOutputs, LowerError>;
}

pub type LoweredOutputs = BTreeMap<String, ValueRef>;

/// Mutable view handed to a lowering.
pub struct LowerCtx<'a> {
    pub builder: &'a mut IrBuilder,
    pub block: BlockIndex,
    pub time: &'a TimeResolved,
}

impl LowerCtx<'_> {
    pub fn output_sig(&mut self, expr: SigExpr, ty: &TypeDesc) -> ValueRef {
        let id = self.builder.sig(expr);
        self.builder.sig_value(id, ty.clone())
    }

    pub fn output_field(&mut self, expr: FieldExpr, ty: &TypeDesc) -> ValueRef {
        let id = self.builder.field(expr);
        self.builder.field_value(id, ty.clone())
    }

    pub fn output_event(&mut self, expr: EventExpr, ty: &TypeDesc) -> ValueRef {
        let id = self.builder.event(expr);
        self.builder.event_value(id, ty.clone())
    }
}

/// Static configuration of the block being lowered.
pub struct BlockConfig<'a> {
    pub block_id: &'a str,
    pub params: &'a BTreeMap<String, Value>,
    /// Declared outputs with their resolved types.
    pub outputs: &'a [(String, Option<TypeDesc>)],
}

impl BlockConfig<'_> {
    pub fn param(&self, name: &str) -> Option<&Value> {
        self.params.get(name)
    }

    pub fn param_f64(&self, name: &str, default: f64) -> Result<f64, LowerError> {
        match self.params.get(name) {
            None => Ok(default),
            Some(v) => v.as_f64().ok_or_else(|| LowerError::InvalidParam {
                name: name.to_string(),
                message: format!("expected a number, found {}", v),
            }),
        }
    }

    pub fn output_type(&self, port: &str) -> Result<&TypeDesc, LowerError> {
        self.outputs
            .iter()
            .find(|(id, _)| id == port)
            .and_then(|(_, ty)| ty.as_ref())
            .ok_or_else(|| LowerError::UnknownOutput(port.to_string()))
    }
}

/// Input values after writer resolution, keyed by port id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedInputs {
    values: BTreeMap<String, ValueRef>,
}

impl ResolvedInputs {
    pub fn get(&self, port: &str) -> Option<&ValueRef> {
        self.values.get(port)
    }

    pub fn require(&self, port: &str) -> Result<&ValueRef, LowerError> {
        self.values
            .get(port)
            .ok_or_else(|| LowerError::MissingInput(port.to_string()))
    }

    pub fn insert(&mut self, port: impl Into<String>, value: ValueRef) {
        self.values.insert(port.into(), value);
    }

    pub fn as_map(&self) -> &BTreeMap<String, ValueRef> {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum LowerError {
    #[error("input '{0}' has no value")]
    MissingInput(String),
    #[error("input '{port}' is a {kind} value, which this block cannot consume")]
    Operand { port: String, kind: &'static str },
    #[error("parameter '{name}': {message}")]
    InvalidParam { name: String, message: String },
    #[error("output '{0}' is not declared or has no IR form")]
    UnknownOutput(String),
}

// ── Stage driver ────────────────────────────────────────────────────────────

/// Everything stages 6–8 read besides the builder.
pub struct LowerEnv<'a> {
    pub normalized: &'a NormalizedPatch,
    pub typed: &'a TypedPatch,
    pub time: &'a TimeResolved,
    pub graph: &'a DependencyGraph,
    pub validated: &'a ValidatedGraph,
    pub registries: &'a Registries,
}

#[derive(Debug, Clone, Default)]
pub struct BlockOutcome {
    /// False for blocks without a registered lowering.
    pub attempted: bool,
    pub inputs: ResolvedInputs,
    /// `None` when not attempted or when the lowering failed.
    pub outputs: Option<LoweredOutputs>,
}

/// Slot read by a writer whose upstream block is lowered later in its cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardSlot {
    pub slot: SlotId,
    pub block: BlockIndex,
    pub port: String,
}

#[derive(Debug, Clone, Default)]
pub struct LoweredBlocks {
    /// Indexed by `BlockIndex`.
    pub outcomes: Vec<BlockOutcome>,
    pub forward_slots: Vec<ForwardSlot>,
    /// Evaluation order of every dependency-graph node.
    pub node_order: Vec<NodeIx>,
}

impl LoweredBlocks {
    /// Lowered value of `block`'s output `port`, if it has one.
    pub fn output(&self, block: BlockIndex, port: &str) -> Option<&ValueRef> {
        self.outcomes.get(block.index())?.outputs.as_ref()?.get(port)
    }
}

pub struct LowerResult {
    pub lowered: LoweredBlocks,
    pub diagnostics: Vec<Diagnostic>,
}

pub fn lower_blocks(
    env: &LowerEnv<'_>,
    builder: &mut IrBuilder,
    bus_slots: &[Option<SlotId>],
) -> LowerResult {
    let node_order = evaluation_order(env);
    let mut lowerer = Lowerer {
        env,
        builder,
        bus_slots,
        outcomes: vec![None; env.normalized.block_count()],
        forward: BTreeMap::new(),
        forward_slots: Vec::new(),
        diagnostics: Vec::new(),
    };
    for &node in &node_order {
        if let DepNode::BlockEval(block) = env.graph.node(node) {
            let outcome = lowerer.lower_block(block);
            lowerer.outcomes[block.index()] = Some(outcome);
        }
    }
    LowerResult {
        lowered: LoweredBlocks {
            outcomes: lowerer
                .outcomes
                .into_iter()
                .map(Option::unwrap_or_default)
                .collect(),
            forward_slots: lowerer.forward_slots,
            node_order,
        },
        diagnostics: lowerer.diagnostics,
    }
}

// ── Evaluation order ────────────────────────────────────────────────────────

/// Dependency-first order over every graph node.
pub fn evaluation_order(env: &LowerEnv<'_>) -> Vec<NodeIx> {
    let mut order = Vec::with_capacity(env.graph.node_count());
    for &pos in &env.validated.order {
        let scc = &env.validated.sccs[pos];
        if scc.trivial {
            order.extend(scc.nodes.iter().copied());
        } else {
            order.extend(cycle_order(scc, env));
        }
    }
    order
}

/// Kahn order over wires inside one cycle. Wires entering a state-boundary
/// block do not count; blocks left over are appended by index, then buses.
fn cycle_order(scc: &Scc, env: &LowerEnv<'_>) -> Vec<NodeIx> {
    let graph = env.graph;
    let members: BTreeSet<NodeIx> = scc
        .nodes
        .iter()
        .copied()
        .filter(|&n| matches!(graph.node(n), DepNode::BlockEval(_)))
        .collect();
    let counted: Vec<(NodeIx, NodeIx)> = graph
        .edges
        .iter()
        .filter(|e| e.kind == DepEdgeKind::Wire)
        .filter(|e| members.contains(&e.from) && members.contains(&e.to))
        .filter(|e| !is_state_boundary(env, e.to))
        .map(|e| (e.from, e.to))
        .collect();

    let mut indegree: BTreeMap<NodeIx, usize> = members.iter().map(|&n| (n, 0)).collect();
    for (_, to) in &counted {
        if let Some(d) = indegree.get_mut(to) {
            *d += 1;
        }
    }
    let mut ready: BTreeSet<NodeIx> = indegree
        .iter()
        .filter(|(_, d)| **d == 0)
        .map(|(&n, _)| n)
        .collect();
    let mut order = Vec::with_capacity(scc.nodes.len());
    let mut placed = BTreeSet::new();
    while let Some(n) = ready.pop_first() {
        order.push(n);
        placed.insert(n);
        for (_, to) in counted.iter().filter(|(from, _)| *from == n) {
            if let Some(d) = indegree.get_mut(to) {
                *d -= 1;
                if *d == 0 {
                    ready.insert(*to);
                }
            }
        }
    }
    order.extend(members.iter().copied().filter(|n| !placed.contains(n)));
    order.extend(
        scc.nodes
            .iter()
            .copied()
            .filter(|&n| matches!(graph.node(n), DepNode::BusValue(_))),
    );
    order
}

fn is_state_boundary(env: &LowerEnv<'_>, node: NodeIx) -> bool {
    match env.graph.node(node) {
        DepNode::BlockEval(b) => env
            .registries
            .blocks
            .decl(&env.normalized.block(b).type_name)
            .is_some_and(|d| d.state_boundary),
        DepNode::BusValue(_) => false,
    }
}

// ── Per-block lowering ──────────────────────────────────────────────────────

struct Lowerer<'e, 'b> {
    env: &'e LowerEnv<'e>,
    builder: &'b mut IrBuilder,
    bus_slots: &'b [Option<SlotId>],
    /// `None` until the block has been visited.
    outcomes: Vec<Option<BlockOutcome>>,
    forward: BTreeMap<(BlockIndex, String), SlotId>,
    forward_slots: Vec<ForwardSlot>,
    diagnostics: Vec<Diagnostic>,
}

impl Lowerer<'_, '_> {
    fn lower_block(&mut self, ix: BlockIndex) -> BlockOutcome {
        let env = self.env;
        let block = env.normalized.block(ix);
        let Some(entry) = env.registries.blocks.get(&block.type_name) else {
            return BlockOutcome::default();
        };
        let Some(lowering) = entry.lowering.clone() else {
            trace!(block = %block.id, "no IR lowering; inputs resolved at link");
            return BlockOutcome::default();
        };
        let Some(ports) = env.typed.ports(ix) else {
            return BlockOutcome::default();
        };

        let Some(inputs) = self.resolve_inputs(ix, &entry.decl) else {
            trace!(block = %block.id, "input rejected by combine policy; lowering skipped");
            return BlockOutcome {
                attempted: true,
                ..BlockOutcome::default()
            };
        };

        let states_before = self.builder.state_count();
        let config = BlockConfig {
            block_id: &block.id,
            params: &block.params,
            outputs: &ports.outputs,
        };
        let mut ctx = LowerCtx {
            builder: &mut *self.builder,
            block: ix,
            time: env.time,
        };
        let result = lowering.lower(&mut ctx, &inputs, &config);

        if self.builder.state_count() > states_before && !entry.decl.state_boundary {
            self.diagnostics.push(
                Diagnostic::error(
                    codes::E0505,
                    Locator::block(&block.id),
                    format!(
                        "block '{}' ({}) allocated state but is not a state boundary",
                        block.id, block.type_name
                    ),
                )
                .with_hint("declare the block type with stateBoundary: true"),
            );
        }

        let outputs = match result {
            Ok(mut outputs) => {
                self.register_outputs(&mut outputs, &ports.outputs);
                trace!(block = %block.id, outputs = outputs.len(), "lowered");
                Some(outputs)
            }
            Err(e) => {
                self.diagnostics.push(
                    Diagnostic::error(
                        codes::E0508,
                        Locator::block(&block.id),
                        format!("lowering of block '{}' ({}) failed", block.id, block.type_name),
                    )
                    .with_cause(e.to_string(), Some(Locator::block(&block.id))),
                );
                None
            }
        };
        BlockOutcome {
            attempted: true,
            inputs,
            outputs,
        }
    }

    /// Constants returned for continuous outputs get a slot of their own.
    fn register_outputs(&mut self, outputs: &mut LoweredOutputs, declared: &[(String, Option<TypeDesc>)]) {
        for (port, ty) in declared {
            let Some(ty) = ty else { continue };
            if !matches!(ty.ir_kind(), IrKind::Signal | IrKind::Field | IrKind::Event) {
                continue;
            }
            let Some(value) = outputs.get(port) else { continue };
            if value.slot().is_none() {
                if let Some(coerced) = self.builder.coerce(value, ty) {
                    outputs.insert(port.clone(), coerced);
                }
            }
        }
    }

    /// `None` when a combine policy rejected an input; the error is reported.
    fn resolve_inputs(&mut self, ix: BlockIndex, decl: &BlockDecl) -> Option<ResolvedInputs> {
        let env = self.env;
        let block_id = &env.normalized.block(ix).id;
        let mut inputs = ResolvedInputs::default();
        let mut rejected = false;

        for input in &decl.inputs {
            let Some(ty) = env.typed.input_type(ix, &input.id).cloned() else {
                continue;
            };
            let writers = enumerate_writers(env.normalized, ix, &input.id);
            let policy = input.combine.unwrap_or_default();

            let locator = Locator::port(block_id, &input.id);
            if let Some(d) = check_combine_policy(&ty, &policy, &writers, locator) {
                self.diagnostics.push(d);
                rejected = true;
                continue;
            }
            if writers.is_empty() {
                if !input.optional {
                    self.diagnostics.push(
                        Diagnostic::error(
                            codes::E0500,
                            Locator::port(block_id, &input.id),
                            format!("input '{}.{}' has no writer", block_id, input.id),
                        )
                        .with_hint("connect a wire or bus, or declare a default"),
                    );
                }
                continue;
            }

            let mut terms = Vec::with_capacity(writers.len());
            for writer in &writers {
                if let Some(term) = self.writer_term(writer, &ty) {
                    terms.push(term);
                }
            }
            if let Some(value) = combine::reduce(self.builder, &ty, &policy, terms) {
                inputs.insert(input.id.clone(), value);
            }
        }
        (!rejected).then_some(inputs)
    }

    fn writer_term(&mut self, writer: &Writer, ty: &TypeDesc) -> Option<ValueRef> {
        let env = self.env;
        match writer {
            Writer::Wire {
                edge, from, port, ..
            } => {
                let Some(value) = self.upstream(*from, port) else {
                    trace!(writer = writer.identifier(), "upstream has no IR value");
                    return None;
                };
                finish_term(
                    value,
                    Some(&env.normalized.edges[*edge]),
                    ty,
                    env.registries,
                    self.builder,
                    &mut self.diagnostics,
                )
            }
            Writer::Bus { edge, bus, .. } => {
                let slot = self.bus_slots.get(bus.index()).copied().flatten()?;
                let value = self.builder.read_slot(slot)?;
                finish_term(
                    value,
                    Some(&env.normalized.edges[*edge]),
                    ty,
                    env.registries,
                    self.builder,
                    &mut self.diagnostics,
                )
            }
            Writer::Default { constant, .. } => finish_term(
                default_const(*constant, ty),
                None,
                ty,
                env.registries,
                self.builder,
                &mut self.diagnostics,
            ),
        }
    }

    /// Output `port` of `from`: its lowered value if visited, else a
    /// forward slot when the upstream will produce a slotted value.
    fn upstream(&mut self, from: BlockIndex, port: &str) -> Option<ValueRef> {
        if let Some(outcome) = &self.outcomes[from.index()] {
            return outcome.outputs.as_ref()?.get(port).cloned();
        }
        if let Some(&slot) = self.forward.get(&(from, port.to_string())) {
            return self.builder.read_slot(slot);
        }
        let env = self.env;
        let has_lowering = env
            .registries
            .blocks
            .get(&env.normalized.block(from).type_name)
            .is_some_and(|e| e.lowering.is_some());
        let ty = env.typed.output_type(from, port)?;
        if !has_lowering || !matches!(ty.ir_kind(), IrKind::Signal | IrKind::Field | IrKind::Event) {
            return None;
        }
        let slot = self.builder.reserve_slot(ty.clone());
        self.forward.insert((from, port.to_string()), slot);
        self.forward_slots.push(ForwardSlot {
            slot,
            block: from,
            port: port.to_string(),
        });
        trace!(block = %env.normalized.block(from).id, port, %slot, "forward slot");
        self.builder.read_slot(slot)
    }
}

// ── Shared with bus lowering and link ───────────────────────────────────────

/// A default-source constant typed for a compile-time view of `ty`.
pub(crate) fn default_const(constant: crate::id::ConstId, ty: &TypeDesc) -> ValueRef {
    ValueRef::Const {
        id: constant,
        ty: ty.with_world(World::Scalar),
    }
}

/// Apply the edge's transform chain, then coerce to `ty`. Unsupported
/// transforms are reported; representation mismatches drop the writer.
pub(crate) fn finish_term(
    value: ValueRef,
    edge: Option<&Edge>,
    ty: &TypeDesc,
    registries: &Registries,
    builder: &mut IrBuilder,
    diagnostics: &mut Vec<Diagnostic>,
) -> Option<ValueRef> {
    let value = match edge {
        Some(edge) if edge.has_transforms() => match apply_chain(value, edge, registries, builder) {
            Ok(v) => v,
            Err(e) => {
                diagnostics.push(
                    Diagnostic::error(
                        e.code(),
                        Locator::edge(&edge.id),
                        format!("{} on edge '{}'", e, edge.id),
                    )
                    .with_hint("remove the step or use an IR-compilable equivalent"),
                );
                return None;
            }
        },
        _ => value,
    };
    let coerced = builder.coerce(&value, ty);
    if coerced.is_none() {
        warn!(
            edge = edge.map(|e| e.id.as_str()).unwrap_or("<default>"),
            kind = value.kind_name(),
            target = %ty,
            "writer dropped: no IR coercion"
        );
    }
    coerced
}

/// Validate an input's combine policy against its type and writer count.
/// Returns E0506 for a mode the port's world and domain do not allow, and
/// E0507 for more than one writer under mode `error`.
pub(crate) fn check_combine_policy(
    ty: &TypeDesc,
    policy: &CombinePolicy,
    writers: &[Writer],
    locator: Locator,
) -> Option<Diagnostic> {
    if !combine_mode_allowed(ty, policy.mode) {
        return Some(Diagnostic::error(
            codes::E0506,
            locator,
            format!("combine mode '{}' is not valid for {}", policy.mode, ty),
        ));
    }
    if policy.mode == CombineMode::Error && writers.len() > 1 {
        return Some(multiple_writers(locator, writers));
    }
    None
}

pub(crate) fn multiple_writers(locator: Locator, writers: &[Writer]) -> Diagnostic {
    let ids: Vec<&str> = writers.iter().map(Writer::identifier).collect();
    let mut d = Diagnostic::error(
        codes::E0507,
        locator,
        format!(
            "combine mode 'error' allows one writer, found {}: {}",
            writers.len(),
            ids.join(", ")
        ),
    );
    for w in writers {
        if let Writer::Wire { edge_id, .. } | Writer::Bus { edge_id, .. } = w {
            d = d.with_related(Locator::edge(edge_id), "writer");
        }
    }
    d
}
