// type_graph.rs — Stage 2: resolve port/bus types and check every edge
//
// Parses each declared port type and each bus type into a `TypeDesc`,
// validates bus eligibility and reserved bus names, then checks every edge
// whose endpoints resolve: the adapter chain's type effect is applied first,
// then the promotion/broadcast rules from `types::conversion`.
//
// Preconditions: `NormalizedPatch` from stage 1.
// Postconditions: every resolvable edge carries its `Conversion`.
// Failure modes: E0100–E0105, collected for the whole patch.
// Side effects: none.

use crate::diag::{codes, Diagnostic, Locator};
use crate::id::{BlockIndex, BusIndex};
use crate::normalize::NormalizedPatch;
use crate::patch::{Edge, Endpoint};
use crate::registry::{BlockDecl, Registries};
use crate::types::{conversion, reserved_bus_type, Conversion, TypeDesc};

/// Resolved port types of one block, in declaration order.
#[derive(Debug, Clone, PartialEq)]
pub struct PortTypes {
    pub inputs: Vec<(String, Option<TypeDesc>)>,
    pub outputs: Vec<(String, Option<TypeDesc>)>,
}

impl PortTypes {
    pub fn input(&self, port: &str) -> Option<&TypeDesc> {
        self.inputs
            .iter()
            .find(|(id, _)| id == port)
            .and_then(|(_, t)| t.as_ref())
    }

    pub fn output(&self, port: &str) -> Option<&TypeDesc> {
        self.outputs
            .iter()
            .find(|(id, _)| id == port)
            .and_then(|(_, t)| t.as_ref())
    }
}

/// Type information attached to one enabled edge.
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeTyping {
    pub from: TypeDesc,
    /// Source type after the adapter chain's declared effect.
    pub adapted: TypeDesc,
    pub to: TypeDesc,
    pub conversion: Conversion,
}

#[derive(Debug, Clone)]
pub struct TypedPatch {
    /// Indexed by `BlockIndex`; `None` for unknown block types.
    pub blocks: Vec<Option<PortTypes>>,
    /// Indexed by `BusIndex`; `None` when the type string failed to parse.
    pub buses: Vec<Option<TypeDesc>>,
    /// Aligned with `NormalizedPatch::edges`; `None` when deferred or invalid.
    pub edges: Vec<Option<EdgeTyping>>,
}

impl TypedPatch {
    pub fn ports(&self, block: BlockIndex) -> Option<&PortTypes> {
        self.blocks.get(block.index()).and_then(|p| p.as_ref())
    }

    pub fn input_type(&self, block: BlockIndex, port: &str) -> Option<&TypeDesc> {
        self.ports(block).and_then(|p| p.input(port))
    }

    pub fn output_type(&self, block: BlockIndex, port: &str) -> Option<&TypeDesc> {
        self.ports(block).and_then(|p| p.output(port))
    }

    pub fn bus_type(&self, bus: BusIndex) -> Option<&TypeDesc> {
        self.buses.get(bus.index()).and_then(|t| t.as_ref())
    }
}

pub struct TypeGraphResult {
    pub typed: TypedPatch,
    pub diagnostics: Vec<Diagnostic>,
}

pub fn build_type_graph(normalized: &NormalizedPatch, registries: &Registries) -> TypeGraphResult {
    let mut diagnostics = Vec::new();

    // ── Block ports ──
    let mut blocks = Vec::with_capacity(normalized.block_count());
    for block in &normalized.blocks {
        match registries.blocks.decl(&block.type_name) {
            None => {
                diagnostics.push(
                    Diagnostic::error(
                        codes::E0104,
                        Locator::block(&block.id),
                        format!("unknown block type '{}'", block.type_name),
                    )
                    .with_hint("register the block type or load its manifest with --registry"),
                );
                blocks.push(None);
            }
            Some(decl) => blocks.push(Some(port_types(&block.id, decl, &mut diagnostics))),
        }
    }

    // ── Buses ──
    let mut buses = Vec::with_capacity(normalized.bus_count());
    for bus in &normalized.buses {
        let ty = match TypeDesc::parse(&bus.type_str) {
            Ok(ty) => ty,
            Err(e) => {
                diagnostics.push(Diagnostic::error(
                    codes::E0100,
                    Locator::bus(&bus.id),
                    e.message,
                ));
                buses.push(None);
                continue;
            }
        };
        if !ty.bus_eligible {
            diagnostics.push(
                Diagnostic::error(
                    codes::E0101,
                    Locator::bus(&bus.id),
                    format!("type {} cannot be carried on a bus", ty),
                )
                .with_hint("buses carry signals, events, or fields of float/int/boolean/color"),
            );
        }
        if let Some(required) = reserved_bus_type(&bus.id) {
            if !ty.same_shape(&required) {
                diagnostics.push(Diagnostic::error(
                    codes::E0102,
                    Locator::bus(&bus.id),
                    format!(
                        "reserved bus '{}' must have type {}, found {}",
                        bus.id, required, ty
                    ),
                ));
            }
        }
        buses.push(Some(ty));
    }

    let mut typed = TypedPatch {
        blocks,
        buses,
        edges: Vec::with_capacity(normalized.edges.len()),
    };

    // ── Edges ──
    for edge in &normalized.edges {
        let typing = check_edge(edge, normalized, &typed, registries, &mut diagnostics);
        typed.edges.push(typing);
    }

    TypeGraphResult { typed, diagnostics }
}

fn port_types(block_id: &str, decl: &BlockDecl, diagnostics: &mut Vec<Diagnostic>) -> PortTypes {
    let mut parse = |port: &str, type_str: &str| match TypeDesc::parse(type_str) {
        Ok(ty) => Some(ty),
        Err(e) => {
            diagnostics.push(Diagnostic::error(
                codes::E0100,
                Locator::port(block_id, port),
                e.message,
            ));
            None
        }
    };
    let inputs = decl
        .inputs
        .iter()
        .map(|i| (i.id.clone(), parse(&i.id, &i.type_str)))
        .collect();
    let outputs = decl
        .outputs
        .iter()
        .map(|o| (o.id.clone(), parse(&o.id, &o.type_str)))
        .collect();
    PortTypes { inputs, outputs }
}

fn endpoint_type<'a>(
    endpoint: &Endpoint,
    output_side: bool,
    normalized: &NormalizedPatch,
    typed: &'a TypedPatch,
) -> Option<&'a TypeDesc> {
    match endpoint {
        Endpoint::Port { block, port } => {
            let ix = normalized.block_index(block)?;
            if output_side {
                typed.output_type(ix, port)
            } else {
                typed.input_type(ix, port)
            }
        }
        Endpoint::Bus { bus } => typed.bus_type(normalized.bus_index(bus)?),
    }
}

fn check_edge(
    edge: &Edge,
    normalized: &NormalizedPatch,
    typed: &TypedPatch,
    registries: &Registries,
    diagnostics: &mut Vec<Diagnostic>,
) -> Option<EdgeTyping> {
    // Bus-to-bus edges are rejected by the dependency graph.
    if matches!((&edge.from, &edge.to), (Endpoint::Bus { .. }, Endpoint::Bus { .. })) {
        return None;
    }
    let from = endpoint_type(&edge.from, true, normalized, typed)?;
    let to = endpoint_type(&edge.to, false, normalized, typed)?;

    let mut adapted = from.clone();
    let mut known = true;
    for step in &edge.adapters {
        match registries.transforms.adapter(&step.id) {
            Some(entry) => adapted = entry.decl.effect.apply(&adapted),
            None => {
                known = false;
                diagnostics.push(Diagnostic::error(
                    codes::E0105,
                    Locator::edge(&edge.id),
                    format!("unknown adapter '{}'", step.id),
                ));
            }
        }
    }
    for step in &edge.lenses {
        if registries.transforms.lens(&step.id).is_none() {
            known = false;
            diagnostics.push(Diagnostic::error(
                codes::E0105,
                Locator::edge(&edge.id),
                format!("unknown lens '{}'", step.id),
            ));
        }
    }
    if !known {
        return None;
    }

    match conversion(&adapted, to) {
        Some(conversion) => Some(EdgeTyping {
            from: from.clone(),
            adapted,
            to: to.clone(),
            conversion,
        }),
        None => {
            let mut d = Diagnostic::error(
                codes::E0103,
                Locator::edge(&edge.id),
                format!(
                    "no conversion path from {} to {} on edge '{}'",
                    adapted, to, edge.id
                ),
            )
            .with_related(endpoint_locator(&edge.from), "source")
            .with_related(endpoint_locator(&edge.to), "target");
            if adapted != *from {
                d = d.with_cause(format!("adapters turn {} into {}", from, adapted), None);
            }
            diagnostics.push(d);
            None
        }
    }
}

fn endpoint_locator(endpoint: &Endpoint) -> Locator {
    match endpoint {
        Endpoint::Port { block, port } => Locator::port(block, port),
        Endpoint::Bus { bus } => Locator::bus(bus),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::normalize;
    use crate::patch::{Block, Bus, Patch, TransformStep};

    fn run(patch: &Patch) -> TypeGraphResult {
        let regs = Registries::builtin();
        let n = normalize(patch, &regs).normalized;
        build_type_graph(&n, &regs)
    }

    fn codes_of(r: &TypeGraphResult) -> Vec<&'static str> {
        r.diagnostics.iter().filter_map(|d| d.code.map(|c| c.0)).collect()
    }

    #[test]
    fn vec2_to_float_has_no_conversion_path() {
        let p = Patch::new()
            .block(Block::new("p", "ConstVec2"))
            .block(Block::new("s", "Sin"))
            .edge(Edge::wire("e7", ("p", "out"), ("s", "in")));
        let r = run(&p);
        assert_eq!(codes_of(&r), vec!["E0103"]);
        assert_eq!(r.diagnostics[0].locator, Locator::edge("e7"));
        assert!(r.diagnostics[0].message.contains("e7"));
    }

    #[test]
    fn signal_to_field_broadcasts() {
        let p = Patch::new()
            .block(Block::new("c", "Const"))
            .block(Block::new("r", "RenderInstances"))
            .edge(Edge::wire("e", ("c", "out"), ("r", "size")));
        let r = run(&p);
        assert!(r.diagnostics.is_empty(), "{:?}", r.diagnostics);
        assert_eq!(r.typed.edges[0].as_ref().unwrap().conversion, Conversion::Broadcast);
    }

    #[test]
    fn adapter_effect_applies_before_check() {
        let p = Patch::new()
            .block(Block::new("t", "CycleTimeRoot"))
            .block(Block::new("s", "Sin"))
            .edge(
                Edge::wire("e", ("t", "phase"), ("s", "in"))
                    .with_adapter(TransformStep::new("phaseToFloat")),
            );
        let r = run(&p);
        assert!(r.diagnostics.is_empty(), "{:?}", r.diagnostics);
        let typing = r.typed.edges[0].as_ref().unwrap();
        assert_eq!(typing.adapted, TypeDesc::signal(crate::types::Domain::Float));
    }

    #[test]
    fn unknown_transform_and_block_type() {
        let p = Patch::new()
            .block(Block::new("a", "Const"))
            .block(Block::new("b", "Sin"))
            .block(Block::new("x", "Nope"))
            .edge(Edge::wire("e", ("a", "out"), ("b", "in")).with_lens(TransformStep::new("warp")));
        let r = run(&p);
        assert_eq!(codes_of(&r), vec!["E0104", "E0105"]);
    }

    #[test]
    fn bus_rules_are_batched() {
        let p = Patch::new()
            .bus(Bus::new("k", "Scalar<float>"))
            .bus(Bus::new("phaseA", "Signal<float>"))
            .bus(Bus::new("q", "Signal<quux>"));
        let r = run(&p);
        assert_eq!(codes_of(&r), vec!["E0101", "E0102", "E0100"]);
    }

    #[test]
    fn unresolved_edges_are_deferred() {
        let p = Patch::new()
            .block(Block::new("a", "Const"))
            .edge(Edge::wire("e", ("a", "out"), ("ghost", "in")));
        let r = run(&p);
        assert!(r.diagnostics.is_empty());
        assert_eq!(r.typed.edges, vec![None]);
    }
}
