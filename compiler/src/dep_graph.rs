// dep_graph.rs — Stage 4: block/bus dependency graph
//
// One `BlockEval` node per block and one `BusValue` node per bus, blocks
// first. Each enabled edge becomes a `Wire` (block→block), `Publish`
// (block→bus), or `Listen` (bus→block) edge that remembers the patch edge
// it came from. Successor lists are sorted and deduplicated so every
// traversal over the graph is deterministic.
//
// Preconditions: type graph and time topology passed.
// Postconditions: every graph edge joins two existing nodes.
// Failure modes: E0300 (missing block or port), E0301 (missing bus, bus→bus).
// Side effects: none.

use serde::Serialize;

use crate::diag::{codes, Diagnostic, Locator};
use crate::id::{BlockIndex, BusIndex, NodeIx};
use crate::normalize::NormalizedPatch;
use crate::patch::{Edge, Endpoint};
use crate::registry::Registries;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", content = "index", rename_all = "camelCase")]
pub enum DepNode {
    BlockEval(BlockIndex),
    BusValue(BusIndex),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum DepEdgeKind {
    Wire,
    Publish,
    Listen,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DepEdge {
    pub from: NodeIx,
    pub to: NodeIx,
    pub kind: DepEdgeKind,
    /// Position in `NormalizedPatch::edges`.
    pub edge: usize,
    pub edge_id: String,
}

#[derive(Debug, Clone)]
pub struct DependencyGraph {
    pub nodes: Vec<DepNode>,
    pub edges: Vec<DepEdge>,
    succ: Vec<Vec<NodeIx>>,
    block_count: usize,
}

impl DependencyGraph {
    pub fn block_node(&self, block: BlockIndex) -> NodeIx {
        NodeIx::from_index(block.index())
    }

    pub fn bus_node(&self, bus: BusIndex) -> NodeIx {
        NodeIx::from_index(self.block_count + bus.index())
    }

    pub fn node(&self, ix: NodeIx) -> DepNode {
        self.nodes[ix.index()]
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Sorted, deduplicated successors of `ix`.
    pub fn successors(&self, ix: NodeIx) -> &[NodeIx] {
        &self.succ[ix.index()]
    }

    pub fn has_self_loop(&self, ix: NodeIx) -> bool {
        self.successors(ix).binary_search(&ix).is_ok()
    }
}

pub struct DepGraphResult {
    pub graph: DependencyGraph,
    pub diagnostics: Vec<Diagnostic>,
}

pub fn build_dep_graph(normalized: &NormalizedPatch, registries: &Registries) -> DepGraphResult {
    let block_count = normalized.block_count();
    let nodes: Vec<DepNode> = normalized
        .block_indices()
        .map(DepNode::BlockEval)
        .chain(normalized.bus_indices().map(DepNode::BusValue))
        .collect();
    let mut graph = DependencyGraph {
        succ: vec![Vec::new(); nodes.len()],
        nodes,
        edges: Vec::new(),
        block_count,
    };
    let mut diagnostics = Vec::new();

    for (i, edge) in normalized.edges.iter().enumerate() {
        if let (Endpoint::Bus { .. }, Endpoint::Bus { .. }) = (&edge.from, &edge.to) {
            diagnostics.push(
                Diagnostic::error(
                    codes::E0301,
                    Locator::edge(&edge.id),
                    format!("edge '{}' binds a bus directly to a bus", edge.id),
                )
                .with_hint("route the value through a block"),
            );
            continue;
        }
        let from = resolve(edge, &edge.from, true, normalized, registries, &graph, &mut diagnostics);
        let to = resolve(edge, &edge.to, false, normalized, registries, &graph, &mut diagnostics);
        let (Some(from), Some(to)) = (from, to) else {
            continue;
        };
        let kind = match (&edge.from, &edge.to) {
            (Endpoint::Port { .. }, Endpoint::Port { .. }) => DepEdgeKind::Wire,
            (Endpoint::Port { .. }, Endpoint::Bus { .. }) => DepEdgeKind::Publish,
            _ => DepEdgeKind::Listen,
        };
        graph.edges.push(DepEdge {
            from,
            to,
            kind,
            edge: i,
            edge_id: edge.id.clone(),
        });
        graph.succ[from.index()].push(to);
    }

    for list in &mut graph.succ {
        list.sort();
        list.dedup();
    }

    DepGraphResult { graph, diagnostics }
}

fn resolve(
    edge: &Edge,
    endpoint: &Endpoint,
    output_side: bool,
    normalized: &NormalizedPatch,
    registries: &Registries,
    graph: &DependencyGraph,
    diagnostics: &mut Vec<Diagnostic>,
) -> Option<NodeIx> {
    match endpoint {
        Endpoint::Port { block, port } => {
            let Some(ix) = normalized.block_index(block) else {
                diagnostics.push(
                    Diagnostic::error(
                        codes::E0300,
                        Locator::edge(&edge.id),
                        format!("edge '{}' references missing block '{}'", edge.id, block),
                    )
                    .with_related(Locator::block(block), "missing block"),
                );
                return None;
            };
            if let Some(decl) = registries.blocks.decl(&normalized.block(ix).type_name) {
                let found = if output_side {
                    decl.output_index(port).is_some()
                } else {
                    decl.input_index(port).is_some()
                };
                if !found {
                    let direction = if output_side { "output" } else { "input" };
                    diagnostics.push(
                        Diagnostic::error(
                            codes::E0300,
                            Locator::edge(&edge.id),
                            format!(
                                "edge '{}' references missing {} port '{}.{}'",
                                edge.id, direction, block, port
                            ),
                        )
                        .with_related(Locator::port(block, port), "missing port"),
                    );
                    return None;
                }
            }
            Some(graph.block_node(ix))
        }
        Endpoint::Bus { bus } => match normalized.bus_index(bus) {
            Some(ix) => Some(graph.bus_node(ix)),
            None => {
                diagnostics.push(
                    Diagnostic::error(
                        codes::E0301,
                        Locator::edge(&edge.id),
                        format!("edge '{}' references missing bus '{}'", edge.id, bus),
                    )
                    .with_related(Locator::bus(bus), "missing bus"),
                );
                None
            }
        },
    }
}
