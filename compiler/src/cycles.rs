// cycles.rs — Stage 5: SCC decomposition and cycle legality
//
// Iterative Tarjan over the dependency graph. Roots are visited in node
// index order and successors in ascending order, so the SCC list is a pure
// function of the graph. A component is legal when it is trivial (one node,
// no self-loop) or contains at least one state-boundary block.
//
// Preconditions: dependency graph built without errors.
// Postconditions: `sccs` partitions the node set; `order` lists SCC
//   positions dependency-first.
// Failure modes: one E0400 per illegal SCC (batch, non-throwing).
// Side effects: none.

use serde::Serialize;

use crate::dep_graph::{DepNode, DependencyGraph};
use crate::diag::{codes, Diagnostic, Locator};
use crate::id::{BlockIndex, NodeIx};
use crate::normalize::NormalizedPatch;
use crate::registry::Registries;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Scc {
    /// Member nodes, ascending.
    pub nodes: Vec<NodeIx>,
    pub trivial: bool,
    pub legal: bool,
}

impl Scc {
    pub fn blocks<'a>(&'a self, graph: &'a DependencyGraph) -> impl Iterator<Item = BlockIndex> + 'a {
        self.nodes.iter().filter_map(move |&n| match graph.node(n) {
            DepNode::BlockEval(b) => Some(b),
            DepNode::BusValue(_) => None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedGraph {
    /// In Tarjan completion order (dependents before dependencies).
    pub sccs: Vec<Scc>,
    /// Positions into `sccs`, dependency-first.
    pub order: Vec<usize>,
    /// SCC position of every node.
    pub node_scc: Vec<usize>,
}

impl ValidatedGraph {
    pub fn scc_of(&self, node: NodeIx) -> &Scc {
        &self.sccs[self.node_scc[node.index()]]
    }
}

pub struct CycleResult {
    pub validated: ValidatedGraph,
    pub diagnostics: Vec<Diagnostic>,
}

pub fn validate_cycles(
    graph: &DependencyGraph,
    normalized: &NormalizedPatch,
    registries: &Registries,
) -> CycleResult {
    let components = tarjan(graph);
    let mut diagnostics = Vec::new();
    let mut node_scc = vec![0; graph.node_count()];
    let mut sccs = Vec::with_capacity(components.len());

    for (pos, nodes) in components.into_iter().enumerate() {
        for &n in &nodes {
            node_scc[n.index()] = pos;
        }
        let trivial = nodes.len() == 1 && !graph.has_self_loop(nodes[0]);
        let mut scc = Scc {
            nodes,
            trivial,
            legal: true,
        };
        if !trivial {
            let has_boundary = scc.blocks(graph).any(|b| {
                registries
                    .blocks
                    .decl(&normalized.block(b).type_name)
                    .is_some_and(|d| d.state_boundary)
            });
            if !has_boundary {
                scc.legal = false;
                diagnostics.push(illegal_cycle(&scc, graph, normalized));
            }
        }
        sccs.push(scc);
    }

    let order = (0..sccs.len()).rev().collect();
    CycleResult {
        validated: ValidatedGraph {
            sccs,
            order,
            node_scc,
        },
        diagnostics,
    }
}

fn illegal_cycle(scc: &Scc, graph: &DependencyGraph, normalized: &NormalizedPatch) -> Diagnostic {
    let blocks: Vec<BlockIndex> = scc.blocks(graph).collect();
    let names: Vec<String> = blocks
        .iter()
        .map(|&b| format!("{} '{}'", b, normalized.block(b).id))
        .collect();
    let anchor = blocks
        .first()
        .map(|&b| Locator::block(&normalized.block(b).id))
        .unwrap_or(Locator::Patch);
    let mut d = Diagnostic::error(
        codes::E0400,
        anchor,
        format!(
            "illegal cycle without a state boundary through {}",
            names.join(", ")
        ),
    )
    .with_hint("insert a state-boundary block such as Delay on one of the edges");
    for &b in blocks.iter().skip(1) {
        d = d.with_related(Locator::block(&normalized.block(b).id), "in cycle");
    }
    d
}

/// Iterative Tarjan. Each returned component is sorted ascending; components
/// appear in completion order.
fn tarjan(graph: &DependencyGraph) -> Vec<Vec<NodeIx>> {
    const UNVISITED: usize = usize::MAX;
    let n = graph.node_count();
    let mut index = vec![UNVISITED; n];
    let mut low = vec![0usize; n];
    let mut on_stack = vec![false; n];
    let mut stack: Vec<usize> = Vec::new();
    let mut call: Vec<(usize, usize)> = Vec::new();
    let mut next = 0usize;
    let mut out = Vec::new();

    for root in 0..n {
        if index[root] != UNVISITED {
            continue;
        }
        index[root] = next;
        low[root] = next;
        next += 1;
        stack.push(root);
        on_stack[root] = true;
        call.push((root, 0));

        while let Some(frame) = call.last_mut() {
            let v = frame.0;
            let succ = graph.successors(NodeIx::from_index(v));
            if let Some(&w) = succ.get(frame.1) {
                frame.1 += 1;
                let w = w.index();
                if index[w] == UNVISITED {
                    index[w] = next;
                    low[w] = next;
                    next += 1;
                    stack.push(w);
                    on_stack[w] = true;
                    call.push((w, 0));
                } else if on_stack[w] {
                    low[v] = low[v].min(index[w]);
                }
                continue;
            }

            call.pop();
            if let Some(&(parent, _)) = call.last() {
                low[parent] = low[parent].min(low[v]);
            }
            if low[v] == index[v] {
                let mut component = Vec::new();
                while let Some(w) = stack.pop() {
                    on_stack[w] = false;
                    component.push(NodeIx::from_index(w));
                    if w == v {
                        break;
                    }
                }
                component.sort();
                out.push(component);
            }
        }
    }
    out
}
