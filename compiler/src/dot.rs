// dot.rs — Graphviz DOT output for patch dependency graphs
//
// Renders the dependency graph with blocks as boxes and buses as ellipses.
// Each non-trivial SCC becomes a cluster; illegal ones are drawn in red.
//
// Preconditions: `graph` and `validated` come from the same normalized patch.
// Postconditions: returns a valid DOT string; node and edge order follow
//   the graph's dense indices, so output is deterministic.
// Failure modes: none (pure string formatting).
// Side effects: none.

use std::fmt::{self, Write};

use crate::cycles::ValidatedGraph;
use crate::dep_graph::{DepEdgeKind, DepNode, DependencyGraph};
use crate::id::NodeIx;
use crate::normalize::NormalizedPatch;

/// Emit the dependency graph as a Graphviz DOT string.
pub fn emit_dot(
    graph: &DependencyGraph,
    validated: &ValidatedGraph,
    normalized: &NormalizedPatch,
) -> String {
    let mut buf = String::new();
    // Writing into a String cannot fail.
    let _ = write_dot(&mut buf, graph, validated, normalized);
    buf
}

fn write_dot(
    buf: &mut String,
    graph: &DependencyGraph,
    validated: &ValidatedGraph,
    normalized: &NormalizedPatch,
) -> fmt::Result {
    writeln!(buf, "digraph patch {{")?;
    writeln!(buf, "    rankdir=LR;")?;
    writeln!(buf, "    node [fontname=\"Helvetica\", fontsize=10];")?;
    writeln!(buf, "    edge [fontname=\"Helvetica\", fontsize=9];")?;

    let mut clustered = vec![false; graph.node_count()];
    for (i, scc) in validated.sccs.iter().enumerate() {
        if scc.trivial {
            continue;
        }
        let color = if scc.legal { "gray50" } else { "red" };
        writeln!(buf)?;
        writeln!(buf, "    subgraph cluster_scc{i} {{")?;
        writeln!(
            buf,
            "        label=\"{}\";",
            if scc.legal { "cycle" } else { "illegal cycle" }
        )?;
        writeln!(buf, "        style=rounded;")?;
        writeln!(buf, "        color={color};")?;
        for &n in &scc.nodes {
            clustered[n.index()] = true;
            write_node(buf, graph, normalized, n, "        ")?;
        }
        writeln!(buf, "    }}")?;
    }

    writeln!(buf)?;
    for ix in 0..graph.node_count() {
        if !clustered[ix] {
            write_node(buf, graph, normalized, NodeIx::from_index(ix), "    ")?;
        }
    }

    writeln!(buf)?;
    for e in &graph.edges {
        let style = match e.kind {
            DepEdgeKind::Wire => "solid",
            DepEdgeKind::Publish | DepEdgeKind::Listen => "dashed",
        };
        let same_scc = validated.node_scc[e.from.index()] == validated.node_scc[e.to.index()];
        let color = if same_scc && !validated.scc_of(e.from).legal {
            ", color=red, penwidth=2"
        } else {
            ""
        };
        writeln!(
            buf,
            "    n{} -> n{} [label=\"{}\", style={style}{color}];",
            e.from.index(),
            e.to.index(),
            escape(&e.edge_id),
        )?;
    }

    writeln!(buf, "}}")
}

fn write_node(
    buf: &mut String,
    graph: &DependencyGraph,
    normalized: &NormalizedPatch,
    n: NodeIx,
    indent: &str,
) -> fmt::Result {
    match graph.node(n) {
        DepNode::BlockEval(b) => {
            let block = normalized.block(b);
            writeln!(
                buf,
                "{indent}n{} [label=\"{}\\n{}\", shape=box];",
                n.index(),
                escape(&block.id),
                escape(&block.type_name),
            )
        }
        DepNode::BusValue(b) => writeln!(
            buf,
            "{indent}n{} [label=\"{}\", shape=ellipse, style=dashed];",
            n.index(),
            escape(&normalized.bus(b).id),
        ),
    }
}

/// Escape a label for a double-quoted DOT string.
fn escape(label: &str) -> String {
    label.replace('\\', "\\\\").replace('"', "\\\"")
}
