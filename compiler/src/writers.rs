// writers.rs — Writer enumeration and canonical writer order
//
// A writer is anything that contributes a value to an input: a wire from
// another block's output, a bus listened to through an edge, or the
// synthesized default source. Writers are totally ordered by kind
// (wire < bus < default) and then lexicographically by identifier, so the
// order never depends on how the patch arrays were laid out.

use std::cmp::Ordering;

use crate::id::{BlockIndex, BusIndex, ConstId};
use crate::normalize::NormalizedPatch;
use crate::patch::Endpoint;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Writer {
    Wire {
        edge_id: String,
        /// Position in `NormalizedPatch::edges`.
        edge: usize,
        from: BlockIndex,
        port: String,
    },
    Bus {
        edge_id: String,
        edge: usize,
        bus: BusIndex,
    },
    Default {
        /// `"<blockId>.<port>:default"`.
        source_id: String,
        constant: ConstId,
    },
}

impl Writer {
    pub fn rank(&self) -> u8 {
        match self {
            Writer::Wire { .. } => 0,
            Writer::Bus { .. } => 1,
            Writer::Default { .. } => 2,
        }
    }

    pub fn identifier(&self) -> &str {
        match self {
            Writer::Wire { edge_id, .. } | Writer::Bus { edge_id, .. } => edge_id,
            Writer::Default { source_id, .. } => source_id,
        }
    }

    pub fn edge(&self) -> Option<usize> {
        match self {
            Writer::Wire { edge, .. } | Writer::Bus { edge, .. } => Some(*edge),
            Writer::Default { .. } => None,
        }
    }
}

impl Ord for Writer {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.rank(), self.identifier()).cmp(&(other.rank(), other.identifier()))
    }
}

impl PartialOrd for Writer {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// All writers of input `port` on `block`, in canonical order.
///
/// Edges whose source does not resolve are skipped; the dependency graph
/// has already reported them.
pub fn enumerate_writers(normalized: &NormalizedPatch, block: BlockIndex, port: &str) -> Vec<Writer> {
    let block_id = &normalized.block(block).id;
    let mut writers: Vec<Writer> = normalized
        .edges_into_port(block_id, port)
        .filter_map(|(i, edge)| match &edge.from {
            Endpoint::Port { block, port } => Some(Writer::Wire {
                edge_id: edge.id.clone(),
                edge: i,
                from: normalized.block_index(block)?,
                port: port.clone(),
            }),
            Endpoint::Bus { bus } => Some(Writer::Bus {
                edge_id: edge.id.clone(),
                edge: i,
                bus: normalized.bus_index(bus)?,
            }),
        })
        .collect();
    if let Some(default) = normalized.default_source(block, port) {
        writers.push(Writer::Default {
            source_id: default.id.clone(),
            constant: default.constant,
        });
    }
    writers.sort();
    writers
}
