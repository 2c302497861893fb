// normalize.rs — Stage 1: canonical indices, edge order, default sources
//
// Assigns dense `BlockIndex`/`BusIndex` values from lexicographically sorted
// identities, keeps only enabled edges in canonical order, and synthesizes a
// default-source attachment for every unconnected input that has a default.
// Default values are interned into a `ConstPool` that is later moved into
// the `IrBuilder`.
//
// Preconditions: none; blocks of unknown type are carried through untouched.
// Postconditions: indices are a bijection onto 0..N; `canonical_patch()`
//   normalizes to identical indices and edge order.
// Failure modes: none (duplicate identities keep their first occurrence).
// Side effects: none.

use std::collections::{HashMap, HashSet};

use tracing::warn;

use crate::id::{BlockIndex, BusIndex, ConstId};
use crate::ir::ConstPool;
use crate::patch::{Block, Bus, Edge, Endpoint, Patch, PatchSettings, Value};
use crate::registry::Registries;

/// A synthesized writer for an unconnected input with a default value.
#[derive(Debug, Clone, PartialEq)]
pub struct DefaultSource {
    /// `"<blockId>.<port>:default"`, the writer's sort identity.
    pub id: String,
    pub block: BlockIndex,
    pub port: String,
    pub value: Value,
    pub constant: ConstId,
}

#[derive(Debug, Clone)]
pub struct NormalizedPatch {
    pub blocks: Vec<Block>,
    pub buses: Vec<Bus>,
    /// Enabled edges only, ascending `(sortKey or 0, id)`.
    pub edges: Vec<Edge>,
    pub settings: PatchSettings,
    pub defaults: Vec<DefaultSource>,
    block_lookup: HashMap<String, BlockIndex>,
    bus_lookup: HashMap<String, BusIndex>,
    default_lookup: HashMap<(BlockIndex, String), usize>,
}

pub struct NormalizeResult {
    pub normalized: NormalizedPatch,
    pub consts: ConstPool,
}

impl NormalizedPatch {
    pub fn block_index(&self, id: &str) -> Option<BlockIndex> {
        self.block_lookup.get(id).copied()
    }

    pub fn bus_index(&self, id: &str) -> Option<BusIndex> {
        self.bus_lookup.get(id).copied()
    }

    pub fn block(&self, ix: BlockIndex) -> &Block {
        &self.blocks[ix.index()]
    }

    pub fn bus(&self, ix: BusIndex) -> &Bus {
        &self.buses[ix.index()]
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn bus_count(&self) -> usize {
        self.buses.len()
    }

    pub fn block_indices(&self) -> impl Iterator<Item = BlockIndex> {
        (0..self.blocks.len()).map(BlockIndex::from_index)
    }

    pub fn bus_indices(&self) -> impl Iterator<Item = BusIndex> {
        (0..self.buses.len()).map(BusIndex::from_index)
    }

    pub fn default_source(&self, block: BlockIndex, port: &str) -> Option<&DefaultSource> {
        self.default_lookup
            .get(&(block, port.to_string()))
            .map(|&i| &self.defaults[i])
    }

    /// Enabled edges targeting `bus`, in canonical order.
    pub fn edges_into_bus<'a>(&'a self, bus: &'a str) -> impl Iterator<Item = (usize, &'a Edge)> {
        self.edges
            .iter()
            .enumerate()
            .filter(move |(_, e)| matches!(&e.to, Endpoint::Bus { bus: b } if b == bus))
    }

    /// Enabled edges targeting input `port` of block `block`, in canonical order.
    pub fn edges_into_port<'a>(
        &'a self,
        block: &'a str,
        port: &'a str,
    ) -> impl Iterator<Item = (usize, &'a Edge)> {
        self.edges.iter().enumerate().filter(move |(_, e)| {
            matches!(&e.to, Endpoint::Port { block: b, port: p } if b == block && p == port)
        })
    }

    /// The normalized content as a plain patch (sorted, enabled edges only).
    pub fn canonical_patch(&self) -> Patch {
        Patch {
            blocks: self.blocks.clone(),
            edges: self.edges.clone(),
            buses: self.buses.clone(),
            settings: self.settings.clone(),
        }
    }
}

/// Canonical edge order: ascending sort key (absent = 0), ties by id.
pub fn edge_order(a: &Edge, b: &Edge) -> std::cmp::Ordering {
    (a.sort_key.unwrap_or(0), &a.id).cmp(&(b.sort_key.unwrap_or(0), &b.id))
}

pub fn normalize(patch: &Patch, registries: &Registries) -> NormalizeResult {
    // ── Blocks and buses ──
    let mut blocks = patch.blocks.clone();
    blocks.sort_by(|a, b| a.id.cmp(&b.id));
    let before = blocks.len();
    blocks.dedup_by(|later, earlier| later.id == earlier.id);
    if blocks.len() != before {
        warn!(dropped = before - blocks.len(), "duplicate block ids; keeping first occurrence");
    }

    let mut buses = patch.buses.clone();
    buses.sort_by(|a, b| a.id.cmp(&b.id));
    let before = buses.len();
    buses.dedup_by(|later, earlier| later.id == earlier.id);
    if buses.len() != before {
        warn!(dropped = before - buses.len(), "duplicate bus ids; keeping first occurrence");
    }

    let block_lookup: HashMap<String, BlockIndex> = blocks
        .iter()
        .enumerate()
        .map(|(i, b)| (b.id.clone(), BlockIndex::from_index(i)))
        .collect();
    let bus_lookup: HashMap<String, BusIndex> = buses
        .iter()
        .enumerate()
        .map(|(i, b)| (b.id.clone(), BusIndex::from_index(i)))
        .collect();

    // ── Edges ──
    let mut edges: Vec<Edge> = patch.edges.iter().filter(|e| e.enabled).cloned().collect();
    edges.sort_by(edge_order);

    // ── Default sources ──
    let connected: HashSet<(&str, &str)> = edges
        .iter()
        .filter_map(|e| match &e.to {
            Endpoint::Port { block, port } => Some((block.as_str(), port.as_str())),
            Endpoint::Bus { .. } => None,
        })
        .collect();

    let mut consts = ConstPool::new();
    let mut defaults = Vec::new();
    let mut default_lookup = HashMap::new();
    for (i, block) in blocks.iter().enumerate() {
        let Some(decl) = registries.blocks.decl(&block.type_name) else {
            continue;
        };
        for input in &decl.inputs {
            if connected.contains(&(block.id.as_str(), input.id.as_str())) {
                continue;
            }
            let value = match block.defaults.get(&input.id).or(input.default.as_ref()) {
                Some(v) => v.clone(),
                None => continue,
            };
            let ix = BlockIndex::from_index(i);
            let constant = consts.intern(value.clone());
            default_lookup.insert((ix, input.id.clone()), defaults.len());
            defaults.push(DefaultSource {
                id: format!("{}.{}:default", block.id, input.id),
                block: ix,
                port: input.id.clone(),
                value,
                constant,
            });
        }
    }

    NormalizeResult {
        normalized: NormalizedPatch {
            blocks,
            buses,
            edges,
            settings: patch.settings.clone(),
            defaults,
            block_lookup,
            bus_lookup,
            default_lookup,
        },
        consts,
    }
}
