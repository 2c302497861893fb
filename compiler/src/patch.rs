// patch.rs — Input patch model
//
// The raw graph handed to the compiler by an editor: blocks, edges, buses
// (broadcast channels), and settings. Deserialized from camelCase JSON.
// Immutable once compilation begins; every stage reads it by reference.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

// ── Values ──────────────────────────────────────────────────────────────────

/// A literal value: block parameter, input default, or bus default.
///
/// Vectors and colors are component arrays; the consuming port's domain
/// decides how many components are meaningful.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Vector(Vec<f64>),
    Text(String),
}

/// Hashable identity of a `Value`, used for constant-pool deduplication.
/// Floats compare by bit pattern so `-0.0` and `0.0` stay distinct.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ValueKey {
    Bool(bool),
    Int(i64),
    Float(u64),
    Vector(Vec<u64>),
    Text(String),
}

impl Value {
    pub fn key(&self) -> ValueKey {
        match self {
            Value::Bool(b) => ValueKey::Bool(*b),
            Value::Int(i) => ValueKey::Int(*i),
            Value::Float(f) => ValueKey::Float(f.to_bits()),
            Value::Vector(v) => ValueKey::Vector(v.iter().map(|f| f.to_bits()).collect()),
            Value::Text(s) => ValueKey::Text(s.clone()),
        }
    }

    /// Numeric view of scalar values (ints widen to f64).
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Vector(v) => {
                write!(f, "[")?;
                for (i, x) in v.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", x)?;
                }
                write!(f, "]")
            }
            Value::Text(s) => write!(f, "{:?}", s),
        }
    }
}

// ── Blocks ──────────────────────────────────────────────────────────────────

/// A block instance placed in the patch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    pub id: String,
    #[serde(rename = "type")]
    pub type_name: String,
    /// Lowering configuration (e.g. `durationMs` for a time root).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, Value>,
    /// Per-instance input defaults; override the block type's declared defaults.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub defaults: BTreeMap<String, Value>,
}

impl Block {
    pub fn new(id: impl Into<String>, type_name: impl Into<String>) -> Self {
        Block {
            id: id.into(),
            type_name: type_name.into(),
            params: BTreeMap::new(),
            defaults: BTreeMap::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }

    pub fn with_default(mut self, port: impl Into<String>, value: Value) -> Self {
        self.defaults.insert(port.into(), value);
        self
    }
}

// ── Buses ───────────────────────────────────────────────────────────────────

/// A named broadcast channel that blocks publish to and listen from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bus {
    pub id: String,
    #[serde(rename = "type")]
    pub type_str: String,
    #[serde(default)]
    pub combine: CombineMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl Bus {
    pub fn new(id: impl Into<String>, type_str: impl Into<String>) -> Self {
        Bus {
            id: id.into(),
            type_str: type_str.into(),
            combine: CombineMode::Last,
            default: None,
        }
    }

    pub fn with_combine(mut self, mode: CombineMode) -> Self {
        self.combine = mode;
        self
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }
}

// ── Combine policy ──────────────────────────────────────────────────────────

/// Reduction applied when several writers feed one input or bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CombineMode {
    Sum,
    Average,
    Max,
    Min,
    #[default]
    Last,
    Layer,
    Error,
}

impl CombineMode {
    /// Commutative modes produce the same result regardless of writer order.
    pub fn is_commutative(self) -> bool {
        matches!(
            self,
            CombineMode::Sum | CombineMode::Average | CombineMode::Max | CombineMode::Min
        )
    }
}

impl fmt::Display for CombineMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CombineMode::Sum => "sum",
            CombineMode::Average => "average",
            CombineMode::Max => "max",
            CombineMode::Min => "min",
            CombineMode::Last => "last",
            CombineMode::Layer => "layer",
            CombineMode::Error => "error",
        };
        write!(f, "{}", s)
    }
}

/// When a combine node is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CombineWhen {
    /// Only when two or more writers are present.
    #[default]
    Multi,
    /// Whenever at least one writer is present.
    Always,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CombinePolicy {
    #[serde(default)]
    pub when: CombineWhen,
    #[serde(default)]
    pub mode: CombineMode,
}

impl CombinePolicy {
    pub fn multi(mode: CombineMode) -> Self {
        CombinePolicy {
            when: CombineWhen::Multi,
            mode,
        }
    }

    pub fn always(mode: CombineMode) -> Self {
        CombinePolicy {
            when: CombineWhen::Always,
            mode,
        }
    }
}

// ── Edges ───────────────────────────────────────────────────────────────────

/// One end of an edge: a block port or a bus.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Endpoint {
    Port { block: String, port: String },
    Bus { bus: String },
}

impl Endpoint {
    pub fn port(block: impl Into<String>, port: impl Into<String>) -> Self {
        Endpoint::Port {
            block: block.into(),
            port: port.into(),
        }
    }

    pub fn bus(bus: impl Into<String>) -> Self {
        Endpoint::Bus { bus: bus.into() }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Port { block, port } => write!(f, "{}.{}", block, port),
            Endpoint::Bus { bus } => write!(f, "bus:{}", bus),
        }
    }
}

/// One step of an adapter or lens chain attached to an edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformStep {
    pub id: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, Value>,
}

impl TransformStep {
    pub fn new(id: impl Into<String>) -> Self {
        TransformStep {
            id: id.into(),
            params: BTreeMap::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }
}

fn default_enabled() -> bool {
    true
}

/// A directed connection between two endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    pub id: String,
    pub from: Endpoint,
    pub to: Endpoint,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_key: Option<i64>,
    /// Type-changing conversions, applied first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub adapters: Vec<TransformStep>,
    /// Value-shaping transforms, applied after adapters.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub lenses: Vec<TransformStep>,
}

impl Edge {
    pub fn new(id: impl Into<String>, from: Endpoint, to: Endpoint) -> Self {
        Edge {
            id: id.into(),
            from,
            to,
            enabled: true,
            sort_key: None,
            adapters: Vec::new(),
            lenses: Vec::new(),
        }
    }

    /// Block-port to block-port wire.
    pub fn wire(
        id: impl Into<String>,
        from: (&str, &str),
        to: (&str, &str),
    ) -> Self {
        Edge::new(id, Endpoint::port(from.0, from.1), Endpoint::port(to.0, to.1))
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn with_sort_key(mut self, key: i64) -> Self {
        self.sort_key = Some(key);
        self
    }

    pub fn with_adapter(mut self, step: TransformStep) -> Self {
        self.adapters.push(step);
        self
    }

    pub fn with_lens(mut self, step: TransformStep) -> Self {
        self.lenses.push(step);
        self
    }

    pub fn has_transforms(&self) -> bool {
        !self.adapters.is_empty() || !self.lenses.is_empty()
    }
}

// ── Patch ───────────────────────────────────────────────────────────────────

fn default_speed() -> f64 {
    1.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchSettings {
    #[serde(default)]
    pub seed: u64,
    #[serde(default = "default_speed")]
    pub speed: f64,
}

impl Default for PatchSettings {
    fn default() -> Self {
        PatchSettings {
            seed: 0,
            speed: 1.0,
        }
    }
}

/// The root compiler input.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Patch {
    #[serde(default)]
    pub blocks: Vec<Block>,
    #[serde(default)]
    pub edges: Vec<Edge>,
    #[serde(default)]
    pub buses: Vec<Bus>,
    #[serde(default)]
    pub settings: PatchSettings,
}

impl Patch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn block(mut self, block: Block) -> Self {
        self.blocks.push(block);
        self
    }

    pub fn bus(mut self, bus: Bus) -> Self {
        self.buses.push(bus);
        self
    }

    pub fn edge(mut self, edge: Edge) -> Self {
        self.edges.push(edge);
        self
    }

    /// Parse a patch from JSON text.
    pub fn from_json(text: &str) -> Result<Patch, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Compact, key-ordered JSON used for fingerprinting.
    pub fn canonical_json(&self) -> String {
        // Struct fields serialize in declaration order and all maps are
        // BTreeMaps, so the compact encoding is already deterministic.
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_minimal_patch_json() {
        let json = r#"{
            "blocks": [
                { "id": "time", "type": "CycleTimeRoot", "params": { "periodMs": 2000 } },
                { "id": "osc", "type": "Sin" }
            ],
            "edges": [
                { "id": "e1",
                  "from": { "kind": "port", "block": "time", "port": "phase" },
                  "to":   { "kind": "port", "block": "osc",  "port": "in" } }
            ],
            "buses": [ { "id": "energy", "type": "Signal<float>", "combine": "sum" } ]
        }"#;
        let patch = Patch::from_json(json).expect("valid patch json");
        assert_eq!(patch.blocks.len(), 2);
        assert_eq!(patch.blocks[0].params["periodMs"], Value::Int(2000));
        assert!(patch.edges[0].enabled);
        assert_eq!(patch.edges[0].sort_key, None);
        assert_eq!(patch.buses[0].combine, CombineMode::Sum);
        assert_eq!(patch.settings, PatchSettings::default());
    }

    #[test]
    fn value_untagged_variants() {
        let v: Vec<Value> = serde_json::from_str(r#"[true, 3, 2.5, [1.0, 2.0], "loop"]"#).unwrap();
        assert_eq!(
            v,
            vec![
                Value::Bool(true),
                Value::Int(3),
                Value::Float(2.5),
                Value::Vector(vec![1.0, 2.0]),
                Value::Text("loop".into()),
            ]
        );
        assert_eq!(v[1].as_f64(), Some(3.0));
        assert_eq!(v[4].as_str(), Some("loop"));
    }

    #[test]
    fn value_key_distinguishes_signed_zero() {
        assert_ne!(Value::Float(0.0).key(), Value::Float(-0.0).key());
        assert_eq!(Value::Float(1.5).key(), Value::Float(1.5).key());
    }

    #[test]
    fn canonical_json_is_stable() {
        let p = Patch::new()
            .block(Block::new("a", "Const").with_param("value", Value::Float(1.0)))
            .edge(Edge::wire("e", ("a", "out"), ("b", "in")));
        assert_eq!(p.canonical_json(), p.clone().canonical_json());
        let back: Patch = serde_json::from_str(&p.canonical_json()).unwrap();
        assert_eq!(back, p);
    }

    #[test]
    fn commutative_modes() {
        assert!(CombineMode::Sum.is_commutative());
        assert!(CombineMode::Min.is_commutative());
        assert!(!CombineMode::Last.is_commutative());
        assert!(!CombineMode::Layer.is_commutative());
    }
}
