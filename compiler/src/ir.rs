// ir.rs — Intermediate representation handed to the runtime evaluator
//
// Flat arena tables: one vector per expression kind, a constant pool, slot
// metadata, persistent state cells, handle tables, and an evaluation
// schedule. Every cross-reference is a dense id from `id.rs`, so the whole
// program serializes to JSON without indirection.
//
// Preconditions: none (types only).
// Postconditions: an `IrProgram` is only ever produced by `IrBuilder::build`.
// Failure modes: none.
// Side effects: none.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use crate::id::{
    BlockIndex, BusIndex, ConstId, EventExprId, FieldExprId, HandleId, SigExprId, SlotId, StateId,
};
use crate::patch::{CombineMode, Value, ValueKey};
use crate::time_topology::TimeModel;
use crate::types::TypeDesc;

// ── Constant pool ───────────────────────────────────────────────────────────

/// Deduplicating store of literal values.
///
/// Created by the normalizer (for default sources) and then moved into the
/// `IrBuilder`, which keeps interning into it.
#[derive(Debug, Clone, Default)]
pub struct ConstPool {
    values: Vec<Value>,
    lookup: HashMap<ValueKey, ConstId>,
}

impl ConstPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern `value`, returning the id of an equal existing entry if any.
    pub fn intern(&mut self, value: Value) -> ConstId {
        let key = value.key();
        if let Some(&id) = self.lookup.get(&key) {
            return id;
        }
        let id = ConstId::from_index(self.values.len());
        self.values.push(value);
        self.lookup.insert(key, id);
        id
    }

    pub fn get(&self, id: ConstId) -> Option<&Value> {
        self.values.get(id.index())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}

// ── Operators ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum OpCode {
    Add,
    Sub,
    Mul,
    Div,
    Min,
    Max,
    Sin,
    Cos,
    Abs,
    Neg,
    Fract,
    /// Clamp to `0..=1`.
    Clamp01,
    /// `1 - x`.
    Invert,
}

impl OpCode {
    pub fn is_unary(self) -> bool {
        matches!(
            self,
            OpCode::Sin
                | OpCode::Cos
                | OpCode::Abs
                | OpCode::Neg
                | OpCode::Fract
                | OpCode::Clamp01
                | OpCode::Invert
        )
    }
}

// ── Expressions ─────────────────────────────────────────────────────────────

/// Continuous per-frame expression.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum SigExpr {
    Const { value: ConstId },
    /// Absolute wall time in milliseconds since start.
    TimeAbsMs,
    /// Model time in milliseconds, after applying the time model.
    TimeModelMs,
    /// Normalized cycle phase in `0..1`; cyclic models only.
    Phase01,
    /// Value currently held in a slot (bus value or forward reference).
    SlotRead { slot: SlotId },
    Map { func: OpCode, src: SigExprId },
    Zip { func: OpCode, a: SigExprId, b: SigExprId },
    /// Previous frame's input.
    Delay { state: StateId, input: SigExprId },
    /// Running sum of `input * dt`.
    Integrate { state: StateId, input: SigExprId },
    /// Latches `input` whenever `trigger` fires.
    SampleHold {
        state: StateId,
        input: SigExprId,
        trigger: Option<EventExprId>,
    },
    Combine { mode: CombineMode, terms: Vec<SigExprId> },
}

/// Lazy per-element expression.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum FieldExpr {
    Const { value: ConstId },
    Broadcast { src: SigExprId },
    SlotRead { slot: SlotId },
    Map { func: OpCode, src: FieldExprId },
    Zip { func: OpCode, a: FieldExprId, b: FieldExprId },
    Combine { mode: CombineMode, terms: Vec<FieldExprId> },
}

/// Discrete event stream.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum EventExpr {
    Never,
    /// Fires when a cyclic time model wraps.
    Wrap,
    SlotRead { slot: SlotId },
    /// Fires whenever any term fires.
    Merge { terms: Vec<EventExprId> },
    /// Only the last term's occurrences are visible.
    Override { terms: Vec<EventExprId> },
}

// ── Value references ────────────────────────────────────────────────────────

/// Reference to a non-expression IR artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "handle", rename_all = "camelCase")]
pub enum SpecialRef {
    Domain(HandleId),
    RenderSink(HandleId),
    Camera(HandleId),
}

/// A concrete IR value produced by a block output, bus, or default source.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ValueRef {
    Const { id: ConstId, ty: TypeDesc },
    Sig { expr: SigExprId, slot: SlotId },
    Field { expr: FieldExprId, slot: SlotId },
    Event { expr: EventExprId, slot: SlotId },
    Special { special: SpecialRef },
}

impl ValueRef {
    pub fn slot(&self) -> Option<SlotId> {
        match self {
            ValueRef::Sig { slot, .. } | ValueRef::Field { slot, .. } | ValueRef::Event { slot, .. } => {
                Some(*slot)
            }
            ValueRef::Const { .. } | ValueRef::Special { .. } => None,
        }
    }

    /// Short kind label for diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            ValueRef::Const { .. } => "const",
            ValueRef::Sig { .. } => "signal",
            ValueRef::Field { .. } => "field",
            ValueRef::Event { .. } => "event",
            ValueRef::Special { .. } => "special",
        }
    }
}

// ── Slots, state, handles ───────────────────────────────────────────────────

/// What a slot is filled from at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "expr", rename_all = "camelCase")]
pub enum SlotSource {
    Unbound,
    Sig(SigExprId),
    Field(FieldExprId),
    Event(EventExprId),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotMeta {
    pub id: SlotId,
    pub ty: TypeDesc,
    pub source: SlotSource,
}

/// Persistent cell owned by a state-boundary block.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateCell {
    pub id: StateId,
    pub owner: BlockIndex,
    pub init: ConstId,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum HandleKind {
    ElementDomain { count: u32 },
    RenderSink,
    Camera,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Handle {
    pub id: HandleId,
    pub owner: BlockIndex,
    #[serde(flatten)]
    pub kind: HandleKind,
}

/// A render sink or camera registration and the values it consumes.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SinkEntry {
    pub handle: HandleId,
    pub block: BlockIndex,
    pub inputs: BTreeMap<String, ValueRef>,
}

/// One step of the runtime evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "step", rename_all = "camelCase")]
pub enum ScheduleStep {
    BlockEval { block: BlockIndex },
    BusCombine { bus: BusIndex },
}

// ── Program ─────────────────────────────────────────────────────────────────

/// The immutable artifact consumed by the runtime.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IrProgram {
    pub time_model: Option<TimeModel>,
    pub consts: Vec<Value>,
    pub signals: Vec<SigExpr>,
    pub fields: Vec<FieldExpr>,
    pub events: Vec<EventExpr>,
    pub slots: Vec<SlotMeta>,
    pub states: Vec<StateCell>,
    pub handles: Vec<Handle>,
    pub render_sinks: Vec<SinkEntry>,
    pub cameras: Vec<SinkEntry>,
    pub schedule: Vec<ScheduleStep>,
}

impl IrProgram {
    pub fn slot(&self, id: SlotId) -> Option<&SlotMeta> {
        self.slots.get(id.index())
    }

    /// One-line size summary, used by `--verbose` and snapshot tests.
    pub fn summary(&self) -> String {
        format!(
            "consts={} signals={} fields={} events={} slots={} states={} handles={} sinks={} cameras={} steps={}",
            self.consts.len(),
            self.signals.len(),
            self.fields.len(),
            self.events.len(),
            self.slots.len(),
            self.states.len(),
            self.handles.len(),
            self.render_sinks.len(),
            self.cameras.len(),
            self.schedule.len(),
        )
    }
}
