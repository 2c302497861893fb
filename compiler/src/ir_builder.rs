// ir_builder.rs — Arena builder for IrProgram
//
// The single mutable construction context for stages 6–8. Owned vectors per
// expression kind; newly issued dense ids are the only handles. `build`
// consumes the builder, so nothing can be appended after the program exists.
//
// Preconditions: constructed with the normalizer's constant pool.
// Postconditions: `build` returns every table in issue order.
// Failure modes: none; ids issued here are always in bounds.
// Side effects: none.

use std::collections::BTreeMap;

use crate::id::{
    BlockIndex, ConstId, EventExprId, FieldExprId, HandleId, SigExprId, SlotId, StateId,
};
use crate::ir::{
    ConstPool, EventExpr, FieldExpr, Handle, HandleKind, IrProgram, ScheduleStep, SigExpr,
    SinkEntry, SlotMeta, SlotSource, StateCell, ValueRef,
};
use crate::patch::Value;
use crate::time_topology::TimeModel;
use crate::types::{IrKind, TypeDesc};

pub struct IrBuilder {
    consts: ConstPool,
    signals: Vec<SigExpr>,
    fields: Vec<FieldExpr>,
    events: Vec<EventExpr>,
    slots: Vec<SlotMeta>,
    states: Vec<StateCell>,
    handles: Vec<Handle>,
    render_sinks: Vec<SinkEntry>,
    cameras: Vec<SinkEntry>,
    schedule: Vec<ScheduleStep>,
    time_model: Option<TimeModel>,
}

impl IrBuilder {
    pub fn new(consts: ConstPool) -> Self {
        IrBuilder {
            consts,
            signals: Vec::new(),
            fields: Vec::new(),
            events: Vec::new(),
            slots: Vec::new(),
            states: Vec::new(),
            handles: Vec::new(),
            render_sinks: Vec::new(),
            cameras: Vec::new(),
            schedule: Vec::new(),
            time_model: None,
        }
    }

    pub fn set_time_model(&mut self, model: TimeModel) {
        self.time_model = Some(model);
    }

    pub fn time_model(&self) -> Option<&TimeModel> {
        self.time_model.as_ref()
    }

    // ── Constants ──

    pub fn intern(&mut self, value: Value) -> ConstId {
        self.consts.intern(value)
    }

    pub fn const_value(&self, id: ConstId) -> Option<&Value> {
        self.consts.get(id)
    }

    pub fn const_ref(&mut self, value: Value, ty: TypeDesc) -> ValueRef {
        let id = self.intern(value);
        ValueRef::Const { id, ty }
    }

    // ── Expressions ──

    pub fn sig(&mut self, expr: SigExpr) -> SigExprId {
        let id = SigExprId::from_index(self.signals.len());
        self.signals.push(expr);
        id
    }

    pub fn field(&mut self, expr: FieldExpr) -> FieldExprId {
        let id = FieldExprId::from_index(self.fields.len());
        self.fields.push(expr);
        id
    }

    pub fn event(&mut self, expr: EventExpr) -> EventExprId {
        let id = EventExprId::from_index(self.events.len());
        self.events.push(expr);
        id
    }

    pub fn sig_expr(&self, id: SigExprId) -> Option<&SigExpr> {
        self.signals.get(id.index())
    }

    pub fn signal_count(&self) -> usize {
        self.signals.len()
    }

    // ── Slots ──

    /// Allocate an unbound slot, to be bound later (bus values, forward refs).
    pub fn reserve_slot(&mut self, ty: TypeDesc) -> SlotId {
        let id = SlotId::from_index(self.slots.len());
        self.slots.push(SlotMeta {
            id,
            ty,
            source: SlotSource::Unbound,
        });
        id
    }

    /// Returns false if `slot` was never issued.
    pub fn bind_slot(&mut self, slot: SlotId, source: SlotSource) -> bool {
        match self.slots.get_mut(slot.index()) {
            Some(meta) => {
                meta.source = source;
                true
            }
            None => false,
        }
    }

    pub fn slot_bound(&self, slot: SlotId) -> bool {
        self.slots
            .get(slot.index())
            .is_some_and(|m| m.source != SlotSource::Unbound)
    }

    pub fn slot_type(&self, slot: SlotId) -> Option<&TypeDesc> {
        self.slots.get(slot.index()).map(|m| &m.ty)
    }

    pub fn sig_value(&mut self, expr: SigExprId, ty: TypeDesc) -> ValueRef {
        let slot = self.reserve_slot(ty);
        self.bind_slot(slot, SlotSource::Sig(expr));
        ValueRef::Sig { expr, slot }
    }

    pub fn field_value(&mut self, expr: FieldExprId, ty: TypeDesc) -> ValueRef {
        let slot = self.reserve_slot(ty);
        self.bind_slot(slot, SlotSource::Field(expr));
        ValueRef::Field { expr, slot }
    }

    pub fn event_value(&mut self, expr: EventExprId, ty: TypeDesc) -> ValueRef {
        let slot = self.reserve_slot(ty);
        self.bind_slot(slot, SlotSource::Event(expr));
        ValueRef::Event { expr, slot }
    }

    /// A value that reads whatever ends up bound to `slot`.
    pub fn read_slot(&mut self, slot: SlotId) -> Option<ValueRef> {
        let kind = self.slot_type(slot)?.ir_kind();
        match kind {
            IrKind::Signal => {
                let expr = self.sig(SigExpr::SlotRead { slot });
                Some(ValueRef::Sig { expr, slot })
            }
            IrKind::Field => {
                let expr = self.field(FieldExpr::SlotRead { slot });
                Some(ValueRef::Field { expr, slot })
            }
            IrKind::Event => {
                let expr = self.event(EventExpr::SlotRead { slot });
                Some(ValueRef::Event { expr, slot })
            }
            IrKind::Const | IrKind::Handle | IrKind::None => None,
        }
    }

    /// Declared type of a value: the slot type, or the constant's own type.
    pub fn type_of(&self, value: &ValueRef) -> Option<TypeDesc> {
        match value {
            ValueRef::Const { ty, .. } => Some(ty.clone()),
            ValueRef::Special { .. } => None,
            other => other.slot().and_then(|s| self.slot_type(s)).cloned(),
        }
    }

    /// The slot source a value would bind to another slot, if it has one.
    pub fn source_of(&self, value: &ValueRef) -> Option<SlotSource> {
        match value {
            ValueRef::Sig { expr, .. } => Some(SlotSource::Sig(*expr)),
            ValueRef::Field { expr, .. } => Some(SlotSource::Field(*expr)),
            ValueRef::Event { expr, .. } => Some(SlotSource::Event(*expr)),
            ValueRef::Const { .. } | ValueRef::Special { .. } => None,
        }
    }

    // ── Operand views ──

    /// View a value as a signal expression, promoting constants.
    pub fn as_sig(&mut self, value: &ValueRef) -> Option<SigExprId> {
        match value {
            ValueRef::Const { id, .. } => Some(self.sig(SigExpr::Const { value: *id })),
            ValueRef::Sig { expr, .. } => Some(*expr),
            _ => None,
        }
    }

    /// View a value as a field expression, broadcasting constants and signals.
    pub fn as_field(&mut self, value: &ValueRef) -> Option<FieldExprId> {
        match value {
            ValueRef::Const { id, .. } => Some(self.field(FieldExpr::Const { value: *id })),
            ValueRef::Sig { expr, .. } => Some(self.field(FieldExpr::Broadcast { src: *expr })),
            ValueRef::Field { expr, .. } => Some(*expr),
            _ => None,
        }
    }

    pub fn as_event(&self, value: &ValueRef) -> Option<EventExprId> {
        match value {
            ValueRef::Event { expr, .. } => Some(*expr),
            _ => None,
        }
    }

    /// Convert `value` to the representation of `to`, inserting the
    /// promotion or broadcast node when worlds differ.
    pub fn coerce(&mut self, value: &ValueRef, to: &TypeDesc) -> Option<ValueRef> {
        match to.ir_kind() {
            IrKind::Const => match value {
                ValueRef::Const { id, .. } => Some(ValueRef::Const {
                    id: *id,
                    ty: to.clone(),
                }),
                _ => None,
            },
            IrKind::Signal => match value {
                ValueRef::Sig { .. } => Some(value.clone()),
                ValueRef::Const { .. } => {
                    let expr = self.as_sig(value)?;
                    Some(self.sig_value(expr, to.clone()))
                }
                _ => None,
            },
            IrKind::Field => match value {
                ValueRef::Field { .. } => Some(value.clone()),
                ValueRef::Const { .. } | ValueRef::Sig { .. } => {
                    let expr = self.as_field(value)?;
                    Some(self.field_value(expr, to.clone()))
                }
                _ => None,
            },
            IrKind::Event => match value {
                ValueRef::Event { .. } => Some(value.clone()),
                _ => None,
            },
            IrKind::Handle => match value {
                ValueRef::Special { .. } => Some(value.clone()),
                _ => None,
            },
            IrKind::None => None,
        }
    }

    // ── State and handles ──

    pub fn alloc_state(&mut self, owner: BlockIndex, init: Value) -> StateId {
        let id = StateId::from_index(self.states.len());
        let init = self.intern(init);
        self.states.push(StateCell { id, owner, init });
        id
    }

    pub fn state_count(&self) -> usize {
        self.states.len()
    }

    pub fn alloc_handle(&mut self, owner: BlockIndex, kind: HandleKind) -> HandleId {
        let id = HandleId::from_index(self.handles.len());
        self.handles.push(Handle { id, owner, kind });
        id
    }

    pub fn register_render_sink(
        &mut self,
        handle: HandleId,
        block: BlockIndex,
        inputs: BTreeMap<String, ValueRef>,
    ) {
        self.render_sinks.push(SinkEntry {
            handle,
            block,
            inputs,
        });
    }

    pub fn register_camera(
        &mut self,
        handle: HandleId,
        block: BlockIndex,
        inputs: BTreeMap<String, ValueRef>,
    ) {
        self.cameras.push(SinkEntry {
            handle,
            block,
            inputs,
        });
    }

    pub fn push_step(&mut self, step: ScheduleStep) {
        self.schedule.push(step);
    }

    /// Finish construction.
    pub fn build(self) -> IrProgram {
        IrProgram {
            time_model: self.time_model,
            consts: self.consts.into_values(),
            signals: self.signals,
            fields: self.fields,
            events: self.events,
            slots: self.slots,
            states: self.states,
            handles: self.handles,
            render_sinks: self.render_sinks,
            cameras: self.cameras,
            schedule: self.schedule,
        }
    }
}
