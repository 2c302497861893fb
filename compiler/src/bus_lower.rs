// bus_lower.rs — Stage 7: bus combine and bus value slots
//
// Every signal, field, or event bus gets a value slot before block lowering
// so listeners can read it regardless of evaluation order. After block
// lowering, each bus's publishers are transformed, coerced, and reduced per
// the bus combine mode; the result is bound to the reserved slot. A bus
// with no effective publisher is bound to its default (or its domain's
// zero) as a constant of the bus world.
//
// Preconditions: stage 6 ran against the same builder and slot table.
// Postconditions: every reserved bus slot is bound unless a diagnostic
//   names the bus.
// Failure modes: E0504, E0506, E0507 (batch).
// Side effects: appends expressions to the builder and binds bus slots.

use tracing::{debug, trace, warn};

use crate::combine;
use crate::diag::{codes, Diagnostic, Locator};
use crate::id::{BusIndex, SlotId};
use crate::ir::{EventExpr, FieldExpr, SigExpr, ValueRef};
use crate::ir_builder::IrBuilder;
use crate::lower::{multiple_writers, LowerEnv, LoweredBlocks};
use crate::normalize::NormalizedPatch;
use crate::patch::{CombineMode, CombinePolicy, Endpoint, Value};
use crate::transforms::apply_chain;
use crate::type_graph::TypedPatch;
use crate::types::{combine_mode_allowed, IrKind, TypeDesc};
use crate::writers::Writer;

/// Reserve one unbound slot per bus whose type has a continuous or event
/// representation. Indexed by `BusIndex`.
pub fn reserve_bus_slots(
    normalized: &NormalizedPatch,
    typed: &TypedPatch,
    builder: &mut IrBuilder,
) -> Vec<Option<SlotId>> {
    normalized
        .bus_indices()
        .map(|bus| {
            let ty = typed.bus_type(bus)?;
            match ty.ir_kind() {
                IrKind::Signal | IrKind::Field | IrKind::Event => {
                    Some(builder.reserve_slot(ty.clone()))
                }
                IrKind::Const | IrKind::Handle | IrKind::None => None,
            }
        })
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BusOutcome {
    /// Enabled edges publishing into the bus.
    pub publishers: usize,
    /// Publishers that contributed a term.
    pub effective: usize,
    /// Value bound to the bus slot, if any.
    pub value: Option<ValueRef>,
    /// A diagnostic was reported for this bus.
    pub failed: bool,
}

pub struct BusLowerResult {
    pub buses: Vec<BusOutcome>,
    pub diagnostics: Vec<Diagnostic>,
}

pub fn lower_buses(
    env: &LowerEnv<'_>,
    builder: &mut IrBuilder,
    bus_slots: &[Option<SlotId>],
    lowered: &LoweredBlocks,
) -> BusLowerResult {
    let mut diagnostics = Vec::new();
    let buses = env
        .normalized
        .bus_indices()
        .map(|bus| {
            let slot = bus_slots.get(bus.index()).copied().flatten();
            lower_bus(env, builder, bus, slot, lowered, &mut diagnostics)
        })
        .collect();
    BusLowerResult { buses, diagnostics }
}

fn lower_bus(
    env: &LowerEnv<'_>,
    builder: &mut IrBuilder,
    ix: BusIndex,
    slot: Option<SlotId>,
    lowered: &LoweredBlocks,
    diagnostics: &mut Vec<Diagnostic>,
) -> BusOutcome {
    let bus = env.normalized.bus(ix);
    let publishers = publishers(env.normalized, &bus.id);
    let mut outcome = BusOutcome {
        publishers: publishers.len(),
        ..BusOutcome::default()
    };
    let Some(ty) = env.typed.bus_type(ix) else {
        return outcome;
    };

    if !combine_mode_allowed(ty, bus.combine) {
        diagnostics.push(Diagnostic::error(
            codes::E0506,
            Locator::bus(&bus.id),
            format!("combine mode '{}' is not valid for bus '{}' ({})", bus.combine, bus.id, ty),
        ));
        outcome.failed = true;
    } else if bus.combine == CombineMode::Error && publishers.len() > 1 {
        diagnostics.push(multiple_writers(Locator::bus(&bus.id), &publishers));
        outcome.failed = true;
    }

    let Some(slot) = slot else {
        trace!(bus = %bus.id, "bus has no runtime slot");
        return outcome;
    };

    let mut terms = Vec::with_capacity(publishers.len());
    if !outcome.failed {
        for writer in &publishers {
            let Writer::Wire { edge, from, port, .. } = writer else {
                continue;
            };
            let Some(value) = lowered.output(*from, port).cloned() else {
                trace!(bus = %bus.id, writer = writer.identifier(), "publisher has no IR value");
                continue;
            };
            let edge = &env.normalized.edges[*edge];
            let value = if edge.has_transforms() {
                match apply_chain(value, edge, env.registries, builder) {
                    Ok(v) => v,
                    Err(e) => {
                        diagnostics.push(
                            Diagnostic::error(
                                codes::E0504,
                                Locator::bus(&bus.id),
                                format!(
                                    "bus '{}' cannot lower publisher edge '{}'",
                                    bus.id, edge.id
                                ),
                            )
                            .with_cause(e.to_string(), Some(Locator::edge(&edge.id))),
                        );
                        outcome.failed = true;
                        continue;
                    }
                }
            } else {
                value
            };
            match builder.coerce(&value, ty) {
                Some(term) => terms.push(term),
                None => warn!(
                    bus = %bus.id,
                    edge = %edge.id,
                    kind = value.kind_name(),
                    "publisher dropped: no IR coercion"
                ),
            }
        }
    }
    outcome.effective = terms.len();

    let value = if terms.is_empty() {
        materialize_default(builder, ty, bus.default.clone())
    } else {
        combine::reduce(builder, ty, &CombinePolicy::multi(bus.combine), terms)
    };
    let Some(value) = value else {
        diagnostics.push(
            Diagnostic::error(
                codes::E0504,
                Locator::bus(&bus.id),
                format!("bus '{}' has no value and no default", bus.id),
            )
            .with_hint(format!("declare a default for {}", ty)),
        );
        outcome.failed = true;
        return outcome;
    };
    if let Some(source) = builder.source_of(&value) {
        builder.bind_slot(slot, source);
    }
    debug!(
        bus = %bus.id,
        publishers = outcome.publishers,
        effective = outcome.effective,
        "bus lowered"
    );
    outcome.value = Some(value);
    outcome
}

/// Publishing edges of `bus` as writers, in canonical edge order.
fn publishers(normalized: &NormalizedPatch, bus: &str) -> Vec<Writer> {
    normalized
        .edges_into_bus(bus)
        .filter_map(|(i, edge)| match &edge.from {
            Endpoint::Port { block, port } => Some(Writer::Wire {
                edge_id: edge.id.clone(),
                edge: i,
                from: normalized.block_index(block)?,
                port: port.clone(),
            }),
            Endpoint::Bus { .. } => None,
        })
        .collect()
}

/// Constant node of the bus world carrying `default` or the domain zero.
fn materialize_default(
    builder: &mut IrBuilder,
    ty: &TypeDesc,
    default: Option<Value>,
) -> Option<ValueRef> {
    if ty.ir_kind() == IrKind::Event {
        let expr = builder.event(EventExpr::Never);
        return Some(builder.event_value(expr, ty.clone()));
    }
    let value = default.or_else(|| ty.domain.zero_value())?;
    let constant = builder.intern(value);
    match ty.ir_kind() {
        IrKind::Signal => {
            let expr = builder.sig(SigExpr::Const { value: constant });
            Some(builder.sig_value(expr, ty.clone()))
        }
        IrKind::Field => {
            let expr = builder.field(FieldExpr::Const { value: constant });
            Some(builder.field_value(expr, ty.clone()))
        }
        _ => None,
    }
}
