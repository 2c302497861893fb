// combine.rs — Reducing several writers to one value
//
// Decides whether an input (or bus) needs a combine node and emits it:
// signal combine, field combine, or event merge/override. Terms are
// expected in canonical writer order; order matters for `last` and `layer`.

use crate::ir::{EventExpr, FieldExpr, SigExpr, ValueRef};
use crate::ir_builder::IrBuilder;
use crate::patch::{CombineMode, CombinePolicy, CombineWhen};
use crate::types::{IrKind, TypeDesc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CombinePlan {
    /// No writers: defer to default materialization.
    Empty,
    /// Exactly one writer under a `multi` policy.
    Direct,
    /// One combine node with `terms` terms.
    Node { terms: usize },
}

pub fn plan(policy: &CombinePolicy, writers: usize) -> CombinePlan {
    match (writers, policy.when) {
        (0, _) => CombinePlan::Empty,
        (1, CombineWhen::Multi) => CombinePlan::Direct,
        (n, _) => CombinePlan::Node { terms: n },
    }
}

/// Reduce `terms` per `policy`. Terms must already be coerced to `ty`.
pub fn reduce(
    builder: &mut IrBuilder,
    ty: &TypeDesc,
    policy: &CombinePolicy,
    mut terms: Vec<ValueRef>,
) -> Option<ValueRef> {
    match plan(policy, terms.len()) {
        CombinePlan::Empty => None,
        CombinePlan::Direct => terms.pop(),
        CombinePlan::Node { .. } => emit_node(builder, ty, policy.mode, &terms),
    }
}

/// Emit one combine node over `terms`.
pub fn emit_node(
    builder: &mut IrBuilder,
    ty: &TypeDesc,
    mode: CombineMode,
    terms: &[ValueRef],
) -> Option<ValueRef> {
    match ty.ir_kind() {
        IrKind::Signal => {
            let ids = terms
                .iter()
                .map(|t| builder.as_sig(t))
                .collect::<Option<Vec<_>>>()?;
            let expr = builder.sig(SigExpr::Combine { mode, terms: ids });
            Some(builder.sig_value(expr, ty.clone()))
        }
        IrKind::Field => {
            let ids = terms
                .iter()
                .map(|t| builder.as_field(t))
                .collect::<Option<Vec<_>>>()?;
            let expr = builder.field(FieldExpr::Combine { mode, terms: ids });
            Some(builder.field_value(expr, ty.clone()))
        }
        IrKind::Event => {
            let ids = terms
                .iter()
                .map(|t| builder.as_event(t))
                .collect::<Option<Vec<_>>>()?;
            let expr = match mode {
                CombineMode::Sum => EventExpr::Merge { terms: ids },
                _ => EventExpr::Override { terms: ids },
            };
            let expr = builder.event(expr);
            Some(builder.event_value(expr, ty.clone()))
        }
        // Compile-time values and handles have no combine node; `last` wins.
        // Policy validation only admits `last` (or `error`) for these worlds.
        IrKind::Const | IrKind::Handle => {
            debug_assert!(
                matches!(mode, CombineMode::Last | CombineMode::Error),
                "combine mode {mode:?} reached a {:?} port",
                ty.ir_kind()
            );
            terms.last().cloned()
        }
        IrKind::None => None,
    }
}
