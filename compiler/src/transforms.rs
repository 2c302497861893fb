// transforms.rs — Adapter and lens compilers
//
// Adapters change the type of a value crossing an edge (world or domain);
// lenses reshape the value without changing its type. Each built-in has a
// `TransformCompiler` that emits the IR for one step. Registry entries
// without a compiler are known to the type checker but rejected during
// lowering with an explicit unsupported-in-IR error.

use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;

use crate::diag::{codes, DiagCode};
use crate::ir::{FieldExpr, OpCode, SigExpr, ValueRef};
use crate::ir_builder::IrBuilder;
use crate::patch::{Edge, Value};
use crate::registry::{
    Registries, TransformDecl, TransformEntry, TransformKind, TransformRegistry, TypeEffect,
};
use crate::types::{Domain, TypeDesc, World};

/// Compiles one adapter or lens step to IR.
///
/// Returns `None` when the step cannot be expressed for this input.
pub trait TransformCompiler: Send + Sync {
    fn compile_to_ir(
        &self,
        input: &ValueRef,
        builder: &mut IrBuilder,
        params: &BTreeMap<String, Value>,
    ) -> Option<ValueRef>;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransformError {
    #[error("adapter '{id}' has no IR compilation")]
    UnsupportedAdapter { id: String },
    #[error("lens '{id}' has no IR compilation")]
    UnsupportedLens { id: String },
}

impl TransformError {
    pub fn code(&self) -> DiagCode {
        match self {
            TransformError::UnsupportedAdapter { .. } => codes::E0502,
            TransformError::UnsupportedLens { .. } => codes::E0503,
        }
    }
}

/// Run `value` through the edge's adapters, then its lenses.
pub fn apply_chain(
    value: ValueRef,
    edge: &Edge,
    registries: &Registries,
    builder: &mut IrBuilder,
) -> Result<ValueRef, TransformError> {
    let mut current = value;
    for step in &edge.adapters {
        let entry = registries.transforms.adapter(&step.id);
        current = run_step(entry, &current, builder, &step.params).ok_or_else(|| {
            TransformError::UnsupportedAdapter {
                id: step.id.clone(),
            }
        })?;
    }
    for step in &edge.lenses {
        let entry = registries.transforms.lens(&step.id);
        current = run_step(entry, &current, builder, &step.params).ok_or_else(|| {
            TransformError::UnsupportedLens {
                id: step.id.clone(),
            }
        })?;
    }
    Ok(current)
}

fn run_step(
    entry: Option<&TransformEntry>,
    input: &ValueRef,
    builder: &mut IrBuilder,
    params: &BTreeMap<String, Value>,
) -> Option<ValueRef> {
    entry?.compiler.as_ref()?.compile_to_ir(input, builder, params)
}

// ── Built-in compilers ──────────────────────────────────────────────────────

/// Scalar constant to continuous signal.
struct ConstToSignal;

impl TransformCompiler for ConstToSignal {
    fn compile_to_ir(
        &self,
        input: &ValueRef,
        builder: &mut IrBuilder,
        _params: &BTreeMap<String, Value>,
    ) -> Option<ValueRef> {
        let ty = builder.type_of(input)?;
        builder.coerce(input, &ty.with_world(World::Signal))
    }
}

/// Signal or constant to a uniform field.
struct Broadcast;

impl TransformCompiler for Broadcast {
    fn compile_to_ir(
        &self,
        input: &ValueRef,
        builder: &mut IrBuilder,
        _params: &BTreeMap<String, Value>,
    ) -> Option<ValueRef> {
        let ty = builder.type_of(input)?;
        builder.coerce(input, &ty.with_world(World::Field))
    }
}

/// Reinterpret a phase as a plain float; the numeric value is unchanged.
struct PhaseToFloat;

impl TransformCompiler for PhaseToFloat {
    fn compile_to_ir(
        &self,
        input: &ValueRef,
        builder: &mut IrBuilder,
        _params: &BTreeMap<String, Value>,
    ) -> Option<ValueRef> {
        let ty = builder.type_of(input)?;
        if ty.domain != Domain::Phase {
            return None;
        }
        let out = ty.with_domain(Domain::Float);
        match input {
            ValueRef::Const { id, .. } => Some(ValueRef::Const { id: *id, ty: out }),
            ValueRef::Sig { expr, .. } => Some(builder.sig_value(*expr, out)),
            ValueRef::Field { expr, .. } => Some(builder.field_value(*expr, out)),
            ValueRef::Event { .. } | ValueRef::Special { .. } => None,
        }
    }
}

/// `x <op> param`, with the parameter defaulting to `default`.
struct BinaryLens {
    op: OpCode,
    param: &'static str,
    default: f64,
}

impl TransformCompiler for BinaryLens {
    fn compile_to_ir(
        &self,
        input: &ValueRef,
        builder: &mut IrBuilder,
        params: &BTreeMap<String, Value>,
    ) -> Option<ValueRef> {
        let operand = match params.get(self.param) {
            None => self.default,
            Some(v) => v.as_f64()?,
        };
        apply_binary(builder, input, self.op, operand)
    }
}

struct UnaryLens {
    op: OpCode,
}

impl TransformCompiler for UnaryLens {
    fn compile_to_ir(
        &self,
        input: &ValueRef,
        builder: &mut IrBuilder,
        _params: &BTreeMap<String, Value>,
    ) -> Option<ValueRef> {
        apply_unary(builder, input, self.op)
    }
}

fn numeric(builder: &IrBuilder, input: &ValueRef) -> Option<TypeDesc> {
    builder.type_of(input).filter(|t| t.domain.is_numeric())
}

fn apply_binary(builder: &mut IrBuilder, input: &ValueRef, op: OpCode, operand: f64) -> Option<ValueRef> {
    let ty = numeric(builder, input)?;
    match input {
        ValueRef::Const { id, .. } => {
            let value = builder.const_value(*id)?.as_f64()?;
            Some(builder.const_ref(Value::Float(fold(op, value, operand)), ty))
        }
        ValueRef::Sig { expr, .. } => {
            let k = builder.intern(Value::Float(operand));
            let b = builder.sig(SigExpr::Const { value: k });
            let out = builder.sig(SigExpr::Zip { func: op, a: *expr, b });
            Some(builder.sig_value(out, ty))
        }
        ValueRef::Field { expr, .. } => {
            let k = builder.intern(Value::Float(operand));
            let b = builder.field(FieldExpr::Const { value: k });
            let out = builder.field(FieldExpr::Zip { func: op, a: *expr, b });
            Some(builder.field_value(out, ty))
        }
        ValueRef::Event { .. } | ValueRef::Special { .. } => None,
    }
}

fn apply_unary(builder: &mut IrBuilder, input: &ValueRef, op: OpCode) -> Option<ValueRef> {
    let ty = numeric(builder, input)?;
    match input {
        ValueRef::Const { id, .. } => {
            let value = builder.const_value(*id)?.as_f64()?;
            Some(builder.const_ref(Value::Float(fold(op, value, 0.0)), ty))
        }
        ValueRef::Sig { expr, .. } => {
            let out = builder.sig(SigExpr::Map { func: op, src: *expr });
            Some(builder.sig_value(out, ty))
        }
        ValueRef::Field { expr, .. } => {
            let out = builder.field(FieldExpr::Map { func: op, src: *expr });
            Some(builder.field_value(out, ty))
        }
        ValueRef::Event { .. } | ValueRef::Special { .. } => None,
    }
}

/// Compile-time evaluation of `op` on constants. Unary ops ignore `b`.
pub fn fold(op: OpCode, a: f64, b: f64) -> f64 {
    match op {
        OpCode::Add => a + b,
        OpCode::Sub => a - b,
        OpCode::Mul => a * b,
        OpCode::Div => a / b,
        OpCode::Min => a.min(b),
        OpCode::Max => a.max(b),
        OpCode::Sin => a.sin(),
        OpCode::Cos => a.cos(),
        OpCode::Abs => a.abs(),
        OpCode::Neg => -a,
        OpCode::Fract => a - a.floor(),
        OpCode::Clamp01 => a.clamp(0.0, 1.0),
        OpCode::Invert => 1.0 - a,
    }
}

// ── Registration ────────────────────────────────────────────────────────────

/// Look up a built-in compiler by the name manifests use.
pub fn compiler_for(name: &str) -> Option<Arc<dyn TransformCompiler>> {
    let c: Arc<dyn TransformCompiler> = match name {
        "constToSignal" => Arc::new(ConstToSignal),
        "broadcast" => Arc::new(Broadcast),
        "phaseToFloat" => Arc::new(PhaseToFloat),
        "scale" => Arc::new(BinaryLens {
            op: OpCode::Mul,
            param: "factor",
            default: 1.0,
        }),
        "offset" => Arc::new(BinaryLens {
            op: OpCode::Add,
            param: "amount",
            default: 0.0,
        }),
        "clamp01" => Arc::new(UnaryLens { op: OpCode::Clamp01 }),
        "invert" => Arc::new(UnaryLens { op: OpCode::Invert }),
        _ => return None,
    };
    Some(c)
}

fn builtin(id: &str, kind: TransformKind, effect: TypeEffect, compiler: Option<&str>) -> TransformDecl {
    TransformDecl {
        id: id.to_string(),
        kind,
        effect,
        compiler: compiler.map(str::to_string),
    }
}

pub(crate) fn install(registry: &mut TransformRegistry) {
    let world = |w| TypeEffect {
        world: Some(w),
        domain: None,
    };
    let domain = |d| TypeEffect {
        world: None,
        domain: Some(d),
    };
    let decls = [
        builtin("constToSignal", TransformKind::Adapter, world(World::Signal), Some("constToSignal")),
        builtin("broadcast", TransformKind::Adapter, world(World::Field), Some("broadcast")),
        builtin("phaseToFloat", TransformKind::Adapter, domain(Domain::Float), Some("phaseToFloat")),
        // Editor-only; no IR form.
        builtin("legacyColorRamp", TransformKind::Adapter, domain(Domain::Color), None),
        builtin("scale", TransformKind::Lens, TypeEffect::default(), Some("scale")),
        builtin("offset", TransformKind::Lens, TypeEffect::default(), Some("offset")),
        builtin("clamp01", TransformKind::Lens, TypeEffect::default(), Some("clamp01")),
        builtin("invert", TransformKind::Lens, TypeEffect::default(), Some("invert")),
        builtin("legacyEase", TransformKind::Lens, TypeEffect::default(), None),
    ];
    for decl in decls {
        let compiler = decl.compiler.as_deref().and_then(compiler_for);
        registry.insert_builtin(decl, compiler);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::ConstPool;
    use crate::patch::{Endpoint, TransformStep};

    fn edge() -> Edge {
        Edge::new("e", Endpoint::port("a", "out"), Endpoint::port("b", "in"))
    }

    #[test]
    fn scale_then_offset_on_signal() {
        let regs = Registries::builtin();
        let mut b = IrBuilder::new(ConstPool::new());
        let t = b.sig(SigExpr::TimeModelMs);
        let v = b.sig_value(t, TypeDesc::signal(Domain::Float));
        let e = edge()
            .with_lens(TransformStep::new("scale").with_param("factor", Value::Float(2.0)))
            .with_lens(TransformStep::new("offset").with_param("amount", Value::Float(1.0)));
        let out = apply_chain(v, &e, &regs, &mut b).unwrap();
        let ValueRef::Sig { expr, .. } = out else {
            panic!("expected signal");
        };
        let p = b.build();
        assert!(matches!(
            p.signals[expr.index()],
            SigExpr::Zip { func: OpCode::Add, .. }
        ));
    }

    #[test]
    fn lens_on_constant_folds() {
        let regs = Registries::builtin();
        let mut b = IrBuilder::new(ConstPool::new());
        let v = b.const_ref(Value::Float(3.0), TypeDesc::scalar(Domain::Float));
        let e = edge().with_lens(TransformStep::new("invert"));
        let out = apply_chain(v, &e, &regs, &mut b).unwrap();
        let ValueRef::Const { id, .. } = out else {
            panic!("expected constant");
        };
        assert_eq!(b.const_value(id), Some(&Value::Float(-2.0)));
        assert!(b.build().signals.is_empty());
    }

    #[test]
    fn phase_to_float_retypes_slot() {
        let regs = Registries::builtin();
        let mut b = IrBuilder::new(ConstPool::new());
        let ph = b.sig(SigExpr::Phase01);
        let v = b.sig_value(ph, TypeDesc::signal(Domain::Phase));
        let e = edge().with_adapter(TransformStep::new("phaseToFloat"));
        let out = apply_chain(v, &e, &regs, &mut b).unwrap();
        assert_eq!(b.type_of(&out), Some(TypeDesc::signal(Domain::Float)));
    }

    #[test]
    fn missing_compiler_is_unsupported() {
        let regs = Registries::builtin();
        let mut b = IrBuilder::new(ConstPool::new());
        let v = b.const_ref(Value::Float(0.5), TypeDesc::scalar(Domain::Float));
        let e = edge().with_adapter(TransformStep::new("legacyColorRamp"));
        let err = apply_chain(v.clone(), &e, &regs, &mut b).unwrap_err();
        assert_eq!(err.code(), codes::E0502);
        let e = edge().with_lens(TransformStep::new("legacyEase"));
        let err = apply_chain(v, &e, &regs, &mut b).unwrap_err();
        assert_eq!(err.code(), codes::E0503);
        assert_eq!(err.to_string(), "lens 'legacyEase' has no IR compilation");
    }

    #[test]
    fn lens_rejects_events() {
        let regs = Registries::builtin();
        let mut b = IrBuilder::new(ConstPool::new());
        let w = b.event(crate::ir::EventExpr::Wrap);
        let v = b.event_value(w, TypeDesc::event(Domain::Trigger));
        let e = edge().with_lens(TransformStep::new("scale"));
        assert!(apply_chain(v, &e, &regs, &mut b).is_err());
    }
}
