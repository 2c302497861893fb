// blocks.rs — Built-in block library and lowering kinds
//
// Generic lowering kinds (`const`, arithmetic, stateful, handles, sinks)
// that manifests reference by name, plus the declarations installed by
// `Registries::builtin()`. Block types whose behavior lives entirely in the
// runtime (render trees) still declare ports so the front stages can check
// them.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::ir::{EventExpr, FieldExpr, HandleKind, OpCode, SigExpr, SpecialRef, ValueRef};
use crate::lower::{BlockConfig, BlockLowering, LowerCtx, LowerError, LoweredOutputs, ResolvedInputs};
use crate::patch::{CombineMode, CombinePolicy, Value};
use crate::registry::{BlockDecl, BlockRegistry, TimeRootKind};
use crate::transforms::fold;
use crate::types::{IrKind, TypeDesc, World};

// ── Helpers ─────────────────────────────────────────────────────────────────

fn operand_error(port: &str, value: &ValueRef) -> LowerError {
    LowerError::Operand {
        port: port.to_string(),
        kind: value.kind_name(),
    }
}

fn single(port: &str, value: ValueRef) -> LoweredOutputs {
    let mut out = BTreeMap::new();
    out.insert(port.to_string(), value);
    out
}

// ── Time roots ──────────────────────────────────────────────────────────────

/// Canonical time signals: `time` always, `phase` and `wrap` when cyclic.
struct TimeRootLowering;

impl BlockLowering for TimeRootLowering {
    fn lower(
        &self,
        ctx: &mut LowerCtx<'_>,
        _inputs: &ResolvedInputs,
        config: &BlockConfig<'_>,
    ) -> Result<LoweredOutputs, LowerError> {
        let plan = ctx.time.signals;
        let mut out = BTreeMap::new();
        for (port, ty) in config.outputs {
            let Some(ty) = ty else { continue };
            let value = match port.as_str() {
                "time" if plan.model_time => ctx.output_sig(SigExpr::TimeModelMs, ty),
                "absTime" => ctx.output_sig(SigExpr::TimeAbsMs, ty),
                "phase" if plan.phase => ctx.output_sig(SigExpr::Phase01, ty),
                "wrap" if plan.wrap => ctx.output_event(EventExpr::Wrap, ty),
                _ => continue,
            };
            out.insert(port.clone(), value);
        }
        Ok(out)
    }
}

// ── Constants and pass-through ──────────────────────────────────────────────

/// Emits param `value` (or the domain's zero) on `out`.
struct ConstLowering;

impl BlockLowering for ConstLowering {
    fn lower(
        &self,
        ctx: &mut LowerCtx<'_>,
        _inputs: &ResolvedInputs,
        config: &BlockConfig<'_>,
    ) -> Result<LoweredOutputs, LowerError> {
        let ty = config.output_type("out")?;
        let value = match config.param("value") {
            Some(v) => v.clone(),
            None => ty.domain.zero_value().ok_or_else(|| LowerError::InvalidParam {
                name: "value".into(),
                message: format!("required for {}", ty),
            })?,
        };
        let constant = ctx.builder.const_ref(value, ty.with_world(World::Scalar));
        let out = ctx
            .builder
            .coerce(&constant, ty)
            .ok_or_else(|| LowerError::UnknownOutput("out".into()))?;
        Ok(single("out", out))
    }
}

/// `in` coerced to the type of `out`; also serves signal-to-field broadcast.
struct IdentityLowering;

impl BlockLowering for IdentityLowering {
    fn lower(
        &self,
        ctx: &mut LowerCtx<'_>,
        inputs: &ResolvedInputs,
        config: &BlockConfig<'_>,
    ) -> Result<LoweredOutputs, LowerError> {
        let ty = config.output_type("out")?;
        let input = inputs.require("in")?;
        let out = ctx
            .builder
            .coerce(input, ty)
            .ok_or_else(|| operand_error("in", input))?;
        Ok(single("out", out))
    }
}

// ── Arithmetic ──────────────────────────────────────────────────────────────

struct BinaryLowering(OpCode);

impl BlockLowering for BinaryLowering {
    fn lower(
        &self,
        ctx: &mut LowerCtx<'_>,
        inputs: &ResolvedInputs,
        config: &BlockConfig<'_>,
    ) -> Result<LoweredOutputs, LowerError> {
        let ty = config.output_type("out")?;
        let a = inputs.require("a")?;
        let b = inputs.require("b")?;
        let out = match ty.ir_kind() {
            IrKind::Signal => {
                let x = ctx.builder.as_sig(a).ok_or_else(|| operand_error("a", a))?;
                let y = ctx.builder.as_sig(b).ok_or_else(|| operand_error("b", b))?;
                ctx.output_sig(SigExpr::Zip { func: self.0, a: x, b: y }, ty)
            }
            IrKind::Field => {
                let x = ctx.builder.as_field(a).ok_or_else(|| operand_error("a", a))?;
                let y = ctx.builder.as_field(b).ok_or_else(|| operand_error("b", b))?;
                ctx.output_field(FieldExpr::Zip { func: self.0, a: x, b: y }, ty)
            }
            IrKind::Const => {
                let x = const_f64(ctx, a).ok_or_else(|| operand_error("a", a))?;
                let y = const_f64(ctx, b).ok_or_else(|| operand_error("b", b))?;
                ctx.builder.const_ref(Value::Float(fold(self.0, x, y)), ty.clone())
            }
            _ => return Err(LowerError::UnknownOutput("out".into())),
        };
        Ok(single("out", out))
    }
}

struct UnaryLowering(OpCode);

impl BlockLowering for UnaryLowering {
    fn lower(
        &self,
        ctx: &mut LowerCtx<'_>,
        inputs: &ResolvedInputs,
        config: &BlockConfig<'_>,
    ) -> Result<LoweredOutputs, LowerError> {
        let ty = config.output_type("out")?;
        let input = inputs.require("in")?;
        let out = match ty.ir_kind() {
            IrKind::Signal => {
                let src = ctx.builder.as_sig(input).ok_or_else(|| operand_error("in", input))?;
                ctx.output_sig(SigExpr::Map { func: self.0, src }, ty)
            }
            IrKind::Field => {
                let src = ctx
                    .builder
                    .as_field(input)
                    .ok_or_else(|| operand_error("in", input))?;
                ctx.output_field(FieldExpr::Map { func: self.0, src }, ty)
            }
            IrKind::Const => {
                let x = const_f64(ctx, input).ok_or_else(|| operand_error("in", input))?;
                ctx.builder.const_ref(Value::Float(fold(self.0, x, 0.0)), ty.clone())
            }
            _ => return Err(LowerError::UnknownOutput("out".into())),
        };
        Ok(single("out", out))
    }
}

fn const_f64(ctx: &LowerCtx<'_>, value: &ValueRef) -> Option<f64> {
    match value {
        ValueRef::Const { id, .. } => ctx.builder.const_value(*id)?.as_f64(),
        _ => None,
    }
}

// ── Stateful ────────────────────────────────────────────────────────────────

#[derive(Clone, Copy)]
enum StatefulKind {
    Delay,
    Integrate,
    SampleHold,
}

/// One state cell, initialized from param `init` (default 0).
struct StatefulLowering(StatefulKind);

impl BlockLowering for StatefulLowering {
    fn lower(
        &self,
        ctx: &mut LowerCtx<'_>,
        inputs: &ResolvedInputs,
        config: &BlockConfig<'_>,
    ) -> Result<LoweredOutputs, LowerError> {
        let ty = config.output_type("out")?;
        let init = config.param_f64("init", 0.0)?;
        let raw = inputs.require("in")?;
        let input = ctx.builder.as_sig(raw).ok_or_else(|| operand_error("in", raw))?;
        let state = ctx.builder.alloc_state(ctx.block, Value::Float(init));
        let expr = match self.0 {
            StatefulKind::Delay => SigExpr::Delay { state, input },
            StatefulKind::Integrate => SigExpr::Integrate { state, input },
            StatefulKind::SampleHold => {
                let trigger = match inputs.get("trigger") {
                    None => None,
                    Some(t) => Some(
                        ctx.builder
                            .as_event(t)
                            .ok_or_else(|| operand_error("trigger", t))?,
                    ),
                };
                SigExpr::SampleHold {
                    state,
                    input,
                    trigger,
                }
            }
        };
        Ok(single("out", ctx.output_sig(expr, ty)))
    }
}

// ── Handles and sinks ───────────────────────────────────────────────────────

/// Element domain of `count` instances.
struct DomainLowering;

impl BlockLowering for DomainLowering {
    fn lower(
        &self,
        ctx: &mut LowerCtx<'_>,
        _inputs: &ResolvedInputs,
        config: &BlockConfig<'_>,
    ) -> Result<LoweredOutputs, LowerError> {
        let count = config.param_f64("count", 1.0)?;
        if count < 1.0 || count.fract() != 0.0 || count > u32::MAX as f64 {
            return Err(LowerError::InvalidParam {
                name: "count".into(),
                message: format!("expected a positive integer, found {}", count),
            });
        }
        let handle = ctx.builder.alloc_handle(
            ctx.block,
            HandleKind::ElementDomain {
                count: count as u32,
            },
        );
        Ok(single(
            "domain",
            ValueRef::Special {
                special: SpecialRef::Domain(handle),
            },
        ))
    }
}

/// Registers the block's inputs as a render sink. No IR outputs.
struct RenderSinkLowering;

impl BlockLowering for RenderSinkLowering {
    fn lower(
        &self,
        ctx: &mut LowerCtx<'_>,
        inputs: &ResolvedInputs,
        _config: &BlockConfig<'_>,
    ) -> Result<LoweredOutputs, LowerError> {
        let handle = ctx.builder.alloc_handle(ctx.block, HandleKind::RenderSink);
        ctx.builder
            .register_render_sink(handle, ctx.block, inputs.as_map().clone());
        Ok(BTreeMap::new())
    }
}

struct CameraLowering;

impl BlockLowering for CameraLowering {
    fn lower(
        &self,
        ctx: &mut LowerCtx<'_>,
        inputs: &ResolvedInputs,
        _config: &BlockConfig<'_>,
    ) -> Result<LoweredOutputs, LowerError> {
        let handle = ctx.builder.alloc_handle(ctx.block, HandleKind::Camera);
        ctx.builder
            .register_camera(handle, ctx.block, inputs.as_map().clone());
        Ok(single(
            "camera",
            ValueRef::Special {
                special: SpecialRef::Camera(handle),
            },
        ))
    }
}

// ── Registration ────────────────────────────────────────────────────────────

/// Look up a built-in lowering kind by the name manifests use.
pub fn lowering_for(kind: &str) -> Option<Arc<dyn BlockLowering>> {
    let zip = |op| -> Arc<dyn BlockLowering> { Arc::new(BinaryLowering(op)) };
    let map = |op| -> Arc<dyn BlockLowering> { Arc::new(UnaryLowering(op)) };
    let l: Arc<dyn BlockLowering> = match kind {
        "timeRoot" => Arc::new(TimeRootLowering),
        "const" => Arc::new(ConstLowering),
        "identity" | "broadcast" => Arc::new(IdentityLowering),
        "add" => zip(OpCode::Add),
        "sub" => zip(OpCode::Sub),
        "mul" => zip(OpCode::Mul),
        "div" => zip(OpCode::Div),
        "min" => zip(OpCode::Min),
        "max" => zip(OpCode::Max),
        "sin" => map(OpCode::Sin),
        "cos" => map(OpCode::Cos),
        "abs" => map(OpCode::Abs),
        "neg" => map(OpCode::Neg),
        "fract" => map(OpCode::Fract),
        "delay" => Arc::new(StatefulLowering(StatefulKind::Delay)),
        "integrate" => Arc::new(StatefulLowering(StatefulKind::Integrate)),
        "sampleHold" => Arc::new(StatefulLowering(StatefulKind::SampleHold)),
        "domain" => Arc::new(DomainLowering),
        "renderSink" => Arc::new(RenderSinkLowering),
        "camera" => Arc::new(CameraLowering),
        _ => return None,
    };
    Some(l)
}

const FLOAT: &str = "Signal<float>";

fn time_root(name: &str, kind: TimeRootKind) -> BlockDecl {
    let decl = BlockDecl::new(name)
        .time_root(kind)
        .output("time", "Signal<time> @unit(ms)");
    let decl = match kind {
        TimeRootKind::Cyclic => decl.output("phase", "Signal<phase>").output("wrap", "Event<trigger>"),
        TimeRootKind::Finite | TimeRootKind::Infinite => decl,
    };
    decl.lowering("timeRoot")
}

fn binary(name: &str, kind: &str, b_default: f64, policy: CombinePolicy) -> BlockDecl {
    BlockDecl::new(name)
        .input("a", FLOAT, Some(Value::Float(0.0)))
        .combine(policy)
        .input("b", FLOAT, Some(Value::Float(b_default)))
        .combine(policy)
        .output("out", FLOAT)
        .lowering(kind)
}

fn unary(name: &str, kind: &str) -> BlockDecl {
    BlockDecl::new(name)
        .input("in", FLOAT, Some(Value::Float(0.0)))
        .output("out", FLOAT)
        .lowering(kind)
}

fn stateful(name: &str, kind: &str) -> BlockDecl {
    BlockDecl::new(name)
        .input("in", FLOAT, Some(Value::Float(0.0)))
        .output("out", FLOAT)
        .state_boundary()
        .lowering(kind)
}

/// The built-in declarations, in registration order.
pub fn builtin_decls() -> Vec<BlockDecl> {
    let sum = CombinePolicy::multi(CombineMode::Sum);
    let last = CombinePolicy::default();
    vec![
        time_root("FiniteTimeRoot", TimeRootKind::Finite),
        time_root("CycleTimeRoot", TimeRootKind::Cyclic),
        time_root("InfiniteTimeRoot", TimeRootKind::Infinite),
        BlockDecl::new("Const").output("out", FLOAT).lowering("const"),
        BlockDecl::new("ConstVec2")
            .output("out", "Signal<vec2>")
            .lowering("const"),
        binary("Add", "add", 0.0, sum),
        binary("Sub", "sub", 0.0, last),
        binary("Mul", "mul", 1.0, last),
        binary("Div", "div", 1.0, last),
        binary("Min", "min", 0.0, CombinePolicy::multi(CombineMode::Min)),
        binary("Max", "max", 0.0, CombinePolicy::multi(CombineMode::Max)),
        unary("Sin", "sin"),
        unary("Cos", "cos"),
        unary("Abs", "abs"),
        unary("Neg", "neg"),
        unary("Fract", "fract"),
        stateful("Delay", "delay"),
        stateful("Integrate", "integrate"),
        stateful("SampleHold", "sampleHold")
            .optional_input("trigger", "Event<trigger>")
            .combine(sum),
        BlockDecl::new("GridDomain")
            .output("domain", "Scalar<elementDomain>")
            .lowering("domain"),
        BlockDecl::new("Broadcast")
            .input("in", FLOAT, Some(Value::Float(0.0)))
            .output("out", "Field<float>")
            .lowering("broadcast"),
        BlockDecl::new("RenderInstances")
            .optional_input("domain", "Scalar<elementDomain>")
            .optional_input("position", "Field<vec2>")
            .input("color", "Field<color>", Some(Value::Vector(vec![1.0, 1.0, 1.0, 1.0])))
            .combine(CombinePolicy::multi(CombineMode::Layer))
            .input("size", "Field<float>", Some(Value::Float(4.0)))
            .output("tree", "Signal<renderTree>")
            .lowering("renderSink"),
        BlockDecl::new("Camera3D")
            .input("position", "Signal<vec3>", Some(Value::Vector(vec![0.0, 0.0, 5.0])))
            .input("fov", FLOAT, Some(Value::Float(60.0)))
            .output("camera", "Scalar<camera>")
            .lowering("camera"),
        // Editor-side inspection only.
        BlockDecl::new("Probe").optional_input("in", FLOAT),
    ]
}

pub(crate) fn install(registry: &mut BlockRegistry) {
    for decl in builtin_decls() {
        let lowering = decl.lowering.as_deref().and_then(lowering_for);
        registry.insert_builtin(decl, lowering);
    }
}

/// Resolved output types of a declaration, for lowering outside a patch.
pub fn output_types(decl: &BlockDecl) -> Vec<(String, Option<TypeDesc>)> {
    decl.outputs
        .iter()
        .map(|o| (o.id.clone(), TypeDesc::parse(&o.type_str).ok()))
        .collect()
}
