// time_topology.rs — Stage 3: find the single time root, build the time model
//
// Exactly one block must declare `timeRoot`. Its parameters are validated
// and defaulted into a `TimeModel`, and the canonical time-signal plan is
// derived from it (model time always; phase and wrap for cyclic models).
//
// Preconditions: type graph built without errors.
// Postconditions: `TimeResolved` names the root block and a valid model.
// Failure modes: fail-fast, one diagnostic (E0200, E0201, E0202).
// Side effects: none.

use serde::Serialize;

use crate::diag::{codes, Diagnostic, Locator};
use crate::id::BlockIndex;
use crate::normalize::NormalizedPatch;
use crate::patch::Block;
use crate::registry::{Registries, TimeRootKind};

pub const DEFAULT_DURATION_MS: f64 = 10_000.0;
pub const DEFAULT_PERIOD_MS: f64 = 4_000.0;
pub const DEFAULT_WINDOW_MS: f64 = 10_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum CycleMode {
    Loop,
    Pingpong,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum TimeModel {
    #[serde(rename_all = "camelCase")]
    Finite { duration_ms: f64 },
    #[serde(rename_all = "camelCase")]
    Cyclic { period_ms: f64, mode: CycleMode },
    #[serde(rename_all = "camelCase")]
    Infinite { window_ms: f64 },
}

impl TimeModel {
    pub fn is_cyclic(&self) -> bool {
        matches!(self, TimeModel::Cyclic { .. })
    }
}

/// Which canonical time signals the root exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeSignalPlan {
    pub model_time: bool,
    pub phase: bool,
    pub wrap: bool,
}

impl TimeSignalPlan {
    pub fn for_model(model: &TimeModel) -> Self {
        let cyclic = model.is_cyclic();
        TimeSignalPlan {
            model_time: true,
            phase: cyclic,
            wrap: cyclic,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimeResolved {
    pub root: BlockIndex,
    pub model: TimeModel,
    pub signals: TimeSignalPlan,
}

pub struct TimeResult {
    pub resolved: Option<TimeResolved>,
    pub diagnostics: Vec<Diagnostic>,
}

impl TimeResult {
    fn fail(d: Diagnostic) -> Self {
        TimeResult {
            resolved: None,
            diagnostics: vec![d],
        }
    }
}

pub fn resolve_time(normalized: &NormalizedPatch, registries: &Registries) -> TimeResult {
    let roots: Vec<(BlockIndex, TimeRootKind)> = normalized
        .block_indices()
        .filter_map(|ix| {
            let block = normalized.block(ix);
            let kind = registries.blocks.decl(&block.type_name)?.time_root?;
            Some((ix, kind))
        })
        .collect();

    let (root, kind) = match roots.as_slice() {
        [] => {
            return TimeResult::fail(
                Diagnostic::error(codes::E0200, Locator::Patch, "patch has no time root block")
                    .with_hint("add a FiniteTimeRoot, CycleTimeRoot, or InfiniteTimeRoot"),
            )
        }
        [single] => *single,
        [first, rest @ ..] => {
            let ids: Vec<&str> = roots
                .iter()
                .map(|(ix, _)| normalized.block(*ix).id.as_str())
                .collect();
            let mut d = Diagnostic::error(
                codes::E0201,
                Locator::block(&normalized.block(first.0).id),
                format!("patch has {} time roots: {}", roots.len(), ids.join(", ")),
            );
            for (ix, _) in rest {
                d = d.with_related(Locator::block(&normalized.block(*ix).id), "also a time root");
            }
            return TimeResult::fail(d.with_hint("keep exactly one time root"));
        }
    };

    let block = normalized.block(root);
    match build_model(block, kind) {
        Ok(model) => TimeResult {
            resolved: Some(TimeResolved {
                root,
                model,
                signals: TimeSignalPlan::for_model(&model),
            }),
            diagnostics: Vec::new(),
        },
        Err(message) => TimeResult::fail(Diagnostic::error(
            codes::E0202,
            Locator::block(&block.id),
            message,
        )),
    }
}

fn build_model(block: &Block, kind: TimeRootKind) -> Result<TimeModel, String> {
    match kind {
        TimeRootKind::Finite => Ok(TimeModel::Finite {
            duration_ms: positive_ms(block, "durationMs", DEFAULT_DURATION_MS)?,
        }),
        TimeRootKind::Cyclic => {
            let period_ms = positive_ms(block, "periodMs", DEFAULT_PERIOD_MS)?;
            let mode = match block.params.get("mode") {
                None => CycleMode::Loop,
                Some(v) => match v.as_str() {
                    Some("loop") => CycleMode::Loop,
                    Some("pingpong") => CycleMode::Pingpong,
                    _ => {
                        return Err(format!(
                            "time root '{}': mode must be \"loop\" or \"pingpong\", found {}",
                            block.id, v
                        ))
                    }
                },
            };
            Ok(TimeModel::Cyclic { period_ms, mode })
        }
        TimeRootKind::Infinite => Ok(TimeModel::Infinite {
            window_ms: positive_ms(block, "windowMs", DEFAULT_WINDOW_MS)?,
        }),
    }
}

fn positive_ms(block: &Block, param: &str, default: f64) -> Result<f64, String> {
    let value = match block.params.get(param) {
        None => return Ok(default),
        Some(v) => v,
    };
    match value.as_f64() {
        Some(ms) if ms.is_finite() && ms > 0.0 => Ok(ms),
        Some(_) | None => Err(format!(
            "time root '{}': {} must be a positive finite number, found {}",
            block.id,
            param,
            value
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::normalize;
    use crate::patch::{Patch, Value};

    fn run(patch: &Patch) -> TimeResult {
        let regs = Registries::builtin();
        let n = normalize(patch, &regs).normalized;
        resolve_time(&n, &regs)
    }

    #[test]
    fn finite_root_with_duration() {
        let p = Patch::new()
            .block(Block::new("t", "FiniteTimeRoot").with_param("durationMs", Value::Int(8000)));
        let r = run(&p);
        let t = r.resolved.unwrap();
        assert_eq!(t.model, TimeModel::Finite { duration_ms: 8000.0 });
        assert!(!t.signals.phase);
        assert!(!t.signals.wrap);
    }

    #[test]
    fn cyclic_defaults() {
        let p = Patch::new().block(Block::new("t", "CycleTimeRoot"));
        let t = run(&p).resolved.unwrap();
        assert_eq!(
            t.model,
            TimeModel::Cyclic {
                period_ms: 4000.0,
                mode: CycleMode::Loop
            }
        );
        assert!(t.signals.phase && t.signals.wrap);
    }

    #[test]
    fn missing_root() {
        let p = Patch::new().block(Block::new("s", "Sin"));
        let r = run(&p);
        assert!(r.resolved.is_none());
        assert_eq!(r.diagnostics.len(), 1);
        assert_eq!(r.diagnostics[0].code, Some(codes::E0200));
    }

    #[test]
    fn multiple_roots_names_every_id() {
        let p = Patch::new()
            .block(Block::new("t2", "InfiniteTimeRoot"))
            .block(Block::new("t1", "FiniteTimeRoot"));
        let r = run(&p);
        assert_eq!(r.diagnostics.len(), 1);
        let d = &r.diagnostics[0];
        assert_eq!(d.code, Some(codes::E0201));
        assert!(d.message.contains("t1, t2"));
        assert_eq!(d.related.len(), 1);
    }

    #[test]
    fn invalid_config_fails_fast() {
        for (param, value) in [
            ("periodMs", Value::Float(0.0)),
            ("periodMs", Value::Text("soon".into())),
            ("mode", Value::Text("bounce".into())),
        ] {
            let p = Patch::new().block(Block::new("t", "CycleTimeRoot").with_param(param, value));
            let r = run(&p);
            assert_eq!(r.diagnostics.len(), 1, "{param}");
            assert_eq!(r.diagnostics[0].code, Some(codes::E0202));
        }
    }

    #[test]
    fn model_serializes_camel_case() {
        let json = serde_json::to_string(&TimeModel::Finite { duration_ms: 8000.0 }).unwrap();
        assert_eq!(json, r#"{"kind":"finite","durationMs":8000.0}"#);
    }
}
