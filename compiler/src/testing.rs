// testing.rs — Shared staging for unit tests of stages 6–8
//
// Runs stages 1–5 on a patch and keeps every artifact so a test can build
// a `LowerEnv` and drive the lowering stages by hand.

use crate::cycles::{validate_cycles, ValidatedGraph};
use crate::dep_graph::{build_dep_graph, DependencyGraph};
use crate::ir::ConstPool;
use crate::ir_builder::IrBuilder;
use crate::lower::LowerEnv;
use crate::normalize::{normalize, NormalizedPatch};
use crate::patch::{Block, Patch};
use crate::registry::Registries;
use crate::time_topology::{resolve_time, TimeResolved};
use crate::type_graph::{build_type_graph, TypedPatch};

pub(crate) struct Staged {
    pub regs: Registries,
    pub n: NormalizedPatch,
    pub typed: TypedPatch,
    pub time: TimeResolved,
    pub graph: DependencyGraph,
    pub validated: ValidatedGraph,
    pub consts: ConstPool,
}

impl Staged {
    pub fn env(&self) -> LowerEnv<'_> {
        LowerEnv {
            normalized: &self.n,
            typed: &self.typed,
            time: &self.time,
            graph: &self.graph,
            validated: &self.validated,
            registries: &self.regs,
        }
    }

    pub fn builder(&self) -> IrBuilder {
        let mut b = IrBuilder::new(self.consts.clone());
        b.set_time_model(self.time.model);
        b
    }
}

pub(crate) fn stage(patch: &Patch) -> Staged {
    stage_with(patch, Registries::builtin())
}

/// Panics if stages 1–5 report anything.
pub(crate) fn stage_with(patch: &Patch, regs: Registries) -> Staged {
    let r = normalize(patch, &regs);
    let typed = build_type_graph(&r.normalized, &regs);
    assert!(typed.diagnostics.is_empty(), "{:?}", typed.diagnostics);
    let time = resolve_time(&r.normalized, &regs)
        .resolved
        .expect("time root");
    let graph = build_dep_graph(&r.normalized, &regs).graph;
    let validated = validate_cycles(&graph, &r.normalized, &regs).validated;
    Staged {
        n: r.normalized,
        typed: typed.typed,
        time,
        graph,
        validated,
        consts: r.consts,
        regs,
    }
}

pub(crate) fn clock() -> Block {
    Block::new("clock", "CycleTimeRoot")
}
