// pass.rs — Pass descriptor module: metadata, dependency resolution, artifact IDs
//
// Declares the compiler's 8 stages, their dependency edges, and the
// artifacts they produce. Used by the pipeline runner to run the minimal
// prefix of the pipeline for each --emit target.

use std::collections::HashSet;

// ── Pass and Artifact identifiers ──────────────────────────────────────────

/// Identifies each compiler stage. Patch decoding happens before the runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassId {
    Normalize,
    TypeGraph,
    TimeTopology,
    DepGraph,
    CycleCheck,
    LowerBlocks,
    LowerBuses,
    Link,
}

/// Machine-readable artifact identifiers. Each maps to a concrete type
/// in the compilation state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactId {
    Normalized, // NormalizedPatch
    Consts,     // ConstPool
    Typed,      // TypedPatch
    Time,       // TimeResolved
    Graph,      // DependencyGraph
    Validated,  // ValidatedGraph
    BusSlots,   // Vec<Option<SlotId>>
    Lowered,    // LoweredBlocks
    BusValues,  // Vec<BusOutcome>
    Linked,     // LinkedIr
    Cert,       // IrCert
}

// ── Pass descriptor ────────────────────────────────────────────────────────

/// Static metadata about a compiler pass.
pub struct PassDescriptor {
    /// Human-readable name for diagnostics/verbose output.
    pub name: &'static str,
    /// Pass dependencies (other passes whose outputs this pass consumes).
    pub inputs: &'static [PassId],
    /// Artifacts this pass produces.
    pub outputs: &'static [ArtifactId],
    /// What invalidates this pass's output.
    pub invalidation_key: &'static str,
    /// Postconditions, documentation only.
    pub invariants: &'static str,
}

/// Return the static descriptor for a given pass.
pub fn descriptor(id: PassId) -> PassDescriptor {
    match id {
        PassId::Normalize => PassDescriptor {
            name: "normalize",
            inputs: &[],
            outputs: &[ArtifactId::Normalized, ArtifactId::Consts],
            invalidation_key: "patch + block registry",
            invariants: "ids unique, edges canonically ordered, defaults interned",
        },
        PassId::TypeGraph => PassDescriptor {
            name: "type_graph",
            inputs: &[PassId::Normalize],
            outputs: &[ArtifactId::Typed],
            invalidation_key: "normalized + registries",
            invariants: "every port and bus typed, every edge has a conversion",
        },
        PassId::TimeTopology => PassDescriptor {
            name: "time_topology",
            inputs: &[PassId::Normalize],
            outputs: &[ArtifactId::Time],
            invalidation_key: "normalized + block registry",
            invariants: "exactly one time root, model resolved",
        },
        PassId::DepGraph => PassDescriptor {
            name: "dep_graph",
            inputs: &[PassId::Normalize],
            outputs: &[ArtifactId::Graph],
            invalidation_key: "normalized + block registry",
            invariants: "every enabled edge endpoint resolves to a node",
        },
        PassId::CycleCheck => PassDescriptor {
            name: "cycle_check",
            inputs: &[PassId::DepGraph],
            outputs: &[ArtifactId::Validated],
            invalidation_key: "graph + block registry",
            invariants: "SCCs partition the nodes, every cycle crosses a state boundary",
        },
        PassId::LowerBlocks => PassDescriptor {
            name: "lower_blocks",
            inputs: &[PassId::TypeGraph, PassId::TimeTopology, PassId::CycleCheck],
            outputs: &[ArtifactId::BusSlots, ArtifactId::Lowered],
            invalidation_key: "typed + time + validated + registries",
            invariants: "one combine node per multi-writer input, pure blocks allocate no state",
        },
        PassId::LowerBuses => PassDescriptor {
            name: "lower_buses",
            inputs: &[PassId::LowerBlocks],
            outputs: &[ArtifactId::BusValues],
            invalidation_key: "lowered + typed + transform registry",
            invariants: "every bus slot bound to a combine or default",
        },
        PassId::Link => PassDescriptor {
            name: "link",
            inputs: &[PassId::LowerBuses],
            outputs: &[ArtifactId::Linked, ArtifactId::Cert],
            invalidation_key: "lowered + bus values + compile options",
            invariants: "R1-R3 obligations verified",
        },
    }
}

// ── Stage certificates ─────────────────────────────────────────────────────

/// Machine-checkable evidence that a stage met its postconditions.
pub trait StageCert {
    fn all_pass(&self) -> bool;
    /// Obligation names paired with their outcome, in a stable order.
    fn obligations(&self) -> Vec<(&'static str, bool)>;
}

// ── Dependency resolution ──────────────────────────────────────────────────

/// All 8 pass IDs in execution order.
pub const ALL_PASSES: [PassId; 8] = [
    PassId::Normalize,
    PassId::TypeGraph,
    PassId::TimeTopology,
    PassId::DepGraph,
    PassId::CycleCheck,
    PassId::LowerBlocks,
    PassId::LowerBuses,
    PassId::Link,
];

/// Compute the minimal ordered set of passes needed to produce `terminal`.
/// Returns passes in topological (execution) order.
pub fn required_passes(terminal: PassId) -> Vec<PassId> {
    let mut visited = HashSet::new();
    let mut order = Vec::new();
    visit(terminal, &mut visited, &mut order);
    order
}

fn visit(id: PassId, visited: &mut HashSet<PassId>, order: &mut Vec<PassId>) {
    if !visited.insert(id) {
        return;
    }
    for &dep in descriptor(id).inputs {
        visit(dep, visited, order);
    }
    order.push(id);
}

// ── Tests ──────────────────────────────────────────────────────────────────
