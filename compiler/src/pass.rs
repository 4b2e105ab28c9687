// pass.rs - Pass descriptor module: metadata, dependency resolution, pass traits
//
// Declares the passes run over a kernel after parsing, their dependency
// edges, and the artifacts they produce. Used by the pipeline runner to
// compute minimal pass subsets for each --emit target.

use std::collections::HashSet;

use crate::ir::LinearIr;

// ── Pass and Artifact identifiers ──────────────────────────────────────────

/// Identifies each pass (parse excluded - handled before the runner).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassId {
    Lower,
    InitLoops,
    Refresh,
    Verify,
}

/// Machine-readable artifact identifiers. Each maps to a concrete type
/// in the compilation state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactId {
    Ir,          // LinearIr
    LoopParams,  // LoopManager fields filled in place
    Specialized, // LoopManager after work-amount overrides
    Cert,        // LoopCert
}

// ── Pass descriptor ────────────────────────────────────────────────────────

/// Static metadata about a pass.
pub struct PassDescriptor {
    /// Human-readable name for diagnostics/verbose output.
    pub name: &'static str,
    /// Pass dependencies (other passes whose outputs this pass consumes).
    pub inputs: &'static [PassId],
    /// Artifacts this pass produces.
    pub outputs: &'static [ArtifactId],
    /// Pre/post conditions (documentation only).
    pub invariants: &'static str,
}

/// Return the static descriptor for a given pass.
pub fn descriptor(id: PassId) -> PassDescriptor {
    match id {
        PassId::Lower => PassDescriptor {
            name: "lower",
            inputs: &[],
            outputs: &[ArtifactId::Ir],
            invariants: "all values, loops and ports resolved; layouts are permutations",
        },
        PassId::InitLoops => PassDescriptor {
            name: "init_loops",
            inputs: &[PassId::Lower],
            outputs: &[ArtifactId::LoopParams],
            invariants: "every loop port classified, sized, and has increments/offsets",
        },
        PassId::Refresh => PassDescriptor {
            name: "refresh",
            inputs: &[PassId::InitLoops],
            outputs: &[ArtifactId::Specialized],
            invariants: "overridden loops carry the requested work amount; classification untouched",
        },
        PassId::Verify => PassDescriptor {
            name: "verify",
            inputs: &[PassId::Refresh],
            outputs: &[ArtifactId::Cert],
            invariants: "P1-P4 obligations verified",
        },
    }
}

// ── Dependency resolution ──────────────────────────────────────────────────

/// All pass IDs in declaration order (used for iteration).
pub const ALL_PASSES: [PassId; 4] = [
    PassId::Lower,
    PassId::InitLoops,
    PassId::Refresh,
    PassId::Verify,
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

// ── Traits ─────────────────────────────────────────────────────────────────

/// Machine-checkable postconditions of a pass.
pub trait StageCert {
    fn all_pass(&self) -> bool;

    /// Named obligations and whether each holds.
    fn obligations(&self) -> Vec<(&'static str, bool)>;

    /// Names of the obligations that do not hold.
    fn failed(&self) -> Vec<&'static str> {
        self.obligations()
            .into_iter()
            .filter(|(_, ok)| !ok)
            .map(|(name, _)| name)
            .collect()
    }
}

/// An in-place transformation of the linear IR.
pub trait Pass {
    type Error: std::error::Error;

    fn name(&self) -> &'static str;

    /// Run over `ir`. Returns whether anything was changed.
    fn run(&mut self, ir: &mut LinearIr) -> Result<bool, Self::Error>;
}

// ── Tests ──────────────────────────────────────────────────────────────────
