// id.rs - Stable identifiers for linear IR entities
//
// Loop ids come from the kernel description and are immutable keys.
// Expression and connector ids are dense indices assigned in program order
// while the IR is built.

use std::fmt;

use serde::Serialize;

/// Identifier of a loop in the loop manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct LoopId(pub u32);

/// Index of an expression in the linear IR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExprId(pub u32);

/// Index of a port connector (one producer, any number of consumers).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectorId(pub u32);

impl fmt::Display for LoopId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Allocator for dense ids. Produces monotonically increasing ids in
/// allocation order, so IR listings are deterministic.
#[derive(Debug, Default)]
pub struct IdAllocator {
    next_expr: u32,
    next_connector: u32,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc_expr(&mut self) -> ExprId {
        let id = ExprId(self.next_expr);
        self.next_expr += 1;
        id
    }

    pub fn alloc_connector(&mut self) -> ConnectorId {
        let id = ConnectorId(self.next_connector);
        self.next_connector += 1;
        id
    }
}
