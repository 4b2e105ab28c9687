// loops.rs - Loop records of the linear IR
//
// Loops are created upstream together with their entry/exit ports; passes
// here only fill in the computed fields (work amount, increments, offsets).
// The manager keeps loops ordered by id so every traversal is deterministic.

use std::collections::btree_map::{self, BTreeMap};

use crate::dim::{Dim, Offset};
use crate::id::LoopId;
use crate::ir::ExpressionPort;

/// A loop's binding to one operand of one expression inside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopPort {
    pub expr_port: ExpressionPort,
    /// Logical dimension walked by the loop, counted from the innermost axis.
    pub dim_idx: usize,
    pub is_incremented: bool,
    /// Element size in bytes.
    pub data_size: usize,
    /// Elements to advance per iteration.
    pub ptr_increment: Offset,
    /// Pointer adjustment applied once after the last iteration.
    pub finalization_offset: Offset,
}

impl LoopPort {
    pub fn new(expr_port: ExpressionPort, dim_idx: usize) -> Self {
        Self {
            expr_port,
            dim_idx,
            is_incremented: true,
            data_size: 0,
            ptr_increment: Offset::ZERO,
            finalization_offset: Offset::ZERO,
        }
    }

    /// Port whose pointer the loop never advances.
    pub fn fixed(mut self) -> Self {
        self.is_incremented = false;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopInfo {
    pub work_amount: Dim,
    pub entry_points: Vec<LoopPort>,
    pub exit_points: Vec<LoopPort>,
}

impl LoopInfo {
    pub fn new(work_amount: Dim, entry_points: Vec<LoopPort>, exit_points: Vec<LoopPort>) -> Self {
        Self {
            work_amount,
            entry_points,
            exit_points,
        }
    }

    /// Entry ports followed by exit ports.
    pub fn ports(&self) -> impl Iterator<Item = &LoopPort> {
        self.entry_points.iter().chain(self.exit_points.iter())
    }

    pub fn ports_mut(&mut self) -> impl Iterator<Item = &mut LoopPort> {
        self.entry_points
            .iter_mut()
            .chain(self.exit_points.iter_mut())
    }
}

/// All loops of a kernel, keyed by id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoopManager {
    loops: BTreeMap<LoopId, LoopInfo>,
}

impl LoopManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a loop. Returns `false` (and keeps the existing record) if the
    /// id is already taken.
    pub fn insert(&mut self, id: LoopId, info: LoopInfo) -> bool {
        match self.loops.entry(id) {
            btree_map::Entry::Vacant(slot) => {
                slot.insert(info);
                true
            }
            btree_map::Entry::Occupied(_) => false,
        }
    }

    pub fn get(&self, id: LoopId) -> Option<&LoopInfo> {
        self.loops.get(&id)
    }

    pub fn get_mut(&mut self, id: LoopId) -> Option<&mut LoopInfo> {
        self.loops.get_mut(&id)
    }

    pub fn contains(&self, id: LoopId) -> bool {
        self.loops.contains_key(&id)
    }

    /// Loops in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = (LoopId, &LoopInfo)> {
        self.loops.iter().map(|(id, info)| (*id, info))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (LoopId, &mut LoopInfo)> {
        self.loops.iter_mut().map(|(id, info)| (*id, info))
    }

    pub fn len(&self) -> usize {
        self.loops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loops.is_empty()
    }
}
