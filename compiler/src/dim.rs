// dim.rs - Dimension arithmetic over partially-known shapes
//
// Sizes and pointer offsets are tagged values: either a concrete number or
// `Dynamic` (resolved only when the kernel is invoked). Every helper here
// propagates `Dynamic` instead of producing a made-up static value.
//
// Preconditions: none (pure functions).
// Postconditions: results are `Dynamic` whenever an input that matters is `Dynamic`.
// Failure modes: layout lookups with out-of-range indices return `None`.
// Side effects: none.

use std::fmt;

use serde::Serialize;

// ── Tagged values ──────────────────────────────────────────────────────────

/// A dimension extent or iteration count. Serializes as a number, or `null`
/// when dynamic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(untagged)]
pub enum Dim {
    Known(u64),
    Dynamic,
}

/// A signed pointer quantity measured in elements (increment or rewind).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(untagged)]
pub enum Offset {
    Known(i64),
    Dynamic,
}

impl Dim {
    pub fn is_dynamic(self) -> bool {
        matches!(self, Dim::Dynamic)
    }

    /// True only for a concrete extent of exactly one.
    pub fn is_one(self) -> bool {
        self == Dim::Known(1)
    }
}

impl Offset {
    pub const ZERO: Offset = Offset::Known(0);
}

impl fmt::Display for Dim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dim::Known(n) => write!(f, "{n}"),
            Dim::Dynamic => write!(f, "?"),
        }
    }
}

impl fmt::Display for Offset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Offset::Known(n) => write!(f, "{n}"),
            Offset::Dynamic => write!(f, "?"),
        }
    }
}

/// Render a shape as `[4, ?, 8]`.
pub fn format_shape(shape: &[Dim]) -> String {
    let dims: Vec<String> = shape.iter().map(|d| d.to_string()).collect();
    format!("[{}]", dims.join(", "))
}

// ── Strides ────────────────────────────────────────────────────────────────

/// Number of elements between two consecutive steps along `dim_idx`: the
/// product of all extents strictly after it.
///
/// One dynamic trailing extent makes the whole stride dynamic. A product that
/// does not fit in `i64` is also reported as dynamic.
pub fn stride_after(dim_idx: usize, shape: &[Dim]) -> Offset {
    let mut stride: i64 = 1;
    for dim in shape.iter().skip(dim_idx + 1) {
        let Dim::Known(n) = *dim else {
            return Offset::Dynamic;
        };
        let Some(next) = i64::try_from(n).ok().and_then(|n| stride.checked_mul(n)) else {
            log::warn!(
                "stride after dim {} of {} overflows, treating as dynamic",
                dim_idx,
                format_shape(shape)
            );
            return Offset::Dynamic;
        };
        stride = next;
    }
    Offset::Known(stride)
}

// ── Broadcasting ───────────────────────────────────────────────────────────

/// Merge two extents under broadcasting rules.
///
/// `1` merges with anything; equal extents merge to themselves; a dynamic
/// extent absorbs everything (an upper-bound estimate, not strict shape
/// inference). Two different concrete extents, neither of them `1`, do not
/// broadcast and yield `None`.
pub fn broadcast_merge_dim(a: Dim, b: Dim) -> Option<Dim> {
    match (a, b) {
        (Dim::Dynamic, _) | (_, Dim::Dynamic) => Some(Dim::Dynamic),
        (Dim::Known(x), Dim::Known(y)) if x == y => Some(a),
        (Dim::Known(1), other) | (other, Dim::Known(1)) => Some(other),
        _ => None,
    }
}

// ── Layout mapping ─────────────────────────────────────────────────────────

/// Physical axis of an input port walked by a loop over logical `dim_idx`
/// (counted from the innermost axis).
pub fn input_dim_idx(layout: &[usize], dim_idx: usize) -> Option<usize> {
    let pos = layout.len().checked_sub(dim_idx + 1)?;
    layout.get(pos).copied()
}

/// Physical axis of an output port: the position at which the layout stores
/// the logical axis `len - 1 - dim_idx`.
pub fn output_dim_idx(layout: &[usize], dim_idx: usize) -> Option<usize> {
    let logical = layout.len().checked_sub(dim_idx + 1)?;
    layout.iter().position(|&axis| axis == logical)
}

/// True if `layout` is a permutation of `0..layout.len()`.
pub fn is_permutation(layout: &[usize]) -> bool {
    let mut seen = vec![false; layout.len()];
    for &axis in layout {
        match seen.get_mut(axis) {
            Some(slot) if !*slot => *slot = true,
            _ => return false,
        }
    }
    true
}
