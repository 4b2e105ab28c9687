// init_loops.rs - Runtime parameters of loops
//
// For every loop of the linear IR, computes the work amount (when it is still
// dynamic) and, per entry/exit port, whether the pointer moves, the element
// size, the per-iteration pointer increment, and the finalization offset that
// rewinds the pointer once the loop is done.
//
// Preconditions: loops and loop ports were created upstream; every loop port
//                refers to an existing expression port enclosed by that loop.
// Postconditions: all loop ports carry `is_incremented`, `data_size`,
//                 `ptr_increment` and `finalization_offset`; the `LoopCert`
//                 obligations hold.
// Failure modes: malformed IR (dangling ids, out-of-range dims, expressions
//                outside loops, non-broadcastable extents) aborts the pass.
// Side effects: mutates loop records in place; never adds or removes loops/ports.

use thiserror::Error;

use crate::dim::{broadcast_merge_dim, input_dim_idx, output_dim_idx, stride_after, Dim, Offset};
use crate::id::LoopId;
use crate::ir::{ExprGraph, Expression, IrError, LinearIr, PortDescriptor, PortType};
use crate::loops::{LoopInfo, LoopPort};
use crate::pass::{Pass, StageCert};

// ── Errors ─────────────────────────────────────────────────────────────────

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InitLoopsError {
    #[error(transparent)]
    Ir(#[from] IrError),
    #[error("loop {loop_id}: port expression {expr} is not enclosed by any loop")]
    ExpressionOutsideLoops { loop_id: LoopId, expr: String },
    #[error("loop {loop_id}: port extents {lhs} and {rhs} cannot be broadcast together")]
    IncompatibleWorkAmount { loop_id: LoopId, lhs: Dim, rhs: Dim },
    #[error("loop {0} does not exist")]
    MissingLoop(LoopId),
}

// ── Buffer-boundary detection ──────────────────────────────────────────────

/// True if `expr_loops` and `target_loops` agree on a common prefix that
/// reaches `loop_id`.
///
/// The lists are walked in lock step from the outermost loop. The walk stops
/// with `false` at the first position where they differ or when either list
/// ends; it stops with `true` at the first shared entry equal to `loop_id`.
pub fn shares_loop_prefix(expr_loops: &[LoopId], target_loops: &[LoopId], loop_id: LoopId) -> bool {
    expr_loops
        .iter()
        .zip(target_loops)
        .take_while(|(a, b)| a == b)
        .any(|(_, &shared)| shared == loop_id)
}

fn is_buffer_boundary(expr: &Expression, target: &Expression, loop_id: LoopId) -> bool {
    target.node.is_intermediate_buffer()
        && shares_loop_prefix(&expr.loop_ids, &target.loop_ids, loop_id)
}

// ── Per-port initialization ────────────────────────────────────────────────

/// Decide whether `loop_id` advances the pointer of `port`.
///
/// Only memory-access expressions own movable pointers. When the loop is not
/// the innermost loop of the expression, the increment is dropped if an
/// intermediate buffer on the other side of the port lives under the same
/// loop prefix: the buffer already separates the two nests, so the shared
/// outer loop must not move this pointer. Otherwise the flag is left as is.
fn init_is_incremented(
    graph: &ExprGraph,
    port: &mut LoopPort,
    loop_id: LoopId,
) -> Result<(), InitLoopsError> {
    let expr = graph.expr(port.expr_port.expr)?;
    if expr.node.as_memory_access().is_none() {
        port.is_incremented = false;
        return Ok(());
    }
    let innermost = expr
        .innermost_loop()
        .ok_or_else(|| InitLoopsError::ExpressionOutsideLoops {
            loop_id,
            expr: expr.label(),
        })?;
    if innermost == loop_id {
        return Ok(());
    }

    let connector = graph.port_connector(port.expr_port)?;
    let suppressed = match port.expr_port.port_type {
        PortType::Output => {
            let mut found = false;
            for consumer in &connector.consumers {
                if is_buffer_boundary(expr, graph.expr(consumer.expr)?, loop_id) {
                    found = true;
                    break;
                }
            }
            found
        }
        PortType::Input => is_buffer_boundary(expr, graph.expr(connector.source.expr)?, loop_id),
    };
    if suppressed {
        log::trace!(
            "init_loops: loop {}: {} port {} of {} sits behind a buffer, not incremented",
            loop_id,
            port_type_name(port.expr_port.port_type),
            port.expr_port.index,
            expr.label()
        );
        port.is_incremented = false;
    }
    Ok(())
}

fn init_data_size(graph: &ExprGraph, port: &mut LoopPort) -> Result<(), InitLoopsError> {
    port.data_size = graph.descriptor(port.expr_port)?.element_type.size();
    Ok(())
}

/// Physical axis walked by a loop port, resolved through the port's layout.
fn physical_dim(
    desc: &PortDescriptor,
    port_type: PortType,
    dim_idx: usize,
) -> Result<usize, IrError> {
    let dim = match port_type {
        PortType::Input => input_dim_idx(&desc.layout, dim_idx),
        PortType::Output => output_dim_idx(&desc.layout, dim_idx),
    };
    dim.filter(|&d| d < desc.shape.len())
        .ok_or_else(|| IrError::DimOutOfRange {
            dim_idx,
            layout: desc.layout.clone(),
        })
}

/// Extent of the dimension a loop port walks.
fn port_extent(graph: &ExprGraph, port: &LoopPort) -> Result<Dim, IrError> {
    let desc = graph.descriptor(port.expr_port)?;
    let dim = physical_dim(desc, port.expr_port.port_type, port.dim_idx)?;
    Ok(desc.shape[dim])
}

fn init_ptr_increment(
    graph: &ExprGraph,
    port: &mut LoopPort,
    work_amount: Dim,
) -> Result<(), InitLoopsError> {
    port.ptr_increment = Offset::ZERO;
    if !port.is_incremented {
        return Ok(());
    }

    let desc = graph.descriptor(port.expr_port)?;
    let dim = physical_dim(desc, port.expr_port.port_type, port.dim_idx)?;
    let extent = desc.shape[dim];
    let is_last = dim + 1 == desc.shape.len();

    port.ptr_increment = if is_last && extent.is_dynamic() {
        // Nothing is known about broadcasting along the innermost axis.
        Offset::Dynamic
    } else if extent.is_one() && !work_amount.is_one() {
        // Broadcast axis: the pointer stays put.
        Offset::ZERO
    } else {
        stride_after(dim, &desc.shape)
    };
    Ok(())
}

/// `-(ptr_increment * work_amount)`, or dynamic when either factor is.
fn finalization_offset(ptr_increment: Offset, work_amount: Dim) -> Offset {
    let (Offset::Known(inc), Dim::Known(wa)) = (ptr_increment, work_amount) else {
        return Offset::Dynamic;
    };
    let rewind = i64::try_from(wa)
        .ok()
        .and_then(|wa| inc.checked_mul(wa))
        .and_then(i64::checked_neg);
    match rewind {
        Some(offset) => Offset::Known(offset),
        None => {
            log::warn!(
                "finalization offset {} * {} overflows, treating as dynamic",
                inc,
                wa
            );
            Offset::Dynamic
        }
    }
}

fn init_finalization_offset(port: &mut LoopPort, work_amount: Dim) {
    port.finalization_offset = finalization_offset(port.ptr_increment, work_amount);
}

fn init_runtime_parameters(
    graph: &ExprGraph,
    port: &mut LoopPort,
    work_amount: Dim,
) -> Result<(), InitLoopsError> {
    init_ptr_increment(graph, port, work_amount)?;
    init_finalization_offset(port, work_amount);
    Ok(())
}

// ── Work amount ────────────────────────────────────────────────────────────

/// Broadcast merge of the walked extents of all incrementing ports.
fn merged_extent(
    graph: &ExprGraph,
    loop_id: LoopId,
    info: &LoopInfo,
) -> Result<Dim, InitLoopsError> {
    let mut work_amount = Dim::Known(1);
    for port in info.ports().filter(|p| p.is_incremented) {
        let extent = port_extent(graph, port)?;
        work_amount = broadcast_merge_dim(work_amount, extent).ok_or(
            InitLoopsError::IncompatibleWorkAmount {
                loop_id,
                lhs: work_amount,
                rhs: extent,
            },
        )?;
    }
    Ok(work_amount)
}

fn init_work_amount(
    graph: &ExprGraph,
    loop_id: LoopId,
    info: &mut LoopInfo,
) -> Result<(), InitLoopsError> {
    info.work_amount = merged_extent(graph, loop_id, info)?;
    Ok(())
}

// ── Pass ───────────────────────────────────────────────────────────────────

/// Initializes runtime parameters of every loop in the linear IR.
#[derive(Debug, Default, Clone, Copy)]
pub struct InitLoops;

impl InitLoops {
    pub fn new() -> Self {
        Self
    }

    /// Initialize one loop.
    ///
    /// A dynamic work amount is resolved first, from the increment flags the
    /// ports carry on entry. The full mode then classifies each port, sets its
    /// element size and computes its increment and offset. With
    /// `only_runtime_args` the topology-derived fields are kept and only the
    /// increments and offsets are recomputed.
    pub fn init_loop_info(
        graph: &ExprGraph,
        loop_id: LoopId,
        info: &mut LoopInfo,
        only_runtime_args: bool,
    ) -> Result<(), InitLoopsError> {
        if info.work_amount.is_dynamic() {
            init_work_amount(graph, loop_id, info)?;
        }
        let work_amount = info.work_amount;
        log::debug!("init_loops: loop {} work_amount = {}", loop_id, work_amount);

        for port in info.ports_mut() {
            if !only_runtime_args {
                init_is_incremented(graph, port, loop_id)?;
                init_data_size(graph, port)?;
            }
            init_runtime_parameters(graph, port, work_amount)?;
            log::trace!(
                "init_loops: loop {}: port #{}.{}[{}] inc={} ptr_increment={} finalization_offset={}",
                loop_id,
                port.expr_port.expr.0,
                port_type_name(port.expr_port.port_type),
                port.expr_port.index,
                port.is_incremented,
                port.ptr_increment,
                port.finalization_offset
            );
        }
        Ok(())
    }

    /// Re-derive increments and offsets for a concrete `work_amount`, e.g. once
    /// shapes are known at kernel invocation. Classification and element sizes
    /// are left untouched.
    pub fn refresh(
        graph: &ExprGraph,
        loop_id: LoopId,
        info: &mut LoopInfo,
        work_amount: Dim,
    ) -> Result<(), InitLoopsError> {
        log::debug!(
            "init_loops: refresh loop {} work_amount {} -> {}",
            loop_id,
            info.work_amount,
            work_amount
        );
        info.work_amount = work_amount;
        for port in info.ports_mut() {
            init_runtime_parameters(graph, port, work_amount)?;
        }
        Ok(())
    }

    /// Refresh a single loop of `ir` by id.
    pub fn refresh_loop(
        ir: &mut LinearIr,
        loop_id: LoopId,
        work_amount: Dim,
    ) -> Result<(), InitLoopsError> {
        let info = ir
            .loops
            .get_mut(loop_id)
            .ok_or(InitLoopsError::MissingLoop(loop_id))?;
        Self::refresh(&ir.graph, loop_id, info, work_amount)
    }

    /// Run over every loop in ascending id order. Returns `false` only when
    /// the IR has no loops.
    pub fn run_with(ir: &mut LinearIr, only_runtime_args: bool) -> Result<bool, InitLoopsError> {
        if ir.is_empty() || ir.loops.is_empty() {
            return Ok(false);
        }
        for (loop_id, info) in ir.loops.iter_mut() {
            Self::init_loop_info(&ir.graph, loop_id, info, only_runtime_args)?;
        }
        Ok(true)
    }
}

impl Pass for InitLoops {
    type Error = InitLoopsError;

    fn name(&self) -> &'static str {
        "init_loops"
    }

    fn run(&mut self, ir: &mut LinearIr) -> Result<bool, InitLoopsError> {
        Self::run_with(ir, false)
    }
}

fn port_type_name(port_type: PortType) -> &'static str {
    match port_type {
        PortType::Input => "in",
        PortType::Output => "out",
    }
}

// ── Verification ───────────────────────────────────────────────────────────

/// Machine-checkable evidence for loop parameter postconditions (P1-P4).
#[derive(Debug, Clone)]
pub struct LoopCert {
    /// P1: Ports that are not incremented have a zero pointer increment.
    pub p1_fixed_ports_stay: bool,
    /// P2: Finalization offsets undo exactly `ptr_increment * work_amount`.
    pub p2_finalization_rewinds: bool,
    /// P3: Concrete work amounts broadcast with every incrementing port extent.
    pub p3_work_amount_consistent: bool,
    /// P4: Every port has a non-zero element size.
    pub p4_data_size_set: bool,
}

impl StageCert for LoopCert {
    fn all_pass(&self) -> bool {
        self.p1_fixed_ports_stay
            && self.p2_finalization_rewinds
            && self.p3_work_amount_consistent
            && self.p4_data_size_set
    }

    fn obligations(&self) -> Vec<(&'static str, bool)> {
        vec![
            ("P1_fixed_ports_stay", self.p1_fixed_ports_stay),
            ("P2_finalization_rewinds", self.p2_finalization_rewinds),
            ("P3_work_amount_consistent", self.p3_work_amount_consistent),
            ("P4_data_size_set", self.p4_data_size_set),
        ]
    }
}

/// Verify loop parameter postconditions.
pub fn verify_loops(ir: &LinearIr) -> LoopCert {
    LoopCert {
        p1_fixed_ports_stay: verify_p1_fixed_ports_stay(ir),
        p2_finalization_rewinds: verify_p2_finalization_rewinds(ir),
        p3_work_amount_consistent: verify_p3_work_amount_consistent(ir),
        p4_data_size_set: verify_p4_data_size_set(ir),
    }
}

fn verify_p1_fixed_ports_stay(ir: &LinearIr) -> bool {
    ir.loops.iter().all(|(_, info)| {
        info.ports()
            .filter(|p| !p.is_incremented)
            .all(|p| p.ptr_increment == Offset::ZERO)
    })
}

fn verify_p2_finalization_rewinds(ir: &LinearIr) -> bool {
    ir.loops.iter().all(|(_, info)| {
        info.ports()
            .all(|p| p.finalization_offset == finalization_offset(p.ptr_increment, info.work_amount))
    })
}

/// P3: a concrete work amount must absorb the extents of the ports that still
/// increment. The work amount was folded before classification, so ports
/// dropped since then (buffer boundaries, compute ops) may have widened it;
/// the check is broadcast compatibility, not equality. Dynamic work amounts,
/// and folds that are only known at invocation time, are not checked.
fn verify_p3_work_amount_consistent(ir: &LinearIr) -> bool {
    ir.loops.iter().all(|(loop_id, info)| {
        if info.work_amount.is_dynamic() {
            return true;
        }
        match merged_extent(&ir.graph, loop_id, info) {
            Ok(Dim::Dynamic) => true,
            Ok(merged) => broadcast_merge_dim(merged, info.work_amount) == Some(info.work_amount),
            Err(_) => false,
        }
    })
}

fn verify_p4_data_size_set(ir: &LinearIr) -> bool {
    ir.loops
        .iter()
        .all(|(_, info)| info.ports().all(|p| p.data_size > 0))
}
