// report.rs - Loop parameter reports (`--emit params` and `--emit json`)

use std::fmt;

use serde::Serialize;

use crate::dim::{format_shape, Dim, Offset};
use crate::id::LoopId;
use crate::ir::{LinearIr, PortType};
use crate::loops::LoopPort;

#[derive(Debug, Clone, Serialize)]
pub struct ParamsReport {
    pub loops: Vec<LoopReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoopReport {
    pub id: LoopId,
    pub work_amount: Dim,
    pub entry_points: Vec<PortReport>,
    pub exit_points: Vec<PortReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PortReport {
    /// Source-style reference, e.g. `%ld.in[0]`.
    pub port: String,
    pub port_type: PortType,
    /// Shape of the bound port, `null` if the port cannot be resolved.
    pub shape: Option<String>,
    pub dim_idx: usize,
    pub is_incremented: bool,
    pub data_size: usize,
    pub ptr_increment: Offset,
    pub finalization_offset: Offset,
}

/// Snapshot the loop records of `ir`, loops in ascending id order.
pub fn build_report(ir: &LinearIr) -> ParamsReport {
    let port_report = |port: &LoopPort| PortReport {
        port: ir.port_ref(port.expr_port),
        port_type: port.expr_port.port_type,
        shape: ir
            .graph
            .descriptor(port.expr_port)
            .ok()
            .map(|d| format_shape(&d.shape)),
        dim_idx: port.dim_idx,
        is_incremented: port.is_incremented,
        data_size: port.data_size,
        ptr_increment: port.ptr_increment,
        finalization_offset: port.finalization_offset,
    };
    let loops = ir
        .loops
        .iter()
        .map(|(id, info)| LoopReport {
            id,
            work_amount: info.work_amount,
            entry_points: info.entry_points.iter().map(port_report).collect(),
            exit_points: info.exit_points.iter().map(port_report).collect(),
        })
        .collect();
    ParamsReport { loops }
}

impl ParamsReport {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl fmt::Display for ParamsReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for info in &self.loops {
            writeln!(f, "loop {}: work_amount = {}", info.id, info.work_amount)?;
            for (kind, ports) in [("entry", &info.entry_points), ("exit", &info.exit_points)] {
                for port in ports {
                    writeln!(
                        f,
                        "    {kind} {}: dim {}, {}, data_size {}, ptr_increment {}, finalization_offset {}",
                        port.port,
                        port.dim_idx,
                        if port.is_incremented { "incremented" } else { "fixed" },
                        port.data_size,
                        port.ptr_increment,
                        port.finalization_offset
                    )?;
                }
            }
        }
        Ok(())
    }
}
