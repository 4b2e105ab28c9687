// ir.rs - Linear IR: ordered expressions, their ports, and connectors
//
// The linear IR is the lowered kernel as a flat sequence of expressions. Each
// expression carries the ordered list of loops enclosing it (outermost first)
// and a descriptor per input/output port. Ports are linked through connectors:
// one producing output port, any number of consuming input ports.
//
// `LinearIr` is split into the expression graph and the loop manager so that a
// pass can read descriptors while it mutates loop records.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::dim::{format_shape, Dim};
use crate::id::{ConnectorId, ExprId, LoopId};
use crate::loops::LoopManager;
use crate::node::Node;

// ── Element types ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementType {
    F64,
    F32,
    F16,
    Bf16,
    I64,
    I32,
    I16,
    I8,
    U8,
    Boolean,
}

impl ElementType {
    pub fn parse(name: &str) -> Option<Self> {
        let ty = match name {
            "f64" => ElementType::F64,
            "f32" => ElementType::F32,
            "f16" => ElementType::F16,
            "bf16" => ElementType::Bf16,
            "i64" => ElementType::I64,
            "i32" => ElementType::I32,
            "i16" => ElementType::I16,
            "i8" => ElementType::I8,
            "u8" => ElementType::U8,
            "boolean" => ElementType::Boolean,
            _ => return None,
        };
        Some(ty)
    }

    /// Size of one element in bytes.
    pub fn size(self) -> usize {
        match self {
            ElementType::F64 | ElementType::I64 => 8,
            ElementType::F32 | ElementType::I32 => 4,
            ElementType::F16 | ElementType::Bf16 | ElementType::I16 => 2,
            ElementType::I8 | ElementType::U8 | ElementType::Boolean => 1,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ElementType::F64 => "f64",
            ElementType::F32 => "f32",
            ElementType::F16 => "f16",
            ElementType::Bf16 => "bf16",
            ElementType::I64 => "i64",
            ElementType::I32 => "i32",
            ElementType::I16 => "i16",
            ElementType::I8 => "i8",
            ElementType::U8 => "u8",
            ElementType::Boolean => "boolean",
        }
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ── Ports ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PortType {
    Input,
    Output,
}

/// One input or output slot of an expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExpressionPort {
    pub expr: ExprId,
    pub port_type: PortType,
    pub index: usize,
}

impl ExpressionPort {
    pub fn input(expr: ExprId, index: usize) -> Self {
        Self {
            expr,
            port_type: PortType::Input,
            index,
        }
    }

    pub fn output(expr: ExprId, index: usize) -> Self {
        Self {
            expr,
            port_type: PortType::Output,
            index,
        }
    }
}

/// Element type, logical shape and logical-to-physical layout of a port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortDescriptor {
    pub element_type: ElementType,
    pub shape: Vec<Dim>,
    /// Permutation of `0..shape.len()`.
    pub layout: Vec<usize>,
}

impl PortDescriptor {
    /// Descriptor with the identity layout.
    pub fn new(element_type: ElementType, shape: Vec<Dim>) -> Self {
        let layout = (0..shape.len()).collect();
        Self {
            element_type,
            shape,
            layout,
        }
    }

    pub fn with_layout(mut self, layout: Vec<usize>) -> Self {
        self.layout = layout;
        self
    }

    fn is_identity_layout(&self) -> bool {
        self.layout.iter().enumerate().all(|(i, &axis)| i == axis)
    }
}

impl fmt::Display for PortDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.element_type, format_shape(&self.shape))?;
        if !self.is_identity_layout() {
            let axes: Vec<String> = self.layout.iter().map(|a| a.to_string()).collect();
            write!(f, " layout [{}]", axes.join(", "))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct PortSlot {
    pub desc: PortDescriptor,
    pub connector: ConnectorId,
}

// ── Expressions and connectors ─────────────────────────────────────────────

#[derive(Debug)]
pub struct Expression {
    pub id: ExprId,
    /// Value name from the kernel source, without the `%` sigil.
    pub name: Option<String>,
    pub node: Box<dyn Node>,
    /// Enclosing loops, outermost first.
    pub loop_ids: Vec<LoopId>,
    pub inputs: Vec<PortSlot>,
    pub outputs: Vec<PortSlot>,
}

impl Expression {
    pub fn innermost_loop(&self) -> Option<LoopId> {
        self.loop_ids.last().copied()
    }

    pub fn label(&self) -> String {
        match &self.name {
            Some(name) => format!("%{name}"),
            None => format!("#{}", self.id.0),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PortConnector {
    pub source: ExpressionPort,
    pub consumers: Vec<ExpressionPort>,
}

/// Fatal internal-consistency violations in the IR.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IrError {
    #[error("expression #{0} does not exist")]
    MissingExpression(u32),
    #[error("expression #{expr} has no {port_type:?} port {index}")]
    MissingPort {
        expr: u32,
        port_type: PortType,
        index: usize,
    },
    #[error("connector {0} does not exist")]
    MissingConnector(u32),
    #[error("dimension index {dim_idx} is out of range for layout {layout:?}")]
    DimOutOfRange { dim_idx: usize, layout: Vec<usize> },
}

/// Expressions in program order plus the connectors between them.
#[derive(Debug, Default)]
pub struct ExprGraph {
    exprs: Vec<Expression>,
    connectors: Vec<PortConnector>,
}

impl ExprGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_expr(&mut self, expr: Expression) {
        debug_assert_eq!(expr.id.0 as usize, self.exprs.len());
        self.exprs.push(expr);
    }

    pub fn push_connector(&mut self, connector: PortConnector) {
        self.connectors.push(connector);
    }

    pub fn exprs(&self) -> &[Expression] {
        &self.exprs
    }

    pub fn is_empty(&self) -> bool {
        self.exprs.is_empty()
    }

    pub fn expr(&self, id: ExprId) -> Result<&Expression, IrError> {
        self.exprs
            .get(id.0 as usize)
            .ok_or(IrError::MissingExpression(id.0))
    }

    pub fn connector(&self, id: ConnectorId) -> Result<&PortConnector, IrError> {
        self.connectors
            .get(id.0 as usize)
            .ok_or(IrError::MissingConnector(id.0))
    }

    pub fn connector_mut(&mut self, id: ConnectorId) -> Result<&mut PortConnector, IrError> {
        self.connectors
            .get_mut(id.0 as usize)
            .ok_or(IrError::MissingConnector(id.0))
    }

    fn slot(&self, port: ExpressionPort) -> Result<&PortSlot, IrError> {
        let expr = self.expr(port.expr)?;
        let slots = match port.port_type {
            PortType::Input => &expr.inputs,
            PortType::Output => &expr.outputs,
        };
        slots.get(port.index).ok_or(IrError::MissingPort {
            expr: port.expr.0,
            port_type: port.port_type,
            index: port.index,
        })
    }

    pub fn descriptor(&self, port: ExpressionPort) -> Result<&PortDescriptor, IrError> {
        Ok(&self.slot(port)?.desc)
    }

    /// Mutable descriptor access, used to specialize dynamic shapes before a
    /// runtime refresh.
    pub fn descriptor_mut(&mut self, port: ExpressionPort) -> Result<&mut PortDescriptor, IrError> {
        let expr = self
            .exprs
            .get_mut(port.expr.0 as usize)
            .ok_or(IrError::MissingExpression(port.expr.0))?;
        let slots = match port.port_type {
            PortType::Input => &mut expr.inputs,
            PortType::Output => &mut expr.outputs,
        };
        slots
            .get_mut(port.index)
            .map(|slot| &mut slot.desc)
            .ok_or(IrError::MissingPort {
                expr: port.expr.0,
                port_type: port.port_type,
                index: port.index,
            })
    }

    /// Connector attached to `port`: the producer link of an input port or
    /// the fan-out of an output port.
    pub fn port_connector(&self, port: ExpressionPort) -> Result<&PortConnector, IrError> {
        self.connector(self.slot(port)?.connector)
    }
}

/// The lowered kernel: expression graph plus loop records.
#[derive(Debug, Default)]
pub struct LinearIr {
    pub graph: ExprGraph,
    pub loops: LoopManager,
}

impl LinearIr {
    pub fn new(graph: ExprGraph, loops: LoopManager) -> Self {
        Self { graph, loops }
    }

    pub fn is_empty(&self) -> bool {
        self.graph.is_empty()
    }
}

impl LinearIr {
    /// Source-style reference to a port, e.g. `%ld.in[0]`.
    pub fn port_ref(&self, port: ExpressionPort) -> String {
        let label = self
            .graph
            .expr(port.expr)
            .map(|e| e.label())
            .unwrap_or_else(|_| format!("#{}", port.expr.0));
        let dir = match port.port_type {
            PortType::Input => "in",
            PortType::Output => "out",
        };
        format!("{label}.{dir}[{}]", port.index)
    }
}

/// Kernel-source listing: loop declarations, then expressions in order.
impl fmt::Display for LinearIr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (id, info) in self.loops.iter() {
            writeln!(f, "loop {id} work_amount = {} {{", info.work_amount)?;
            for (kind, ports) in [("entry", &info.entry_points), ("exit", &info.exit_points)] {
                for port in ports {
                    let fixed = if port.is_incremented { "" } else { " fixed" };
                    writeln!(
                        f,
                        "    {kind} {} dim {}{fixed}",
                        self.port_ref(port.expr_port),
                        port.dim_idx
                    )?;
                }
            }
            writeln!(f, "}}")?;
        }
        for expr in self.graph.exprs() {
            let mut line = String::new();
            if let Some(name) = &expr.name {
                line.push_str(&format!("%{name} = "));
            }
            let operands: Vec<String> = expr
                .inputs
                .iter()
                .map(|slot| {
                    let producer = self
                        .graph
                        .connector(slot.connector)
                        .and_then(|c| self.graph.expr(c.source.expr))
                        .map(|e| e.label())
                        .unwrap_or_else(|_| "<dangling>".to_string());
                    format!("{producer} : {}", slot.desc)
                })
                .collect();
            line.push_str(&format!("{}({})", expr.node.type_name(), operands.join(", ")));
            if let Some(out) = expr.outputs.first() {
                line.push_str(&format!(" : {}", out.desc));
            }
            if !expr.loop_ids.is_empty() {
                let ids: Vec<String> = expr.loop_ids.iter().map(|l| l.to_string()).collect();
                line.push_str(&format!(" loops [{}]", ids.join(", ")));
            }
            writeln!(f, "{line}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loops::{LoopInfo, LoopPort};
    use crate::node::make_node;

    fn two_expr_graph() -> ExprGraph {
        let mut graph = ExprGraph::new();
        let desc = PortDescriptor::new(ElementType::F32, vec![Dim::Known(4), Dim::Dynamic]);
        graph.push_connector(PortConnector {
            source: ExpressionPort::output(ExprId(0), 0),
            consumers: vec![ExpressionPort::input(ExprId(1), 0)],
        });
        graph.push_connector(PortConnector {
            source: ExpressionPort::output(ExprId(1), 0),
            consumers: vec![],
        });
        graph.push_expr(Expression {
            id: ExprId(0),
            name: Some("p".to_string()),
            node: make_node("Parameter").unwrap(),
            loop_ids: vec![],
            inputs: vec![],
            outputs: vec![PortSlot {
                desc: desc.clone(),
                connector: ConnectorId(0),
            }],
        });
        graph.push_expr(Expression {
            id: ExprId(1),
            name: Some("ld".to_string()),
            node: make_node("Load").unwrap(),
            loop_ids: vec![LoopId(0)],
            inputs: vec![PortSlot {
                desc: desc.clone().with_layout(vec![1, 0]),
                connector: ConnectorId(0),
            }],
            outputs: vec![PortSlot {
                desc,
                connector: ConnectorId(1),
            }],
        });
        graph
    }

    #[test]
    fn element_sizes() {
        assert_eq!(ElementType::F32.size(), 4);
        assert_eq!(ElementType::Bf16.size(), 2);
        assert_eq!(ElementType::I64.size(), 8);
        assert_eq!(ElementType::U8.size(), 1);
        assert_eq!(ElementType::parse("bf16"), Some(ElementType::Bf16));
        assert_eq!(ElementType::parse("f128"), None);
    }

    #[test]
    fn port_lookup() {
        let graph = two_expr_graph();
        let input = ExpressionPort::input(ExprId(1), 0);
        assert_eq!(graph.descriptor(input).unwrap().layout, vec![1, 0]);
        let conn = graph.port_connector(input).unwrap();
        assert_eq!(conn.source, ExpressionPort::output(ExprId(0), 0));
    }

    #[test]
    fn missing_port_is_an_error() {
        let graph = two_expr_graph();
        let err = graph
            .descriptor(ExpressionPort::input(ExprId(1), 3))
            .unwrap_err();
        assert_eq!(
            err,
            IrError::MissingPort {
                expr: 1,
                port_type: PortType::Input,
                index: 3
            }
        );
        assert_eq!(
            graph.expr(ExprId(9)).unwrap_err(),
            IrError::MissingExpression(9)
        );
        assert_eq!(
            graph.connector(ConnectorId(7)).unwrap_err(),
            IrError::MissingConnector(7)
        );
    }

    #[test]
    fn display_listing() {
        let mut loops = LoopManager::new();
        loops.insert(
            LoopId(0),
            LoopInfo::new(
                Dim::Dynamic,
                vec![LoopPort::new(ExpressionPort::input(ExprId(1), 0), 1)],
                vec![LoopPort::new(ExpressionPort::output(ExprId(1), 0), 1).fixed()],
            ),
        );
        let ir = LinearIr::new(two_expr_graph(), loops);
        let text = ir.to_string();
        assert_eq!(
            text,
            "loop 0 work_amount = ? {\n\
             \x20   entry %ld.in[0] dim 1\n\
             \x20   exit %ld.out[0] dim 1 fixed\n\
             }\n\
             %p = Parameter() : f32[4, ?]\n\
             %ld = Load(%p : f32[4, ?] layout [1, 0]) : f32[4, ?] loops [0]\n"
        );
    }
}
