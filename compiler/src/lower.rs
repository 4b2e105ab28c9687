// lower.rs - Kernel AST to linear IR
//
// Builds the expression graph (expressions, port descriptors, connectors) and
// the loop records from a parsed kernel description.
//
// Preconditions: kernel parsed without syntax errors.
// Postconditions: when no error diagnostics are produced, every operand is
//   connected to its producer, every loop referenced by an expression exists,
//   every loop port names an existing expression port enclosed by its loop, and
//   every layout is a permutation matching its shape rank.
// Failure modes: semantic errors produce diagnostics (E0100-E0113); lowering
//   continues past them, skipping the offending item.
// Side effects: none.

use std::collections::{HashMap, HashSet};

use crate::ast::{
    DimLit, ExprDecl, Item, Kernel, LoopDecl, LoopPortDecl, LoopPortKind, PortDir, Span,
    TensorDecl,
};
use crate::diag::{codes, DiagCode, Diagnostic};
use crate::dim::{is_permutation, Dim};
use crate::id::{ExprId, IdAllocator, LoopId};
use crate::ir::{
    ElementType, ExprGraph, Expression, ExpressionPort, LinearIr, PortConnector, PortDescriptor,
    PortSlot, PortType,
};
use crate::loops::{LoopInfo, LoopManager, LoopPort};
use crate::node::make_node;

const ELEMENT_TYPES: &str = "f64, f32, f16, bf16, i64, i32, i16, i8, u8, boolean";

// ── Output types ────────────────────────────────────────────────────────────

/// Result of lowering.
pub struct LowerResult {
    pub ir: LinearIr,
    pub diagnostics: Vec<Diagnostic>,
}

impl LowerResult {
    pub fn has_errors(&self) -> bool {
        crate::diag::has_errors(&self.diagnostics)
    }
}

/// Lower a parsed kernel.
pub fn lower(kernel: &Kernel) -> LowerResult {
    let mut engine = LowerEngine::default();
    engine.declare_loops(kernel);
    for item in &kernel.items {
        if let Item::Expr(decl) = item {
            engine.lower_expr(decl);
        }
    }
    for item in &kernel.items {
        if let Item::Loop(decl) = item {
            engine.lower_loop(decl);
        }
    }
    log::debug!(
        "lower: {} expressions, {} loops, {} diagnostics",
        engine.graph.exprs().len(),
        engine.loops.len(),
        engine.diagnostics.len()
    );
    LowerResult {
        ir: LinearIr::new(engine.graph, engine.loops),
        diagnostics: engine.diagnostics,
    }
}

// ── Engine ──────────────────────────────────────────────────────────────────

#[derive(Default)]
struct LowerEngine {
    ids: IdAllocator,
    graph: ExprGraph,
    loops: LoopManager,
    /// Declared loop ids and the span of their declaration.
    declared_loops: HashMap<LoopId, Span>,
    /// Start offsets of loop declarations rejected in `declare_loops`.
    rejected_loops: HashSet<usize>,
    values: HashMap<String, (ExprId, Span)>,
    /// Names whose definition failed; uses are skipped without cascading errors.
    poisoned: HashSet<String>,
    diagnostics: Vec<Diagnostic>,
}

impl LowerEngine {
    fn error(&mut self, code: DiagCode, span: Span, message: impl Into<String>) {
        self.diagnostics
            .push(Diagnostic::error(span, message).with_code(code));
    }

    // ── Loops, phase 1: ids ──

    fn declare_loops(&mut self, kernel: &Kernel) {
        for item in &kernel.items {
            let Item::Loop(decl) = item else { continue };
            let Ok(raw) = u32::try_from(decl.id) else {
                self.error(
                    codes::E0113,
                    decl.id_span,
                    format!("loop id {} is out of range", decl.id),
                );
                self.rejected_loops.insert(decl.span.start);
                continue;
            };
            let id = LoopId(raw);
            if let Some(&first) = self.declared_loops.get(&id) {
                self.diagnostics.push(
                    Diagnostic::error(decl.id_span, format!("loop {id} is declared twice"))
                        .with_code(codes::E0105)
                        .with_related(first, "first declared here"),
                );
                self.rejected_loops.insert(decl.span.start);
                continue;
            }
            self.declared_loops.insert(id, decl.span);
        }
    }

    // ── Expressions ──

    fn lower_expr(&mut self, decl: &ExprDecl) {
        let result_name = decl.result.as_ref().map(|v| v.name.clone());
        match self.build_expr(decl) {
            Some(id) => {
                if let (Some(name), Some(value)) = (result_name, &decl.result) {
                    self.values.insert(name, (id, value.span));
                }
            }
            None => {
                if let Some(name) = result_name {
                    if !self.values.contains_key(&name) {
                        self.poisoned.insert(name);
                    }
                }
            }
        }
    }

    fn build_expr(&mut self, decl: &ExprDecl) -> Option<ExprId> {
        let Some(node) = make_node(&decl.op.name) else {
            self.error(
                codes::E0100,
                decl.op.span,
                format!("unknown operation `{}`", decl.op.name),
            );
            return None;
        };

        if let Some(value) = &decl.result {
            if let Some(&(_, first)) = self.values.get(&value.name) {
                self.diagnostics.push(
                    Diagnostic::error(value.span, format!("value `%{}` is defined twice", value.name))
                        .with_code(codes::E0103)
                        .with_related(first, "first defined here"),
                );
                return None;
            }
        }

        if decl.operands.len() != node.input_count() {
            self.error(
                codes::E0101,
                decl.span,
                format!(
                    "`{}` takes {} operand(s) but {} were given",
                    decl.op.name,
                    node.input_count(),
                    decl.operands.len()
                ),
            );
            return None;
        }

        let output_desc = if node.output_count() > 0 {
            let Some(ty) = &decl.output else {
                self.diagnostics.push(
                    Diagnostic::error(decl.span, format!("`{}` needs an output type", decl.op.name))
                        .with_code(codes::E0111)
                        .with_hint("append `: <type>[<shape>]` after the operand list"),
                );
                return None;
            };
            Some(self.tensor_desc(ty)?)
        } else {
            None
        };

        // Operands: (producer connector, input descriptor).
        let mut inputs = Vec::with_capacity(decl.operands.len());
        let mut ok = true;
        for operand in &decl.operands {
            let name = &operand.value.name;
            let Some(&(producer, _)) = self.values.get(name) else {
                if !self.poisoned.contains(name) {
                    self.diagnostics.push(
                        Diagnostic::error(operand.value.span, format!("undefined value `%{name}`"))
                            .with_code(codes::E0102)
                            .with_hint("values must be defined before they are used"),
                    );
                }
                ok = false;
                continue;
            };
            let Some(slot) = self.graph.expr(producer).ok().and_then(|e| e.outputs.first()) else {
                self.error(
                    codes::E0104,
                    operand.value.span,
                    format!("`%{name}` produces no value"),
                );
                ok = false;
                continue;
            };
            let connector = slot.connector;
            let inherited = slot.desc.clone();
            let desc = match &operand.ty {
                Some(ty) => match self.tensor_desc(ty) {
                    Some(desc) => desc,
                    None => {
                        ok = false;
                        continue;
                    }
                },
                None => inherited,
            };
            inputs.push(PortSlot { desc, connector });
        }

        let mut loop_ids = Vec::with_capacity(decl.loops.len());
        for &(raw, span) in &decl.loops {
            let id = u32::try_from(raw).ok().map(LoopId);
            match id {
                Some(id) if self.declared_loops.contains_key(&id) => loop_ids.push(id),
                _ => {
                    self.error(codes::E0106, span, format!("loop {raw} is not declared"));
                    ok = false;
                }
            }
        }

        if !ok {
            return None;
        }

        let id = self.ids.alloc_expr();
        for (index, slot) in inputs.iter().enumerate() {
            if let Ok(connector) = self.graph.connector_mut(slot.connector) {
                connector.consumers.push(ExpressionPort::input(id, index));
            }
        }
        let outputs = match output_desc {
            Some(desc) => {
                let connector = self.ids.alloc_connector();
                self.graph.push_connector(PortConnector {
                    source: ExpressionPort::output(id, 0),
                    consumers: Vec::new(),
                });
                vec![PortSlot { desc, connector }]
            }
            None => Vec::new(),
        };

        self.graph.push_expr(Expression {
            id,
            name: decl.result.as_ref().map(|v| v.name.clone()),
            node,
            loop_ids,
            inputs,
            outputs,
        });
        Some(id)
    }

    fn tensor_desc(&mut self, decl: &TensorDecl) -> Option<PortDescriptor> {
        let Some(element_type) = ElementType::parse(&decl.elem.name) else {
            self.diagnostics.push(
                Diagnostic::error(
                    decl.elem.span,
                    format!("unknown element type `{}`", decl.elem.name),
                )
                .with_code(codes::E0110)
                .with_hint(format!("expected one of: {ELEMENT_TYPES}")),
            );
            return None;
        };
        let shape: Vec<Dim> = decl
            .shape
            .iter()
            .map(|d| match d {
                DimLit::Known(n, _) => Dim::Known(*n),
                DimLit::Dynamic(_) => Dim::Dynamic,
            })
            .collect();
        let desc = PortDescriptor::new(element_type, shape);

        let Some(axes) = &decl.layout else {
            return Some(desc);
        };
        let span = decl.layout_span.unwrap_or(decl.span);
        if axes.len() != desc.shape.len() {
            self.error(
                codes::E0112,
                span,
                format!(
                    "layout has {} axes but the shape has rank {}",
                    axes.len(),
                    desc.shape.len()
                ),
            );
            return None;
        }
        let layout: Vec<usize> = axes
            .iter()
            .map(|&a| usize::try_from(a).unwrap_or(usize::MAX))
            .collect();
        if !is_permutation(&layout) {
            self.error(
                codes::E0109,
                span,
                format!("layout {axes:?} is not a permutation of 0..{}", axes.len()),
            );
            return None;
        }
        Some(desc.with_layout(layout))
    }

    // ── Loops, phase 2: ports ──

    fn lower_loop(&mut self, decl: &LoopDecl) {
        if self.rejected_loops.contains(&decl.span.start) {
            return;
        }
        let Ok(raw) = u32::try_from(decl.id) else {
            return;
        };
        let id = LoopId(raw);

        let work_amount = match decl.work_amount {
            DimLit::Known(n, _) => Dim::Known(n),
            DimLit::Dynamic(_) => Dim::Dynamic,
        };
        let mut entry_points = Vec::new();
        let mut exit_points = Vec::new();
        for port_decl in &decl.ports {
            let Some(port) = self.loop_port(id, port_decl) else {
                continue;
            };
            match port_decl.kind {
                LoopPortKind::Entry => entry_points.push(port),
                LoopPortKind::Exit => exit_points.push(port),
            }
        }
        if decl.ports.is_empty() {
            self.diagnostics.push(
                Diagnostic::warning(decl.span, format!("loop {id} has no entry or exit ports"))
                    .with_code(codes::W0100),
            );
        }
        self.loops
            .insert(id, LoopInfo::new(work_amount, entry_points, exit_points));
    }

    fn loop_port(&mut self, loop_id: LoopId, decl: &LoopPortDecl) -> Option<LoopPort> {
        let name = &decl.value.name;
        let Some(&(expr_id, _)) = self.values.get(name) else {
            if !self.poisoned.contains(name) {
                self.error(
                    codes::E0102,
                    decl.value.span,
                    format!("undefined value `%{name}`"),
                );
            }
            return None;
        };
        let (port_type, dir) = match decl.dir {
            PortDir::In => (PortType::Input, "in"),
            PortDir::Out => (PortType::Output, "out"),
        };
        let index = usize::try_from(decl.index).unwrap_or(usize::MAX);
        let port = match port_type {
            PortType::Input => ExpressionPort::input(expr_id, index),
            PortType::Output => ExpressionPort::output(expr_id, index),
        };

        let rank = match self.graph.descriptor(port) {
            Ok(desc) => desc.shape.len(),
            Err(_) => {
                self.error(
                    codes::E0107,
                    decl.span,
                    format!("`%{name}` has no port `{dir}[{}]`", decl.index),
                );
                return None;
            }
        };

        let enclosed = self
            .graph
            .expr(expr_id)
            .map(|e| e.loop_ids.contains(&loop_id))
            .unwrap_or(false);
        if !enclosed {
            self.diagnostics.push(
                Diagnostic::error(
                    decl.span,
                    format!("`%{name}` is not enclosed by loop {loop_id}"),
                )
                .with_code(codes::E0108)
                .with_hint(format!("add {loop_id} to the `loops [...]` list of `%{name}`")),
            );
            return None;
        }

        let dim_idx = match usize::try_from(decl.dim) {
            Ok(d) if d < rank => d,
            _ => {
                self.error(
                    codes::E0112,
                    decl.dim_span,
                    format!(
                        "dim {} is out of range for a rank-{rank} port of `%{name}`",
                        decl.dim
                    ),
                );
                return None;
            }
        };

        let port = LoopPort::new(port, dim_idx);
        Some(if decl.fixed { port.fixed() } else { port })
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diag::DiagLevel;
    use crate::parser::parse;

    fn lower_src(source: &str) -> LowerResult {
        let parsed = parse(source);
        assert!(parsed.errors.is_empty(), "parse errors: {:?}", parsed.errors);
        lower(&parsed.kernel.expect("kernel"))
    }

    fn lower_ok(source: &str) -> LinearIr {
        let result = lower_src(source);
        assert!(
            !result.has_errors(),
            "unexpected diagnostics: {:#?}",
            result.diagnostics
        );
        result.ir
    }

    fn error_codes(source: &str) -> Vec<DiagCode> {
        lower_src(source)
            .diagnostics
            .into_iter()
            .filter(|d| d.level == DiagLevel::Error)
            .filter_map(|d| d.code)
            .collect()
    }

    const CHAIN: &str = "\
        loop 0 work_amount = ? {\n\
            entry %ld.in[0] dim 0\n\
            exit %st.out[0] dim 0\n\
        }\n\
        %p = Parameter() : f32[4, 8]\n\
        %ld = Load(%p) : f32[4, 8] loops [0]\n\
        %e = Exp(%ld) : f32[4, 8] loops [0]\n\
        %st = Store(%e) : f32[4, 8] loops [0]\n\
        Result(%st)\n";

    #[test]
    fn chain_builds_graph_and_loops() {
        let ir = lower_ok(CHAIN);
        assert_eq!(ir.graph.exprs().len(), 5);
        let ld = &ir.graph.exprs()[1];
        assert_eq!(ld.node.type_name(), "Load");
        assert_eq!(ld.loop_ids, vec![LoopId(0)]);

        let info = ir.loops.get(LoopId(0)).unwrap();
        assert_eq!(info.work_amount, Dim::Dynamic);
        assert_eq!(info.entry_points[0].expr_port, ExpressionPort::input(ExprId(1), 0));
        assert_eq!(info.exit_points[0].expr_port, ExpressionPort::output(ExprId(3), 0));
        assert!(info.ports().all(|p| p.is_incremented));
    }

    #[test]
    fn connectors_link_producers_and_consumers() {
        let ir = lower_ok(CHAIN);
        let ld_in = ExpressionPort::input(ExprId(1), 0);
        let conn = ir.graph.port_connector(ld_in).unwrap();
        assert_eq!(conn.source, ExpressionPort::output(ExprId(0), 0));
        assert_eq!(conn.consumers, vec![ld_in]);

        let st_out = ir.graph.port_connector(ExpressionPort::output(ExprId(3), 0)).unwrap();
        assert_eq!(st_out.consumers, vec![ExpressionPort::input(ExprId(4), 0)]);
    }

    #[test]
    fn operands_inherit_or_override_descriptors() {
        let ir = lower_ok(
            "%p = Parameter() : f32[4, 8]\n\
             %a = Load(%p) : f32[4, 8]\n\
             %b = Load(%p : f32[4, 8] layout [1, 0]) : f32[8, 4]\n",
        );
        let inherited = ir.graph.descriptor(ExpressionPort::input(ExprId(1), 0)).unwrap();
        assert_eq!(inherited.layout, vec![0, 1]);
        let overridden = ir.graph.descriptor(ExpressionPort::input(ExprId(2), 0)).unwrap();
        assert_eq!(overridden.layout, vec![1, 0]);
        assert_eq!(overridden.shape, vec![Dim::Known(4), Dim::Known(8)]);
    }

    #[test]
    fn fixed_ports_start_unincremented() {
        let ir = lower_ok(
            "loop 2 work_amount = 16 { entry %ld.in[0] dim 1 fixed }\n\
             %p = Parameter() : i8[16, 16]\n\
             %ld = Load(%p) : i8[16, 16] loops [2]\n",
        );
        let info = ir.loops.get(LoopId(2)).unwrap();
        assert_eq!(info.work_amount, Dim::Known(16));
        assert!(!info.entry_points[0].is_incremented);
        assert_eq!(info.entry_points[0].dim_idx, 1);
    }

    #[test]
    fn unknown_op() {
        assert_eq!(
            error_codes("%x = Conv(%y) : f32[1]"),
            vec![codes::E0100]
        );
    }

    #[test]
    fn wrong_operand_count() {
        assert_eq!(
            error_codes("%p = Parameter() : f32[1]\n%a = Add(%p) : f32[1]"),
            vec![codes::E0101]
        );
    }

    #[test]
    fn undefined_value_and_no_cascade() {
        // `%b` fails because `%zz` is undefined; `%c` must not report again.
        assert_eq!(
            error_codes("%b = Exp(%zz) : f32[1]\n%c = Exp(%b) : f32[1]"),
            vec![codes::E0102]
        );
    }

    #[test]
    fn duplicate_value() {
        assert_eq!(
            error_codes("%p = Parameter() : f32[1]\n%p = Parameter() : f32[1]"),
            vec![codes::E0103]
        );
    }

    #[test]
    fn operand_without_output() {
        assert_eq!(
            error_codes("%p = Parameter() : f32[1]\n%r = Result(%p)\n%x = Exp(%r) : f32[1]"),
            vec![codes::E0104]
        );
    }

    #[test]
    fn duplicate_loop() {
        let result = lower_src("loop 1 work_amount = ? { }\nloop 1 work_amount = 4 { }");
        let dup = result
            .diagnostics
            .iter()
            .find(|d| d.code == Some(codes::E0105))
            .expect("E0105");
        assert_eq!(dup.related_spans.len(), 1);
    }

    #[test]
    fn undeclared_loop() {
        assert_eq!(
            error_codes("%p = Parameter() : f32[1] loops [3]"),
            vec![codes::E0106]
        );
    }

    #[test]
    fn missing_expression_port() {
        assert_eq!(
            error_codes(
                "loop 0 work_amount = ? { entry %p.in[0] dim 0 }\n%p = Parameter() : f32[1] loops [0]"
            ),
            vec![codes::E0107]
        );
    }

    #[test]
    fn port_outside_loop() {
        assert_eq!(
            error_codes(
                "loop 0 work_amount = ? { exit %p.out[0] dim 0 }\n%p = Parameter() : f32[1]"
            ),
            vec![codes::E0108]
        );
    }

    #[test]
    fn invalid_layout() {
        assert_eq!(
            error_codes("%p = Parameter() : f32[2, 2] layout [0, 0]"),
            vec![codes::E0109]
        );
    }

    #[test]
    fn unknown_element_type() {
        assert_eq!(
            error_codes("%p = Parameter() : f128[2]"),
            vec![codes::E0110]
        );
    }

    #[test]
    fn missing_output_type() {
        assert_eq!(error_codes("%p = Parameter()"), vec![codes::E0111]);
    }

    #[test]
    fn rank_mismatch_and_dim_range() {
        assert_eq!(
            error_codes("%p = Parameter() : f32[2, 2] layout [0]"),
            vec![codes::E0112]
        );
        assert_eq!(
            error_codes(
                "loop 0 work_amount = ? { exit %p.out[0] dim 2 }\n%p = Parameter() : f32[2, 2] loops [0]"
            ),
            vec![codes::E0112]
        );
    }

    #[test]
    fn loop_id_out_of_range() {
        assert_eq!(
            error_codes("loop 4294967296 work_amount = ? { }"),
            vec![codes::E0113]
        );
    }

    #[test]
    fn empty_loop_warns() {
        let result = lower_src("loop 0 work_amount = ? { }");
        assert!(!result.has_errors());
        assert_eq!(result.diagnostics[0].code, Some(codes::W0100));
        assert!(result.ir.loops.contains(LoopId(0)));
    }

    #[test]
    fn listing_parses_back_to_same_listing() {
        let ir = lower_ok(CHAIN);
        let listing = ir.to_string();
        let again = lower_ok(&listing);
        assert_eq!(again.to_string(), listing);
    }
}
