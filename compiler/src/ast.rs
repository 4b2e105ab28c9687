// AST node types for kernel description files.
//
// Every node carries a `SimpleSpan` for error reporting in lowering.
//
// Preconditions: produced by the parser from a valid or partially-valid token stream.
// Postconditions: each node's span covers the source range of the construct.
// Failure modes: none (data-only module).
// Side effects: none.

use chumsky::span::SimpleSpan;

/// Byte-offset span (alias for chumsky's `SimpleSpan`).
pub type Span = SimpleSpan;

// ── Root ──

/// A complete kernel: loop declarations and expressions, in source order.
#[derive(Debug, Clone, PartialEq)]
pub struct Kernel {
    pub items: Vec<Item>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    Loop(LoopDecl),
    Expr(ExprDecl),
}

// ── loop_decl: 'loop' NUMBER 'work_amount' '=' dim '{' loop_port* '}' ──

#[derive(Debug, Clone, PartialEq)]
pub struct LoopDecl {
    pub id: u64,
    pub id_span: Span,
    pub work_amount: DimLit,
    pub ports: Vec<LoopPortDecl>,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopPortKind {
    Entry,
    Exit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortDir {
    In,
    Out,
}

/// `entry %v.in[0] dim 1 fixed`
#[derive(Debug, Clone, PartialEq)]
pub struct LoopPortDecl {
    pub kind: LoopPortKind,
    pub value: ValueRef,
    pub dir: PortDir,
    pub index: u64,
    pub dim: u64,
    pub dim_span: Span,
    pub fixed: bool,
    pub span: Span,
}

// ── expr_decl: (VALUE '=')? IDENT '(' operands ')' (':' tensor)? ('loops' '[' ids ']')? ──

#[derive(Debug, Clone, PartialEq)]
pub struct ExprDecl {
    pub result: Option<ValueRef>,
    pub op: Ident,
    pub operands: Vec<Operand>,
    pub output: Option<TensorDecl>,
    pub loops: Vec<(u64, Span)>,
    pub span: Span,
}

/// `%p` or `%p : f32[4, 8] layout [1, 0]`
#[derive(Debug, Clone, PartialEq)]
pub struct Operand {
    pub value: ValueRef,
    pub ty: Option<TensorDecl>,
    pub span: Span,
}

/// `f32[4, ?, 8] layout [0, 2, 1]`
#[derive(Debug, Clone, PartialEq)]
pub struct TensorDecl {
    pub elem: Ident,
    pub shape: Vec<DimLit>,
    pub layout: Option<Vec<u64>>,
    pub layout_span: Option<Span>,
    pub span: Span,
}

/// A concrete extent or `?`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DimLit {
    Known(u64, Span),
    Dynamic(Span),
}

impl DimLit {
    pub fn span(&self) -> Span {
        match self {
            DimLit::Known(_, span) | DimLit::Dynamic(span) => *span,
        }
    }
}

// ── Leaves ──

#[derive(Debug, Clone, PartialEq)]
pub struct Ident {
    pub name: String,
    pub span: Span,
}

/// A `%name` reference; `name` excludes the sigil.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueRef {
    pub name: String,
    pub span: Span,
}
