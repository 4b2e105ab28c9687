// diag.rs - Unified diagnostics model
//
// Provides the shared diagnostic types used by lowering, loop initialization
// and verification.
//
// Preconditions: none (types only).
// Postconditions: none (types only).
// Failure modes: none.
// Side effects: none.

use std::fmt;

use crate::ast::Span;

// ── Diagnostic code ──────────────────────────────────────────────────────

/// A stable diagnostic code (e.g., `E0100`).
///
/// Codes are `&'static str` constants defined in the `codes` module. Once
/// assigned, a code must never be reassigned to a different meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DiagCode(pub &'static str);

impl fmt::Display for DiagCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Registry of diagnostic codes.
pub mod codes {
    use super::DiagCode;

    // ── Parsing ──
    pub const E0001: DiagCode = DiagCode("E0001"); // syntax error

    // ── Lowering (E01xx) ──
    pub const E0100: DiagCode = DiagCode("E0100"); // unknown operation
    pub const E0101: DiagCode = DiagCode("E0101"); // wrong operand count
    pub const E0102: DiagCode = DiagCode("E0102"); // undefined value
    pub const E0103: DiagCode = DiagCode("E0103"); // duplicate value name
    pub const E0104: DiagCode = DiagCode("E0104"); // operand has no output
    pub const E0105: DiagCode = DiagCode("E0105"); // duplicate loop id
    pub const E0106: DiagCode = DiagCode("E0106"); // undeclared loop id
    pub const E0107: DiagCode = DiagCode("E0107"); // loop port on missing expression port
    pub const E0108: DiagCode = DiagCode("E0108"); // loop port outside its loop
    pub const E0109: DiagCode = DiagCode("E0109"); // invalid layout
    pub const E0110: DiagCode = DiagCode("E0110"); // unknown element type
    pub const E0111: DiagCode = DiagCode("E0111"); // missing output type
    pub const E0112: DiagCode = DiagCode("E0112"); // rank mismatch / dim out of range
    pub const E0113: DiagCode = DiagCode("E0113"); // loop id out of range

    // ── Loop initialization (E02xx) ──
    pub const E0200: DiagCode = DiagCode("E0200"); // init_loops failed
    pub const E0201: DiagCode = DiagCode("E0201"); // work-amount override rejected

    // ── Verification (E06xx) ──
    pub const E0600: DiagCode = DiagCode("E0600"); // loop verification failed

    // ── Warnings ──
    pub const W0100: DiagCode = DiagCode("W0100"); // loop has no ports
}

// ── Severity level ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagLevel {
    Error,
    Warning,
}

// ── Related span ─────────────────────────────────────────────────────────

/// A secondary source location providing context for a diagnostic.
#[derive(Debug, Clone)]
pub struct RelatedSpan {
    pub span: Span,
    pub label: String,
}

// ── Diagnostic ───────────────────────────────────────────────────────────

/// A diagnostic emitted by any pass.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub code: Option<DiagCode>,
    pub level: DiagLevel,
    pub span: Span,
    pub message: String,
    pub hint: Option<String>,
    pub related_spans: Vec<RelatedSpan>,
}

impl Diagnostic {
    /// Create a new diagnostic with no code, hint, or related spans.
    pub fn new(level: DiagLevel, span: Span, message: impl Into<String>) -> Self {
        Self {
            code: None,
            level,
            span,
            message: message.into(),
            hint: None,
            related_spans: Vec::new(),
        }
    }

    pub fn error(span: Span, message: impl Into<String>) -> Self {
        Self::new(DiagLevel::Error, span, message)
    }

    pub fn warning(span: Span, message: impl Into<String>) -> Self {
        Self::new(DiagLevel::Warning, span, message)
    }

    /// Attach a stable diagnostic code.
    pub fn with_code(mut self, code: DiagCode) -> Self {
        self.code = Some(code);
        self
    }

    /// Attach a remediation hint.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// Attach a related span.
    pub fn with_related(mut self, span: Span, label: impl Into<String>) -> Self {
        self.related_spans.push(RelatedSpan {
            span,
            label: label.into(),
        });
        self
    }

    pub fn is_error(&self) -> bool {
        self.level == DiagLevel::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.level {
            DiagLevel::Error => "error",
            DiagLevel::Warning => "warning",
        };
        if let Some(code) = &self.code {
            write!(f, "{}[{}]: {}", level, code, self.message)?;
        } else {
            write!(f, "{}: {}", level, self.message)?;
        }
        if let Some(hint) = &self.hint {
            write!(f, "\n  hint: {}", hint)?;
        }
        Ok(())
    }
}

/// True if any diagnostic is an error.
pub fn has_errors(diags: &[Diagnostic]) -> bool {
    diags.iter().any(Diagnostic::is_error)
}

/// Render `diag` with a `line:col` prefix resolved against `source`.
pub fn render(diag: &Diagnostic, source: &str) -> String {
    let (line, col) = line_col(source, diag.span.start);
    let mut out = format!("{line}:{col}: {diag}");
    for related in &diag.related_spans {
        let (line, col) = line_col(source, related.span.start);
        out.push_str(&format!("\n  {line}:{col}: note: {}", related.label));
    }
    out
}

fn line_col(source: &str, offset: usize) -> (usize, usize) {
    let prefix = &source[..offset.min(source.len())];
    let line = prefix.matches('\n').count() + 1;
    let col = prefix.rfind('\n').map_or(prefix.len(), |nl| prefix.len() - nl - 1) + 1;
    (line, col)
}
