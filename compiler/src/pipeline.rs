// pipeline.rs - Compilation state and pass orchestration
//
// Holds the parsed kernel and all pass artifacts, and runs the minimal set of
// passes for a given terminal PassId.
//
// Preconditions: the kernel must be parsed before calling run_pipeline.
// Postconditions: all artifacts for required passes are populated, or has_error is set.
// Failure modes: any pass emitting error-level diagnostics.
// Side effects: calls on_pass_complete callback after each pass for immediate display.

use std::time::{Duration, Instant};

use thiserror::Error;

use crate::ast::{Kernel, Span};
use crate::diag::{codes, has_errors, Diagnostic};
use crate::dim::Dim;
use crate::id::LoopId;
use crate::init_loops::{verify_loops, InitLoops, InitLoopsError, LoopCert};
use crate::ir::LinearIr;
use crate::pass::{descriptor, required_passes, Pass, PassId, StageCert};

// ── Options ────────────────────────────────────────────────────────────────

/// Knobs that affect which values the passes compute.
#[derive(Debug, Clone, Default)]
pub struct PipelineOptions {
    /// Concrete work amounts applied by the refresh pass, in order.
    pub work_amounts: Vec<(LoopId, u64)>,
    /// Print per-pass timing to stderr.
    pub verbose: bool,
}

// ── Provenance ─────────────────────────────────────────────────────────────

/// Provenance metadata for `--emit build-info`.
///
/// `source_hash`: SHA-256 of the raw kernel source text.
/// `compiler_version`: crate version from `Cargo.toml`.
#[derive(Debug, Clone)]
pub struct Provenance {
    pub source_hash: [u8; 32],
    pub compiler_version: &'static str,
}

impl Provenance {
    /// Hex string of the source hash (64 characters).
    pub fn source_hash_hex(&self) -> String {
        let mut s = String::with_capacity(64);
        for b in &self.source_hash {
            use std::fmt::Write;
            let _ = write!(s, "{:02x}", b);
        }
        s
    }

    pub fn to_json(&self) -> String {
        let value = serde_json::json!({
            "source_hash": self.source_hash_hex(),
            "compiler_version": self.compiler_version,
        });
        format!("{value:#}\n")
    }
}

pub fn compute_provenance(source: &str) -> Provenance {
    use sha2::{Digest, Sha256};

    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    let mut source_hash = [0u8; 32];
    source_hash.copy_from_slice(&hasher.finalize());

    Provenance {
        source_hash,
        compiler_version: env!("CARGO_PKG_VERSION"),
    }
}

// ── State ──────────────────────────────────────────────────────────────────

/// Holds all compilation artifacts and accumulated diagnostics.
pub struct CompilationState {
    pub kernel: Kernel,
    pub ir: Option<LinearIr>,
    pub cert: Option<LoopCert>,
    pub diagnostics: Vec<Diagnostic>,
    pub has_error: bool,
    pub provenance: Option<Provenance>,
}

impl CompilationState {
    pub fn new(kernel: Kernel) -> Self {
        Self {
            kernel,
            ir: None,
            cert: None,
            diagnostics: Vec::new(),
            has_error: false,
            provenance: None,
        }
    }
}

// ── Error type ─────────────────────────────────────────────────────────────

/// Pipeline execution failed due to error-level diagnostics in a pass.
/// The specific diagnostics are available in `CompilationState.diagnostics`.
#[derive(Debug, Error)]
#[error("pass `{name}` failed")]
pub struct PipelineError {
    /// The pass that produced the error.
    pub failing_pass: PassId,
    pub name: &'static str,
}

impl PipelineError {
    fn new(failing_pass: PassId) -> Self {
        Self {
            failing_pass,
            name: descriptor(failing_pass).name,
        }
    }
}

// ── Parsing ────────────────────────────────────────────────────────────────

/// Parse kernel source, turning syntax errors into E0001 diagnostics.
pub fn parse_kernel(source: &str) -> Result<Kernel, Vec<Diagnostic>> {
    let result = crate::parser::parse(source);
    if !result.errors.is_empty() {
        return Err(result
            .errors
            .iter()
            .map(|e| Diagnostic::error(*e.span(), e.to_string()).with_code(codes::E0001))
            .collect());
    }
    result.kernel.ok_or_else(|| {
        let end = source.len();
        let span: Span = (end..end).into();
        vec![Diagnostic::error(span, "parse failed with no output").with_code(codes::E0001)]
    })
}

// ── Per-pass bookkeeping ───────────────────────────────────────────────────

/// Per-pass post-processing: callback, accumulate, verbose, error check.
fn finish_pass(
    state: &mut CompilationState,
    pass_id: PassId,
    diags: Vec<Diagnostic>,
    elapsed: Duration,
    verbose: bool,
    on_pass_complete: &mut impl FnMut(PassId, &[Diagnostic]),
) -> Result<(), PipelineError> {
    on_pass_complete(pass_id, &diags);
    let is_err = has_errors(&diags);
    state.diagnostics.extend(diags);
    if verbose {
        eprintln!(
            "loopinit: {} complete, {:.1}ms",
            descriptor(pass_id).name,
            elapsed.as_secs_f64() * 1000.0
        );
    }
    if is_err {
        state.has_error = true;
        return Err(PipelineError::new(pass_id));
    }
    Ok(())
}

fn init_loops_diagnostic(span: Span, err: &InitLoopsError) -> Diagnostic {
    Diagnostic::error(span, format!("loop initialization failed: {err}")).with_code(codes::E0200)
}

// ── Pipeline runner ────────────────────────────────────────────────────────

/// Run the minimal set of passes to produce `terminal`.
///
/// Per-pass sequence: execute → on_pass_complete(callback) → verbose → error check.
pub fn run_pipeline(
    state: &mut CompilationState,
    terminal: PassId,
    options: &PipelineOptions,
    mut on_pass_complete: impl FnMut(PassId, &[Diagnostic]),
) -> Result<(), PipelineError> {
    let kernel_span = state.kernel.span;

    for pass_id in required_passes(terminal) {
        let t = Instant::now();
        let diags = match pass_id {
            PassId::Lower => {
                let result = crate::lower::lower(&state.kernel);
                state.ir = Some(result.ir);
                result.diagnostics
            }
            PassId::InitLoops => {
                let ir = state.ir.as_mut().ok_or(PipelineError::new(pass_id))?;
                match InitLoops::new().run(ir) {
                    Ok(changed) => {
                        log::debug!("init_loops: changed = {}", changed);
                        Vec::new()
                    }
                    Err(err) => vec![init_loops_diagnostic(kernel_span, &err)],
                }
            }
            PassId::Refresh => {
                let ir = state.ir.as_mut().ok_or(PipelineError::new(pass_id))?;
                let mut diags = Vec::new();
                for &(loop_id, work_amount) in &options.work_amounts {
                    if let Err(err) = InitLoops::refresh_loop(ir, loop_id, Dim::Known(work_amount)) {
                        let diag = match err {
                            InitLoopsError::MissingLoop(_) => Diagnostic::error(
                                kernel_span,
                                format!("cannot override work amount: {err}"),
                            )
                            .with_code(codes::E0201),
                            other => init_loops_diagnostic(kernel_span, &other),
                        };
                        diags.push(diag);
                    }
                }
                diags
            }
            PassId::Verify => {
                let ir = state.ir.as_ref().ok_or(PipelineError::new(pass_id))?;
                let cert = verify_loops(ir);
                let mut diags = Vec::new();
                if !cert.all_pass() {
                    diags.push(
                        Diagnostic::error(
                            kernel_span,
                            format!("loop verification failed: {}", cert.failed().join(", ")),
                        )
                        .with_code(codes::E0600),
                    );
                }
                state.cert = Some(cert);
                diags
            }
        };
        finish_pass(
            state,
            pass_id,
            diags,
            t.elapsed(),
            options.verbose,
            &mut on_pass_complete,
        )?;
    }
    Ok(())
}

/// Parse `source` and run the pipeline up to `terminal`.
///
/// Syntax errors are returned in the state's diagnostics with `has_error` set
/// and no IR.
pub fn compile(source: &str, terminal: PassId, options: &PipelineOptions) -> CompilationState {
    let mut state = match parse_kernel(source) {
        Ok(kernel) => CompilationState::new(kernel),
        Err(diagnostics) => {
            let end = source.len();
            let mut state = CompilationState::new(Kernel {
                items: Vec::new(),
                span: (0..end).into(),
            });
            state.diagnostics = diagnostics;
            state.has_error = true;
            return state;
        }
    };
    state.provenance = Some(compute_provenance(source));
    // Failures are recorded in `state`.
    let _ = run_pipeline(&mut state, terminal, options, |_, _| {});
    state
}

// ── Tests ──────────────────────────────────────────────────────────────────
