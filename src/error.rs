//! Crate-wide error taxonomy
//!
//! Mirrors the failure semantics of the distilled spec (malformed input,
//! recognised-but-unsupported IR, unresolvable header paths, solver
//! failures, and unsafe constraint syntax) the way the teacher centralizes
//! `StreamError` at the crate root and wraps narrower errors behind
//! `#[from]` (`ProveError::Quotient(#[from] QuotientError)` in
//! `scheduler.rs`).

use thiserror::Error;

/// Errors raised while building or querying the parser IR (§4.1, §6, §7).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IrError {
    #[error("malformed IR: {0}")]
    Malformed(String),
    #[error("unknown header field path: {0}")]
    UnknownField(String),
    #[error("unsupported IR construct: {0}")]
    Unsupported(String),
}

/// Errors raised while compiling a constraint-language expression (§4.6, §7).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConstraintError {
    #[error("unsafe expression: {0}")]
    UnsafeExpression(String),
    #[error("width mismatch in constraint: {0}")]
    WidthMismatch(String),
}

/// Errors raised by the abstract SMT solver oracle (§5, §6, §7).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SolverError {
    #[error("solver returned unknown for query: {0}")]
    Unknown(String),
    #[error("solver timed out")]
    Timeout,
    #[error("solver session error: {0}")]
    Session(String),
}

/// Top-level error returned by the bisimulation engine.
///
/// Every variant here is fatal (§4.9): the engine surfaces it immediately
/// and aborts the run. A partial worklist is never a certificate.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Ir(#[from] IrError),
    #[error(transparent)]
    Constraint(#[from] ConstraintError),
    #[error(transparent)]
    Solver(#[from] SolverError),
}
