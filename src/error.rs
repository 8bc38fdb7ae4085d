//! The error taxonomy of §7: every pass reports a located, typed error instead
//! of panicking or swallowing a failure.

use crate::loc::FileSpan;
use crate::symbol::Symbol;
use crate::types::ty::Ty;

/// The kind of a semantic error raised by the typechecker (§4.1).
#[derive(Clone, Debug, thiserror::Error)]
pub enum TypeErrorKind {
  #[error("unbound variable `{0}`")]
  UnboundVar(Symbol),
  #[error("unknown field `{0}`")]
  UnknownField(Symbol),
  #[error("unknown constructor `{0}`")]
  UnknownConstructor(Symbol),
  #[error("type mismatch: expected `{expected:?}`, found `{found:?}`")]
  TypeMismatch { expected: Ty, found: Ty },
  #[error("arity mismatch: expected {expected} argument(s), found {found}")]
  ArityMismatch { expected: usize, found: usize },
  #[error("forbidden effect: {0} may not appear in {1}")]
  ForbiddenEffect(&'static str, &'static str),
  #[error("invalid big_map use: {0}")]
  BadBigMap(&'static str),
  #[error("`Left`/`Right` used without a surrounding or declared `or` type")]
  UnannotatedSum,
}

/// A semantic error, with its primary location and an optional secondary
/// "expected here" location (e.g. the declaration site of a mismatched type).
#[derive(Clone, Debug, thiserror::Error)]
#[error("{kind}")]
pub struct TypeError {
  pub kind: TypeErrorKind,
  pub loc: FileSpan,
  pub expected_at: Option<FileSpan>,
}

/// An internal-error: an invariant the preceding stage should have already
/// established was violated. These are compiler bugs, not user errors.
#[derive(Clone, Debug, thiserror::Error)]
#[error("internal error in {stage}: {message}")]
pub struct InternalError {
  pub stage: &'static str,
  pub message: String,
}

impl InternalError {
  pub fn new(stage: &'static str, message: impl Into<String>) -> Self {
    InternalError { stage, message: message.into() }
  }
}

/// A failure of the decompilation pipeline (§4.7, §7 item 5).
#[derive(Clone, Debug, thiserror::Error)]
pub enum DecompileErrorKind {
  /// The symbolic interpreter could not reconcile two control-flow branches
  /// rejoining with incompatible stack shapes.
  #[error("program has no structured L-shaped reading: {0}")]
  UnstructuredProgram(String),
  /// An instruction referenced a stack position that does not exist at that point.
  #[error("reference to stack position {0} out of bounds")]
  UnboundStackPosition(u32),
  /// Two `RENAME` annotations disagreed on what a binder should be named.
  #[error("conflicting variable annotations: `{0}` vs `{1}`")]
  AnnotationConflict(Symbol, Symbol),
}

#[derive(Clone, Debug, thiserror::Error)]
#[error("{kind}")]
pub struct DecompileError {
  pub kind: DecompileErrorKind,
  pub loc: FileSpan,
}

/// The top-level error type returned by every public entry point of this crate.
///
/// Syntactic and external errors are represented only as pass-through variants:
/// this crate never constructs them itself, but a driver that also owns the
/// parser/RPC collaborators can fold their errors into the same taxonomy.
#[derive(Debug, thiserror::Error)]
pub enum CompileError {
  #[error("syntax error: {0} at {1}")]
  Syntactic(String, FileSpan),
  #[error("{0}")]
  Semantic(#[from] TypeError),
  #[error(transparent)]
  Internal(#[from] InternalError),
  #[error("forbidden construct: {0} at {1}")]
  ForbiddenConstruct(&'static str, FileSpan),
  #[error("{0}")]
  Decompilation(#[from] DecompileError),
  #[error("external error: {0}")]
  External(String),
}

impl CompileError {
  /// Render in the uniform `<kind>: <message> at <file>:<line>:<col>` form
  /// required by §7's propagation policy.
  #[must_use] pub fn format_uniform(&self) -> String {
    let (kind, loc) = match self {
      CompileError::Syntactic(_, loc) => ("syntax error", Some(loc)),
      CompileError::Semantic(e) => ("semantic error", Some(&e.loc)),
      CompileError::Internal(_) => ("internal error", None),
      CompileError::ForbiddenConstruct(_, loc) => ("forbidden construct", Some(loc)),
      CompileError::Decompilation(e) => ("decompilation error", Some(&e.loc)),
      CompileError::External(_) => ("external error", None),
    };
    match loc {
      Some(loc) => format!("{kind}: {self} at {loc}"),
      None => format!("{kind}: {self}"),
    }
  }
}

pub type Result<T> = std::result::Result<T, CompileError>;

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn uniform_formatting_includes_location() {
    let err = CompileError::Semantic(TypeError {
      kind: TypeErrorKind::UnboundVar(crate::symbol::intern("x")),
      loc: FileSpan::dummy(),
      expected_at: None,
    });
    let s = err.format_uniform();
    assert!(s.starts_with("semantic error: "));
    assert!(s.contains("at <generated>:0:0"));
  }
}
