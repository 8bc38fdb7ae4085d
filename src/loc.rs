//! Source locations threaded through every pipeline stage.

use std::rc::Rc;

/// A location in an input file, given as a byte range plus the precomputed
/// line/column of its start (so error formatting never has to re-scan the file).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileSpan {
  /// The source file this span belongs to, shared cheaply across every node
  /// parsed from the same translation unit.
  pub file: Rc<str>,
  pub start: (u32, u32),
  pub end: (u32, u32),
}

impl FileSpan {
  #[must_use] pub fn dummy() -> Self {
    FileSpan { file: Rc::from("<generated>"), start: (0, 0), end: (0, 0) }
  }
}

impl std::fmt::Display for FileSpan {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}:{}:{}", self.file, self.start.0, self.start.1)
  }
}

/// A value annotated with the source location it came from.
#[derive(Clone, Debug)]
pub struct Spanned<T> {
  pub span: FileSpan,
  pub k: T,
}

impl<T> Spanned<T> {
  pub fn new(span: FileSpan, k: T) -> Self { Spanned { span, k } }

  pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Spanned<U> {
    Spanned { span: self.span, k: f(self.k) }
  }
}

impl<T: PartialEq> PartialEq for Spanned<T> {
  fn eq(&self, other: &Self) -> bool { self.k == other.k }
}
impl<T: Eq> Eq for Spanned<T> {}
