//! Symbolic M instructions (§3 "Symbolic M instruction"). This is the shape
//! produced by the code generator and consumed by the peephole/tail-fail
//! finalizer and the emitter; it is *not* the external wire syntax (that is
//! [`crate::types::concrete`]), so it is free to use structured, nested
//! `Block`s instead of a flat token stream.

use crate::loc::FileSpan;
use crate::prim::PrimOp;
use crate::symbol::Symbol;
use crate::types::konst::Const;
use crate::types::ty::Ty;

/// A straight-line sequence of instructions, i.e. one basic block's body (or
/// one arm of a control-flow instruction).
pub type Block = Vec<Inst>;

/// One step of a `CAR`/`CDR` access chain. The code generator never emits a
/// bare `CAR`/`CDR` for a multi-level tuple/record projection; it always
/// builds the whole chain at once (§4.4 "Tuples"/"Records") so the peephole
/// pass sees one instruction to reason about instead of a run of singles.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Cadr { Car, Cdr }

#[derive(Clone, Debug, PartialEq)]
pub enum InstForm {
  // -- stack moves --
  Dup(u32),
  Swap,
  Dip(u32, Block),
  /// Drop `k` elements starting at depth `n` (i.e. `DIP(n, DROP k)`, collapsed
  /// into one form since the peephole pass treats it as a unit, §4.5).
  DipDrop(u32, u32),
  Drop(u32),

  // -- structural --
  Pair,
  /// A (possibly multi-level) access chain, with an optional field label for
  /// the readable `RECORD`-style output (§4.4 "Records").
  Access(Box<[Cadr]>, Option<Symbol>),
  /// Construct a right-leaning pair spine over `fields.len()` values, each
  /// optionally labeled (§4.4 "Records"); `fields.len() == 2` is the plain
  /// `PAIR` case used for anonymous tuples.
  Record(Box<[Option<Symbol>]>),
  Left(Ty, Option<Symbol>),
  Right(Ty, Option<Symbol>),
  Some_,
  None_(Ty),
  Nil(Ty),
  Cons,
  EmptySet(Ty),
  EmptyMap(Ty, Ty),
  EmptyBigMap(Ty, Ty),
  Push(Const),

  // -- control --
  If(Block, Block),
  IfNone(Block, Block),
  IfLeft(Block, Block),
  IfCons(Block, Block),
  Loop(Block),
  LoopLeft(Block),
  Iter(Block),
  Map(Block),
  Lambda(Ty, Ty, Block),
  Exec,
  /// A debug-name annotation applied after a control-flow form that cannot
  /// carry `@name` directly (§4.4 "Name annotations").
  Rename(Symbol),
  Failwith,

  // -- arithmetic / comparison / logical / crypto / collection ops --
  Prim(PrimOp),

  // -- contract ops --
  TransferTokens,
  Self_,
  Balance,
  Now,
  Amount,
  Sender,
  Source,
  StepsToQuota,
  AddressOf,
  Contract(Ty),
  SetDelegate,
  ImplicitAccount,
  CreateAccount,
  CreateContract,
  Pack,
  Unpack(Ty),
}

/// One instruction, with its source location and optional debug-name
/// annotation (§3: "Each instruction serializes ... carries ... an optional
/// variable-name annotation").
#[derive(Clone, Debug, PartialEq)]
pub struct Inst {
  pub form: InstForm,
  pub loc: FileSpan,
  pub name: Option<Symbol>,
}

impl Inst {
  #[must_use] pub fn new(form: InstForm, loc: FileSpan) -> Self { Inst { form, loc, name: None } }
  #[must_use] pub fn named(mut self, name: Symbol) -> Self { self.name = Some(name); self }
}

/// Characters forbidden in an M annotation, and their sanitized replacement
/// (§4.4 "Names are sanitized").
#[must_use] pub fn sanitize_name(s: &str) -> String {
  let mut out = String::with_capacity(s.len());
  for c in s.chars() {
    match c {
      '#' => out.push_str("_sharp_"),
      '/' => out.push_str("_slash_"),
      '\'' => out.push_str("_prim_"),
      c => out.push(c),
    }
  }
  out
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn sanitize_replaces_forbidden_characters() {
    assert_eq!(sanitize_name("x#1"), "x_sharp_1");
    assert_eq!(sanitize_name("a/b"), "a_slash_b");
    assert_eq!(sanitize_name("x'"), "x_prim_");
    assert_eq!(sanitize_name("plain_name"), "plain_name");
  }

  #[test]
  fn sanitized_names_are_ascii_identifier_safe() {
    let s = sanitize_name("f#o/o'");
    assert!(s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'));
  }
}
