//! The typed IR term (§3 "Typed term"). Every node is `Rc`-shared so that the
//! encoder and simplifier can test `Rc::ptr_eq` on children and skip
//! reallocating a parent when no subterm actually changed (§9 Design Notes,
//! "Physical identity preservation").

use std::rc::Rc;
use crate::loc::FileSpan;
use crate::prim::PrimOp;
use crate::symbol::Symbol;
use crate::types::konst::Const;
use crate::types::ty::Ty;

pub type Term = Rc<TermNode>;

/// A unique local variable identifier, assigned by the typechecker. Distinct
/// from the user-facing [`Symbol`] name (kept separately as debug metadata)
/// so that shadowing and lambda-lifted renames never collide.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VarId(pub u32);

/// What a [`TermKind::Project`]/[`TermKind::SetField`] addresses: a labeled
/// record field, or a plain tuple component by position. Both compile to the
/// same `CAR`/`CDR` chain (§4.4 "Records": "the generator uses the same
/// access/update algorithms but emits ... labeled forms for readable output").
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ProjKey {
  Field(Symbol),
  Index(usize),
  /// One step of a binarized-pair access chain, produced by the encoder
  /// (§4.2 "Record construction and projection") once `Field`/`Index` have
  /// been resolved to a concrete nested-pair position.
  Car,
  Cdr,
}

#[derive(Clone, Debug)]
pub struct MatchCase {
  pub ctor: Symbol,
  pub ctor_ty: Ty,
  pub bind: Option<VarId>,
  pub body: Term,
}

/// The node itself. `desc` is boxed apart from the other fields per node
/// variant via [`TermKind`]; the four metadata fields (`ty`, `loc`, `name`,
/// `transfer`) are common to every node, mirroring §3's "each node carries...".
#[derive(Clone, Debug)]
pub struct TermNode {
  pub desc: TermKind,
  pub ty: Ty,
  pub loc: FileSpan,
  /// The surface-level variable name this value is bound to, if any; used
  /// only as a debug annotation in the generated M code (§4.4 "Name
  /// annotations"). Never affects typechecking or codegen semantics.
  pub name: Option<Symbol>,
  /// `true` iff evaluating this term may enqueue an operation (§4.1 "Effect
  /// analysis"). Set once by the typechecker and never recomputed downstream.
  pub transfer: bool,
}

#[derive(Clone, Debug)]
pub enum TermKind {
  Var(VarId),
  Const(Const),
  /// `let x = e1 in e2`; `uses` is the use-count the typechecker assigned to
  /// `x` in `e2`, consumed by the simplifier (§4.1 "Use counting", §4.3).
  Let { var: VarId, uses: u32, e1: Term, e2: Term },
  Seq(Term, Term),
  If(Term, Term, Term),
  /// An un-lifted lambda: `params` are fresh [`VarId`]s bound in `body`.
  Lambda { params: Box<[VarId]>, body: Term },
  /// A lambda together with the free variables it captures, already rewritten
  /// by the encoder into the `(env, lifted_lambda)` pair shape (§4.2
  /// "Closures"); kept as a distinct node so the simplifier and codegen can
  /// still tell a closure from a plain pair.
  Closure { captured: Box<[VarId]>, lifted: Term },
  Apply(PrimOp, Box<[Term]>),
  /// User-defined function call, resolved to a global by name.
  Call(Symbol, Box<[Term]>),
  MatchOption { scrutinee: Term, none_case: Term, some_bind: VarId, some_case: Term },
  /// `match%nat`: `plus_case`/`minus_case` both receive the same bound
  /// variable but the bound value differs (original vs. absolute value),
  /// exactly as the generator's `DUP; ABS; SWAP; GE; IF` shape implies (§4.4).
  MatchNat { scrutinee: Term, plus_bind: VarId, plus_case: Term, minus_bind: VarId, minus_case: Term },
  MatchList { scrutinee: Term, nil_case: Term, head_bind: VarId, tail_bind: VarId, cons_case: Term },
  MatchVariant { scrutinee: Term, cases: Box<[MatchCase]> },
  /// `loop`: `body` must have type `(bool, acc_ty)`.
  Loop { init: Term, acc_bind: VarId, body: Term },
  /// `loop_left`: `body` must have type `or acc_ty result_ty`.
  LoopLeft { init: Term, acc_bind: VarId, body: Term },
  Fold { collection: Term, init: Term, elt_bind: VarId, acc_bind: VarId, body: Term },
  Map { collection: Term, elt_bind: VarId, body: Term },
  MapFold { collection: Term, init: Term, elt_bind: VarId, acc_bind: VarId, body: Term },
  RecordConstruct(Symbol, Box<[(Symbol, Term)]>),
  /// An anonymous runtime tuple, positional rather than name-keyed
  /// (§4.2 "Record construction" covers the binarization both share):
  /// the encoder folds this into the same right-leaning [`TermKind::Pair`]
  /// spine it builds for [`TermKind::RecordConstruct`].
  Tuple(Box<[Term]>),
  /// Build a value of variant `.0` via constructor `.1` applied to `.2`
  /// (§4.2 "Variant constructors"), mirroring [`crate::types::konst::Const::Variant`].
  MakeVariant(Symbol, Symbol, Term),
  Project(Term, ProjKey),
  SetField(Term, ProjKey, Term),
  Transfer { dest: Term, amount: Term, arg: Term },
  Failwith(Term),
  CreateContract(Term),
  ContractAt(Term, Ty),
  Unpack(Term, Ty),

  // -- encoder-introduced nodes (§4.2), absent from the typechecker's output --
  /// A binarized pair, replacing [`TermKind::RecordConstruct`] once field
  /// names have been erased to declaration-order nesting.
  Pair(Term, Term),
  /// A step of a right-leaning `or` injection, replacing
  /// [`TermKind::MakeVariant`]. `other_ty` records the type of the side not
  /// taken, since the target's `LEFT`/`RIGHT` instructions need it.
  Inject { left: bool, other_ty: Ty, value: Term },
  /// The binarized counterpart of [`TermKind::MatchVariant`]: a single
  /// `or` discrimination, nested by the encoder to cover every constructor.
  MatchOr { scrutinee: Term, left_bind: VarId, left_case: Term, right_bind: VarId, right_case: Term },
  /// Apply a first-class callable (a [`TermKind::Closure`] or plain
  /// [`TermKind::Lambda`] value) to an argument, introduced by the encoder
  /// once closure conversion has made the callee a value rather than a name
  /// (§4.2 "Closures").
  Exec(Term, Term),
}

impl TermNode {
  #[must_use] pub fn new(desc: TermKind, ty: Ty, loc: FileSpan) -> Term {
    Rc::new(TermNode { desc, ty, loc, name: None, transfer: false })
  }

  #[must_use] pub fn with_name(mut self: Term, name: Symbol) -> Term {
    Rc::make_mut(&mut self).name = Some(name);
    self
  }

  #[must_use] pub fn with_transfer(mut self: Term, transfer: bool) -> Term {
    Rc::make_mut(&mut self).transfer = transfer;
    self
  }

  /// Whether this node is free of effects (no transfer, and the same holds
  /// recursively for every subterm that the simplifier would need to inline).
  /// The simplifier relies on this exact flag rather than re-deriving
  /// purity, per §4.3 ("guarded by the typed node's purity flag").
  #[must_use] pub fn is_pure(&self) -> bool { !self.transfer }
}

/// Allocate a fresh [`VarId`] from a simple per-translation-unit counter.
/// Kept as a free-standing helper (rather than a method on an env) so every
/// pass that introduces new binders (encoder lambda-lifting, decompiler
/// reconstruction) shares one monotonic source.
#[derive(Default, Clone, Copy, Debug)]
pub struct VarIdGen(u32);
impl VarIdGen {
  pub fn fresh(&mut self) -> VarId { let id = self.0; self.0 += 1; VarId(id) }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::types::ty::TyKind;

  #[test]
  fn fresh_var_ids_are_distinct_and_monotonic() {
    let mut gen = VarIdGen::default();
    let a = gen.fresh();
    let b = gen.fresh();
    assert_ne!(a, b);
    assert!(a.0 < b.0);
  }

  #[test]
  fn with_name_does_not_disturb_other_clones() {
    let t = TermNode::new(TermKind::Const(Const::Unit), TyKind::unit(), FileSpan::dummy());
    let other = t.clone();
    let named = t.with_name(crate::symbol::intern("x"));
    assert_eq!(named.name, Some(crate::symbol::intern("x")));
    assert_eq!(other.name, None);
  }
}
