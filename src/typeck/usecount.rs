//! Use-count annotation (§4.1 "Use counting"): after a `let` body is fully
//! typed, count how many times its bound variable is referenced so the
//! simplifier (§4.3) can later decide whether to inline it.

use std::collections::HashMap;
use crate::types::term::{Term, TermKind, VarId};

/// Count the occurrences of `var` as a [`TermKind::Var`] anywhere in `term`,
/// not descending into a nested `Lambda`/`Closure` body — a reference from
/// inside a closure is a capture, not a direct use, and must not be inlined
/// across the lambda boundary (that would change which environment the
/// reference closes over).
#[must_use] pub fn count_uses(term: &Term, var: VarId) -> u32 {
  let mut count = 0;
  count_uses_rec(term, var, &mut count);
  count
}

fn count_uses_rec(term: &Term, var: VarId, count: &mut u32) {
  match &term.desc {
    TermKind::Var(v) => if *v == var { *count += 1 },
    TermKind::Const(_) => {}
    TermKind::Let { e1, e2, .. } => { count_uses_rec(e1, var, count); count_uses_rec(e2, var, count); }
    TermKind::Seq(a, b) | TermKind::If(a, b, _) => {
      count_uses_rec(a, var, count);
      count_uses_rec(b, var, count);
      if let TermKind::If(_, _, c) = &term.desc { count_uses_rec(c, var, count); }
    }
    TermKind::Lambda { .. } | TermKind::Closure { .. } => {}
    TermKind::Apply(_, args) | TermKind::Call(_, args) => for a in args.iter() { count_uses_rec(a, var, count); },
    TermKind::MatchOption { scrutinee, none_case, some_case, .. } => {
      count_uses_rec(scrutinee, var, count);
      count_uses_rec(none_case, var, count);
      count_uses_rec(some_case, var, count);
    }
    TermKind::MatchNat { scrutinee, plus_case, minus_case, .. } => {
      count_uses_rec(scrutinee, var, count);
      count_uses_rec(plus_case, var, count);
      count_uses_rec(minus_case, var, count);
    }
    TermKind::MatchList { scrutinee, nil_case, cons_case, .. } => {
      count_uses_rec(scrutinee, var, count);
      count_uses_rec(nil_case, var, count);
      count_uses_rec(cons_case, var, count);
    }
    TermKind::MatchVariant { scrutinee, cases } => {
      count_uses_rec(scrutinee, var, count);
      for c in cases.iter() { count_uses_rec(&c.body, var, count); }
    }
    TermKind::Loop { init, body, .. } | TermKind::LoopLeft { init, body, .. } => {
      count_uses_rec(init, var, count);
      count_uses_rec(body, var, count);
    }
    TermKind::Fold { collection, init, body, .. } | TermKind::MapFold { collection, init, body, .. } => {
      count_uses_rec(collection, var, count);
      count_uses_rec(init, var, count);
      count_uses_rec(body, var, count);
    }
    TermKind::Map { collection, body, .. } => {
      count_uses_rec(collection, var, count);
      count_uses_rec(body, var, count);
    }
    TermKind::RecordConstruct(_, fields) => for (_, v) in fields.iter() { count_uses_rec(v, var, count); },
    TermKind::Tuple(elems) => for v in elems.iter() { count_uses_rec(v, var, count); },
    TermKind::MakeVariant(_, _, v) => count_uses_rec(v, var, count),
    TermKind::Pair(a, b) => { count_uses_rec(a, var, count); count_uses_rec(b, var, count); }
    TermKind::Inject { value, .. } => count_uses_rec(value, var, count),
    TermKind::MatchOr { scrutinee, left_case, right_case, .. } => {
      count_uses_rec(scrutinee, var, count);
      count_uses_rec(left_case, var, count);
      count_uses_rec(right_case, var, count);
    }
    TermKind::Exec(f, a) => { count_uses_rec(f, var, count); count_uses_rec(a, var, count); }
    TermKind::Project(t, _) => count_uses_rec(t, var, count),
    TermKind::SetField(t, _, v) => { count_uses_rec(t, var, count); count_uses_rec(v, var, count); }
    TermKind::Transfer { dest, amount, arg } => {
      count_uses_rec(dest, var, count);
      count_uses_rec(amount, var, count);
      count_uses_rec(arg, var, count);
    }
    TermKind::Failwith(e) | TermKind::CreateContract(e) |
    TermKind::ContractAt(e, _) | TermKind::Unpack(e, _) => count_uses_rec(e, var, count),
  }
}

/// Build a fresh count for every `let`-bound variable in `term`, keyed by
/// [`VarId`]. Used by tests and by the simplifier's dead-binding pass to
/// double check a count without re-threading it through every constructor.
#[must_use] pub fn all_use_counts(term: &Term) -> HashMap<VarId, u32> {
  let mut map = HashMap::new();
  collect_lets(term, &mut map);
  map
}

fn collect_lets(term: &Term, map: &mut HashMap<VarId, u32>) {
  if let TermKind::Let { var, e2, .. } = &term.desc {
    map.insert(*var, count_uses(e2, *var));
  }
  walk_children(term, &mut |t| collect_lets(t, map));
}

fn walk_children(term: &Term, f: &mut impl FnMut(&Term)) {
  match &term.desc {
    TermKind::Var(_) | TermKind::Const(_) | TermKind::Lambda { .. } => {}
    TermKind::Let { e1, e2, .. } => { f(e1); f(e2); }
    TermKind::Seq(a, b) => { f(a); f(b); }
    TermKind::If(a, b, c) => { f(a); f(b); f(c); }
    TermKind::Closure { lifted, .. } => f(lifted),
    TermKind::Apply(_, args) | TermKind::Call(_, args) => for a in args.iter() { f(a); },
    TermKind::MatchOption { scrutinee, none_case, some_case, .. } => { f(scrutinee); f(none_case); f(some_case); }
    TermKind::MatchNat { scrutinee, plus_case, minus_case, .. } => { f(scrutinee); f(plus_case); f(minus_case); }
    TermKind::MatchList { scrutinee, nil_case, cons_case, .. } => { f(scrutinee); f(nil_case); f(cons_case); }
    TermKind::MatchVariant { scrutinee, cases } => { f(scrutinee); for c in cases.iter() { f(&c.body); } }
    TermKind::Loop { init, body, .. } | TermKind::LoopLeft { init, body, .. } => { f(init); f(body); }
    TermKind::Fold { collection, init, body, .. } | TermKind::MapFold { collection, init, body, .. } => {
      f(collection); f(init); f(body);
    }
    TermKind::Map { collection, body, .. } => { f(collection); f(body); }
    TermKind::RecordConstruct(_, fields) => for (_, v) in fields.iter() { f(v); },
    TermKind::Tuple(elems) => for v in elems.iter() { f(v); },
    TermKind::MakeVariant(_, _, v) => f(v),
    TermKind::Pair(a, b) => { f(a); f(b); }
    TermKind::Inject { value, .. } => f(value),
    TermKind::MatchOr { scrutinee, left_case, right_case, .. } => { f(scrutinee); f(left_case); f(right_case); }
    TermKind::Exec(fun, a) => { f(fun); f(a); }
    TermKind::Project(t, _) => f(t),
    TermKind::SetField(t, _, v) => { f(t); f(v); }
    TermKind::Transfer { dest, amount, arg } => { f(dest); f(amount); f(arg); }
    TermKind::Failwith(e) | TermKind::CreateContract(e) |
    TermKind::ContractAt(e, _) | TermKind::Unpack(e, _) => f(e),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::loc::FileSpan;
  use crate::types::konst::Const;
  use crate::types::term::TermNode;
  use crate::types::ty::TyKind;

  fn var(v: VarId, ty: crate::types::ty::Ty) -> Term {
    TermNode::new(TermKind::Var(v), ty, FileSpan::dummy())
  }

  #[test]
  fn counts_direct_uses_but_not_inside_nested_lambda() {
    let x = VarId(0);
    let body = TermNode::new(
      TermKind::Seq(var(x, TyKind::int()), {
        let lam_body = var(x, TyKind::int());
        TermNode::new(TermKind::Lambda { params: Box::new([VarId(1)]), body: lam_body }, TyKind::int(), FileSpan::dummy())
      }),
      TyKind::int(), FileSpan::dummy());
    // one direct use, one hidden inside the lambda that must not count
    assert_eq!(count_uses(&body, x), 1);
  }

  #[test]
  fn zero_uses_for_unreferenced_var() {
    let unused = VarId(7);
    let lit = TermNode::new(TermKind::Const(Const::Unit), TyKind::unit(), FileSpan::dummy());
    assert_eq!(count_uses(&lit, unused), 0);
  }
}
