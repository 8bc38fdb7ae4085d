//! The simplifier (§4.3): inline each one-use pure binding into its single
//! use site and drop unused pure bindings entirely. Order of passes per the
//! spec is "inline then drop unused"; this pass does both bottom-up in one
//! recursive walk so a binding that becomes unused only after an enclosing
//! inlining is still cleaned up in the same call.
//!
//! Like the encoder, this is a semantic no-op guarded by [`TermNode::is_pure`]
//! (§4.3 "guarded by the typed node's purity flag") and preserves physical
//! identity of unchanged subtrees via `Rc::ptr_eq` (§9 Design Notes).

use std::rc::Rc;

use crate::types::term::{Term, TermKind, TermNode, VarId};

/// Simplify an entire term tree.
#[must_use] pub fn simplify(t: &Term) -> Term {
  match &t.desc {
    TermKind::Let { var, uses, e1, e2 } => {
      let e1s = simplify(e1);
      if *uses == 1 && e1s.is_pure() {
        return simplify(&subst_var(e2, *var, &e1s));
      }
      if *uses == 0 && e1s.is_pure() && !occurs_free(e2, *var) {
        return simplify(e2);
      }
      let e2s = simplify(e2);
      if Rc::ptr_eq(&e1s, e1) && Rc::ptr_eq(&e2s, e2) { return t.clone(); }
      rebuild(t, TermKind::Let { var: *var, uses: *uses, e1: e1s, e2: e2s })
    }
    _ => rebuild_generic(t),
  }
}

fn rebuild(t: &Term, desc: TermKind) -> Term {
  let rebuilt = TermNode::new(desc, t.ty.clone(), t.loc.clone()).with_transfer(t.transfer);
  match t.name { Some(n) => rebuilt.with_name(n), None => rebuilt }
}

fn rebuild_generic(t: &Term) -> Term {
  use TermKind as K;
  let desc = match &t.desc {
    K::Var(_) | K::Const(_) => return t.clone(),
    K::Let { .. } => unreachable!("handled by simplify"),
    K::Seq(a, b) => two(a, b, K::Seq),
    K::If(a, b, c) => three(a, b, c, K::If),
    K::Lambda { params, body } => {
      let b = simplify(body);
      if Rc::ptr_eq(&b, body) { return t.clone(); }
      K::Lambda { params: params.clone(), body: b }
    }
    K::Closure { captured, lifted } => {
      let l = simplify(lifted);
      if Rc::ptr_eq(&l, lifted) { return t.clone(); }
      K::Closure { captured: captured.clone(), lifted: l }
    }
    K::Apply(op, args) => {
      let a: Box<[Term]> = args.iter().map(simplify).collect();
      if all_ptr_eq(args, &a) { return t.clone(); }
      K::Apply(*op, a)
    }
    K::Call(name, args) => {
      let a: Box<[Term]> = args.iter().map(simplify).collect();
      if all_ptr_eq(args, &a) { return t.clone(); }
      K::Call(*name, a)
    }
    K::Exec(f, a) => two(f, a, K::Exec),
    K::MatchOption { scrutinee, none_case, some_bind, some_case } => {
      let s = simplify(scrutinee);
      let n = simplify(none_case);
      let sc = simplify(some_case);
      if Rc::ptr_eq(&s, scrutinee) && Rc::ptr_eq(&n, none_case) && Rc::ptr_eq(&sc, some_case) { return t.clone(); }
      K::MatchOption { scrutinee: s, none_case: n, some_bind: *some_bind, some_case: sc }
    }
    K::MatchNat { scrutinee, plus_bind, plus_case, minus_bind, minus_case } => {
      let s = simplify(scrutinee);
      let p = simplify(plus_case);
      let m = simplify(minus_case);
      if Rc::ptr_eq(&s, scrutinee) && Rc::ptr_eq(&p, plus_case) && Rc::ptr_eq(&m, minus_case) { return t.clone(); }
      K::MatchNat { scrutinee: s, plus_bind: *plus_bind, plus_case: p, minus_bind: *minus_bind, minus_case: m }
    }
    K::MatchList { scrutinee, nil_case, head_bind, tail_bind, cons_case } => {
      let s = simplify(scrutinee);
      let n = simplify(nil_case);
      let c = simplify(cons_case);
      if Rc::ptr_eq(&s, scrutinee) && Rc::ptr_eq(&n, nil_case) && Rc::ptr_eq(&c, cons_case) { return t.clone(); }
      K::MatchList { scrutinee: s, nil_case: n, head_bind: *head_bind, tail_bind: *tail_bind, cons_case: c }
    }
    K::MatchVariant { scrutinee, cases } => {
      let s = simplify(scrutinee);
      let cs: Box<[_]> = cases.iter().map(|c| crate::types::term::MatchCase {
        ctor: c.ctor, ctor_ty: c.ctor_ty.clone(), bind: c.bind, body: simplify(&c.body),
      }).collect();
      K::MatchVariant { scrutinee: s, cases: cs }
    }
    K::Loop { init, acc_bind, body } => two(init, body, |i, b| K::Loop { init: i, acc_bind: *acc_bind, body: b }),
    K::LoopLeft { init, acc_bind, body } => two(init, body, |i, b| K::LoopLeft { init: i, acc_bind: *acc_bind, body: b }),
    K::Fold { collection, init, elt_bind, acc_bind, body } => {
      let c = simplify(collection);
      let i = simplify(init);
      let b = simplify(body);
      K::Fold { collection: c, init: i, elt_bind: *elt_bind, acc_bind: *acc_bind, body: b }
    }
    K::MapFold { collection, init, elt_bind, acc_bind, body } => {
      let c = simplify(collection);
      let i = simplify(init);
      let b = simplify(body);
      K::MapFold { collection: c, init: i, elt_bind: *elt_bind, acc_bind: *acc_bind, body: b }
    }
    K::Map { collection, elt_bind, body } => two(collection, body, |c, b| K::Map { collection: c, elt_bind: *elt_bind, body: b }),
    K::RecordConstruct(name, fields) => {
      let fs: Box<[_]> = fields.iter().map(|(f, v)| (*f, simplify(v))).collect();
      K::RecordConstruct(*name, fs)
    }
    K::Tuple(elems) => {
      let es: Box<[Term]> = elems.iter().map(simplify).collect();
      if all_ptr_eq(elems, &es) { return t.clone(); }
      K::Tuple(es)
    }
    K::MakeVariant(variant, ctor, v) => K::MakeVariant(*variant, *ctor, simplify(v)),
    K::Project(inner, key) => K::Project(simplify(inner), *key),
    K::SetField(inner, key, v) => two(inner, v, move |i, v| K::SetField(i, *key, v)),
    K::Transfer { dest, amount, arg } => {
      let d = simplify(dest);
      let a = simplify(amount);
      let g = simplify(arg);
      K::Transfer { dest: d, amount: a, arg: g }
    }
    K::Failwith(e) => K::Failwith(simplify(e)),
    K::CreateContract(e) => K::CreateContract(simplify(e)),
    K::ContractAt(e, ty) => K::ContractAt(simplify(e), ty.clone()),
    K::Unpack(e, ty) => K::Unpack(simplify(e), ty.clone()),
    K::Pair(a, b) => two(a, b, K::Pair),
    K::Inject { left, other_ty, value } => K::Inject { left: *left, other_ty: other_ty.clone(), value: simplify(value) },
    K::MatchOr { scrutinee, left_bind, left_case, right_bind, right_case } => {
      let s = simplify(scrutinee);
      let l = simplify(left_case);
      let r = simplify(right_case);
      K::MatchOr { scrutinee: s, left_bind: *left_bind, left_case: l, right_bind: *right_bind, right_case: r }
    }
  };
  rebuild(t, desc)
}

fn two(a: &Term, b: &Term, f: impl FnOnce(Term, Term) -> TermKind) -> TermKind {
  f(simplify(a), simplify(b))
}

fn three(a: &Term, b: &Term, c: &Term, f: impl FnOnce(Term, Term, Term) -> TermKind) -> TermKind {
  f(simplify(a), simplify(b), simplify(c))
}

fn all_ptr_eq(a: &[Term], b: &[Term]) -> bool {
  a.len() == b.len() && a.iter().zip(b).all(|(x, y)| Rc::ptr_eq(x, y))
}

/// Whether `var` is referenced anywhere in `term`, including inside a nested
/// lambda/closure body. Unlike [`crate::typeck::usecount::count_uses`] (which
/// deliberately ignores captures so inlining never crosses a lambda
/// boundary), dead-binding elimination must not drop a binding that a
/// closure still captures even though it has zero *direct* uses.
fn occurs_free(term: &Term, var: VarId) -> bool {
  match &term.desc {
    TermKind::Var(v) => *v == var,
    TermKind::Const(_) => false,
    TermKind::Let { e1, e2, .. } => occurs_free(e1, var) || occurs_free(e2, var),
    TermKind::Seq(a, b) | TermKind::Pair(a, b) | TermKind::Exec(a, b) => occurs_free(a, var) || occurs_free(b, var),
    TermKind::If(a, b, c) => occurs_free(a, var) || occurs_free(b, var) || occurs_free(c, var),
    TermKind::Lambda { body, .. } => occurs_free(body, var),
    TermKind::Closure { captured, lifted } => captured.contains(&var) || occurs_free(lifted, var),
    TermKind::Apply(_, args) | TermKind::Call(_, args) => args.iter().any(|a| occurs_free(a, var)),
    TermKind::MatchOption { scrutinee, none_case, some_case, .. } =>
      occurs_free(scrutinee, var) || occurs_free(none_case, var) || occurs_free(some_case, var),
    TermKind::MatchNat { scrutinee, plus_case, minus_case, .. } =>
      occurs_free(scrutinee, var) || occurs_free(plus_case, var) || occurs_free(minus_case, var),
    TermKind::MatchList { scrutinee, nil_case, cons_case, .. } =>
      occurs_free(scrutinee, var) || occurs_free(nil_case, var) || occurs_free(cons_case, var),
    TermKind::MatchVariant { scrutinee, cases } =>
      occurs_free(scrutinee, var) || cases.iter().any(|c| occurs_free(&c.body, var)),
    TermKind::MatchOr { scrutinee, left_case, right_case, .. } =>
      occurs_free(scrutinee, var) || occurs_free(left_case, var) || occurs_free(right_case, var),
    TermKind::Loop { init, body, .. } | TermKind::LoopLeft { init, body, .. } =>
      occurs_free(init, var) || occurs_free(body, var),
    TermKind::Fold { collection, init, body, .. } | TermKind::MapFold { collection, init, body, .. } =>
      occurs_free(collection, var) || occurs_free(init, var) || occurs_free(body, var),
    TermKind::Map { collection, body, .. } => occurs_free(collection, var) || occurs_free(body, var),
    TermKind::RecordConstruct(_, fields) => fields.iter().any(|(_, v)| occurs_free(v, var)),
    TermKind::Tuple(elems) => elems.iter().any(|v| occurs_free(v, var)),
    TermKind::MakeVariant(_, _, v) | TermKind::Inject { value: v, .. } => occurs_free(v, var),
    TermKind::Project(t, _) => occurs_free(t, var),
    TermKind::SetField(t, _, v) => occurs_free(t, var) || occurs_free(v, var),
    TermKind::Transfer { dest, amount, arg } => occurs_free(dest, var) || occurs_free(amount, var) || occurs_free(arg, var),
    TermKind::Failwith(e) | TermKind::CreateContract(e) | TermKind::ContractAt(e, _) | TermKind::Unpack(e, _) => occurs_free(e, var),
  }
}

/// Replace every direct (non-capturing) occurrence of `var` with `with`.
/// Does not descend into nested lambda/closure bodies for the same reason
/// `count_uses` does not: a one-use inlining candidate (by construction)
/// never has its single use behind a lambda boundary, so there is nothing
/// to substitute there; leaving those bodies untouched also means a pure
/// value substituted at one site can't accidentally shadow a same-named
/// capture deeper in the tree (variable identity is by [`VarId`], not name,
/// so this is purely a recursion-bound, not a correctness requirement).
fn subst_var(term: &Term, var: VarId, with: &Term) -> Term {
  use TermKind as K;
  match &term.desc {
    K::Var(v) if *v == var => with.clone(),
    K::Var(_) | K::Const(_) | K::Lambda { .. } | K::Closure { .. } => term.clone(),
    K::Let { var: v2, uses, e1, e2 } => rebuild(term, K::Let {
      var: *v2, uses: *uses, e1: subst_var(e1, var, with), e2: subst_var(e2, var, with),
    }),
    K::Seq(a, b) => rebuild(term, K::Seq(subst_var(a, var, with), subst_var(b, var, with))),
    K::Pair(a, b) => rebuild(term, K::Pair(subst_var(a, var, with), subst_var(b, var, with))),
    K::Exec(a, b) => rebuild(term, K::Exec(subst_var(a, var, with), subst_var(b, var, with))),
    K::If(a, b, c) => rebuild(term, K::If(subst_var(a, var, with), subst_var(b, var, with), subst_var(c, var, with))),
    K::Apply(op, args) => rebuild(term, K::Apply(*op, args.iter().map(|a| subst_var(a, var, with)).collect())),
    K::Call(name, args) => rebuild(term, K::Call(*name, args.iter().map(|a| subst_var(a, var, with)).collect())),
    K::MatchOption { scrutinee, none_case, some_bind, some_case } => rebuild(term, K::MatchOption {
      scrutinee: subst_var(scrutinee, var, with), none_case: subst_var(none_case, var, with),
      some_bind: *some_bind, some_case: subst_var(some_case, var, with),
    }),
    K::MatchNat { scrutinee, plus_bind, plus_case, minus_bind, minus_case } => rebuild(term, K::MatchNat {
      scrutinee: subst_var(scrutinee, var, with), plus_bind: *plus_bind, plus_case: subst_var(plus_case, var, with),
      minus_bind: *minus_bind, minus_case: subst_var(minus_case, var, with),
    }),
    K::MatchList { scrutinee, nil_case, head_bind, tail_bind, cons_case } => rebuild(term, K::MatchList {
      scrutinee: subst_var(scrutinee, var, with), nil_case: subst_var(nil_case, var, with),
      head_bind: *head_bind, tail_bind: *tail_bind, cons_case: subst_var(cons_case, var, with),
    }),
    K::MatchVariant { scrutinee, cases } => rebuild(term, K::MatchVariant {
      scrutinee: subst_var(scrutinee, var, with),
      cases: cases.iter().map(|c| crate::types::term::MatchCase {
        ctor: c.ctor, ctor_ty: c.ctor_ty.clone(), bind: c.bind, body: subst_var(&c.body, var, with),
      }).collect(),
    }),
    K::MatchOr { scrutinee, left_bind, left_case, right_bind, right_case } => rebuild(term, K::MatchOr {
      scrutinee: subst_var(scrutinee, var, with), left_bind: *left_bind, left_case: subst_var(left_case, var, with),
      right_bind: *right_bind, right_case: subst_var(right_case, var, with),
    }),
    K::Loop { init, acc_bind, body } => rebuild(term, K::Loop {
      init: subst_var(init, var, with), acc_bind: *acc_bind, body: subst_var(body, var, with),
    }),
    K::LoopLeft { init, acc_bind, body } => rebuild(term, K::LoopLeft {
      init: subst_var(init, var, with), acc_bind: *acc_bind, body: subst_var(body, var, with),
    }),
    K::Fold { collection, init, elt_bind, acc_bind, body } => rebuild(term, K::Fold {
      collection: subst_var(collection, var, with), init: subst_var(init, var, with),
      elt_bind: *elt_bind, acc_bind: *acc_bind, body: subst_var(body, var, with),
    }),
    K::MapFold { collection, init, elt_bind, acc_bind, body } => rebuild(term, K::MapFold {
      collection: subst_var(collection, var, with), init: subst_var(init, var, with),
      elt_bind: *elt_bind, acc_bind: *acc_bind, body: subst_var(body, var, with),
    }),
    K::Map { collection, elt_bind, body } => rebuild(term, K::Map {
      collection: subst_var(collection, var, with), elt_bind: *elt_bind, body: subst_var(body, var, with),
    }),
    K::RecordConstruct(name, fields) => rebuild(term, K::RecordConstruct(*name,
      fields.iter().map(|(f, v)| (*f, subst_var(v, var, with))).collect())),
    K::Tuple(elems) => rebuild(term, K::Tuple(elems.iter().map(|v| subst_var(v, var, with)).collect())),
    K::MakeVariant(variant, ctor, v) => rebuild(term, K::MakeVariant(*variant, *ctor, subst_var(v, var, with))),
    K::Inject { left, other_ty, value } => rebuild(term, K::Inject { left: *left, other_ty: other_ty.clone(), value: subst_var(value, var, with) }),
    K::Project(t, key) => rebuild(term, K::Project(subst_var(t, var, with), *key)),
    K::SetField(t, key, v) => rebuild(term, K::SetField(subst_var(t, var, with), *key, subst_var(v, var, with))),
    K::Transfer { dest, amount, arg } => rebuild(term, K::Transfer {
      dest: subst_var(dest, var, with), amount: subst_var(amount, var, with), arg: subst_var(arg, var, with),
    }),
    K::Failwith(e) => rebuild(term, K::Failwith(subst_var(e, var, with))),
    K::CreateContract(e) => rebuild(term, K::CreateContract(subst_var(e, var, with))),
    K::ContractAt(e, ty) => rebuild(term, K::ContractAt(subst_var(e, var, with), ty.clone())),
    K::Unpack(e, ty) => rebuild(term, K::Unpack(subst_var(e, var, with), ty.clone())),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::loc::FileSpan;
  use crate::types::konst::Const;
  use crate::types::ty::TyKind;

  fn var(v: VarId, ty: crate::types::ty::Ty) -> Term {
    TermNode::new(TermKind::Var(v), ty, FileSpan::dummy())
  }
  fn int_const(n: i64) -> Term {
    TermNode::new(TermKind::Const(Const::Int(n.into())), TyKind::int(), FileSpan::dummy())
  }

  #[test]
  fn one_use_pure_binding_is_inlined_away() {
    let x = VarId(0);
    let body = TermNode::new(
      TermKind::Let { var: x, uses: 1, e1: int_const(5), e2: var(x, TyKind::int()) },
      TyKind::int(), FileSpan::dummy(),
    );
    let simplified = simplify(&body);
    assert!(matches!(simplified.desc, TermKind::Const(Const::Int(_))));
  }

  #[test]
  fn unused_pure_binding_is_dropped() {
    let x = VarId(0);
    let body = TermNode::new(
      TermKind::Let { var: x, uses: 0, e1: int_const(5), e2: int_const(9) },
      TyKind::int(), FileSpan::dummy(),
    );
    let simplified = simplify(&body);
    assert!(matches!(&simplified.desc, TermKind::Const(Const::Int(n)) if *n == 9.into()));
  }

  #[test]
  fn impure_binding_is_never_inlined_even_with_one_use() {
    let x = VarId(0);
    let transfer = TermNode::new(
      TermKind::Failwith(int_const(0)), TyKind::unit(), FileSpan::dummy(),
    ).with_transfer(true);
    let body = TermNode::new(
      TermKind::Let { var: x, uses: 1, e1: transfer, e2: var(x, TyKind::unit()) },
      TyKind::unit(), FileSpan::dummy(),
    );
    let simplified = simplify(&body);
    assert!(matches!(simplified.desc, TermKind::Let { .. }), "impure binding must survive simplification");
  }

  #[test]
  fn binding_captured_only_inside_a_lambda_is_not_dropped() {
    let x = VarId(0);
    let lambda_body = var(x, TyKind::int());
    let lambda = TermNode::new(
      TermKind::Lambda { params: Box::new([VarId(1)]), body: lambda_body },
      TyKind::Lambda(TyKind::int(), TyKind::int()).into(),
      FileSpan::dummy(),
    );
    let whole = TermNode::new(
      TermKind::Let { var: x, uses: 0, e1: int_const(3), e2: lambda },
      TyKind::Lambda(TyKind::int(), TyKind::int()).into(),
      FileSpan::dummy(),
    );
    let simplified = simplify(&whole);
    assert!(matches!(simplified.desc, TermKind::Let { .. }), "a captured binding must not be dropped as dead");
  }
}
