//! Bidirectional expression checking (§4.1). Constants, applications, and
//! projections synthesize a type upward; `if`, `let`-bodies, lambdas, and
//! match arms are checked against a type pushed downward from the caller.

use crate::env::{EffectCtx, Env};
use crate::error::{CompileError, TypeError, TypeErrorKind};
use crate::loc::FileSpan;
use crate::prim::PrimOp;
use crate::symbol::Symbol;
use crate::types::ast::{UExpr, UExprKind, UPattern};
use crate::types::konst::Const;
use crate::types::term::{ProjKey, Term, TermKind, TermNode, VarId};
use crate::types::ty::{Ground, Ty, TyKind};

type Result<T> = std::result::Result<T, CompileError>;

fn mismatch(expected: &Ty, found: &Ty, loc: &FileSpan) -> CompileError {
  CompileError::Semantic(TypeError {
    kind: TypeErrorKind::TypeMismatch { expected: expected.clone(), found: found.clone() },
    loc: loc.clone(),
    expected_at: None,
  })
}

fn semantic(kind: TypeErrorKind, loc: &FileSpan) -> CompileError {
  CompileError::Semantic(TypeError { kind, loc: loc.clone(), expected_at: None })
}

/// Reconcile a synthesized type with the type pushed down from the caller,
/// if any. Bidirectional checking never narrows a type, only confirms it.
fn reconcile(found: Ty, expected: Option<&Ty>, loc: &FileSpan) -> Result<Ty> {
  match expected {
    Some(exp) if *exp != found => Err(mismatch(exp, &found, loc)),
    _ => Ok(found),
  }
}

fn option_ty(inner: Ty) -> Ty { TyKind::Option(inner).into() }

/// Type-check `expr`. When `expected` is `Some`, propagate it downward for
/// the forms that need it (`if`, `let` body, lambda, match arms); otherwise
/// synthesize a type from the expression's own shape.
pub fn check(env: &mut Env, expr: &UExpr, expected: Option<&Ty>) -> Result<Term> {
  let loc = &expr.span;
  let (desc, ty, transfer) = match &expr.k {
    UExprKind::Var(name) => {
      let (var, ty) = env.lookup_var(*name)
        .ok_or_else(|| semantic(TypeErrorKind::UnboundVar(*name), loc))?;
      (TermKind::Var(var), ty, false)
    }
    UExprKind::Const(c) => {
      let ty = const_ty(c, loc)?;
      (TermKind::Const(c.clone()), ty, false)
    }
    UExprKind::Tuple(elems) => return check_tuple(env, elems, expected, loc),
    UExprKind::Let(pat, e1, e2) => return check_let(env, pat, e1, e2, expected, loc),
    UExprKind::Seq(a, b) => {
      let a = check(env, a, Some(&TyKind::unit()))?;
      let b = check(env, b, expected)?;
      let transfer = a.transfer || b.transfer;
      let ty = b.ty.clone();
      (TermKind::Seq(a, b), ty, transfer)
    }
    UExprKind::If(c, t, e) => {
      let c = check(env, c, Some(&TyKind::bool_()))?;
      let t = check(env, t, expected)?;
      let e = check(env, e, Some(&t.ty))?;
      let transfer = c.transfer || t.transfer || e.transfer;
      let ty = t.ty.clone();
      (TermKind::If(c, t, e), ty, transfer)
    }
    UExprKind::Lambda(params, body) => return check_lambda(env, params, body, expected, loc),
    UExprKind::Apply(name, args) => return check_apply(env, *name, args, expected, loc),
    UExprKind::MatchOption(scrut, none_body, some_pat, some_body) =>
      return check_match_option(env, scrut, none_body, some_pat, some_body, expected, loc),
    UExprKind::MatchList(scrut, nil_body, head_pat, tail_pat, cons_body) =>
      return check_match_list(env, scrut, nil_body, head_pat, tail_pat, cons_body, expected, loc),
    UExprKind::MatchNat(scrut, plus_pat, plus_body, minus_pat, minus_body) =>
      return check_match_nat(env, scrut, plus_pat, plus_body, minus_pat, minus_body, expected, loc),
    UExprKind::MatchVariant(scrut, cases) => return check_match_variant(env, scrut, cases, expected, loc),
    UExprKind::Variant(ctor, arg) => return check_variant(env, *ctor, arg, expected, loc),
    UExprKind::RecordConstruct(name, fields) => return check_record(env, *name, fields, loc),
    UExprKind::Project(e, field) => {
      let e = check(env, e, None)?;
      let (key, field_ty) = project_ty(env, &e.ty, *field, loc)?;
      let transfer = e.transfer;
      (TermKind::Project(e, key), field_ty, transfer)
    }
    UExprKind::SetField(e, field, v) => {
      let e = check(env, e, None)?;
      let (key, field_ty) = project_ty(env, &e.ty, *field, loc)?;
      let v = check(env, v, Some(&field_ty))?;
      let ty = e.ty.clone();
      let transfer = e.transfer || v.transfer;
      (TermKind::SetField(e, key, v), ty, transfer)
    }
    UExprKind::Loop(body, init) => return check_loop(env, body, init, loc),
    UExprKind::LoopLeft(body, init) => return check_loop_left(env, body, init, loc),
    UExprKind::Fold(body, coll, init) => return check_fold(env, body, coll, init, expected, loc),
    UExprKind::Map(body, coll) => return check_map(env, body, coll, loc),
    UExprKind::MapFold(body, coll, init) => return check_map_fold(env, body, coll, init, expected, loc),
    UExprKind::Transfer(dest, amount, arg) => {
      forbid_unless_unrestricted(env, "a transfer", loc)?;
      let dest = check(env, dest, None)?;
      let arg_ty = match &*dest.ty {
        TyKind::Contract(t) => t.clone(),
        _ => return Err(mismatch(&TyKind::Contract(TyKind::unit()).into(), &dest.ty, loc)),
      };
      let amount = check(env, amount, Some(&TyKind::tez()))?;
      let arg = check(env, arg, Some(&arg_ty))?;
      (TermKind::Transfer { dest, amount, arg }, TyKind::operation(), true)
    }
    UExprKind::Failwith(e) => {
      let e = check(env, e, None)?;
      let ty = expected.cloned().unwrap_or_else(TyKind::unit);
      let transfer = e.transfer;
      (TermKind::Failwith(e), ty, transfer)
    }
    UExprKind::CreateContract(e) => {
      forbid_unless_unrestricted(env, "create_contract", loc)?;
      let e = check(env, e, None)?;
      let ty = e.ty.clone();
      (TermKind::CreateContract(e.clone()), ty, true)
    }
    UExprKind::ContractAt(e, ty) => {
      let e = check(env, e, Some(&TyKind::ground(Ground::Address)))?;
      let resolved = crate::typeck::resolve_ty(env, ty, loc)?;
      let transfer = e.transfer;
      let contract_ty: Ty = TyKind::Contract(resolved.clone()).into();
      (TermKind::ContractAt(e, resolved), option_ty(contract_ty), transfer)
    }
    UExprKind::Unpack(e, ty) => {
      let e = check(env, e, Some(&TyKind::ground(Ground::Bytes)))?;
      let resolved = crate::typeck::resolve_ty(env, ty, loc)?;
      let transfer = e.transfer;
      (TermKind::Unpack(e, resolved.clone()), option_ty(resolved), transfer)
    }
  };
  let ty = reconcile(ty, expected, loc)?;
  Ok(TermNode::new(desc, ty, loc.clone()).with_transfer(transfer))
}

fn forbid_unless_unrestricted(env: &Env, what: &'static str, loc: &FileSpan) -> Result<()> {
  match env.effect_ctx {
    EffectCtx::Unrestricted => Ok(()),
    EffectCtx::NoTransfer => Err(semantic(TypeErrorKind::ForbiddenEffect(what, "a lambda, map, or fold body"), loc)),
    EffectCtx::Initializer => Err(semantic(TypeErrorKind::ForbiddenEffect(what, "a storage initializer"), loc)),
  }
}

fn const_ty(c: &Const, loc: &FileSpan) -> Result<Ty> {
  Ok(match c {
    Const::Unit => TyKind::unit(),
    Const::Bool(_) => TyKind::bool_(),
    Const::Int(_) => TyKind::int(),
    Const::Nat(_) => TyKind::nat(),
    Const::Tez(_) => TyKind::tez(),
    Const::String(_) => TyKind::string(),
    Const::Bytes(_) => TyKind::ground(Ground::Bytes),
    Const::Timestamp(_) => TyKind::ground(Ground::Timestamp),
    Const::Key(_) => TyKind::ground(Ground::Key),
    Const::KeyHash(_) => TyKind::ground(Ground::KeyHash),
    Const::Signature(_) => TyKind::ground(Ground::Signature),
    Const::Address(_) => TyKind::ground(Ground::Address),
    Const::None(t) => option_ty(t.clone()),
    Const::Tuple(cs) => {
      let tys: Vec<Ty> = cs.iter().map(|c| const_ty(c, loc)).collect::<Result<_>>()?;
      TyKind::tuple(tys.into_boxed_slice())
    }
    Const::List(t, _) => TyKind::List(t.clone()).into(),
    Const::Set(t, _) => TyKind::Set(t.clone()).into(),
    Const::Map(k, v, _) => TyKind::Map(k.clone(), v.clone()).into(),
    Const::EmptyBigMap(k, v) => TyKind::BigMap(k.clone(), v.clone()).into(),
    Const::Some(inner) => option_ty(const_ty(inner, loc)?),
    Const::Left(inner, r) => TyKind::Or(const_ty(inner, loc)?, r.clone()).into(),
    Const::Right(l, inner) => TyKind::Or(l.clone(), const_ty(inner, loc)?).into(),
    Const::Record(name, _) => TyKind::Record(*name).into(),
    Const::Variant(name, ..) => TyKind::Variant(*name).into(),
  })
}

/// Bind a simple (non-tuple) pattern to a single value of type `ty`, running
/// `f` with the fresh [`VarId`]. Used everywhere a binder can't desugar into
/// nested projections (lambda parameters, match arms, loop/fold binders) —
/// those positions accept `_`/a plain name but not further tuple patterns.
fn bind_simple<R>(env: &mut Env, pat: &UPattern, ty: Ty, f: impl FnOnce(&mut Env, VarId) -> Result<R>) -> Result<R> {
  match pat {
    UPattern::Wild => { let fresh = Symbol::under(); env.with_binding(fresh, ty, |env, var| f(env, var)) }
    UPattern::Var(name) => env.with_binding(*name, ty, |env, var| f(env, var)),
    UPattern::Typed(inner, _) => bind_simple(env, inner, ty, f),
    UPattern::Tuple(_) => { let fresh = Symbol::under(); env.with_binding(fresh, ty, |env, var| f(env, var)) }
  }
}

fn wrap_let(e1: Term, var: VarId, e2: Term, loc: &FileSpan) -> Term {
  let uses = crate::typeck::usecount::count_uses(&e2, var);
  let ty = e2.ty.clone();
  let transfer = e1.transfer || e2.transfer;
  TermNode::new(TermKind::Let { var, uses, e1, e2 }, ty, loc.clone()).with_transfer(transfer)
}

/// Strip `Typed` wrappers down to the pattern shape that decides how to
/// desugar (`Tuple` vs. everything else).
fn strip_typed(pat: &UPattern) -> &UPattern {
  match pat {
    UPattern::Typed(inner, _) => strip_typed(inner),
    other => other,
  }
}

fn check_let(env: &mut Env, pat: &UPattern, e1: &UExpr, e2: &UExpr, expected: Option<&Ty>, loc: &FileSpan) -> Result<Term> {
  let e1 = check(env, e1, None)?;
  match strip_typed(pat) {
    UPattern::Tuple(pats) => check_let_tuple(env, pats, e1, e2, expected, loc),
    simple => bind_simple(env, simple, e1.ty.clone(), |env, var| {
      let e2c = check(env, e2, expected)?;
      Ok(wrap_let(e1, var, e2c, loc))
    }),
  }
}

/// Destructure a top-level tuple `let` pattern into nested synthetic `Let`s
/// over `Project(.., Index(i))` (§4.4: records and tuples share one
/// access/update algorithm). Only one level of tupling is supported directly
/// — a nested tuple component must be re-destructured with its own `let`.
fn check_let_tuple(env: &mut Env, pats: &[UPattern], e1: Term, body: &UExpr, expected: Option<&Ty>, loc: &FileSpan) -> Result<Term> {
  let comp_tys: Vec<Ty> = match &*e1.ty {
    TyKind::Tuple(ts) if ts.len() == pats.len() => ts.to_vec(),
    _ => return Err(semantic(TypeErrorKind::ArityMismatch { expected: pats.len(), found: 0 }, loc)),
  };
  let outer_ty = e1.ty.clone();
  env.with_binding(Symbol::under(), outer_ty.clone(), |env, outer_var| {
    let inner = destructure_tuple_components(env, pats, &comp_tys, outer_var, &outer_ty, body, expected, loc, 0)?;
    Ok(wrap_let(e1, outer_var, inner, loc))
  })
}

fn destructure_tuple_components(
  env: &mut Env, pats: &[UPattern], comp_tys: &[Ty], outer_var: VarId, outer_ty: &Ty,
  body: &UExpr, expected: Option<&Ty>, loc: &FileSpan, i: usize,
) -> Result<Term> {
  if i == pats.len() { return check(env, body, expected) }
  let name = match strip_typed(&pats[i]) {
    UPattern::Var(n) => *n,
    UPattern::Wild => Symbol::under(),
    UPattern::Typed(_, _) | UPattern::Tuple(_) =>
      return Err(semantic(TypeErrorKind::ArityMismatch { expected: 1, found: 0 }, loc)),
  };
  let outer_var_term = TermNode::new(TermKind::Var(outer_var), outer_ty.clone(), loc.clone());
  let proj = TermNode::new(TermKind::Project(outer_var_term, ProjKey::Index(i)), comp_tys[i].clone(), loc.clone());
  env.with_binding(name, comp_tys[i].clone(), |env, v| {
    let rest = destructure_tuple_components(env, pats, comp_tys, outer_var, outer_ty, body, expected, loc, i + 1)?;
    Ok(wrap_let(proj, v, rest, loc))
  })
}

fn check_lambda(env: &mut Env, params: &[UPattern], body: &UExpr, expected: Option<&Ty>, loc: &FileSpan) -> Result<Term> {
  let [pat] = params else {
    return Err(semantic(TypeErrorKind::ArityMismatch { expected: 1, found: params.len() }, loc));
  };
  let (arg_ty, ret_expected) = match expected.map(std::rc::Rc::as_ref) {
    Some(TyKind::Lambda(a, b)) => (Some(a.clone()), Some(b.clone())),
    _ => (None, None),
  };
  let arg_ty = arg_ty.ok_or_else(|| semantic(TypeErrorKind::UnannotatedSum, loc))?;
  env.with_effect_ctx(EffectCtx::NoTransfer, |env| {
    bind_simple(env, pat, arg_ty.clone(), |env, var| {
      let body = check(env, body, ret_expected.as_ref())?;
      let ty: Ty = TyKind::Lambda(arg_ty.clone(), body.ty.clone()).into();
      Ok(TermNode::new(TermKind::Lambda { params: Box::new([var]), body }, ty, loc.clone()))
    })
  })
}

fn check_apply(env: &mut Env, name: Symbol, args: &[UExpr], expected: Option<&Ty>, loc: &FileSpan) -> Result<Term> {
  if let Some(op) = PrimOp::from_symbol(name) {
    if op.forbidden_in_initializer() && env.effect_ctx == EffectCtx::Initializer {
      return Err(semantic(TypeErrorKind::ForbiddenEffect(op.keyword(), "a storage initializer"), loc));
    }
    let checked: Vec<Term> = args.iter().map(|a| check(env, a, None)).collect::<Result<_>>()?;
    let ty = if matches!(op, PrimOp::Self_) {
      if !checked.is_empty() {
        return Err(semantic(TypeErrorKind::ArityMismatch { expected: 0, found: checked.len() }, loc));
      }
      let param = env.current_entry_param.clone()
        .ok_or_else(|| semantic(TypeErrorKind::ForbiddenEffect("self", "a global or storage initializer"), loc))?;
      TyKind::Contract(param).into()
    } else {
      crate::typeck::primop::result_ty(op, &checked, loc)?
    };
    if matches!(op, PrimOp::SetDelegate) { forbid_unless_unrestricted(env, "set_delegate", loc)?; }
    let transfer = checked.iter().any(|t| t.transfer) || matches!(op, PrimOp::SetDelegate);
    let ty = reconcile(ty, expected, loc)?;
    return Ok(TermNode::new(TermKind::Apply(op, checked.into_boxed_slice()), ty, loc.clone()).with_transfer(transfer));
  }
  if args.len() == 1 {
    if let Some((_, fn_ty)) = env.lookup_var(name) {
      if let TyKind::Lambda(arg_ty, ret_ty) = &*fn_ty {
        let arg = check(env, &args[0], Some(arg_ty))?;
        let transfer = arg.transfer;
        let ty = reconcile(ret_ty.clone(), expected, loc)?;
        return Ok(TermNode::new(TermKind::Call(name, Box::new([arg])), ty, loc.clone()).with_transfer(transfer));
      }
    }
  }
  Err(semantic(TypeErrorKind::UnboundVar(name), loc))
}

fn check_match_option(
  env: &mut Env, scrut: &UExpr, none_body: &UExpr, some_pat: &UPattern, some_body: &UExpr,
  expected: Option<&Ty>, loc: &FileSpan,
) -> Result<Term> {
  let scrut = check(env, scrut, None)?;
  let payload_ty = match &*scrut.ty {
    TyKind::Option(t) => t.clone(),
    _ => return Err(mismatch(&option_ty(TyKind::unit()), &scrut.ty, loc)),
  };
  let none_case = check(env, none_body, expected)?;
  let (some_bind, some_case) = bind_simple(env, some_pat, payload_ty, |env, var| {
    Ok((var, check(env, some_body, Some(&none_case.ty))?))
  })?;
  let transfer = scrut.transfer || none_case.transfer || some_case.transfer;
  let ty = none_case.ty.clone();
  Ok(TermNode::new(
    TermKind::MatchOption { scrutinee: scrut, none_case, some_bind, some_case }, ty, loc.clone(),
  ).with_transfer(transfer))
}

fn check_match_list(
  env: &mut Env, scrut: &UExpr, nil_body: &UExpr, head_pat: &UPattern, tail_pat: &UPattern, cons_body: &UExpr,
  expected: Option<&Ty>, loc: &FileSpan,
) -> Result<Term> {
  let scrut = check(env, scrut, None)?;
  let elt_ty = match &*scrut.ty {
    TyKind::List(t) => t.clone(),
    _ => return Err(mismatch(&TyKind::List(TyKind::unit()).into(), &scrut.ty, loc)),
  };
  let nil_case = check(env, nil_body, expected)?;
  let list_ty = scrut.ty.clone();
  let (head_bind, tail_bind, cons_case) = bind_simple(env, head_pat, elt_ty, |env, hb| {
    bind_simple(env, tail_pat, list_ty, |env, tb| {
      Ok((hb, tb, check(env, cons_body, Some(&nil_case.ty))?))
    })
  })?;
  let transfer = scrut.transfer || nil_case.transfer || cons_case.transfer;
  let ty = nil_case.ty.clone();
  Ok(TermNode::new(
    TermKind::MatchList { scrutinee: scrut, nil_case, head_bind, tail_bind, cons_case }, ty, loc.clone(),
  ).with_transfer(transfer))
}

fn check_match_nat(
  env: &mut Env, scrut: &UExpr, plus_pat: &UPattern, plus_body: &UExpr, minus_pat: &UPattern, minus_body: &UExpr,
  expected: Option<&Ty>, loc: &FileSpan,
) -> Result<Term> {
  let scrut = check(env, scrut, Some(&TyKind::int()))?;
  let (plus_bind, plus_case) = bind_simple(env, plus_pat, TyKind::nat(), |env, v| {
    Ok((v, check(env, plus_body, expected)?))
  })?;
  let (minus_bind, minus_case) = bind_simple(env, minus_pat, TyKind::nat(), |env, v| {
    Ok((v, check(env, minus_body, Some(&plus_case.ty))?))
  })?;
  let transfer = scrut.transfer || plus_case.transfer || minus_case.transfer;
  let ty = plus_case.ty.clone();
  Ok(TermNode::new(
    TermKind::MatchNat { scrutinee: scrut, plus_bind, plus_case, minus_bind, minus_case }, ty, loc.clone(),
  ).with_transfer(transfer))
}

fn check_match_variant(
  env: &mut Env, scrut: &UExpr, cases: &[crate::types::ast::UMatchCase], expected: Option<&Ty>, loc: &FileSpan,
) -> Result<Term> {
  let scrut = check(env, scrut, None)?;
  let variant_name = match &*scrut.ty {
    TyKind::Variant(name) => *name,
    _ => return Err(semantic(TypeErrorKind::UnannotatedSum, loc)),
  };
  let def = env.variants.get(&variant_name)
    .ok_or_else(|| semantic(TypeErrorKind::UnknownConstructor(variant_name), loc))?
    .clone();
  let mut out = Vec::with_capacity(cases.len());
  let mut ret_ty: Option<Ty> = expected.cloned();
  for case in cases {
    let idx = def.ctor_index(case.ctor)
      .ok_or_else(|| semantic(TypeErrorKind::UnknownConstructor(case.ctor), loc))?;
    let ctor_ty = def.ctors[idx].1.clone();
    let (bind, body) = bind_simple(env, &case.pat, ctor_ty.clone(), |env, v| {
      Ok((v, check(env, &case.body, ret_ty.as_ref())?))
    })?;
    if ret_ty.is_none() { ret_ty = Some(body.ty.clone()); }
    out.push(crate::types::term::MatchCase { ctor: case.ctor, ctor_ty, bind: Some(bind), body });
  }
  if out.len() != def.ctors.len() {
    return Err(semantic(TypeErrorKind::ArityMismatch { expected: def.ctors.len(), found: out.len() }, loc));
  }
  let transfer = scrut.transfer || out.iter().any(|c| c.body.transfer);
  let ty = ret_ty.ok_or_else(|| semantic(TypeErrorKind::ArityMismatch { expected: 1, found: 0 }, loc))?;
  Ok(TermNode::new(
    TermKind::MatchVariant { scrutinee: scrut, cases: out.into_boxed_slice() }, ty, loc.clone(),
  ).with_transfer(transfer))
}

fn check_variant(env: &mut Env, ctor: Symbol, arg: &UExpr, expected: Option<&Ty>, loc: &FileSpan) -> Result<Term> {
  let def = env.resolve_ctor(ctor, loc)?.clone();
  let idx = def.ctor_index(ctor).expect("resolve_ctor found the owning variant");
  let arg_ty = def.ctors[idx].1.clone();
  let arg = check(env, arg, Some(&arg_ty))?;
  let transfer = arg.transfer;
  let ty = reconcile(TyKind::Variant(def.name).into(), expected, loc)?;
  Ok(TermNode::new(TermKind::MakeVariant(def.name, ctor, arg), ty, loc.clone()).with_transfer(transfer))
}

fn project_ty(env: &Env, ty: &Ty, field: Symbol, loc: &FileSpan) -> Result<(ProjKey, Ty)> {
  match &**ty {
    TyKind::Record(name) => {
      let def = env.records.get(name).ok_or_else(|| semantic(TypeErrorKind::UnknownField(field), loc))?;
      let idx = def.field_index(field).ok_or_else(|| semantic(TypeErrorKind::UnknownField(field), loc))?;
      Ok((ProjKey::Field(field), def.fields[idx].1.clone()))
    }
    _ => Err(semantic(TypeErrorKind::UnknownField(field), loc)),
  }
}

fn check_record(env: &mut Env, name: Symbol, fields: &[(Symbol, UExpr)], loc: &FileSpan) -> Result<Term> {
  let def = env.records.get(&name).cloned()
    .ok_or_else(|| semantic(TypeErrorKind::UnknownField(name), loc))?;
  if fields.len() != def.fields.len() {
    return Err(semantic(TypeErrorKind::ArityMismatch { expected: def.fields.len(), found: fields.len() }, loc));
  }
  let mut out = Vec::with_capacity(fields.len());
  let mut transfer = false;
  for (decl_field, decl_ty) in &def.fields {
    let (f, e) = fields.iter().find(|(f, _)| f == decl_field)
      .ok_or_else(|| semantic(TypeErrorKind::UnknownField(*decl_field), loc))?;
    let e = check(env, e, Some(decl_ty))?;
    transfer |= e.transfer;
    out.push((*f, e));
  }
  Ok(TermNode::new(TermKind::RecordConstruct(name, out.into_boxed_slice()), TyKind::Record(name).into(), loc.clone())
    .with_transfer(transfer))
}

/// `(a, b, ...)`: check each component against the matching slot of a
/// pushed-down tuple type, falling back to synthesis component-by-component
/// when nothing is pushed down. Mirrors [`check_record`]'s per-field loop,
/// just positional instead of name-keyed.
fn check_tuple(env: &mut Env, elems: &[UExpr], expected: Option<&Ty>, loc: &FileSpan) -> Result<Term> {
  if elems.len() < 2 {
    return Err(semantic(TypeErrorKind::ArityMismatch { expected: 2, found: elems.len() }, loc));
  }
  let expected_elems: Option<&[Ty]> = expected.and_then(|t| match &**t {
    TyKind::Tuple(ts) if ts.len() == elems.len() => Some(&ts[..]),
    _ => None,
  });
  let mut out = Vec::with_capacity(elems.len());
  let mut transfer = false;
  for (i, e) in elems.iter().enumerate() {
    let slot_ty = expected_elems.map(|ts| &ts[i]);
    let term = check(env, e, slot_ty)?;
    transfer |= term.transfer;
    out.push(term);
  }
  let ty = TyKind::tuple(out.iter().map(|t| t.ty.clone()).collect::<Vec<_>>().into_boxed_slice());
  let ty = reconcile(ty, expected, loc)?;
  Ok(TermNode::new(TermKind::Tuple(out.into_boxed_slice()), ty, loc.clone()).with_transfer(transfer))
}

fn check_loop(env: &mut Env, body: &UExpr, init: &UExpr, loc: &FileSpan) -> Result<Term> {
  let init = check(env, init, None)?;
  let acc_ty = init.ty.clone();
  let expected_body_ty: Ty = TyKind::pair(TyKind::bool_(), acc_ty.clone());
  let (acc_bind, body) = bind_simple(env, &UPattern::Wild, acc_ty.clone(), |env, v| {
    Ok((v, check(env, body, Some(&expected_body_ty))?))
  })?;
  let transfer = init.transfer || body.transfer;
  Ok(TermNode::new(TermKind::Loop { init, acc_bind, body }, acc_ty, loc.clone()).with_transfer(transfer))
}

fn check_loop_left(env: &mut Env, body: &UExpr, init: &UExpr, loc: &FileSpan) -> Result<Term> {
  let init = check(env, init, None)?;
  let acc_ty = init.ty.clone();
  let (acc_bind, body) = bind_simple(env, &UPattern::Wild, acc_ty.clone(), |env, v| {
    Ok((v, check(env, body, None)?))
  })?;
  let result_ty = match &*body.ty {
    TyKind::Or(_, r) => r.clone(),
    _ => return Err(semantic(TypeErrorKind::UnannotatedSum, loc)),
  };
  let transfer = init.transfer || body.transfer;
  Ok(TermNode::new(TermKind::LoopLeft { init, acc_bind, body }, result_ty, loc.clone()).with_transfer(transfer))
}

fn check_fold(env: &mut Env, body: &UExpr, coll: &UExpr, init: &UExpr, expected: Option<&Ty>, loc: &FileSpan) -> Result<Term> {
  let coll = check(env, coll, None)?;
  let elt_ty = collection_elt_ty(&coll.ty, loc)?;
  let init = check(env, init, expected)?;
  let acc_ty = init.ty.clone();
  let (elt_bind, acc_bind, body) = env.with_effect_ctx(EffectCtx::NoTransfer, |env| {
    bind_simple(env, &UPattern::Wild, elt_ty, |env, eb| {
      bind_simple(env, &UPattern::Wild, acc_ty.clone(), |env, ab| {
        Ok((eb, ab, check(env, body, Some(&acc_ty))?))
      })
    })
  })?;
  let transfer = coll.transfer || init.transfer;
  let ty = acc_ty;
  Ok(TermNode::new(TermKind::Fold { collection: coll, init, elt_bind, acc_bind, body }, ty, loc.clone())
    .with_transfer(transfer))
}

fn check_map(env: &mut Env, body: &UExpr, coll: &UExpr, loc: &FileSpan) -> Result<Term> {
  let coll = check(env, coll, None)?;
  let elt_ty = collection_elt_ty(&coll.ty, loc)?;
  let (elt_bind, body) = env.with_effect_ctx(EffectCtx::NoTransfer, |env| {
    bind_simple(env, &UPattern::Wild, elt_ty, |env, eb| Ok((eb, check(env, body, None)?)))
  })?;
  let ty = same_collection_shape(&coll.ty, body.ty.clone(), loc)?;
  let transfer = coll.transfer;
  Ok(TermNode::new(TermKind::Map { collection: coll, elt_bind, body }, ty, loc.clone()).with_transfer(transfer))
}

fn check_map_fold(env: &mut Env, body: &UExpr, coll: &UExpr, init: &UExpr, expected: Option<&Ty>, loc: &FileSpan) -> Result<Term> {
  let coll = check(env, coll, None)?;
  let elt_ty = collection_elt_ty(&coll.ty, loc)?;
  let init = check(env, init, expected)?;
  let acc_ty = init.ty.clone();
  let (elt_bind, acc_bind, body) = env.with_effect_ctx(EffectCtx::NoTransfer, |env| {
    bind_simple(env, &UPattern::Wild, elt_ty, |env, eb| {
      bind_simple(env, &UPattern::Wild, acc_ty.clone(), |env, ab| Ok((eb, ab, check(env, body, None)?)))
    })
  })?;
  let transfer = coll.transfer || init.transfer;
  Ok(TermNode::new(TermKind::MapFold { collection: coll, init, elt_bind, acc_bind, body }, acc_ty, loc.clone())
    .with_transfer(transfer))
}

fn collection_elt_ty(ty: &Ty, loc: &FileSpan) -> Result<Ty> {
  match &**ty {
    TyKind::List(t) | TyKind::Set(t) => Ok(t.clone()),
    TyKind::Map(k, v) | TyKind::BigMap(k, v) => Ok(TyKind::pair(k.clone(), v.clone())),
    _ => Err(semantic(TypeErrorKind::BadBigMap("not a collection type"), loc)),
  }
}

fn same_collection_shape(coll_ty: &Ty, elt_ty: Ty, loc: &FileSpan) -> Result<Ty> {
  Ok(match &**coll_ty {
    TyKind::List(_) => TyKind::List(elt_ty).into(),
    TyKind::Set(_) => TyKind::List(elt_ty).into(),
    TyKind::Map(k, _) => match &*elt_ty {
      TyKind::Tuple(ts) if ts.len() == 2 => TyKind::Map(k.clone(), ts[1].clone()).into(),
      _ => return Err(semantic(TypeErrorKind::BadBigMap("map body must return a (key, value) pair"), loc)),
    },
    _ => return Err(semantic(TypeErrorKind::BadBigMap("not a collection type"), loc)),
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::loc::Spanned;
  use crate::symbol::intern;

  fn sp(k: UExprKind) -> UExpr { Spanned::new(FileSpan::dummy(), k) }

  #[test]
  fn literal_int_synthesizes_int() {
    let mut env = Env::default();
    let e = sp(UExprKind::Const(Const::Int(0.into())));
    let t = check(&mut env, &e, None).unwrap();
    assert_eq!(t.ty, TyKind::int());
  }

  #[test]
  fn addition_of_two_nats_synthesizes_nat() {
    let mut env = Env::default();
    let a = sp(UExprKind::Const(Const::Nat(1.into())));
    let b = sp(UExprKind::Const(Const::Nat(2.into())));
    let e = sp(UExprKind::Apply(intern("+"), vec![a, b]));
    let t = check(&mut env, &e, None).unwrap();
    assert_eq!(t.ty, TyKind::nat());
  }

  #[test]
  fn subtraction_of_two_nats_synthesizes_int() {
    let mut env = Env::default();
    let a = sp(UExprKind::Const(Const::Nat(5.into())));
    let b = sp(UExprKind::Const(Const::Nat(2.into())));
    let e = sp(UExprKind::Apply(intern("-"), vec![a, b]));
    let t = check(&mut env, &e, None).unwrap();
    assert_eq!(t.ty, TyKind::int());
  }

  #[test]
  fn unbound_variable_is_an_error() {
    let mut env = Env::default();
    let e = sp(UExprKind::Var(intern("nope")));
    assert!(check(&mut env, &e, None).is_err());
  }

  #[test]
  fn let_binds_value_visible_in_body() {
    let mut env = Env::default();
    let x = intern("x");
    let e = sp(UExprKind::Let(
      UPattern::Var(x),
      Box::new(sp(UExprKind::Const(Const::Nat(7.into())))),
      Box::new(sp(UExprKind::Var(x))),
    ));
    let t = check(&mut env, &e, None).unwrap();
    assert_eq!(t.ty, TyKind::nat());
    assert!(matches!(t.desc, TermKind::Let { uses: 1, .. }));
  }

  #[test]
  fn tuple_let_destructures_both_components() {
    let mut env = Env::default();
    let (a, b) = (intern("a"), intern("b"));
    let pair = sp(UExprKind::Const(Const::Tuple(Box::new([Const::Nat(1.into()), Const::Bool(true)]))));
    let body = sp(UExprKind::Var(b));
    let e = sp(UExprKind::Let(UPattern::Tuple(vec![UPattern::Var(a), UPattern::Var(b)]), Box::new(pair), Box::new(body)));
    let t = check(&mut env, &e, None).unwrap();
    assert_eq!(t.ty, TyKind::bool_());
  }

  #[test]
  fn forbidden_transfer_inside_lambda_is_rejected() {
    let mut env = Env::default();
    let inner = sp(UExprKind::Transfer(
      Box::new(sp(UExprKind::Var(intern("dest")))),
      Box::new(sp(UExprKind::Const(Const::Tez(0.into())))),
      Box::new(sp(UExprKind::Const(Const::Unit))),
    ));
    let lam = sp(UExprKind::Lambda(vec![UPattern::Wild], Box::new(inner)));
    let expected: Ty = TyKind::Lambda(TyKind::unit(), TyKind::operation()).into();
    assert!(check(&mut env, &lam, Some(&expected)).is_err());
  }
}
