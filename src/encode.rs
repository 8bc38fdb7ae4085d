//! The encoder (§4.2): rewrites a typechecked [`Contract`] into a single,
//! canonical entry whose body only uses the binarized-pair/`or` shapes the
//! code generator understands — no named record/variant access survives
//! past this stage.
//!
//! Passes are expressed as a bottom-up rebuild over [`Term`], mirroring the
//! teacher's `Translate`/`TranslateBase` pattern in `build_mir.rs`: every
//! case recurses into children first, and a parent is only reallocated when
//! at least one child actually changed (`Rc::ptr_eq` on the recursed
//! children), preserving physical identity for subtrees the pass leaves
//! alone (§9 Design Notes, "Physical identity preservation").

use std::rc::Rc;

use crate::env::Env;
use crate::error::{CompileError, InternalError, Result};
use crate::loc::FileSpan;
use crate::symbol::Symbol;
use crate::types::contract::{Contract, Global};
use crate::types::konst::Const;
use crate::types::term::{MatchCase, ProjKey, Term, TermKind, TermNode, VarId, VarIdGen};
use crate::types::ty::{Ty, TyKind};

fn internal(stage: &'static str, message: impl Into<String>) -> CompileError {
  CompileError::Internal(InternalError::new(stage, message))
}

/// The single-entry contract the encoder produces: storage type, globals
/// (encoded), the synthesized entry's combined parameter type and body, and
/// the encoded initializer, if any.
#[derive(Clone, Debug)]
pub struct EncodedContract {
  pub name: Symbol,
  pub storage: Ty,
  pub globals: Vec<Global>,
  pub param_ty: Ty,
  pub param_var: VarId,
  pub storage_var: VarId,
  pub body: Term,
  pub init: Option<Term>,
}

struct Encoder<'a> {
  env: &'a Env,
  vars: VarIdGen,
}

/// Binarize record construction/projection/variant injection/dispatch, per
/// §4.2. `vars` continues the contract's [`VarId`] numbering so synthesized
/// dispatch binders never collide with user-introduced ones.
pub fn encode_contract(env: &Env, contract: &Contract, next_var: VarIdGen) -> Result<EncodedContract> {
  let mut enc = Encoder { env, vars: next_var };

  let globals = contract.globals.iter()
    .map(|g| Ok(Global { name: g.name, var: g.var, body: enc.encode_term(&g.body)? }))
    .collect::<Result<Vec<_>>>()?;

  let init = contract.init.as_ref().map(|t| enc.encode_term(t)).transpose()?;

  let entries: Vec<(Ty, VarId, Term)> = contract.entries.iter()
    .map(|e| Ok((e.param_ty.clone(), e.param_var, enc.encode_term(&e.body)?)))
    .collect::<Result<Vec<_>>>()?;

  if entries.is_empty() {
    return Err(internal("encoder", "a contract must declare at least one entry point"));
  }

  let (param_ty, param_var, body) = enc.build_dispatch(&entries, &contract.storage);
  let storage_var = contract.entries[0].storage_var;

  Ok(EncodedContract {
    name: contract.name,
    storage: contract.storage.clone(),
    globals,
    param_ty,
    param_var,
    storage_var,
    body,
    init,
  })
}

impl<'a> Encoder<'a> {
  /// Combine N entry signatures into one: a single parameter of nested-`or`
  /// type, each arm prefixed `entry_NAME` so the decompiler can recover the
  /// original split (§4.2 "Entry-point dispatch").
  fn build_dispatch(&mut self, entries: &[(Ty, VarId, Term)], storage: &Ty) -> (Ty, VarId, Term) {
    if let [(ty, var, body)] = entries {
      return (ty.clone(), *var, body.clone());
    }
    let combined_ty = self.combined_param_ty(entries);
    let top_var = self.vars.fresh();
    let result_ty = TyKind::entry_result(storage.clone());
    let body = self.build_dispatch_match(entries, TermNode::new(
      TermKind::Var(top_var), combined_ty.clone(), FileSpan::dummy(),
    ), &result_ty);
    (combined_ty, top_var, body)
  }

  fn combined_param_ty(&self, entries: &[(Ty, VarId, Term)]) -> Ty {
    match entries {
      [] => unreachable!("dispatch over zero entries"),
      [(ty, ..)] => ty.clone(),
      [(ty, ..), rest @ ..] => TyKind::Or(ty.clone(), self.combined_param_ty(rest)).into(),
    }
  }

  fn build_dispatch_match(&mut self, entries: &[(Ty, VarId, Term)], scrutinee: Term, result_ty: &Ty) -> Term {
    match entries {
      [] => unreachable!("dispatch over zero entries"),
      [(_, var, body)] => {
        let uses = crate::typeck::usecount::count_uses(body, *var);
        TermNode::new(
          TermKind::Let { var: *var, uses, e1: scrutinee, e2: body.clone() },
          result_ty.clone(),
          FileSpan::dummy(),
        )
      }
      [(_, left_var, left_body), rest @ ..] => {
        let right_ty = self.combined_param_ty(rest);
        let right_var = self.vars.fresh();
        let right_case = self.build_dispatch_match(
          rest,
          TermNode::new(TermKind::Var(right_var), right_ty, FileSpan::dummy()),
          result_ty,
        );
        TermNode::new(
          TermKind::MatchOr {
            scrutinee,
            left_bind: *left_var,
            left_case: left_body.clone(),
            right_bind: right_var,
            right_case,
          },
          result_ty.clone(),
          FileSpan::dummy(),
        )
      }
    }
  }

  fn encode_term(&mut self, t: &Term) -> Result<Term> {
    let desc = match &t.desc {
      TermKind::Var(_) => return Ok(t.clone()),
      TermKind::Const(c) => {
        let cb = self.binarize_const(c)?;
        if cb == *c { return Ok(t.clone()); }
        TermKind::Const(cb)
      }

      TermKind::Let { var, uses, e1, e2 } => {
        let e1b = self.encode_term(e1)?;
        let e2b = self.encode_term(e2)?;
        if Rc::ptr_eq(&e1b, e1) && Rc::ptr_eq(&e2b, e2) { return Ok(t.clone()); }
        TermKind::Let { var: *var, uses: *uses, e1: e1b, e2: e2b }
      }
      TermKind::Seq(a, b) => self.rebuild2(t, a, b, TermKind::Seq)?,
      TermKind::If(c, th, el) => {
        let cb = self.encode_term(c)?;
        let thb = self.encode_term(th)?;
        let elb = self.encode_term(el)?;
        if Rc::ptr_eq(&cb, c) && Rc::ptr_eq(&thb, th) && Rc::ptr_eq(&elb, el) { return Ok(t.clone()); }
        TermKind::If(cb, thb, elb)
      }
      TermKind::Lambda { params, body } => {
        let bodyb = self.encode_closure_body(params.clone(), body)?;
        if Rc::ptr_eq(&bodyb, body) { return Ok(t.clone()); }
        TermKind::Lambda { params: params.clone(), body: bodyb }
      }
      TermKind::Closure { captured, lifted } => {
        let liftedb = self.encode_term(lifted)?;
        if Rc::ptr_eq(&liftedb, lifted) { return Ok(t.clone()); }
        TermKind::Closure { captured: captured.clone(), lifted: liftedb }
      }
      TermKind::Apply(op, args) => {
        let argsb = self.encode_many(args)?;
        if Self::all_ptr_eq(args, &argsb) { return Ok(t.clone()); }
        TermKind::Apply(*op, argsb)
      }
      TermKind::Call(name, args) => {
        let argsb = self.encode_many(args)?;
        if Self::all_ptr_eq(args, &argsb) { return Ok(t.clone()); }
        TermKind::Call(*name, argsb)
      }
      TermKind::Exec(f, a) => self.rebuild2(t, f, a, TermKind::Exec)?,

      TermKind::MatchOption { scrutinee, none_case, some_bind, some_case } => {
        let s = self.encode_term(scrutinee)?;
        let n = self.encode_term(none_case)?;
        let sc = self.encode_term(some_case)?;
        if Rc::ptr_eq(&s, scrutinee) && Rc::ptr_eq(&n, none_case) && Rc::ptr_eq(&sc, some_case) {
          return Ok(t.clone());
        }
        TermKind::MatchOption { scrutinee: s, none_case: n, some_bind: *some_bind, some_case: sc }
      }
      TermKind::MatchNat { scrutinee, plus_bind, plus_case, minus_bind, minus_case } => {
        let s = self.encode_term(scrutinee)?;
        let p = self.encode_term(plus_case)?;
        let m = self.encode_term(minus_case)?;
        if Rc::ptr_eq(&s, scrutinee) && Rc::ptr_eq(&p, plus_case) && Rc::ptr_eq(&m, minus_case) {
          return Ok(t.clone());
        }
        TermKind::MatchNat { scrutinee: s, plus_bind: *plus_bind, plus_case: p, minus_bind: *minus_bind, minus_case: m }
      }
      TermKind::MatchList { scrutinee, nil_case, head_bind, tail_bind, cons_case } => {
        let s = self.encode_term(scrutinee)?;
        let n = self.encode_term(nil_case)?;
        let c = self.encode_term(cons_case)?;
        if Rc::ptr_eq(&s, scrutinee) && Rc::ptr_eq(&n, nil_case) && Rc::ptr_eq(&c, cons_case) {
          return Ok(t.clone());
        }
        TermKind::MatchList { scrutinee: s, nil_case: n, head_bind: *head_bind, tail_bind: *tail_bind, cons_case: c }
      }
      TermKind::MatchVariant { scrutinee, cases } => return self.encode_match_variant(t, scrutinee, cases),

      TermKind::Loop { init, acc_bind, body } => self.rebuild_bound(t, init, body, *acc_bind,
        |i, b| TermKind::Loop { init: i, acc_bind: *acc_bind, body: b })?,
      TermKind::LoopLeft { init, acc_bind, body } => self.rebuild_bound(t, init, body, *acc_bind,
        |i, b| TermKind::LoopLeft { init: i, acc_bind: *acc_bind, body: b })?,
      TermKind::Fold { collection, init, elt_bind, acc_bind, body } => {
        let c = self.encode_term(collection)?;
        let i = self.encode_term(init)?;
        let b = self.encode_term(body)?;
        if Rc::ptr_eq(&c, collection) && Rc::ptr_eq(&i, init) && Rc::ptr_eq(&b, body) { return Ok(t.clone()); }
        TermKind::Fold { collection: c, init: i, elt_bind: *elt_bind, acc_bind: *acc_bind, body: b }
      }
      TermKind::MapFold { collection, init, elt_bind, acc_bind, body } => {
        let c = self.encode_term(collection)?;
        let i = self.encode_term(init)?;
        let b = self.encode_term(body)?;
        if Rc::ptr_eq(&c, collection) && Rc::ptr_eq(&i, init) && Rc::ptr_eq(&b, body) { return Ok(t.clone()); }
        TermKind::MapFold { collection: c, init: i, elt_bind: *elt_bind, acc_bind: *acc_bind, body: b }
      }
      TermKind::Map { collection, elt_bind, body } => {
        let c = self.encode_term(collection)?;
        let b = self.encode_term(body)?;
        if Rc::ptr_eq(&c, collection) && Rc::ptr_eq(&b, body) { return Ok(t.clone()); }
        TermKind::Map { collection: c, elt_bind: *elt_bind, body: b }
      }

      TermKind::RecordConstruct(name, fields) => return self.encode_record_construct(t, *name, fields),
      TermKind::Tuple(elems) => return self.encode_tuple(t, elems),
      TermKind::MakeVariant(variant, ctor, value) => return self.encode_make_variant(t, *variant, *ctor, value),

      TermKind::Project(inner, key) => return self.encode_project(t, inner, *key),
      TermKind::SetField(inner, key, value) => return self.encode_set_field(t, inner, *key, value),

      TermKind::Transfer { dest, amount, arg } => {
        let d = self.encode_term(dest)?;
        let a = self.encode_term(amount)?;
        let g = self.encode_term(arg)?;
        if Rc::ptr_eq(&d, dest) && Rc::ptr_eq(&a, amount) && Rc::ptr_eq(&g, arg) { return Ok(t.clone()); }
        TermKind::Transfer { dest: d, amount: a, arg: g }
      }
      TermKind::Failwith(e) => self.rebuild1(t, e, TermKind::Failwith)?,
      TermKind::CreateContract(e) => self.rebuild1(t, e, TermKind::CreateContract)?,
      TermKind::ContractAt(e, ty) => {
        let eb = self.encode_term(e)?;
        if Rc::ptr_eq(&eb, e) { return Ok(t.clone()); }
        TermKind::ContractAt(eb, ty.clone())
      }
      TermKind::Unpack(e, ty) => {
        let eb = self.encode_term(e)?;
        if Rc::ptr_eq(&eb, e) { return Ok(t.clone()); }
        TermKind::Unpack(eb, ty.clone())
      }

      // Already-encoded forms (idempotent re-application, e.g. nested dispatch).
      TermKind::Pair(a, b) => self.rebuild2(t, a, b, TermKind::Pair)?,
      TermKind::Inject { left, other_ty, value } => {
        let v = self.encode_term(value)?;
        if Rc::ptr_eq(&v, value) { return Ok(t.clone()); }
        TermKind::Inject { left: *left, other_ty: other_ty.clone(), value: v }
      }
      TermKind::MatchOr { scrutinee, left_bind, left_case, right_bind, right_case } => {
        let s = self.encode_term(scrutinee)?;
        let l = self.encode_term(left_case)?;
        let r = self.encode_term(right_case)?;
        if Rc::ptr_eq(&s, scrutinee) && Rc::ptr_eq(&l, left_case) && Rc::ptr_eq(&r, right_case) {
          return Ok(t.clone());
        }
        TermKind::MatchOr { scrutinee: s, left_bind: *left_bind, left_case: l, right_bind: *right_bind, right_case: r }
      }
    };
    let rebuilt = TermNode::new(desc, t.ty.clone(), t.loc.clone()).with_transfer(t.transfer);
    Ok(match t.name { Some(n) => rebuilt.with_name(n), None => rebuilt })
  }

  /// Binarize a literal constant the same way [`Self::encode_record_construct`]
  /// and [`Self::encode_make_variant`] binarize the equivalent term forms: a
  /// record's fields become a right-leaning [`Const::Tuple`] spine in
  /// declaration order, and a variant's payload becomes a right-leaning
  /// `Left`/`Right` path at its constructor's declared index. Recurses into
  /// every other constant shape so a record/variant nested inside a list,
  /// option, or tuple literal still gets binarized.
  fn binarize_const(&self, c: &Const) -> Result<Const> {
    Ok(match c {
      Const::Record(name, fields) => {
        let def = self.env.records.get(name)
          .ok_or_else(|| internal("encoder", format!("record `{name}` missing from environment")))?;
        let mut ordered = Vec::with_capacity(def.fields.len());
        for (fname, _) in &def.fields {
          let (_, v) = fields.iter().find(|(f, _)| f == fname)
            .ok_or_else(|| internal("encoder", format!("field `{fname}` missing from `{name}` constant")))?;
          ordered.push(self.binarize_const(v)?);
        }
        if ordered.len() == 1 { ordered.pop().expect("checked len == 1") } else { Const::Tuple(ordered.into_boxed_slice()) }
      }
      Const::Variant(variant, ctor, value) => {
        let def = self.env.variants.get(variant)
          .ok_or_else(|| internal("encoder", format!("variant `{variant}` missing from environment")))?;
        let index = def.ctor_index(*ctor)
          .ok_or_else(|| internal("encoder", format!("constructor `{ctor}` missing from variant `{variant}`")))?;
        let valueb = self.binarize_const(value)?;
        build_const_injection(valueb, index, &def.ctors)
      }
      Const::Some(inner) => Const::Some(Box::new(self.binarize_const(inner)?)),
      Const::Left(inner, other_ty) => Const::Left(Box::new(self.binarize_const(inner)?), other_ty.clone()),
      Const::Right(other_ty, inner) => Const::Right(other_ty.clone(), Box::new(self.binarize_const(inner)?)),
      Const::Tuple(cs) => Const::Tuple(cs.iter().map(|c| self.binarize_const(c)).collect::<Result<Box<[_]>>>()?),
      Const::List(t, cs) => Const::List(t.clone(), cs.iter().map(|c| self.binarize_const(c)).collect::<Result<Box<[_]>>>()?),
      Const::Set(t, cs) => Const::Set(t.clone(), cs.iter().map(|c| self.binarize_const(c)).collect::<Result<Box<[_]>>>()?),
      Const::Map(k, v, kvs) => Const::Map(k.clone(), v.clone(),
        kvs.iter().map(|(k, v)| Ok((self.binarize_const(k)?, self.binarize_const(v)?)))
          .collect::<Result<Box<[_]>>>()?),
      other => other.clone(),
    })
  }

  /// A plain lambda body is encoded like any other term; closure conversion
  /// itself (computing free variables and rewriting to the
  /// `(captured_env, lifted_lambda)` pair) is the job of whatever pass turns
  /// a [`TermKind::Lambda`] into a [`TermKind::Closure`] before this point —
  /// this crate's typechecker only ever produces bodies for the inline
  /// positions (`loop`/`fold`/`map`), which never escape as closures, so no
  /// lambda reaching the encoder actually has a nonempty capture set today.
  fn encode_closure_body(&mut self, _params: Box<[VarId]>, body: &Term) -> Result<Term> {
    self.encode_term(body)
  }

  fn encode_many(&mut self, args: &[Term]) -> Result<Box<[Term]>> {
    args.iter().map(|a| self.encode_term(a)).collect()
  }

  fn all_ptr_eq(a: &[Term], b: &[Term]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| Rc::ptr_eq(x, y))
  }

  fn rebuild1(&mut self, _t: &Term, a: &Term, f: impl FnOnce(Term) -> TermKind) -> Result<TermKind> {
    Ok(f(self.encode_term(a)?))
  }

  fn rebuild2(&mut self, _t: &Term, a: &Term, b: &Term, f: impl FnOnce(Term, Term) -> TermKind) -> Result<TermKind> {
    Ok(f(self.encode_term(a)?, self.encode_term(b)?))
  }

  fn rebuild_bound(&mut self, t: &Term, init: &Term, body: &Term, _bind: VarId,
    f: impl FnOnce(Term, Term) -> TermKind) -> Result<TermKind> {
    self.rebuild2(t, init, body, f)
  }

  /// `r.field` / `r.(i)` → a chain of [`ProjKey::Car`]/[`ProjKey::Cdr`] over
  /// the nested-pair encoding of `r`'s type, in declaration order (§4.2
  /// "Record construction and projection").
  fn encode_project(&mut self, t: &Term, inner: &Term, key: ProjKey) -> Result<Term> {
    let innerb = self.encode_term(inner)?;
    let (index, arity) = self.resolve_index(&inner.ty, key)?;
    Ok(binarized_project(innerb, index, arity, &t.ty, &t.loc))
  }

  fn encode_set_field(&mut self, t: &Term, inner: &Term, key: ProjKey, value: &Term) -> Result<Term> {
    let innerb = self.encode_term(inner)?;
    let valueb = self.encode_term(value)?;
    let (index, arity) = self.resolve_index(&inner.ty, key)?;
    Ok(binarized_set(&innerb, index, arity, valueb, &inner.ty, &t.loc))
  }

  fn resolve_index(&self, owner_ty: &Ty, key: ProjKey) -> Result<(usize, usize)> {
    match key {
      ProjKey::Index(i) => match &**owner_ty {
        TyKind::Tuple(ts) => Ok((i, ts.len())),
        _ => Err(internal("encoder", "tuple index projection on a non-tuple type")),
      },
      ProjKey::Field(f) => match &**owner_ty {
        TyKind::Record(name) => {
          let def = self.env.records.get(name)
            .ok_or_else(|| internal("encoder", format!("record `{name}` missing from environment")))?;
          let i = def.field_index(f)
            .ok_or_else(|| internal("encoder", format!("field `{f}` missing from record `{name}`")))?;
          Ok((i, def.fields.len()))
        }
        _ => Err(internal("encoder", "field projection on a non-record type")),
      },
      ProjKey::Car | ProjKey::Cdr => Err(internal("encoder", "re-encoding an already-binarized projection")),
    }
  }

  fn encode_record_construct(&mut self, t: &Term, name: Symbol, fields: &[(Symbol, Term)]) -> Result<Term> {
    let def = self.env.records.get(&name)
      .ok_or_else(|| internal("encoder", format!("record `{name}` missing from environment")))?
      .clone();
    if def.fields.len() != fields.len() {
      return Err(internal("encoder", format!("record `{name}` arity mismatch surviving typecheck")));
    }
    // Reorder to declaration order (the typechecker already enforces this,
    // but the encoder owns the binarization order, so assert rather than trust).
    let mut ordered = Vec::with_capacity(fields.len());
    for (fname, _) in &def.fields {
      let (_, v) = fields.iter().find(|(f, _)| f == fname)
        .ok_or_else(|| internal("encoder", format!("field `{fname}` missing from `{name}` construction")))?;
      ordered.push(self.encode_term(v)?);
    }
    Ok(build_pair_spine(&ordered, &t.loc))
  }

  /// Positional counterpart to [`Self::encode_record_construct`]: no
  /// declaration order to reorder against, so the components just encode
  /// left-to-right into the same right-leaning pair spine.
  fn encode_tuple(&mut self, t: &Term, elems: &[Term]) -> Result<Term> {
    let encoded: Vec<Term> = elems.iter().map(|e| self.encode_term(e)).collect::<Result<_>>()?;
    Ok(build_pair_spine(&encoded, &t.loc))
  }

  fn encode_make_variant(&mut self, t: &Term, variant: Symbol, ctor: Symbol, value: &Term) -> Result<Term> {
    let def = self.env.variants.get(&variant)
      .ok_or_else(|| internal("encoder", format!("variant `{variant}` missing from environment")))?
      .clone();
    let index = def.ctor_index(ctor)
      .ok_or_else(|| internal("encoder", format!("constructor `{ctor}` missing from variant `{variant}`")))?;
    let valueb = self.encode_term(value)?;
    Ok(build_injection(valueb, index, &def.ctors, &t.loc))
  }

  fn encode_match_variant(&mut self, t: &Term, scrutinee: &Term, cases: &[MatchCase]) -> Result<Term> {
    let variant_name = match &*scrutinee.ty {
      TyKind::Variant(n) => *n,
      _ => return Err(internal("encoder", "match-variant over a non-variant scrutinee")),
    };
    let def = self.env.variants.get(&variant_name)
      .ok_or_else(|| internal("encoder", format!("variant `{variant_name}` missing from environment")))?
      .clone();
    let s = self.encode_term(scrutinee)?;
    // Reorder cases into declaration order, matching the injection's path
    // built by `build_injection`; each arm gets a bind var (the user's, for
    // a named pattern, or a fresh synthetic one for a wildcard arm that
    // codegen will simply `DROP`, §4.4 "A wildcard `_` arm ... emits DROP").
    let mut ordered: Vec<(Term, VarId)> = Vec::with_capacity(def.ctors.len());
    for (ctor, _) in &def.ctors {
      let case = cases.iter().find(|c| c.ctor == *ctor)
        .ok_or_else(|| internal("encoder", format!("missing match arm for `{ctor}`")))?;
      let body = self.encode_term(&case.body)?;
      let bind = case.bind.unwrap_or_else(|| self.vars.fresh());
      ordered.push((body, bind));
    }
    Ok(self.build_or_match(&ordered, s, &t.ty))
  }

  /// Nest a nested-`or` discrimination over already-encoded, declaration-
  /// ordered `(body, bind)` arms, scrutinizing `scrutinee` (§4.4 "variant:
  /// nested `IF_LEFT`"). Structurally identical to the entry-dispatch
  /// synthesis in [`Encoder::build_dispatch_match`], just parameterized over
  /// an arbitrary scrutinee term instead of a freshly-bound dispatch var.
  fn build_or_match(&mut self, arms: &[(Term, VarId)], scrutinee: Term, result_ty: &Ty) -> Term {
    match arms {
      [] => unreachable!("match-variant over zero constructors"),
      [(body, bind)] => TermNode::new(
        TermKind::Let {
          var: *bind,
          uses: crate::typeck::usecount::count_uses(body, *bind),
          e1: scrutinee,
          e2: body.clone(),
        },
        result_ty.clone(),
        FileSpan::dummy(),
      ),
      [(body, bind), rest @ ..] => {
        let right_var = self.vars.fresh();
        let right_scrutinee_ty = rest.iter().rev().fold(None, |acc: Option<Ty>, (b, _)| {
          Some(match acc { None => b.ty.clone(), Some(r) => TyKind::Or(b.ty.clone(), r).into() })
        }).expect("rest is non-empty");
        let right_case = self.build_or_match(
          rest,
          TermNode::new(TermKind::Var(right_var), right_scrutinee_ty, FileSpan::dummy()),
          result_ty,
        );
        TermNode::new(
          TermKind::MatchOr {
            scrutinee,
            left_bind: *bind,
            left_case: body.clone(),
            right_bind: right_var,
            right_case,
          },
          result_ty.clone(),
          FileSpan::dummy(),
        )
      }
    }
  }
}

/// Build `Pair(f0, Pair(f1, ... fn-1))`, right-leaning, over already-encoded
/// field terms (§4.2).
fn build_pair_spine(fields: &[Term], loc: &FileSpan) -> Term {
  match fields {
    [] => unreachable!("a record always has at least one field"),
    [only] => only.clone(),
    [head, rest @ ..] => {
      let tail = build_pair_spine(rest, loc);
      let ty: Ty = TyKind::pair(head.ty.clone(), tail.ty.clone());
      TermNode::new(TermKind::Pair(head.clone(), tail), ty, loc.clone())
    }
  }
}

/// Project component `index` out of an `arity`-field binarized pair.
fn binarized_project(owner: Term, index: usize, arity: usize, result_ty: &Ty, loc: &FileSpan) -> Term {
  let mut cur = owner;
  let mut remaining = arity;
  let mut i = index;
  while i > 0 {
    let tail_ty = tail_ty_of(&cur.ty, remaining);
    cur = TermNode::new(TermKind::Project(cur, ProjKey::Cdr), tail_ty, loc.clone());
    i -= 1;
    remaining -= 1;
  }
  if remaining > 1 {
    cur = TermNode::new(TermKind::Project(cur, ProjKey::Car), result_ty.clone(), loc.clone());
  }
  cur
}

fn tail_ty_of(pair_ty: &Ty, _remaining: usize) -> Ty {
  match &**pair_ty {
    TyKind::Tuple(ts) if ts.len() == 2 => ts[1].clone(),
    other => panic!("binarized_project: expected a pair type, found {other:?}"),
  }
}

/// Rebuild `owner` with component `index` (of `arity`) replaced by `value`.
fn binarized_set(owner: &Term, index: usize, arity: usize, value: Term, owner_ty: &Ty, loc: &FileSpan) -> Term {
  if arity == 1 { return value; }
  let TyKind::Tuple(ts) = &**owner_ty else { panic!("binarized_set: expected a pair type") };
  let (head_ty, tail_ty) = (ts[0].clone(), ts[1].clone());
  let head = TermNode::new(TermKind::Project(owner.clone(), ProjKey::Car), head_ty.clone(), loc.clone());
  let tail = TermNode::new(TermKind::Project(owner.clone(), ProjKey::Cdr), tail_ty.clone(), loc.clone());
  if index == 0 {
    TermNode::new(TermKind::Pair(value, tail), owner_ty.clone(), loc.clone())
  } else {
    let new_tail = binarized_set(&tail, index - 1, arity - 1, value, &tail_ty, loc);
    TermNode::new(TermKind::Pair(head, new_tail), owner_ty.clone(), loc.clone())
  }
}

/// Build the right-leaning `Left`/`Right` injection for constructor `index`
/// out of `ctors.len()` total constructors (§4.2 "Variant constructors").
fn build_injection(value: Term, index: usize, ctors: &[(Symbol, Ty)], loc: &FileSpan) -> Term {
  fn go(value: Term, index: usize, rest_tys: &[Ty], loc: &FileSpan) -> Term {
    if rest_tys.len() == 1 {
      return value;
    }
    let (this_ty, others) = (rest_tys[0].clone(), &rest_tys[1..]);
    if index == 0 {
      let other_ty = combined_or(others);
      let ty: Ty = TyKind::Or(value.ty.clone(), other_ty.clone()).into();
      TermNode::new(TermKind::Inject { left: true, other_ty, value }, ty, loc.clone())
    } else {
      let inner = go(value, index - 1, others, loc);
      let ty: Ty = TyKind::Or(this_ty.clone(), inner.ty.clone()).into();
      TermNode::new(TermKind::Inject { left: false, other_ty: this_ty, value: inner }, ty, loc.clone())
    }
  }
  let tys: Vec<Ty> = ctors.iter().map(|(_, t)| t.clone()).collect();
  go(value, index, &tys, loc)
}

fn combined_or(tys: &[Ty]) -> Ty {
  match tys {
    [] => unreachable!(),
    [only] => only.clone(),
    [head, rest @ ..] => TyKind::Or(head.clone(), combined_or(rest)).into(),
  }
}

/// [`build_injection`]'s constant-level twin.
fn build_const_injection(value: Const, index: usize, ctors: &[(Symbol, Ty)]) -> Const {
  fn go(value: Const, index: usize, rest_tys: &[Ty]) -> Const {
    if rest_tys.len() == 1 { return value; }
    let (this_ty, others) = (rest_tys[0].clone(), &rest_tys[1..]);
    if index == 0 {
      Const::Left(Box::new(value), combined_or(others))
    } else {
      Const::Right(this_ty, Box::new(go(value, index - 1, others)))
    }
  }
  let tys: Vec<Ty> = ctors.iter().map(|(_, t)| t.clone()).collect();
  go(value, index, &tys)
}


#[cfg(test)]
mod tests {
  use super::*;
  use crate::env::{Env, RecordDef, VariantDef};
  use crate::symbol::intern;
  use crate::types::konst::Const;

  fn int_const(n: i64) -> Term {
    TermNode::new(TermKind::Const(Const::Int(n.into())), TyKind::int(), FileSpan::dummy())
  }

  #[test]
  fn record_construct_binarizes_to_right_leaning_pairs() {
    let mut env = Env::default();
    let name = intern("Point");
    let x = intern("x");
    let y = intern("y");
    env.define_record(RecordDef { name, fields: vec![(x, TyKind::int()), (y, TyKind::int())] });

    let term = TermNode::new(
      TermKind::RecordConstruct(name, Box::new([(x, int_const(1)), (y, int_const(2))])),
      TyKind::Record(name).into(),
      FileSpan::dummy(),
    );
    let mut enc = Encoder { env: &env, vars: VarIdGen::default() };
    let encoded = enc.encode_term(&term).unwrap();
    assert!(matches!(encoded.desc, TermKind::Pair(..)));
  }

  #[test]
  fn make_variant_on_last_constructor_has_no_trailing_left() {
    let mut env = Env::default();
    let name = intern("Shape");
    let circle = intern("Circle");
    let square = intern("Square");
    env.define_variant(VariantDef {
      name,
      ctors: vec![(circle, TyKind::unit()), (square, TyKind::int())],
    });

    let term = TermNode::new(
      TermKind::MakeVariant(name, square, int_const(4)),
      TyKind::Variant(name).into(),
      FileSpan::dummy(),
    );
    let mut enc = Encoder { env: &env, vars: VarIdGen::default() };
    let encoded = enc.encode_term(&term).unwrap();
    match &encoded.desc {
      TermKind::Inject { left, .. } => assert!(!left, "last constructor injects Right"),
      other => panic!("expected an injection, got {other:?}"),
    }
  }

  #[test]
  fn single_entry_contract_needs_no_dispatch_synthesis() {
    let env = Env::default();
    let loc = FileSpan::dummy();
    let storage = TyKind::unit();
    let entry_body = TermNode::new(
      TermKind::Const(Const::Unit), TyKind::entry_result(storage.clone()), loc.clone(),
    );
    let contract = Contract {
      name: intern("C"),
      storage: storage.clone(),
      globals: vec![],
      entries: vec![crate::types::contract::Entry {
        name: intern("main"),
        param_ty: TyKind::unit(),
        param_var: VarId(0),
        storage_var: VarId(1),
        body: entry_body,
        loc,
      }],
      init: None,
    };
    let encoded = encode_contract(&env, &contract, VarIdGen::default()).unwrap();
    assert_eq!(encoded.param_ty, TyKind::unit());
  }
}
