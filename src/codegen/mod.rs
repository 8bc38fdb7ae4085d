//! The code generator (§4.4): lowers an encoded, simplified [`Term`] tree
//! into symbolic M instructions. Variable access compiles to a `DUP` at the
//! variable's current stack depth, tracked by [`StackEnv`]; a `let`-bound
//! value is dropped via `DIP_DROP` once its scope ends. Every helper in this
//! module keeps one invariant: compiling a term nets exactly one new value on
//! top of whatever stack it started with, leaving everything below
//! untouched — control-flow and binder cleanup are built around restoring
//! that invariant after a branch or a scope closes.

use std::collections::HashMap;

use crate::encode::EncodedContract;
use crate::error::{CompileError, InternalError, Result};
use crate::loc::FileSpan;
use crate::simplify;
use crate::symbol::Symbol;
use crate::types::contract::Global;
use crate::types::instr::{Block, Cadr, Inst, InstForm};
use crate::types::konst::Const;
use crate::types::term::{ProjKey, Term, TermNode, VarId};
use crate::types::ty::{Ty, TyKind};
use crate::prim::PrimOp;

fn internal(message: impl Into<String>) -> CompileError {
  CompileError::Internal(InternalError::new("codegen", message.into()))
}

/// The output of code generation: the contract's parameter/storage types and
/// the instruction blocks for its entry code and (if present) its storage
/// initializer. Not yet peephole-optimized or emitted to concrete syntax.
#[derive(Clone, Debug)]
pub struct Compiled {
  pub parameter: Ty,
  pub storage: Ty,
  pub code: Block,
  pub init: Option<Block>,
}

/// Tracks which [`VarId`] (if any) occupies each stack slot, top-of-stack
/// last. Anonymous intermediate values (constants, scrutinees already
/// consumed by a control instruction, ...) are recorded as `None` so that
/// depth arithmetic for the named slots around them stays correct.
#[derive(Clone, Debug, Default)]
struct StackEnv {
  slots: Vec<Option<VarId>>,
}

impl StackEnv {
  fn push(&mut self, v: Option<VarId>) { self.slots.push(v); }

  fn pop_n(&mut self, n: usize) {
    let len = self.slots.len();
    self.slots.truncate(len - n);
  }

  fn depth_of(&self, v: VarId) -> Option<u32> {
    self.slots.iter().rev().position(|s| *s == Some(v)).map(|i| i as u32)
  }

  fn rename_top(&mut self, v: VarId) {
    let last = self.slots.len() - 1;
    self.slots[last] = Some(v);
  }
}

/// Resolve every [`crate::types::term::TermKind::Call`] by substituting the
/// callee's (already-encoded) body in place, binding its parameters via
/// nested `let`s around an inlined copy. Globals may only call earlier
/// globals (the typechecker binds them in declaration order), so resolving
/// them in declaration order and looking calls up in what's resolved so far
/// always terminates — there is no `let rec` in this language (§9 Design
/// Notes, "Recursion").
fn inline_globals(globals: &[Global]) -> Result<HashMap<Symbol, Global>> {
  let mut resolved: HashMap<Symbol, Global> = HashMap::new();
  for g in globals {
    let body = inline_calls(&resolved, &g.body)?;
    resolved.insert(g.name, Global { name: g.name, var: g.var, body });
  }
  Ok(resolved)
}

fn inline_calls(globals: &HashMap<Symbol, Global>, t: &Term) -> Result<Term> {
  use crate::types::term::TermKind as K;
  let desc = match &t.desc {
    K::Call(name, args) => {
      let argsb: Vec<Term> = args.iter().map(|a| inline_calls(globals, a)).collect::<Result<_>>()?;
      let g = globals.get(name)
        .ok_or_else(|| internal(format!("call to undefined global `{name}`")))?;
      return match &g.body.desc {
        K::Lambda { params, body } if params.len() == argsb.len() => {
          let mut result = inline_calls(globals, body)?;
          for (p, a) in params.iter().zip(argsb.iter()).rev() {
            let uses = crate::typeck::usecount::count_uses(&result, *p);
            result = TermNode::new(
              K::Let { var: *p, uses, e1: a.clone(), e2: result.clone() },
              result.ty.clone(), t.loc.clone(),
            );
          }
          Ok(result)
        }
        _ if argsb.is_empty() => inline_calls(globals, &g.body),
        _ => Err(internal(format!("call to `{name}` with mismatched arity"))),
      };
    }
    _ => return rebuild_inline(globals, t),
  };
  #[allow(unreachable_code)]
  { let _: crate::types::term::TermKind = desc; unreachable!() }
}

/// Generic recursive rewrite used by [`inline_calls`] for every node kind
/// that is not itself a `Call`. Mirrors the simplifier's own full-tree walk.
fn rebuild_inline(globals: &HashMap<Symbol, Global>, t: &Term) -> Result<Term> {
  use crate::types::term::TermKind as K;
  macro_rules! rb { ($e:expr) => { inline_calls(globals, $e)? } }
  let desc = match &t.desc {
    K::Var(_) | K::Const(_) => return Ok(t.clone()),
    K::Call(..) => unreachable!("handled by inline_calls"),
    K::Let { var, uses, e1, e2 } => K::Let { var: *var, uses: *uses, e1: rb!(e1), e2: rb!(e2) },
    K::Seq(a, b) => K::Seq(rb!(a), rb!(b)),
    K::Pair(a, b) => K::Pair(rb!(a), rb!(b)),
    K::Exec(a, b) => K::Exec(rb!(a), rb!(b)),
    K::If(a, b, c) => K::If(rb!(a), rb!(b), rb!(c)),
    K::Lambda { params, body } => K::Lambda { params: params.clone(), body: rb!(body) },
    K::Closure { captured, lifted } => K::Closure { captured: captured.clone(), lifted: rb!(lifted) },
    K::Apply(op, args) => K::Apply(*op, args.iter().map(|a| inline_calls(globals, a)).collect::<Result<_>>()?),
    K::MatchOption { scrutinee, none_case, some_bind, some_case } => K::MatchOption {
      scrutinee: rb!(scrutinee), none_case: rb!(none_case), some_bind: *some_bind, some_case: rb!(some_case),
    },
    K::MatchNat { scrutinee, plus_bind, plus_case, minus_bind, minus_case } => K::MatchNat {
      scrutinee: rb!(scrutinee), plus_bind: *plus_bind, plus_case: rb!(plus_case),
      minus_bind: *minus_bind, minus_case: rb!(minus_case),
    },
    K::MatchList { scrutinee, nil_case, head_bind, tail_bind, cons_case } => K::MatchList {
      scrutinee: rb!(scrutinee), nil_case: rb!(nil_case), head_bind: *head_bind, tail_bind: *tail_bind, cons_case: rb!(cons_case),
    },
    K::MatchOr { scrutinee, left_bind, left_case, right_bind, right_case } => K::MatchOr {
      scrutinee: rb!(scrutinee), left_bind: *left_bind, left_case: rb!(left_case), right_bind: *right_bind, right_case: rb!(right_case),
    },
    K::MatchVariant { scrutinee, cases } => K::MatchVariant {
      scrutinee: rb!(scrutinee),
      cases: cases.iter().map(|c| Ok(crate::types::term::MatchCase {
        ctor: c.ctor, ctor_ty: c.ctor_ty.clone(), bind: c.bind, body: inline_calls(globals, &c.body)?,
      })).collect::<Result<_>>()?,
    },
    K::Loop { init, acc_bind, body } => K::Loop { init: rb!(init), acc_bind: *acc_bind, body: rb!(body) },
    K::LoopLeft { init, acc_bind, body } => K::LoopLeft { init: rb!(init), acc_bind: *acc_bind, body: rb!(body) },
    K::Fold { collection, init, elt_bind, acc_bind, body } => K::Fold {
      collection: rb!(collection), init: rb!(init), elt_bind: *elt_bind, acc_bind: *acc_bind, body: rb!(body),
    },
    K::MapFold { collection, init, elt_bind, acc_bind, body } => K::MapFold {
      collection: rb!(collection), init: rb!(init), elt_bind: *elt_bind, acc_bind: *acc_bind, body: rb!(body),
    },
    K::Map { collection, elt_bind, body } => K::Map { collection: rb!(collection), elt_bind: *elt_bind, body: rb!(body) },
    K::RecordConstruct(name, fields) => K::RecordConstruct(*name,
      fields.iter().map(|(f, v)| Ok((*f, inline_calls(globals, v)?))).collect::<Result<_>>()?),
    K::Tuple(elems) => K::Tuple(elems.iter().map(|v| inline_calls(globals, v)).collect::<Result<_>>()?),
    K::MakeVariant(variant, ctor, v) => K::MakeVariant(*variant, *ctor, rb!(v)),
    K::Inject { left, other_ty, value } => K::Inject { left: *left, other_ty: other_ty.clone(), value: rb!(value) },
    K::Project(t2, key) => K::Project(rb!(t2), *key),
    K::SetField(t2, key, v) => K::SetField(rb!(t2), *key, rb!(v)),
    K::Transfer { dest, amount, arg } => K::Transfer { dest: rb!(dest), amount: rb!(amount), arg: rb!(arg) },
    K::Failwith(e) => K::Failwith(rb!(e)),
    K::CreateContract(e) => K::CreateContract(rb!(e)),
    K::ContractAt(e, ty) => K::ContractAt(rb!(e), ty.clone()),
    K::Unpack(e, ty) => K::Unpack(rb!(e), ty.clone()),
  };
  let rebuilt = TermNode::new(desc, t.ty.clone(), t.loc.clone()).with_transfer(t.transfer);
  Ok(match t.name { Some(n) => rebuilt.with_name(n), None => rebuilt })
}

/// Map a [`PrimOp`] to its instruction form. Most become a generic
/// [`InstForm::Prim`]; the ambient/contract-context primitives instead get
/// the dedicated form `instr.rs` reserves for them.
fn prim_form(op: PrimOp) -> InstForm {
  match op {
    PrimOp::Self_ => InstForm::Self_,
    PrimOp::Balance => InstForm::Balance,
    PrimOp::Now => InstForm::Now,
    PrimOp::Amount => InstForm::Amount,
    PrimOp::Sender => InstForm::Sender,
    PrimOp::Source => InstForm::Source,
    PrimOp::StepsToQuota => InstForm::StepsToQuota,
    PrimOp::SetDelegate => InstForm::SetDelegate,
    PrimOp::ImplicitAccount => InstForm::ImplicitAccount,
    PrimOp::Pack => InstForm::Pack,
    PrimOp::Address => InstForm::AddressOf,
    other => InstForm::Prim(other),
  }
}

/// Lower a constant value into the instruction sequence that builds it.
/// Atomic, directly-pushable literals become a single `PUSH`; every
/// structured shape (`option`, `list`, `set`, `map`, tuples) is built up from
/// the dedicated construction primitives `instr.rs` provides for it (`NIL`,
/// `NONE`, `EMPTY_SET`, `EMPTY_MAP`) rather than an opaque `PUSH`, matching
/// how those forms are meant to be used (§4.4 "Literals").
fn compile_const(ty: &Ty, c: &Const, loc: &FileSpan) -> Result<Block> {
  match c {
    Const::Unit | Const::Bool(_) | Const::Int(_) | Const::Nat(_) | Const::Tez(_)
      | Const::String(_) | Const::Bytes(_) | Const::Timestamp(_) | Const::Key(_)
      | Const::KeyHash(_) | Const::Signature(_) | Const::Address(_) =>
      Ok(vec![Inst::new(InstForm::Push(c.clone()), loc.clone())]),
    Const::None(inner_ty) => Ok(vec![Inst::new(InstForm::None_(inner_ty.clone()), loc.clone())]),
    Const::Some(inner) => {
      let inner_ty = match &**ty { TyKind::Option(t) => t.clone(), _ => return Err(internal("Some constant without an option type")) };
      let mut out = compile_const(&inner_ty, inner, loc)?;
      out.push(Inst::new(InstForm::Some_, loc.clone()));
      Ok(out)
    }
    Const::Left(inner, other_ty) => {
      let left_ty = match &**ty { TyKind::Or(a, _) => a.clone(), _ => return Err(internal("Left constant without an or type")) };
      let mut out = compile_const(&left_ty, inner, loc)?;
      out.push(Inst::new(InstForm::Left(other_ty.clone(), None), loc.clone()));
      Ok(out)
    }
    Const::Right(other_ty, inner) => {
      let right_ty = match &**ty { TyKind::Or(_, b) => b.clone(), _ => return Err(internal("Right constant without an or type")) };
      let mut out = compile_const(&right_ty, inner, loc)?;
      out.push(Inst::new(InstForm::Right(other_ty.clone(), None), loc.clone()));
      Ok(out)
    }
    Const::Tuple(cs) => {
      let tys = match &**ty { TyKind::Tuple(ts) => ts.clone(), _ => return Err(internal("Tuple constant without a tuple type")) };
      if cs.len() != tys.len() || cs.is_empty() { return Err(internal("tuple constant/type arity mismatch")); }
      compile_tuple_const(&tys, cs, loc)
    }
    Const::List(elt_ty, cs) => {
      let mut out = vec![Inst::new(InstForm::Nil(elt_ty.clone()), loc.clone())];
      for elem in cs.iter().rev() {
        out.extend(compile_const(elt_ty, elem, loc)?);
        out.push(Inst::new(InstForm::Cons, loc.clone()));
      }
      Ok(out)
    }
    Const::Set(elt_ty, cs) => {
      let mut out = vec![Inst::new(InstForm::EmptySet(elt_ty.clone()), loc.clone())];
      for elem in cs.iter() {
        out.extend(compile_const(elt_ty, elem, loc)?);
        out.push(Inst::new(InstForm::Push(Const::Bool(true)), loc.clone()));
        out.push(Inst::new(InstForm::Swap, loc.clone()));
        out.push(Inst::new(InstForm::Prim(PrimOp::UpdateMap), loc.clone()));
      }
      Ok(out)
    }
    Const::Map(k_ty, v_ty, kvs) => {
      let mut out = vec![Inst::new(InstForm::EmptyMap(k_ty.clone(), v_ty.clone()), loc.clone())];
      for (k, v) in kvs.iter() {
        out.extend(compile_const(k_ty, k, loc)?);
        out.extend(compile_const(v_ty, v, loc)?);
        out.push(Inst::new(InstForm::Some_, loc.clone()));
        out.push(Inst::new(InstForm::Swap, loc.clone()));
        out.push(Inst::new(InstForm::Prim(PrimOp::UpdateMap), loc.clone()));
      }
      Ok(out)
    }
    Const::EmptyBigMap(k_ty, v_ty) => Ok(vec![Inst::new(InstForm::EmptyBigMap(k_ty.clone(), v_ty.clone()), loc.clone())]),
    Const::Record(..) | Const::Variant(..) =>
      Err(internal("an unresolved record/variant constant reached code generation")),
  }
}

/// `Push` only ever targets a flat, already-binarized value; a literal tuple
/// still has to be built as a right-leaning `Pair` spine the same shape the
/// encoder gives non-literal tuples (§4.2 "Record construction").
fn compile_tuple_const(tys: &[Ty], cs: &[Const], loc: &FileSpan) -> Result<Block> {
  if cs.len() == 1 { return compile_const(&tys[0], &cs[0], loc); }
  let mut out = compile_const(&tys[0], &cs[0], loc)?;
  out.extend(compile_tuple_const(&tys[1..], &cs[1..], loc)?);
  out.push(Inst::new(InstForm::Pair, loc.clone()));
  Ok(out)
}

struct Codegen;

impl Codegen {
  fn compile_term(&self, env: &mut StackEnv, t: &Term) -> Result<Block> {
    use crate::types::term::TermKind as K;
    match &t.desc {
      K::Var(v) => {
        let depth = env.depth_of(*v).ok_or_else(|| internal(format!("unbound variable reached code generation: {v:?}")))?;
        env.push(None);
        Ok(vec![Inst::new(InstForm::Dup(depth), t.loc.clone())])
      }
      K::Const(c) => {
        let out = compile_const(&t.ty, c, &t.loc)?;
        env.push(None);
        Ok(out)
      }
      K::Let { var, e1, e2, .. } => {
        let mut out = self.compile_term(env, e1)?;
        env.rename_top(*var);
        out.extend(self.compile_term(env, e2)?);
        out.push(Inst::new(InstForm::DipDrop(1, 1), t.loc.clone()));
        let depth = env.depth_of(*var).expect("just bound");
        let idx = env.slots.len() - 1 - depth as usize;
        env.slots.remove(idx);
        Ok(out)
      }
      K::Seq(a, b) => {
        let mut out = self.compile_term(env, a)?;
        out.push(Inst::new(InstForm::Drop(1), a.loc.clone()));
        env.pop_n(1);
        out.extend(self.compile_term(env, b)?);
        Ok(out)
      }
      K::If(c, th, el) => {
        let mut out = self.compile_term(env, c)?;
        env.pop_n(1);
        let th_blk = self.compile_term(&mut env.clone(), th)?;
        let el_blk = self.compile_term(&mut env.clone(), el)?;
        out.push(Inst::new(InstForm::If(th_blk, el_blk), t.loc.clone()));
        env.push(None);
        Ok(out)
      }
      K::Apply(op, args) => {
        let mut out = Vec::new();
        for a in args.iter() { out.extend(self.compile_term(env, a)?); }
        env.pop_n(args.len());
        out.push(Inst::new(prim_form(*op), t.loc.clone()));
        env.push(None);
        Ok(out)
      }
      K::MatchOption { scrutinee, none_case, some_bind, some_case } => {
        let mut out = self.compile_term(env, scrutinee)?;
        env.pop_n(1);
        let none_blk = self.compile_branch(env, &[], none_case)?;
        let some_blk = self.compile_branch(env, &[*some_bind], some_case)?;
        out.push(Inst::new(InstForm::IfNone(none_blk, some_blk), t.loc.clone()));
        env.push(None);
        Ok(out)
      }
      K::MatchList { scrutinee, nil_case, head_bind, tail_bind, cons_case } => {
        let mut out = self.compile_term(env, scrutinee)?;
        env.pop_n(1);
        let nil_blk = self.compile_branch(env, &[], nil_case)?;
        // head ends on top of the unwrapped pair, matching IF_CONS's native order.
        let cons_blk = self.compile_branch(env, &[*tail_bind, *head_bind], cons_case)?;
        out.push(Inst::new(InstForm::IfCons(nil_blk, cons_blk), t.loc.clone()));
        env.push(None);
        Ok(out)
      }
      K::MatchOr { scrutinee, left_bind, left_case, right_bind, right_case } => {
        let mut out = self.compile_term(env, scrutinee)?;
        env.pop_n(1);
        let left_blk = self.compile_branch(env, &[*left_bind], left_case)?;
        let right_blk = self.compile_branch(env, &[*right_bind], right_case)?;
        out.push(Inst::new(InstForm::IfLeft(left_blk, right_blk), t.loc.clone()));
        env.push(None);
        Ok(out)
      }
      K::MatchNat { scrutinee, plus_bind, plus_case, minus_bind, minus_case } => {
        self.compile_match_nat(env, t, scrutinee, *plus_bind, plus_case, *minus_bind, minus_case)
      }
      K::Loop { init, acc_bind, body } => self.compile_loop(env, t, init, *acc_bind, body),
      K::LoopLeft { init, acc_bind, body } => self.compile_loop_left(env, t, init, *acc_bind, body),
      K::Fold { collection, init, elt_bind, acc_bind, body } =>
        self.compile_fold(env, t, collection, init, *elt_bind, *acc_bind, body),
      K::Map { collection, elt_bind, body } => self.compile_map(env, t, collection, *elt_bind, body),
      K::MapFold { collection, init, elt_bind, acc_bind, body } =>
        self.compile_map_fold(env, t, collection, init, *elt_bind, *acc_bind, body),
      K::Project(_inner, key) => match key {
        ProjKey::Car | ProjKey::Cdr => {
          let (base, chain) = collect_access_chain(t);
          let mut out = self.compile_term(env, base)?;
          out.push(Inst::new(InstForm::Access(chain.into_boxed_slice(), None), t.loc.clone()));
          Ok(out)
        }
        ProjKey::Field(_) | ProjKey::Index(_) =>
          Err(internal("unresolved field/index projection reached code generation")),
      },
      K::Pair(a, b) => {
        let mut out = self.compile_term(env, a)?;
        out.extend(self.compile_term(env, b)?);
        env.pop_n(2);
        out.push(Inst::new(InstForm::Pair, t.loc.clone()));
        env.push(None);
        Ok(out)
      }
      K::Inject { left, other_ty, value } => {
        let mut out = self.compile_term(env, value)?;
        env.pop_n(1);
        out.push(Inst::new(
          if *left { InstForm::Left(other_ty.clone(), None) } else { InstForm::Right(other_ty.clone(), None) },
          t.loc.clone(),
        ));
        env.push(None);
        Ok(out)
      }
      K::Exec(f, a) => {
        let mut out = self.compile_term(env, a)?;
        out.extend(self.compile_term(env, f)?);
        env.pop_n(2);
        out.push(Inst::new(InstForm::Exec, t.loc.clone()));
        env.push(None);
        Ok(out)
      }
      K::Lambda { params, body } => {
        if params.len() != 1 {
          return Err(internal("multi-parameter first-class lambda is unsupported; the encoder only produces single-parameter lambdas"));
        }
        let (a, b) = match &*t.ty {
          TyKind::Lambda(a, b) => (a.clone(), b.clone()),
          TyKind::Closure(a, b, _) => (a.clone(), b.clone()),
          _ => return Err(internal("lambda term without a lambda/closure type")),
        };
        let mut inner = StackEnv::default();
        inner.push(Some(params[0]));
        let body_blk = self.compile_term(&mut inner, body)?;
        env.push(None);
        Ok(vec![Inst::new(InstForm::Lambda(a, b, body_blk), t.loc.clone())])
      }
      K::Closure { .. } => Err(internal("closures are not implemented")),
      K::Call(..) => Err(internal("a call survived global inlining")),
      K::Transfer { dest, amount, arg } => {
        let mut out = self.compile_term(env, arg)?;
        out.extend(self.compile_term(env, amount)?);
        out.extend(self.compile_term(env, dest)?);
        env.pop_n(3);
        out.push(Inst::new(InstForm::TransferTokens, t.loc.clone()));
        env.push(None);
        Ok(out)
      }
      K::Failwith(e) => {
        let mut out = self.compile_term(env, e)?;
        out.push(Inst::new(InstForm::Failwith, t.loc.clone()));
        Ok(out)
      }
      K::CreateContract(e) => {
        let mut out = self.compile_term(env, e)?;
        env.pop_n(1);
        out.push(Inst::new(InstForm::CreateContract, t.loc.clone()));
        env.push(None);
        Ok(out)
      }
      K::ContractAt(e, ty) => {
        let mut out = self.compile_term(env, e)?;
        env.pop_n(1);
        out.push(Inst::new(InstForm::Contract(ty.clone()), t.loc.clone()));
        env.push(None);
        Ok(out)
      }
      K::Unpack(e, ty) => {
        let mut out = self.compile_term(env, e)?;
        env.pop_n(1);
        out.push(Inst::new(InstForm::Unpack(ty.clone()), t.loc.clone()));
        env.push(None);
        Ok(out)
      }
      K::RecordConstruct(..) | K::Tuple(..) | K::MakeVariant(..) | K::MatchVariant { .. } | K::SetField(..) =>
        Err(internal("a pre-encoding node reached code generation")),
    }
  }

  /// Compile one arm of a real unwrapping control instruction (`IF_NONE`,
  /// `IF_CONS`, `IF_LEFT`): `binds` are freshly pushed in order (last =
  /// topmost), the body compiled against that extended environment, then
  /// dropped again so every arm leaves the same net effect.
  fn compile_branch(&self, outer: &StackEnv, binds: &[VarId], body: &Term) -> Result<Block> {
    let mut env = outer.clone();
    for b in binds { env.push(Some(*b)); }
    let mut block = self.compile_term(&mut env, body)?;
    if !binds.is_empty() {
      block.push(Inst::new(InstForm::DipDrop(1, binds.len() as u32), body.loc.clone()));
    }
    Ok(block)
  }

  /// `match%nat`: `DUP; ABS; SWAP; GE; IF` (§4.4), not a dedicated control
  /// form. `GE` here tests the *original* (un-abs'd) copy against zero; both
  /// branches then see the absolute value on top, which is numerically
  /// identical to the original for the non-negative (`plus`) arm.
  fn compile_match_nat(&self, env: &mut StackEnv, t: &Term, scrutinee: &Term,
    plus_bind: VarId, plus_case: &Term, minus_bind: VarId, minus_case: &Term) -> Result<Block> {
    let loc = t.loc.clone();
    let mut out = self.compile_term(env, scrutinee)?;
    out.push(Inst::new(InstForm::Dup(0), loc.clone()));
    out.push(Inst::new(InstForm::Prim(PrimOp::Abs), loc.clone()));
    out.push(Inst::new(InstForm::Swap, loc.clone()));
    out.push(Inst::new(InstForm::Prim(PrimOp::Ge), loc.clone()));
    // stack is now [bool, |v|, S]; the `If` consumes the bool, leaving |v|.
    env.pop_n(1);
    let mut plus_env = env.clone();
    plus_env.rename_top(plus_bind);
    let mut minus_env = env.clone();
    minus_env.rename_top(minus_bind);
    let plus_blk = self.compile_term(&mut plus_env, plus_case)?;
    let minus_blk = self.compile_term(&mut minus_env, minus_case)?;
    out.push(Inst::new(InstForm::If(plus_blk, minus_blk), loc));
    env.pop_n(1);
    env.push(None);
    Ok(out)
  }

  fn compile_loop(&self, env: &mut StackEnv, t: &Term, init: &Term, acc_bind: VarId, body: &Term) -> Result<Block> {
    let loc = t.loc.clone();
    let mut out = self.compile_term(env, init)?;
    env.rename_top(acc_bind);
    out.push(Inst::new(InstForm::Push(Const::Bool(true)), loc.clone()));
    env.push(None);

    let mut body_env = env.clone();
    body_env.pop_n(1); // the priming `true`/per-iteration continue flag, consumed by LOOP
    let mut b = self.compile_term(&mut body_env, body)?;
    // `body` produced Pair(bool, new_acc) atop [acc_old, Sinner]; unpack and
    // drop the stale accumulator slot.
    b.push(Inst::new(InstForm::Dup(0), loc.clone()));
    b.push(Inst::new(InstForm::Access(Box::new([Cadr::Cdr]), None), loc.clone()));
    b.push(Inst::new(InstForm::Swap, loc.clone()));
    b.push(Inst::new(InstForm::Access(Box::new([Cadr::Car]), None), loc.clone()));
    b.push(Inst::new(InstForm::DipDrop(2, 1), loc.clone()));

    out.push(Inst::new(InstForm::Loop(b), loc));
    env.pop_n(1); // LOOP consumes the leading bool; the accumulator slot remains
    Ok(out)
  }

  fn compile_loop_left(&self, env: &mut StackEnv, t: &Term, init: &Term, acc_bind: VarId, body: &Term) -> Result<Block> {
    let loc = t.loc.clone();
    let result_ty = t.ty.clone();
    let mut out = self.compile_term(env, init)?;
    env.rename_top(acc_bind);
    out.push(Inst::new(InstForm::Left(result_ty, None), loc.clone()));

    let mut body_env = env.clone();
    let mut b = self.compile_term(&mut body_env, body)?;
    b.push(Inst::new(InstForm::DipDrop(1, 1), loc.clone()));

    out.push(Inst::new(InstForm::LoopLeft(b), loc));
    Ok(out)
  }

  fn compile_fold(&self, env: &mut StackEnv, t: &Term, collection: &Term, init: &Term,
    elt_bind: VarId, acc_bind: VarId, body: &Term) -> Result<Block> {
    let loc = t.loc.clone();
    let mut out = self.compile_term(env, init)?;
    env.rename_top(acc_bind);
    out.extend(self.compile_term(env, collection)?);
    env.pop_n(1); // ITER consumes the collection

    let mut body_env = env.clone();
    body_env.push(Some(elt_bind));
    let mut b = self.compile_term(&mut body_env, body)?;
    b.push(Inst::new(InstForm::DipDrop(1, 2), loc.clone()));

    out.push(Inst::new(InstForm::Iter(b), loc));
    Ok(out)
  }

  fn compile_map(&self, env: &mut StackEnv, t: &Term, collection: &Term, elt_bind: VarId, body: &Term) -> Result<Block> {
    let loc = t.loc.clone();
    let mut out = self.compile_term(env, collection)?;
    let mut body_env = StackEnv::default();
    body_env.push(Some(elt_bind));
    let mut b = self.compile_term(&mut body_env, body)?;
    b.push(Inst::new(InstForm::DipDrop(1, 1), loc.clone()));
    out.push(Inst::new(InstForm::Map(b), loc));
    Ok(out)
  }

  /// Threads `Pair(acc, mapped_list)` as the ambient `ITER` accumulator;
  /// `body` must produce `Pair(new_acc, new_elt)` per element (this
  /// generator's own convention for `map_fold`, chosen to keep the unpack
  /// sequences below symmetric). Each mapped element is consed onto the
  /// front of the running list, which reverses traversal order once; a
  /// second cons-via-`ITER` pass reverses it back before the final pairing.
  fn compile_map_fold(&self, env: &mut StackEnv, t: &Term, collection: &Term, init: &Term,
    elt_bind: VarId, acc_bind: VarId, body: &Term) -> Result<Block> {
    let loc = t.loc.clone();
    let elt_out_ty = match &*t.ty {
      TyKind::Tuple(ts) if ts.len() == 2 => match &*ts[0] {
        TyKind::List(e) => e.clone(),
        _ => return Err(internal("map_fold result must be a (list * acc) pair")),
      },
      _ => return Err(internal("map_fold result must be a (list * acc) pair")),
    };

    let mut out = self.compile_term(env, init)?; // [acc0, S]
    out.push(Inst::new(InstForm::Nil(elt_out_ty.clone()), loc.clone()));
    out.push(Inst::new(InstForm::Pair, loc.clone())); // [Pair(acc0, nil), S]
    env.pop_n(1);
    env.push(None); // combined accumulator, 1 slot

    out.extend(self.compile_term(env, collection)?);
    env.pop_n(1); // ITER consumes the collection

    // per-iteration body: [elt, combined, Sinner] -> [combined', Sinner].
    // Unpack combined = Pair(acc, list), leaving list anonymous below the
    // user's elt/acc bindings; run the user body; unpack its Pair(new_acc,
    // new_elt) and cons new_elt onto list via a nested `Dip` (no DIG/DUG
    // in this instruction set, so reaching two levels down for the cons
    // goes through `Dip` rather than a chain of swaps).
    let mut user_env = StackEnv::default();
    user_env.push(Some(elt_bind));
    user_env.push(Some(acc_bind));
    user_env.push(None);

    let mut b: Block = Vec::new();
    b.push(Inst::new(InstForm::Dup(1), loc.clone()));
    b.push(Inst::new(InstForm::Access(Box::new([Cadr::Car]), None), loc.clone()));
    b.push(Inst::new(InstForm::Dup(2), loc.clone()));
    b.push(Inst::new(InstForm::Access(Box::new([Cadr::Cdr]), None), loc.clone()));
    b.push(Inst::new(InstForm::DipDrop(3, 1), loc.clone()));
    b.extend(self.compile_term(&mut user_env, body)?);
    // stack: [pairResult, list, accOld, eltOld, Sinner]
    b.push(Inst::new(InstForm::Dup(0), loc.clone()));
    b.push(Inst::new(InstForm::Access(Box::new([Cadr::Car]), None), loc.clone()));
    // [new_acc, pairResult, list, accOld, eltOld, Sinner]
    b.push(Inst::new(InstForm::Dip(1, vec![Inst::new(InstForm::Access(Box::new([Cadr::Cdr]), None), loc.clone())]), loc.clone()));
    // [new_acc, new_elt, list, accOld, eltOld, Sinner]
    b.push(Inst::new(InstForm::Dip(1, vec![Inst::new(InstForm::Cons, loc.clone())]), loc.clone()));
    // [new_acc, new_list, accOld, eltOld, Sinner]
    b.push(Inst::new(InstForm::Pair, loc.clone()));
    // [combined', accOld, eltOld, Sinner]
    b.push(Inst::new(InstForm::DipDrop(1, 2), loc.clone()));

    out.push(Inst::new(InstForm::Iter(b), loc.clone()));

    // unreverse the consed list: unpack, reverse, re-pair.
    out.push(Inst::new(InstForm::Dup(0), loc.clone()));
    out.push(Inst::new(InstForm::Access(Box::new([Cadr::Car]), None), loc.clone()));
    out.push(Inst::new(InstForm::Swap, loc.clone()));
    out.push(Inst::new(InstForm::Access(Box::new([Cadr::Cdr]), None), loc.clone()));
    out.push(Inst::new(InstForm::Dip(1, vec![Inst::new(InstForm::Nil(elt_out_ty), loc.clone())]), loc.clone()));
    out.push(Inst::new(InstForm::Iter(vec![Inst::new(InstForm::Cons, loc.clone())]), loc.clone()));
    out.push(Inst::new(InstForm::Pair, loc));
    // net effect over the original `env` (pre-init): +1, one combined result slot.
    Ok(out)
  }
}

/// Walk a chain of nested [`crate::types::term::TermKind::Project`] nodes
/// down to the first non-`Car`/`Cdr` base, collecting the access path in
/// base-to-outer order so the whole chain compiles to one [`InstForm::Access`]
/// instead of one instruction per step (§4.4 "Tuples"/"Records").
fn collect_access_chain(t: &Term) -> (&Term, Vec<Cadr>) {
  use crate::types::term::TermKind as K;
  match &t.desc {
    K::Project(inner, ProjKey::Car) => { let (b, mut c) = collect_access_chain(inner); c.push(Cadr::Car); (b, c) }
    K::Project(inner, ProjKey::Cdr) => { let (b, mut c) = collect_access_chain(inner); c.push(Cadr::Cdr); (b, c) }
    _ => (t, Vec::new()),
  }
}

/// Compile an [`EncodedContract`] into instruction blocks. Globals are
/// inlined away first (§9 Design Notes, "no function definitions in the
/// target assembly"); the single combined entry body is then compiled
/// against a one-slot initial stack holding `Pair(parameter, storage)`,
/// unpacked by the entry-frame prelude before the body runs.
pub fn compile(encoded: &EncodedContract) -> Result<Compiled> {
  let globals = inline_globals(&encoded.globals)?;
  let body = simplify::simplify(&inline_calls(&globals, &encoded.body)?);
  let init = encoded.init.as_ref()
    .map(|i| inline_calls(&globals, i))
    .transpose()?
    .map(|i| simplify::simplify(&i));

  let cg = Codegen;
  let mut env = StackEnv::default();
  env.push(None);
  let loc = body.loc.clone();
  let mut code = vec![
    Inst::new(InstForm::Dup(0), loc.clone()),
    Inst::new(InstForm::Access(Box::new([Cadr::Car]), None), loc.clone()),
    Inst::new(InstForm::Swap, loc.clone()),
    Inst::new(InstForm::Access(Box::new([Cadr::Cdr]), None), loc.clone()),
  ];
  env.pop_n(1);
  env.push(Some(encoded.param_var));
  env.push(Some(encoded.storage_var));
  code.extend(cg.compile_term(&mut env, &body)?);
  // the body nets exactly one value on top of [param; storage] (see the
  // module doc comment); a contract's code must leave the stack with that
  // one value and nothing else, so the two entry slots get dropped here the
  // same way `K::Let` drops its own binding once its scope ends.
  code.push(Inst::new(InstForm::DipDrop(1, 2), loc.clone()));

  let init_code = init.as_ref().map(|i| cg.compile_term(&mut StackEnv::default(), i)).transpose()?;

  Ok(Compiled { parameter: encoded.param_ty.clone(), storage: encoded.storage.clone(), code, init: init_code })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::types::konst::Const;
  use crate::types::term::{TermKind, VarIdGen};

  fn unit_contract_body() -> Term {
    TermNode::new(TermKind::Const(Const::Unit), TyKind::unit(), FileSpan::dummy())
  }

  #[test]
  fn variable_reference_compiles_to_a_dup_at_its_depth() {
    let cg = Codegen;
    let mut env = StackEnv::default();
    let v = VarId(0);
    env.push(Some(v));
    env.push(None);
    let term = TermNode::new(TermKind::Var(v), TyKind::int(), FileSpan::dummy());
    let block = cg.compile_term(&mut env, &term).unwrap();
    assert!(matches!(block.last().unwrap().form, InstForm::Dup(1)));
  }

  #[test]
  fn let_binding_is_dropped_after_its_scope() {
    let cg = Codegen;
    let mut env = StackEnv::default();
    let x = VarId(0);
    let body = TermNode::new(
      TermKind::Let {
        var: x, uses: 1,
        e1: TermNode::new(TermKind::Const(Const::Unit), TyKind::unit(), FileSpan::dummy()),
        e2: TermNode::new(TermKind::Var(x), TyKind::unit(), FileSpan::dummy()),
      },
      TyKind::unit(), FileSpan::dummy(),
    );
    let block = cg.compile_term(&mut env, &body).unwrap();
    assert!(block.iter().any(|i| matches!(i.form, InstForm::DipDrop(1, 1))));
  }

  #[test]
  fn single_entry_contract_compiles_without_dispatch() {
    let body = unit_contract_body();
    let encoded = EncodedContract {
      name: crate::symbol::intern("C"),
      storage: TyKind::unit(),
      globals: vec![],
      param_ty: TyKind::unit(),
      param_var: VarId(0),
      storage_var: VarId(1),
      body,
      init: None,
    };
    let _ = VarIdGen::default();
    let compiled = compile(&encoded).unwrap();
    assert!(!compiled.code.is_empty());
  }
}
