//! The decompile direction (§4.7): symbolically interpret a concrete M
//! program and recover a typed [`Term`] tree. This is the mirror image of
//! [`crate::codegen`] and [`crate::encode`] combined — instead of lowering a
//! tree to a stack machine, it walks the stack machine's instructions and
//! rebuilds the tree they would have come from, using [`crate::emit`]'s
//! decoder to get from concrete syntax back to symbolic [`Inst`]s first.
//!
//! The interpreter never re-derives types from scratch: every constructed
//! [`Term`] is typed directly from the instruction's own operand types and
//! [`crate::typeck::primop::result_ty`], the same arity table the forward
//! typechecker uses for primitives. There is no separate decompiling-mode
//! typecheck pass — a freshly built, already-typed tree has nothing left to
//! check.
//!
//! Two shapes the forward pipeline only ever produces by compiling a literal
//! do not otherwise have a term-level representation: `SOME` and `CONS`. Both
//! are reconstructed by folding the constant they wrap or extend; applied to
//! anything else (which only `MAP`/`ITER`-desugared folds ever do, never a
//! literal) they fail with an internal error rather than guess.

use std::rc::Rc;

use crate::emit::{decode_block, decode_ty};
use crate::error::{CompileError, DecompileError, DecompileErrorKind, InternalError, Result};
use crate::loc::FileSpan;
use crate::prim::PrimOp;
use crate::symbol::Symbol;
use crate::typeck::primop::result_ty;
use crate::types::concrete::Program;
use crate::types::instr::{Block, Cadr, Inst, InstForm};
use crate::types::konst::Const;
use crate::types::term::{ProjKey, Term, TermKind, TermNode, VarId, VarIdGen};
use crate::types::ty::{Ground, Ty, TyKind};

fn internal(message: impl Into<String>) -> CompileError {
  CompileError::Internal(InternalError::new("interp", message.into()))
}

fn unstructured(message: impl Into<String>) -> CompileError {
  CompileError::Decompilation(DecompileError {
    kind: DecompileErrorKind::UnstructuredProgram(message.into()),
    loc: FileSpan::dummy(),
  })
}

fn unbound(depth: u32) -> CompileError {
  CompileError::Decompilation(DecompileError {
    kind: DecompileErrorKind::UnboundStackPosition(depth),
    loc: FileSpan::dummy(),
  })
}

fn annotation_conflict(old: Symbol, new: Symbol) -> CompileError {
  CompileError::Decompilation(DecompileError {
    kind: DecompileErrorKind::AnnotationConflict(old, new),
    loc: FileSpan::dummy(),
  })
}

/// A value sitting on the symbolic stack mid-interpretation. Most slots are
/// `synthetic`: a plain reference to some binder the enclosing construct
/// already owns (a lambda parameter, a `some_bind`, …) — duplicating those is
/// always free and never needs a `Let`. A non-synthetic slot only grows a
/// `Let` binding if something actually `DUP`s it; a value that is used once,
/// in place, needs no name at all.
#[derive(Clone)]
struct Slot {
  term: Term,
  promoted: Option<VarId>,
  uses: u32,
  synthetic: bool,
}

impl Slot {
  fn plain(term: Term) -> Self { Slot { term, promoted: None, uses: 0, synthetic: false } }
  fn synthetic(term: Term) -> Self { Slot { term, promoted: None, uses: 0, synthetic: true } }
}

#[derive(Clone)]
enum Wrap {
  Let(VarId, u32, Term),
  Seq(Term),
}

/// The symbolic stack. `pending` accumulates bindings and sequenced effects
/// that left scope via a `DROP`/`DIPDROP` but have nowhere to attach until
/// the next value is actually pushed — every `push` flushes it, outermost
/// wrap first, onto whatever comes next.
#[derive(Clone, Default)]
struct Stack {
  slots: Vec<Slot>,
  pending: Vec<Wrap>,
}

impl Stack {
  fn new() -> Self { Stack::default() }

  fn depth_to_index(&self, depth: u32) -> Result<usize> {
    let depth = depth as usize;
    if depth >= self.slots.len() { return Err(unbound(depth as u32)); }
    Ok(self.slots.len() - 1 - depth)
  }

  fn push(&mut self, mut slot: Slot, loc: &FileSpan) -> Result<()> {
    if !self.pending.is_empty() {
      let mut term = slot.term;
      for w in std::mem::take(&mut self.pending).into_iter().rev() {
        let ty = term.ty.clone();
        term = match w {
          Wrap::Let(var, uses, e1) => TermNode::new(TermKind::Let { var, uses, e1, e2: term }, ty, loc.clone()),
          Wrap::Seq(e1) => TermNode::new(TermKind::Seq(e1, term), ty, loc.clone()),
        };
      }
      slot.term = term;
    }
    self.slots.push(slot);
    Ok(())
  }

  fn push_synthetic(&mut self, var: VarId, ty: Ty, loc: &FileSpan) -> Result<()> {
    let term = TermNode::new(TermKind::Var(var), ty, loc.clone());
    self.push(Slot::synthetic(term), loc)
  }

  fn dup(&mut self, depth: u32, vars: &mut VarIdGen, loc: &FileSpan) -> Result<()> {
    let idx = self.depth_to_index(depth)?;
    let copy = if self.slots[idx].synthetic {
      self.slots[idx].term.clone()
    } else {
      let var = match self.slots[idx].promoted {
        Some(v) => v,
        None => {
          let v = vars.fresh();
          self.slots[idx].promoted = Some(v);
          v
        }
      };
      self.slots[idx].uses += 1;
      TermNode::new(TermKind::Var(var), self.slots[idx].term.ty.clone(), loc.clone())
    };
    self.push(Slot::synthetic(copy), loc)
  }

  fn swap(&mut self) -> Result<()> {
    let len = self.slots.len();
    if len < 2 { return Err(unbound(1)); }
    self.slots.swap(len - 1, len - 2);
    Ok(())
  }

  /// Remove the slot at `idx` to use its value directly as an operand. A
  /// promoted slot leaves a `Var` behind in its place and queues the `Let`
  /// that will bind it once the next value is pushed.
  fn remove_for_use(&mut self, idx: usize, loc: &FileSpan) -> Term {
    let slot = self.slots.remove(idx);
    if slot.synthetic { return slot.term; }
    match slot.promoted {
      Some(var) => {
        let ty = slot.term.ty.clone();
        self.pending.push(Wrap::Let(var, slot.uses, slot.term));
        TermNode::new(TermKind::Var(var), ty, loc.clone())
      }
      None => slot.term,
    }
  }

  /// Remove the slot at `idx` purely for scope exit (`DROP`/`DIPDROP`), with
  /// no resulting value needed. A promoted or impure slot still needs to run
  /// — it is queued the same way `remove_for_use` queues a binding.
  fn remove_for_discard(&mut self, idx: usize) {
    let slot = self.slots.remove(idx);
    if slot.synthetic { return; }
    match slot.promoted {
      Some(var) => self.pending.push(Wrap::Let(var, slot.uses, slot.term)),
      None if slot.term.transfer => self.pending.push(Wrap::Seq(slot.term)),
      None => {}
    }
  }

  fn consume_top(&mut self, n: usize, loc: &FileSpan) -> Result<Vec<Term>> {
    if n > self.slots.len() { return Err(unbound(n.saturating_sub(1) as u32)); }
    let mut out = Vec::with_capacity(n);
    for _ in 0..n {
      let idx = self.slots.len() - 1;
      out.push(self.remove_for_use(idx, loc));
    }
    out.reverse();
    Ok(out)
  }

  fn drop_range(&mut self, depth: u32, count: u32) -> Result<()> {
    if count == 0 { return Ok(()); }
    let (depth, count) = (depth as usize, count as usize);
    if depth + count > self.slots.len() { return Err(unbound((depth + count - 1) as u32)); }
    let start = self.slots.len() - depth - count;
    for _ in 0..count {
      self.remove_for_discard(start);
    }
    Ok(())
  }

  fn finish_pending(&mut self, loc: &FileSpan) -> Result<()> {
    if self.pending.is_empty() { return Ok(()); }
    let term = self
      .slots
      .pop()
      .ok_or_else(|| internal("a dropped binding has no later value to attach its `let` to"))?
      .term;
    self.push(Slot::plain(term), loc)
  }
}

struct Ctx {
  param_ty: Ty,
  vars: VarIdGen,
  ignore_annotations: bool,
}

fn rename_top(stack: &mut Stack, name: Option<Symbol>, ignore: bool) -> Result<()> {
  let (Some(name), false) = (name, ignore) else { return Ok(()) };
  let idx = stack.slots.len().checked_sub(1).ok_or_else(|| internal("naming an empty stack top"))?;
  let old = stack.slots[idx].term.clone();
  stack.slots[idx].term = apply_name(old, Some(name), false)?;
  Ok(())
}

fn apply_name(term: Term, name: Option<Symbol>, ignore: bool) -> Result<Term> {
  if ignore { return Ok(term); }
  let Some(n) = name else { return Ok(term) };
  match term.name {
    Some(old) if old != n => Err(annotation_conflict(old, n)),
    _ => Ok(term.with_name(n)),
  }
}

fn push_result(ctx: &Ctx, stack: &mut Stack, term: Term, name: Option<Symbol>, loc: &FileSpan) -> Result<()> {
  let term = apply_name(term, name, ctx.ignore_annotations)?;
  stack.push(Slot::plain(term), loc)
}

fn one(v: Vec<Term>) -> Result<[Term; 1]> { v.try_into().map_err(|_| internal("expected exactly one operand")) }
fn two(v: Vec<Term>) -> Result<[Term; 2]> { v.try_into().map_err(|_| internal("expected exactly two operands")) }
fn three(v: Vec<Term>) -> Result<[Term; 3]> { v.try_into().map_err(|_| internal("expected exactly three operands")) }

fn option_inner(ty: &Ty) -> Result<Ty> {
  match &**ty {
    TyKind::Option(t) => Ok(t.clone()),
    _ => Err(unstructured("IF_NONE over a non-option value")),
  }
}

fn or_parts(ty: &Ty) -> Result<(Ty, Ty)> {
  match &**ty {
    TyKind::Or(a, b) => Ok((a.clone(), b.clone())),
    _ => Err(unstructured("IF_LEFT/LOOP_LEFT over a non-`or` value")),
  }
}

fn pair_parts(ty: &Ty) -> Result<(Ty, Ty)> {
  match &**ty {
    TyKind::Tuple(ts) if ts.len() == 2 => Ok((ts[0].clone(), ts[1].clone())),
    _ => Err(unstructured("CAR/CDR over a non-pair value")),
  }
}

fn list_elt(ty: &Ty) -> Result<Ty> {
  match &**ty {
    TyKind::List(t) => Ok(t.clone()),
    _ => Err(unstructured("IF_CONS over a non-list value")),
  }
}

fn iter_elt_ty(ty: &Ty) -> Result<Ty> {
  match &**ty {
    TyKind::List(t) | TyKind::Set(t) => Ok(t.clone()),
    TyKind::Map(k, v) | TyKind::BigMap(k, v) => Ok(TyKind::pair(k.clone(), v.clone())),
    _ => Err(unstructured("ITER over a non-iterable value")),
  }
}

enum CollKind {
  List,
  Map(Ty),
}

fn map_elt_ty(ty: &Ty) -> Result<(Ty, CollKind)> {
  match &**ty {
    TyKind::List(t) => Ok((t.clone(), CollKind::List)),
    TyKind::Map(k, v) => Ok((TyKind::pair(k.clone(), v.clone()), CollKind::Map(k.clone()))),
    _ => Err(unstructured("MAP over a value that is neither a list nor a map")),
  }
}

fn lambda_result_ty(ty: &Ty) -> Result<Ty> {
  match &**ty {
    TyKind::Lambda(_, b) | TyKind::Closure(_, b, _) => Ok(b.clone()),
    _ => Err(unstructured("EXEC applied to a non-callable value")),
  }
}

/// §4.1's arity table for [`PrimOp`], read off the same buckets
/// [`result_ty`] switches on — kept in lockstep with it by construction,
/// since every variant appears in exactly one of the four match arms there.
fn prim_arity(op: PrimOp) -> usize {
  use PrimOp::*;
  match op {
    Self_ | Balance | Now | Amount | Sender | Source | StepsToQuota => 0,
    Neg | Abs | IsNat | ToInt | Not | Size | Blake2b | Sha256 | Sha512 | HashKey | Pack | Address
      | SetDelegate | ImplicitAccount => 1,
    Add | Sub | Mul | EDiv | Eq | Ne | Lt | Le | Gt | Ge | Compare | And | Or | Xor | Shl | Shr
      | Concat | MemSet | GetMap => 2,
    Slice | UpdateMap | CheckSignature => 3,
  }
}

fn const_ty(c: &Const) -> Result<Ty> {
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
    Const::None(t) => Rc::new(TyKind::Option(t.clone())),
    Const::Some(inner) => Rc::new(TyKind::Option(const_ty(inner)?)),
    Const::Left(inner, other) => Rc::new(TyKind::Or(const_ty(inner)?, other.clone())),
    Const::Right(other, inner) => Rc::new(TyKind::Or(other.clone(), const_ty(inner)?)),
    Const::Tuple(cs) => tuple_const_ty(cs)?,
    Const::List(t, _) => Rc::new(TyKind::List(t.clone())),
    Const::Set(t, _) => Rc::new(TyKind::Set(t.clone())),
    Const::Map(k, v, _) => Rc::new(TyKind::Map(k.clone(), v.clone())),
    Const::EmptyBigMap(k, v) => Rc::new(TyKind::BigMap(k.clone(), v.clone())),
    Const::Record(..) | Const::Variant(..) =>
      return Err(internal("a record/variant constant reached the decompiler — these never reach emitted code")),
  })
}

fn tuple_const_ty(cs: &[Const]) -> Result<Ty> {
  match cs {
    [] | [_] => Err(internal("a tuple constant needs at least two components")),
    [a, b] => Ok(TyKind::pair(const_ty(a)?, const_ty(b)?)),
    [a, rest @ ..] => Ok(TyKind::pair(const_ty(a)?, tuple_const_ty(rest)?)),
  }
}

fn run_branch(ctx: &mut Ctx, outer: &Stack, binds: &[(VarId, Ty)], block: &Block) -> Result<Stack> {
  let loc = FileSpan::dummy();
  let mut s = outer.clone();
  for (var, ty) in binds {
    s.push_synthetic(*var, ty.clone(), &loc)?;
  }
  interp_block(ctx, &mut s, block)?;
  Ok(s)
}

fn interp_block(ctx: &mut Ctx, stack: &mut Stack, block: &[Inst]) -> Result<()> {
  for inst in block {
    interp_inst(ctx, stack, inst)?;
  }
  stack.finish_pending(&FileSpan::dummy())
}

fn push_ambient(ctx: &mut Ctx, stack: &mut Stack, op: PrimOp, loc: &FileSpan, name: Option<Symbol>) -> Result<()> {
  let ty = result_ty(op, &[], loc)?;
  push_result(ctx, stack, TermNode::new(TermKind::Apply(op, Box::new([])), ty, loc.clone()), name, loc)
}

fn push_unary_prim(ctx: &mut Ctx, stack: &mut Stack, op: PrimOp, loc: &FileSpan, name: Option<Symbol>) -> Result<()> {
  let [v] = one(stack.consume_top(1, loc)?)?;
  let ty = result_ty(op, std::slice::from_ref(&v), loc)?;
  push_result(ctx, stack, TermNode::new(TermKind::Apply(op, Box::new([v])), ty, loc.clone()), name, loc)
}

fn interp_if(ctx: &mut Ctx, stack: &mut Stack, th: &Block, el: &Block, name: Option<Symbol>, loc: &FileSpan) -> Result<()> {
  let [cond] = one(stack.consume_top(1, loc)?)?;
  let mut then_stack = run_branch(ctx, stack, &[], th)?;
  let mut else_stack = run_branch(ctx, stack, &[], el)?;
  let expect = stack.slots.len() + 1;
  if then_stack.slots.len() != expect || else_stack.slots.len() != expect {
    return Err(unstructured("IF branches left different stack shapes"));
  }
  let then_term = then_stack.slots.pop().unwrap().term;
  let else_term = else_stack.slots.pop().unwrap().term;
  let ty = then_term.ty.clone();
  push_result(ctx, stack, TermNode::new(TermKind::If(cond, then_term, else_term), ty, loc.clone()), name, loc)
}

fn interp_if_none(
  ctx: &mut Ctx,
  stack: &mut Stack,
  none_b: &Block,
  some_b: &Block,
  name: Option<Symbol>,
  loc: &FileSpan,
) -> Result<()> {
  let [scrutinee] = one(stack.consume_top(1, loc)?)?;
  let inner_ty = option_inner(&scrutinee.ty)?;
  let some_bind = ctx.vars.fresh();
  let mut none_stack = run_branch(ctx, stack, &[], none_b)?;
  let mut some_stack = run_branch(ctx, stack, &[(some_bind, inner_ty)], some_b)?;
  let expect = stack.slots.len() + 1;
  if none_stack.slots.len() != expect || some_stack.slots.len() != expect {
    return Err(unstructured("IF_NONE branches left different stack shapes"));
  }
  let none_term = none_stack.slots.pop().unwrap().term;
  let some_term = some_stack.slots.pop().unwrap().term;
  let ty = none_term.ty.clone();
  let term =
    TermNode::new(TermKind::MatchOption { scrutinee, none_case: none_term, some_bind, some_case: some_term }, ty, loc.clone());
  push_result(ctx, stack, term, name, loc)
}

fn interp_if_left(
  ctx: &mut Ctx,
  stack: &mut Stack,
  left_b: &Block,
  right_b: &Block,
  name: Option<Symbol>,
  loc: &FileSpan,
) -> Result<()> {
  let [scrutinee] = one(stack.consume_top(1, loc)?)?;
  let (left_ty, right_ty) = or_parts(&scrutinee.ty)?;
  let left_bind = ctx.vars.fresh();
  let right_bind = ctx.vars.fresh();
  let mut left_stack = run_branch(ctx, stack, &[(left_bind, left_ty)], left_b)?;
  let mut right_stack = run_branch(ctx, stack, &[(right_bind, right_ty)], right_b)?;
  let expect = stack.slots.len() + 1;
  if left_stack.slots.len() != expect || right_stack.slots.len() != expect {
    return Err(unstructured("IF_LEFT branches left different stack shapes"));
  }
  let left_term = left_stack.slots.pop().unwrap().term;
  let right_term = right_stack.slots.pop().unwrap().term;
  let ty = left_term.ty.clone();
  let term =
    TermNode::new(TermKind::MatchOr { scrutinee, left_bind, left_case: left_term, right_bind, right_case: right_term }, ty, loc.clone());
  push_result(ctx, stack, term, name, loc)
}

fn interp_if_cons(
  ctx: &mut Ctx,
  stack: &mut Stack,
  nil_b: &Block,
  cons_b: &Block,
  name: Option<Symbol>,
  loc: &FileSpan,
) -> Result<()> {
  let [scrutinee] = one(stack.consume_top(1, loc)?)?;
  let elt_ty = list_elt(&scrutinee.ty)?;
  let tail_bind = ctx.vars.fresh();
  let head_bind = ctx.vars.fresh();
  let mut nil_stack = run_branch(ctx, stack, &[], nil_b)?;
  let mut cons_stack = run_branch(ctx, stack, &[(tail_bind, scrutinee.ty.clone()), (head_bind, elt_ty)], cons_b)?;
  let expect = stack.slots.len() + 1;
  if nil_stack.slots.len() != expect || cons_stack.slots.len() != expect {
    return Err(unstructured("IF_CONS branches left different stack shapes"));
  }
  let nil_term = nil_stack.slots.pop().unwrap().term;
  let cons_term = cons_stack.slots.pop().unwrap().term;
  let ty = nil_term.ty.clone();
  let term =
    TermNode::new(TermKind::MatchList { scrutinee, nil_case: nil_term, head_bind, tail_bind, cons_case: cons_term }, ty, loc.clone());
  push_result(ctx, stack, term, name, loc)
}

fn interp_loop(ctx: &mut Ctx, stack: &mut Stack, body: &Block, name: Option<Symbol>, loc: &FileSpan) -> Result<()> {
  let [priming, init] = two(stack.consume_top(2, loc)?)?;
  if !matches!(&priming.desc, TermKind::Const(Const::Bool(true))) {
    return Err(unstructured("LOOP without a literal `True` priming value is not supported"));
  }
  let acc_bind = ctx.vars.fresh();
  let mut body_stack = run_branch(ctx, stack, &[(acc_bind, init.ty.clone())], body)?;
  let expect = stack.slots.len() + 2;
  if body_stack.slots.len() != expect {
    return Err(unstructured("LOOP body left an unexpected stack shape"));
  }
  let cont_bool = body_stack.slots.pop().unwrap().term;
  let new_acc = body_stack.slots.pop().unwrap().term;
  let body_ty = TyKind::pair(cont_bool.ty.clone(), new_acc.ty.clone());
  let body_term = TermNode::new(TermKind::Pair(cont_bool, new_acc), body_ty, loc.clone());
  let ty = init.ty.clone();
  push_result(ctx, stack, TermNode::new(TermKind::Loop { init, acc_bind, body: body_term }, ty, loc.clone()), name, loc)
}

fn interp_loop_left(ctx: &mut Ctx, stack: &mut Stack, body: &Block, name: Option<Symbol>, loc: &FileSpan) -> Result<()> {
  let [or_init] = one(stack.consume_top(1, loc)?)?;
  let init = match &or_init.desc {
    TermKind::Inject { left: true, value, .. } => value.clone(),
    _ => return Err(unstructured("LOOP_LEFT without a literal LEFT-wrapped init value is not supported")),
  };
  let (acc_ty, result_ty_) = or_parts(&or_init.ty)?;
  let acc_bind = ctx.vars.fresh();
  let mut body_stack = run_branch(ctx, stack, &[(acc_bind, acc_ty)], body)?;
  let expect = stack.slots.len() + 1;
  if body_stack.slots.len() != expect {
    return Err(unstructured("LOOP_LEFT body left an unexpected stack shape"));
  }
  let body_term = body_stack.slots.pop().unwrap().term;
  push_result(ctx, stack, TermNode::new(TermKind::LoopLeft { init, acc_bind, body: body_term }, result_ty_, loc.clone()), name, loc)
}

fn interp_fold(ctx: &mut Ctx, stack: &mut Stack, body: &Block, name: Option<Symbol>, loc: &FileSpan) -> Result<()> {
  let [collection, init] = two(stack.consume_top(2, loc)?)?;
  let elt_ty = iter_elt_ty(&collection.ty)?;
  let acc_bind = ctx.vars.fresh();
  let elt_bind = ctx.vars.fresh();
  let mut body_stack = run_branch(ctx, stack, &[(acc_bind, init.ty.clone()), (elt_bind, elt_ty)], body)?;
  let expect = stack.slots.len() + 1;
  if body_stack.slots.len() != expect {
    return Err(unstructured("ITER body left an unexpected stack shape"));
  }
  let new_acc = body_stack.slots.pop().unwrap().term;
  let ty = init.ty.clone();
  push_result(ctx, stack, TermNode::new(TermKind::Fold { collection, init, elt_bind, acc_bind, body: new_acc }, ty, loc.clone()), name, loc)
}

fn interp_map(ctx: &mut Ctx, stack: &mut Stack, body: &Block, name: Option<Symbol>, loc: &FileSpan) -> Result<()> {
  let [collection] = one(stack.consume_top(1, loc)?)?;
  let (elt_ty, kind) = map_elt_ty(&collection.ty)?;
  let elt_bind = ctx.vars.fresh();
  let isolated = Stack::new();
  let mut body_stack = run_branch(ctx, &isolated, &[(elt_bind, elt_ty)], body)?;
  if body_stack.slots.len() != 1 {
    return Err(unstructured("MAP body left an unexpected stack shape"));
  }
  let body_term = body_stack.slots.pop().unwrap().term;
  let result_ty_: Ty = match kind {
    CollKind::List => Rc::new(TyKind::List(body_term.ty.clone())),
    CollKind::Map(k) => Rc::new(TyKind::Map(k, body_term.ty.clone())),
  };
  push_result(ctx, stack, TermNode::new(TermKind::Map { collection, elt_bind, body: body_term }, result_ty_, loc.clone()), name, loc)
}

fn interp_lambda(ctx: &mut Ctx, stack: &mut Stack, a: &Ty, b: &Ty, body: &Block, name: Option<Symbol>, loc: &FileSpan) -> Result<()> {
  let param = ctx.vars.fresh();
  let isolated = Stack::new();
  let mut body_stack = run_branch(ctx, &isolated, &[(param, a.clone())], body)?;
  if body_stack.slots.len() != 1 {
    return Err(unstructured("Lambda body left an unexpected stack shape"));
  }
  let body_term = body_stack.slots.pop().unwrap().term;
  let ty = Rc::new(TyKind::Lambda(a.clone(), b.clone()));
  push_result(ctx, stack, TermNode::new(TermKind::Lambda { params: Box::new([param]), body: body_term }, ty, loc.clone()), name, loc)
}

fn interp_inst(ctx: &mut Ctx, stack: &mut Stack, inst: &Inst) -> Result<()> {
  let loc = FileSpan::dummy();
  match &inst.form {
    InstForm::Dup(n) => {
      stack.dup(*n, &mut ctx.vars, &loc)?;
      rename_top(stack, inst.name, ctx.ignore_annotations)?;
    }
    InstForm::Swap => {
      stack.swap()?;
      rename_top(stack, inst.name, ctx.ignore_annotations)?;
    }
    InstForm::Dip(n, b) => {
      let n = *n as usize;
      if n > stack.slots.len() { return Err(unbound(n.saturating_sub(1) as u32)); }
      let split = stack.slots.len() - n;
      let top: Vec<Slot> = stack.slots.drain(split..).collect();
      interp_block(ctx, stack, b)?;
      stack.slots.extend(top);
    }
    InstForm::DipDrop(n, k) => stack.drop_range(*n, *k)?,
    InstForm::Drop(n) => stack.drop_range(0, *n)?,
    InstForm::Pair => {
      let [a, b] = two(stack.consume_top(2, &loc)?)?;
      let ty = TyKind::pair(a.ty.clone(), b.ty.clone());
      push_result(ctx, stack, TermNode::new(TermKind::Pair(a, b), ty, loc.clone()), inst.name, &loc)?;
    }
    InstForm::Access(chain, _label) => {
      let [base] = one(stack.consume_top(1, &loc)?)?;
      let mut term = base;
      for step in chain.iter() {
        let (a, b) = pair_parts(&term.ty)?;
        let (key, ty) = match step {
          Cadr::Car => (ProjKey::Car, a),
          Cadr::Cdr => (ProjKey::Cdr, b),
        };
        term = TermNode::new(TermKind::Project(term, key), ty, loc.clone());
      }
      push_result(ctx, stack, term, inst.name, &loc)?;
    }
    InstForm::Record(_) => return Err(internal("RECORD has no decoded occurrence — the emitter never produces it")),
    InstForm::Left(other_ty, _label) => {
      let [v] = one(stack.consume_top(1, &loc)?)?;
      let ty = Rc::new(TyKind::Or(v.ty.clone(), other_ty.clone()));
      let term = TermNode::new(TermKind::Inject { left: true, other_ty: other_ty.clone(), value: v }, ty, loc.clone());
      push_result(ctx, stack, term, inst.name, &loc)?;
    }
    InstForm::Right(other_ty, _label) => {
      let [v] = one(stack.consume_top(1, &loc)?)?;
      let ty = Rc::new(TyKind::Or(other_ty.clone(), v.ty.clone()));
      let term = TermNode::new(TermKind::Inject { left: false, other_ty: other_ty.clone(), value: v }, ty, loc.clone());
      push_result(ctx, stack, term, inst.name, &loc)?;
    }
    InstForm::Some_ => {
      let [v] = one(stack.consume_top(1, &loc)?)?;
      let inner = match &v.desc {
        TermKind::Const(c) => c.clone(),
        _ => return Err(internal("SOME over a non-literal value has no decompiled representation")),
      };
      let ty = Rc::new(TyKind::Option(v.ty.clone()));
      let term = TermNode::new(TermKind::Const(Const::Some(Box::new(inner))), ty, loc.clone());
      push_result(ctx, stack, term, inst.name, &loc)?;
    }
    InstForm::None_(ty) => {
      let term = TermNode::new(TermKind::Const(Const::None(ty.clone())), Rc::new(TyKind::Option(ty.clone())), loc.clone());
      push_result(ctx, stack, term, inst.name, &loc)?;
    }
    InstForm::Nil(ty) => {
      let term = TermNode::new(TermKind::Const(Const::List(ty.clone(), Box::new([]))), Rc::new(TyKind::List(ty.clone())), loc.clone());
      push_result(ctx, stack, term, inst.name, &loc)?;
    }
    InstForm::Cons => {
      let [tail, head] = two(stack.consume_top(2, &loc)?)?;
      let head_const = match &head.desc {
        TermKind::Const(c) => c.clone(),
        _ => return Err(internal("CONS over a non-literal list has no decompiled representation")),
      };
      let (elt_ty, tail_elts) = match &tail.desc {
        TermKind::Const(Const::List(t, elts)) => (t.clone(), elts.clone()),
        _ => return Err(internal("CONS over a non-literal list has no decompiled representation")),
      };
      let mut new_elts = Vec::with_capacity(tail_elts.len() + 1);
      new_elts.push(head_const);
      new_elts.extend(tail_elts.iter().cloned());
      let term = TermNode::new(TermKind::Const(Const::List(elt_ty, new_elts.into())), tail.ty.clone(), loc.clone());
      push_result(ctx, stack, term, inst.name, &loc)?;
    }
    InstForm::EmptySet(ty) => {
      let term = TermNode::new(TermKind::Const(Const::Set(ty.clone(), Box::new([]))), Rc::new(TyKind::Set(ty.clone())), loc.clone());
      push_result(ctx, stack, term, inst.name, &loc)?;
    }
    InstForm::EmptyMap(k, v) => {
      let term =
        TermNode::new(TermKind::Const(Const::Map(k.clone(), v.clone(), Box::new([]))), Rc::new(TyKind::Map(k.clone(), v.clone())), loc.clone());
      push_result(ctx, stack, term, inst.name, &loc)?;
    }
    InstForm::EmptyBigMap(k, v) => {
      let term =
        TermNode::new(TermKind::Const(Const::EmptyBigMap(k.clone(), v.clone())), Rc::new(TyKind::BigMap(k.clone(), v.clone())), loc.clone());
      push_result(ctx, stack, term, inst.name, &loc)?;
    }
    InstForm::Push(c) => {
      let ty = const_ty(c)?;
      let term = TermNode::new(TermKind::Const(c.clone()), ty, loc.clone());
      push_result(ctx, stack, term, inst.name, &loc)?;
    }
    InstForm::If(th, el) => interp_if(ctx, stack, th, el, inst.name, &loc)?,
    InstForm::IfNone(none_b, some_b) => interp_if_none(ctx, stack, none_b, some_b, inst.name, &loc)?,
    InstForm::IfLeft(left_b, right_b) => interp_if_left(ctx, stack, left_b, right_b, inst.name, &loc)?,
    InstForm::IfCons(nil_b, cons_b) => interp_if_cons(ctx, stack, nil_b, cons_b, inst.name, &loc)?,
    InstForm::Loop(body) => interp_loop(ctx, stack, body, inst.name, &loc)?,
    InstForm::LoopLeft(body) => interp_loop_left(ctx, stack, body, inst.name, &loc)?,
    InstForm::Iter(body) => interp_fold(ctx, stack, body, inst.name, &loc)?,
    InstForm::Map(body) => interp_map(ctx, stack, body, inst.name, &loc)?,
    InstForm::Lambda(a, b, body) => interp_lambda(ctx, stack, a, b, body, inst.name, &loc)?,
    InstForm::Exec => {
      let [arg, f] = two(stack.consume_top(2, &loc)?)?;
      let result = lambda_result_ty(&f.ty)?;
      push_result(ctx, stack, TermNode::new(TermKind::Exec(f, arg), result, loc.clone()), inst.name, &loc)?;
    }
    InstForm::Rename(sym) => {
      if !ctx.ignore_annotations {
        let idx = stack.slots.len().checked_sub(1).ok_or_else(|| internal("RENAME with an empty stack"))?;
        let old = stack.slots[idx].term.clone();
        stack.slots[idx].term = apply_name(old, Some(*sym), false)?;
      }
    }
    InstForm::Failwith => {
      let [e] = one(stack.consume_top(1, &loc)?)?;
      push_result(ctx, stack, TermNode::new(TermKind::Failwith(e), TyKind::unit(), loc.clone()), inst.name, &loc)?;
    }
    InstForm::Prim(op) => {
      let args = stack.consume_top(prim_arity(*op), &loc)?;
      let ty = result_ty(*op, &args, &loc)?;
      push_result(ctx, stack, TermNode::new(TermKind::Apply(*op, args.into()), ty, loc.clone()), inst.name, &loc)?;
    }
    InstForm::TransferTokens => {
      let [arg, amount, dest] = three(stack.consume_top(3, &loc)?)?;
      push_result(ctx, stack, TermNode::new(TermKind::Transfer { dest, amount, arg }, TyKind::operation(), loc.clone()), inst.name, &loc)?;
    }
    InstForm::Self_ => {
      let ty = Rc::new(TyKind::Contract(ctx.param_ty.clone()));
      push_result(ctx, stack, TermNode::new(TermKind::Apply(PrimOp::Self_, Box::new([])), ty, loc.clone()), inst.name, &loc)?;
    }
    InstForm::Balance => push_ambient(ctx, stack, PrimOp::Balance, &loc, inst.name)?,
    InstForm::Now => push_ambient(ctx, stack, PrimOp::Now, &loc, inst.name)?,
    InstForm::Amount => push_ambient(ctx, stack, PrimOp::Amount, &loc, inst.name)?,
    InstForm::Sender => push_ambient(ctx, stack, PrimOp::Sender, &loc, inst.name)?,
    InstForm::Source => push_ambient(ctx, stack, PrimOp::Source, &loc, inst.name)?,
    InstForm::StepsToQuota => push_ambient(ctx, stack, PrimOp::StepsToQuota, &loc, inst.name)?,
    InstForm::AddressOf => push_unary_prim(ctx, stack, PrimOp::Address, &loc, inst.name)?,
    InstForm::Contract(ty) => {
      let [v] = one(stack.consume_top(1, &loc)?)?;
      push_result(ctx, stack, TermNode::new(TermKind::ContractAt(v, ty.clone()), Rc::new(TyKind::Contract(ty.clone())), loc.clone()), inst.name, &loc)?;
    }
    InstForm::SetDelegate => push_unary_prim(ctx, stack, PrimOp::SetDelegate, &loc, inst.name)?,
    InstForm::ImplicitAccount => push_unary_prim(ctx, stack, PrimOp::ImplicitAccount, &loc, inst.name)?,
    InstForm::CreateAccount => return Err(internal("CREATE_ACCOUNT has no decoded occurrence — the emitter never produces it")),
    InstForm::CreateContract => {
      let [v] = one(stack.consume_top(1, &loc)?)?;
      push_result(ctx, stack, TermNode::new(TermKind::CreateContract(v), TyKind::operation(), loc.clone()), inst.name, &loc)?;
    }
    InstForm::Pack => push_unary_prim(ctx, stack, PrimOp::Pack, &loc, inst.name)?,
    InstForm::Unpack(ty) => {
      let [v] = one(stack.consume_top(1, &loc)?)?;
      push_result(ctx, stack, TermNode::new(TermKind::Unpack(v, ty.clone()), Rc::new(TyKind::Option(ty.clone())), loc.clone()), inst.name, &loc)?;
    }
  }
  Ok(())
}

/// Recognize the literal `DUP; CAR; SWAP; CDR` shape [`crate::emit::decode_block`]
/// expands `UNPAIR` into, and split it off so the entry point can seed the
/// stack with two named variables instead of one opaque pair.
fn strip_unpair_prelude(block: &Block) -> Option<&[Inst]> {
  let [a, b, c, d, rest @ ..] = block.as_slice() else { return None };
  let is_car = matches!(&b.form, InstForm::Access(chain, None) if chain.len() == 1 && chain[0] == Cadr::Car);
  let is_cdr = matches!(&d.form, InstForm::Access(chain, None) if chain.len() == 1 && chain[0] == Cadr::Cdr);
  if matches!(a.form, InstForm::Dup(0)) && is_car && matches!(c.form, InstForm::Swap) && is_cdr {
    Some(rest)
  } else {
    None
  }
}

fn decompile_with(program: &Program, ignore_annotations: bool) -> Result<Term> {
  let loc = FileSpan::dummy();
  let param_ty = decode_ty(&program.parameter)?;
  let storage_ty = decode_ty(&program.storage)?;
  let block = decode_block(&program.code)?;
  let mut ctx = Ctx { param_ty: param_ty.clone(), vars: VarIdGen::default(), ignore_annotations };
  let mut stack = Stack::new();
  match strip_unpair_prelude(&block) {
    Some(rest) => {
      let param_var = ctx.vars.fresh();
      let storage_var = ctx.vars.fresh();
      stack.push_synthetic(param_var, param_ty, &loc)?;
      stack.push_synthetic(storage_var, storage_ty, &loc)?;
      interp_block(&mut ctx, &mut stack, rest)?;
    }
    None => {
      let v0 = ctx.vars.fresh();
      stack.push_synthetic(v0, TyKind::pair(param_ty, storage_ty), &loc)?;
      interp_block(&mut ctx, &mut stack, &block)?;
    }
  }
  if stack.slots.len() != 1 {
    return Err(unstructured(format!("the program left {} values on the stack instead of one", stack.slots.len())));
  }
  Ok(stack.slots.pop().unwrap().term)
}

/// Symbolically interpret `program` and recover the [`Term`] it was compiled
/// from. Per §5's recovery rule, a conflicting `@name`/`RENAME` annotation is
/// not fatal: the whole pass retries once with every annotation ignored.
pub fn decompile(program: &Program) -> Result<Term> {
  match decompile_with(program, false) {
    Err(CompileError::Decompilation(DecompileError { kind: DecompileErrorKind::AnnotationConflict(old, new), .. })) => {
      tracing::debug!(old = %old.as_str(), new = %new.as_str(), "retrying decompilation with annotations ignored");
      decompile_with(program, true)
    }
    other => other,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::types::concrete::Node;

  fn program(parameter: Node, storage: Node, code: Vec<Node>) -> Program {
    Program { parameter, storage, code: Node::Seq(code) }
  }

  #[test]
  fn unpair_prelude_seeds_two_free_variables() {
    let p = program(
      Node::prim("int"),
      Node::prim("int"),
      vec![Node::prim("DUP"), Node::prim("CAR"), Node::prim("SWAP"), Node::prim("CDR"), Node::prim("ADD")],
    );
    let term = decompile(&p).unwrap();
    match &term.desc {
      TermKind::Apply(PrimOp::Add, args) => {
        assert_eq!(args.len(), 2);
        assert!(matches!(&args[0].desc, TermKind::Var(_)));
        assert!(matches!(&args[1].desc, TermKind::Var(_)));
      }
      other => panic!("expected an ADD application, got {other:?}"),
    }
    assert!(matches!(&*term.ty, TyKind::Ground(Ground::Int)));
  }

  #[test]
  fn generic_fallback_handles_a_program_without_the_unpair_shape() {
    let p = program(
      Node::prim("unit"),
      Node::prim("int"),
      vec![Node::prim("DROP"), Node::prim_args("PUSH", vec![Node::prim("int"), Node::int("5")])],
    );
    let term = decompile(&p).unwrap();
    assert!(matches!(&term.desc, TermKind::Const(Const::Int(n)) if *n == 5.into()));
  }

  #[test]
  fn dup_promotes_a_multiply_used_computed_value_to_a_let() {
    let p = program(
      Node::prim("unit"),
      Node::prim("int"),
      vec![
        Node::prim("DROP"),
        Node::prim_args("PUSH", vec![Node::prim("int"), Node::int("5")]),
        Node::prim("DUP"),
        Node::prim("ADD"),
      ],
    );
    let term = decompile(&p).unwrap();
    match &term.desc {
      TermKind::Let { uses, e2, .. } => {
        assert_eq!(*uses, 1);
        assert!(matches!(&e2.desc, TermKind::Apply(PrimOp::Add, _)));
      }
      other => panic!("expected a `let`-bound duplicate, got {other:?}"),
    }
  }

  #[test]
  fn cons_over_a_non_literal_list_is_a_clean_error_not_a_wrong_answer() {
    let p = program(
      Node::prim("unit"),
      Node::prim_args("list", vec![Node::prim("int")]),
      vec![
        Node::prim("DUP"),
        Node::prim("CAR"),
        Node::prim("SWAP"),
        Node::prim("CDR"),
        Node::prim_args("NIL", vec![Node::prim("int")]),
        Node::prim("CONS"),
      ],
    );
    assert!(decompile(&p).is_err());
  }
}
