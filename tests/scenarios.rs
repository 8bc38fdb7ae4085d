//! End-to-end scenarios built by hand-constructing [`UContract`] ASTs, since
//! the surface parser is an out-of-scope collaborator (§6). Each test drives
//! the whole pipeline through the public API and checks the compiled
//! [`InstForm`] shape directly rather than the rendered text, since the
//! textual printer itself is out of scope.

use lmcc::config::Config;
use lmcc::loc::{FileSpan, Spanned};
use lmcc::symbol::intern;
use lmcc::types::ast::{UContract, UEntry, UExpr, UExprKind, UPattern, UTy};
use lmcc::types::concrete::{Node, Program};
use lmcc::types::instr::InstForm;
use lmcc::types::konst::Const;
use lmcc::types::term::{Term, TermKind, VarId};
use lmcc::types::ty::{Ground, TyKind};

fn sp(k: UExprKind) -> UExpr { Spanned::new(FileSpan::dummy(), k) }

fn var(name: &str) -> UExpr { sp(UExprKind::Var(intern(name))) }

fn nil_operations() -> UExpr {
  sp(UExprKind::Const(Const::List(TyKind::operation(), Box::new([]))))
}

fn apply(op: &str, args: Vec<UExpr>) -> UExpr { sp(UExprKind::Apply(intern(op), args)) }

fn contract(storage_ty: UTy, entry: UEntry) -> UContract {
  UContract { name: intern("c"), type_decls: vec![], storage_ty, init: None, globals: vec![], entries: vec![entry] }
}

fn entry(param_name: &str, param_ty: UTy, storage_name: &str, body: UExpr) -> UEntry {
  UEntry { name: intern("main"), param_name: intern(param_name), param_ty, storage_name: intern(storage_name), body, loc: FileSpan::dummy() }
}

// 1. `let%entry main (p:int) (s:int) = ([]:operation list), s + p` under
// storage=int emits an UNPAIR prelude, an ADD, a NIL and a final PAIR
// (modulo peephole — the exact surrounding cleanup instructions are not
// asserted, only that these four operations are all present and that the
// entry prelude is the standard UNPAIR shape).
#[test]
fn entry_returning_sum_compiles_unpair_add_nil_pair() {
  let body = sp(UExprKind::Tuple(vec![nil_operations(), apply("+", vec![var("s"), var("p")])]));
  let ast = contract(UTy::Ground("int"), entry("p", UTy::Ground("int"), "s", body));
  let (compiled, _env) = lmcc::compile_contract(&ast, &Config::default()).unwrap();

  assert!(matches!(&*compiled.parameter, TyKind::Ground(Ground::Int)));
  assert!(matches!(&*compiled.storage, TyKind::Ground(Ground::Int)));

  assert!(
    matches!(
      compiled.code.as_slice(),
      [a, b, c, d, ..] if matches!(a.form, InstForm::Dup(0))
        && matches!(&b.form, InstForm::Access(chain, None) if **chain == [lmcc::types::instr::Cadr::Car])
        && matches!(c.form, InstForm::Swap)
        && matches!(&d.form, InstForm::Access(chain, None) if **chain == [lmcc::types::instr::Cadr::Cdr])
    ),
    "expected an UNPAIR-shaped entry prelude, got {:?}", compiled.code
  );
  assert_eq!(
    compiled.code.iter().filter(|i| matches!(i.form, InstForm::Prim(lmcc::prim::PrimOp::Add))).count(), 1,
  );
  assert_eq!(compiled.code.iter().filter(|i| matches!(i.form, InstForm::Nil(_))).count(), 1);
  assert_eq!(compiled.code.iter().filter(|i| matches!(i.form, InstForm::Pair)).count(), 1);
}

// 2. The identity contract `([]:operation list), s` over storage `string`
// round-trips: compiling, emitting, decompiling and recompiling reaches the
// same code (modulo peephole) as the first compile.
#[test]
fn identity_contract_round_trips_through_decompilation() {
  let body = sp(UExprKind::Tuple(vec![nil_operations(), var("s")]));
  let ast = contract(UTy::Ground("string"), entry("p", UTy::Ground("unit"), "s", body));
  let config = Config::default();
  let (compiled1, env) = lmcc::compile_contract(&ast, &config).unwrap();

  let program = lmcc::emit_program(&compiled1, &env).unwrap();
  let decompiled = lmcc::decompile_program(&program).unwrap();

  // the identity contract never references its parameter, so the only free
  // variable left in the decompiled term is the storage binding.
  let mut found = Vec::new();
  collect_vars(&decompiled, &mut found);
  assert_eq!(found.len(), 1, "expected exactly one free variable, got {found:?}");
  let storage_var = found[0];
  let param_var = VarId(storage_var.0 + 1000); // unused by this body; any distinct id works

  let encoded = lmcc::encode::EncodedContract {
    name: intern("c"),
    storage: TyKind::string(),
    globals: vec![],
    param_ty: TyKind::unit(),
    param_var,
    storage_var,
    body: decompiled,
    init: None,
  };
  let mut compiled2 = lmcc::codegen::compile(&encoded).unwrap();
  if config.peephole {
    compiled2.code = lmcc::peephole::finalize_block(lmcc::peephole::optimize_block(compiled2.code));
  }
  assert_eq!(compiled1.code, compiled2.code);
}

fn collect_vars(t: &Term, out: &mut Vec<VarId>) {
  match &t.desc {
    TermKind::Var(v) => if !out.contains(v) { out.push(*v) },
    TermKind::Pair(a, b) | TermKind::Seq(a, b) | TermKind::Exec(a, b) => { collect_vars(a, out); collect_vars(b, out); }
    TermKind::Tuple(elems) => for e in elems.iter() { collect_vars(e, out); },
    TermKind::Apply(_, args) | TermKind::Call(_, args) => for a in args.iter() { collect_vars(a, out); },
    TermKind::Let { e1, e2, .. } => { collect_vars(e1, out); collect_vars(e2, out); }
    TermKind::If(a, b, c) => { collect_vars(a, out); collect_vars(b, out); collect_vars(c, out); }
    TermKind::Project(inner, _) => collect_vars(inner, out),
    _ => {}
  }
}

// 3. `failwith "x"; <anything>` must produce code whose block contains
// exactly one FAILWITH, with nothing after it — not even the entry-level
// stack cleanup every other entry gets.
#[test]
fn failwith_truncates_the_tail_of_its_block() {
  let body = sp(UExprKind::Seq(
    Box::new(sp(UExprKind::Failwith(Box::new(sp(UExprKind::Const(Const::String("x".into()))))))),
    Box::new(sp(UExprKind::Tuple(vec![nil_operations(), sp(UExprKind::Const(Const::Unit))]))),
  ));
  let ast = contract(UTy::Ground("unit"), entry("p", UTy::Ground("unit"), "s", body));
  let (compiled, _env) = lmcc::compile_contract(&ast, &Config::default()).unwrap();

  assert_eq!(compiled.code.iter().filter(|i| matches!(i.form, InstForm::Failwith)).count(), 1);
  assert!(matches!(compiled.code.last().unwrap().form, InstForm::Failwith), "got {:?}", compiled.code);
}

// 4. Projecting the second component of a two-element tuple must emit a
// single CDR, not a full pair rebuild. The tuple lives on the parameter
// rather than storage so the entry's declared result type stays satisfiable
// (an entry's returned storage component must have exactly the declared
// storage type, which rules out literally returning a stored tuple's lone
// projected field as the new storage).
#[test]
fn tuple_projection_compiles_to_a_single_cdr() {
  let body = sp(UExprKind::Let(
    UPattern::Tuple(vec![UPattern::Wild, UPattern::Var(intern("snd"))]),
    Box::new(var("p")),
    Box::new(sp(UExprKind::Tuple(vec![nil_operations(), var("snd")]))),
  ));
  let param_ty = UTy::Tuple(vec![UTy::Ground("int"), UTy::Ground("string")]);
  let ast = contract(UTy::Ground("string"), entry("p", param_ty, "s", body));
  let (compiled, _env) = lmcc::compile_contract(&ast, &Config::default()).unwrap();

  let cdr_only = |chain: &[lmcc::types::instr::Cadr]| chain == [lmcc::types::instr::Cadr::Cdr];
  assert_eq!(
    compiled.code.iter().filter(|i| matches!(&i.form, InstForm::Access(c, _) if cdr_only(c))).count(), 1,
    "got {:?}", compiled.code
  );
  // only the unavoidable (operations, storage) pair at the very end
  assert_eq!(compiled.code.iter().filter(|i| matches!(i.form, InstForm::Pair)).count(), 1);
}

// 5. `match l with [] -> 0 | x :: xs -> x + List.size xs` typechecks against
// `parameter int list; storage int` and compiles to an IF_CONS over ADD/SIZE.
// An independent M typechecker is an out-of-scope collaborator; checking the
// declared types and the generated control/arithmetic shape is the in-crate
// equivalent.
#[test]
fn list_match_typechecks_and_compiles_to_if_cons() {
  let matched = sp(UExprKind::MatchList(
    Box::new(var("l")),
    Box::new(sp(UExprKind::Const(Const::Int(0.into())))),
    UPattern::Var(intern("x")),
    UPattern::Var(intern("xs")),
    Box::new(apply("+", vec![var("x"), apply("size", vec![var("xs")])])),
  ));
  let body = sp(UExprKind::Tuple(vec![nil_operations(), matched]));
  let param_ty = UTy::List(Box::new(UTy::Ground("int")));
  let ast = contract(UTy::Ground("int"), entry("l", param_ty, "s", body));
  let (compiled, _env) = lmcc::compile_contract(&ast, &Config::default()).unwrap();

  assert!(matches!(&*compiled.parameter, TyKind::List(t) if matches!(&**t, TyKind::Ground(Ground::Int))));
  assert!(matches!(&*compiled.storage, TyKind::Ground(Ground::Int)));
  assert!(compiled.code.iter().any(|i| matches!(i.form, InstForm::IfCons(..))), "got {:?}", compiled.code);
  assert!(compiled.code.iter().any(|i| matches!(i.form, InstForm::Prim(lmcc::prim::PrimOp::Add))));
  assert!(compiled.code.iter().any(|i| matches!(i.form, InstForm::Prim(lmcc::prim::PrimOp::Size))));
}

// 6. Decompiling a fixed sample program yields a typed term that can be
// re-encoded and recompiled without error. The concrete upstream fixture
// referenced by name is not part of this corpus, so a representative
// hand-built sample stands in, built the same way the decompiler's own unit
// tests build one (`Node::prim`/`Node::Seq`) rather than from a parsed
// textual listing.
#[test]
fn decompiled_sample_recompiles_cleanly() {
  let program = Program {
    parameter: Node::prim("int"),
    storage: Node::prim("int"),
    code: Node::Seq(vec![
      Node::prim("DUP"), Node::prim("CAR"), Node::prim("SWAP"), Node::prim("CDR"), Node::prim("ADD"),
    ]),
  };
  let decompiled = lmcc::decompile_program(&program).unwrap();

  let mut found = Vec::new();
  collect_vars(&decompiled, &mut found);
  assert_eq!(found.len(), 2, "expected param and storage as free variables, got {found:?}");
  let (param_var, storage_var) = (found[0], found[1]);

  let encoded = lmcc::encode::EncodedContract {
    name: intern("c"),
    storage: TyKind::int(),
    globals: vec![],
    param_ty: TyKind::int(),
    param_var,
    storage_var,
    body: decompiled,
    init: None,
  };
  let compiled = lmcc::codegen::compile(&encoded).unwrap();
  assert!(compiled.code.iter().any(|i| matches!(i.form, InstForm::Prim(lmcc::prim::PrimOp::Add))));
}
