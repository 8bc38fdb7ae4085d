//! Bidirectional typechecking (§4.1): turns an untyped [`UContract`] into a
//! typed [`Contract`]. `mod.rs` handles contract-level orchestration —
//! declaration processing, storage/entry dispatch, the initializer — while
//! the per-expression recursion lives in [`expr`].

pub mod expr;
pub mod primop;
pub mod usecount;

use crate::env::{EffectCtx, Env, RecordDef, VariantDef};
use crate::error::{CompileError, Result, TypeError, TypeErrorKind};
use crate::loc::FileSpan;
use crate::symbol::Symbol;
use crate::types::ast::{UContract, UTy, UTypeDecl};
use crate::types::contract::{Contract, Entry, Global};
use crate::types::ty::{Ground, Ty, TyKind};

fn semantic(kind: TypeErrorKind, loc: &FileSpan) -> CompileError {
  CompileError::Semantic(TypeError { kind, loc: loc.clone(), expected_at: None })
}

/// Resolve a surface [`UTy`] against the record/variant declarations already
/// registered in `env`. `Named` references that resolve to neither are a
/// type error (§4.1 "every `record`/`variant` name must be declared before use").
pub fn resolve_ty(env: &Env, ty: &UTy, loc: &FileSpan) -> Result<Ty> {
  Ok(match ty {
    UTy::Ground(name) => TyKind::ground(ground_of(name, loc)?),
    UTy::Tuple(ts) => {
      let tys: Vec<Ty> = ts.iter().map(|t| resolve_ty(env, t, loc)).collect::<Result<_>>()?;
      TyKind::tuple(tys.into_boxed_slice())
    }
    UTy::Option(t) => TyKind::Option(resolve_ty(env, t, loc)?).into(),
    UTy::Or(a, b) => TyKind::Or(resolve_ty(env, a, loc)?, resolve_ty(env, b, loc)?).into(),
    UTy::List(t) => TyKind::List(resolve_ty(env, t, loc)?).into(),
    UTy::Set(t) => TyKind::Set(resolve_ty(env, t, loc)?).into(),
    UTy::Map(k, v) => TyKind::Map(resolve_ty(env, k, loc)?, resolve_ty(env, v, loc)?).into(),
    UTy::BigMap(k, v) => TyKind::BigMap(resolve_ty(env, k, loc)?, resolve_ty(env, v, loc)?).into(),
    UTy::Contract(t) => TyKind::Contract(resolve_ty(env, t, loc)?).into(),
    UTy::Lambda(a, b) => TyKind::Lambda(resolve_ty(env, a, loc)?, resolve_ty(env, b, loc)?).into(),
    UTy::Named(name) => {
      if env.records.contains_key(name) { TyKind::Record(*name).into() }
      else if env.variants.contains_key(name) { TyKind::Variant(*name).into() }
      else { return Err(semantic(TypeErrorKind::UnknownField(*name), loc)) }
    }
  })
}

fn ground_of(name: &str, loc: &FileSpan) -> Result<Ground> {
  Ok(match name {
    "unit" => Ground::Unit,
    "bool" => Ground::Bool,
    "int" => Ground::Int,
    "nat" => Ground::Nat,
    "tez" => Ground::Tez,
    "string" => Ground::String,
    "bytes" => Ground::Bytes,
    "timestamp" => Ground::Timestamp,
    "key" => Ground::Key,
    "key_hash" => Ground::KeyHash,
    "signature" => Ground::Signature,
    "operation" => Ground::Operation,
    "address" => Ground::Address,
    other => return Err(semantic(TypeErrorKind::UnknownField(crate::symbol::intern(other)), loc)),
  })
}

/// Reject any `bigmap` nested inside `ty`, anywhere (§3 "`bigmap` may appear
/// only as the first component of a storage tuple"). Called on every
/// resolved type that is not itself the storage tuple's head.
fn forbid_bigmap(ty: &Ty, loc: &FileSpan) -> Result<()> {
  match &**ty {
    TyKind::BigMap(_, _) => Err(semantic(
      TypeErrorKind::BadBigMap("bigmap may only appear as the first component of the storage type"),
      loc,
    )),
    TyKind::Tuple(ts) => { for t in ts.iter() { forbid_bigmap(t, loc)?; } Ok(()) }
    TyKind::Option(t) | TyKind::List(t) | TyKind::Set(t) | TyKind::Contract(t) => forbid_bigmap(t, loc),
    TyKind::Or(a, b) | TyKind::Map(a, b) | TyKind::Lambda(a, b) => {
      forbid_bigmap(a, loc)?;
      forbid_bigmap(b, loc)
    }
    TyKind::Closure(a, b, c) => {
      forbid_bigmap(a, loc)?;
      forbid_bigmap(b, loc)?;
      forbid_bigmap(c, loc)
    }
    TyKind::Ground(_) | TyKind::Record(_) | TyKind::Variant(_) => Ok(()),
  }
}

/// Validate the declared storage shape against the same invariant: a bare
/// `bigmap` storage, or a tuple whose first component is a bare `bigmap`,
/// is the only place one may occur; everywhere else in storage is forbidden.
fn check_storage_shape(storage_ty: &Ty, loc: &FileSpan) -> Result<()> {
  match &**storage_ty {
    TyKind::Tuple(ts) => {
      let (first, rest) = ts.split_first().expect("tuple has at least two components");
      if !matches!(&**first, TyKind::BigMap(_, _)) { forbid_bigmap(first, loc)?; }
      for t in rest { forbid_bigmap(t, loc)?; }
      Ok(())
    }
    TyKind::BigMap(_, _) => Ok(()),
    _ => forbid_bigmap(storage_ty, loc),
  }
}

/// Register every `type NAME = record/variant { ... }` declaration into
/// `env`'s registries, resolving field/constructor payload types as we go.
/// Declarations may reference earlier declarations but not later ones or
/// themselves (no recursive records/variants — §2 Non-goals).
fn register_type_decls(env: &mut Env, decls: &[UTypeDecl], loc: &FileSpan) -> Result<()> {
  for decl in decls {
    match decl {
      UTypeDecl::Record(name, fields) => {
        let fields = fields.iter()
          .map(|(f, t)| { let ty = resolve_ty(env, t, loc)?; forbid_bigmap(&ty, loc)?; Ok((*f, ty)) })
          .collect::<Result<Vec<_>>>()?;
        env.define_record(RecordDef { name: *name, fields });
      }
      UTypeDecl::Variant(name, ctors) => {
        let ctors = ctors.iter()
          .map(|(c, t)| { let ty = resolve_ty(env, t, loc)?; forbid_bigmap(&ty, loc)?; Ok((*c, ty)) })
          .collect::<Result<Vec<_>>>()?;
        env.define_variant(VariantDef { name: *name, ctors });
      }
    }
  }
  Ok(())
}

/// Typecheck an entire contract (§3 "Contract record", §4.1). Globals are
/// typechecked in declaration order and bound into the environment so later
/// globals and entry points can call them; entry points and the storage
/// initializer each get a fresh effect context.
///
/// Discards the final [`Env`]; use [`typecheck_contract_with_env`] when the
/// record/variant registries are needed downstream (the encoder's
/// binarization passes, §4.2, resolve field/constructor order through them).
pub fn typecheck_contract(ast: &UContract) -> Result<Contract> {
  typecheck_contract_with_env(ast).map(|(c, _)| c)
}

pub fn typecheck_contract_with_env(ast: &UContract) -> Result<(Contract, Env)> {
  let loc = FileSpan::dummy();
  let mut env = Env::default();
  register_type_decls(&mut env, &ast.type_decls, &loc)?;
  let storage_ty = resolve_ty(&env, &ast.storage_ty, &loc)?;
  check_storage_shape(&storage_ty, &loc)?;

  let mut globals = Vec::with_capacity(ast.globals.len());
  for g in &ast.globals {
    let body = expr::check(&mut env, &g.body, None)?;
    forbid_bigmap(&body.ty, &loc)?;
    let var = env.bind(g.name, body.ty.clone());
    globals.push(Global { name: g.name, var, body });
  }

  let init = ast.init.as_ref()
    .map(|body| env.with_effect_ctx(EffectCtx::Initializer, |env| expr::check(env, body, Some(&storage_ty))))
    .transpose()?;

  let mut entries = Vec::with_capacity(ast.entries.len());
  for entry in &ast.entries {
    let param_ty = resolve_ty(&env, &entry.param_ty, &entry.loc)?;
    forbid_bigmap(&param_ty, &entry.loc)?;
    let expected = TyKind::entry_result(storage_ty.clone());
    let saved_param = env.current_entry_param.clone();
    env.current_entry_param = Some(param_ty.clone());
    let body = env.with_binding(entry.param_name, param_ty.clone(), |env, param_var| {
      env.with_binding(entry.storage_name, storage_ty.clone(), |env, storage_var| {
        let body = expr::check(env, &entry.body, Some(&expected))?;
        Ok::<_, CompileError>((param_var, storage_var, body))
      })
    });
    env.current_entry_param = saved_param;
    let (param_var, storage_var, body) = body?;
    entries.push(Entry { name: entry.name, param_ty, param_var, storage_var, body, loc: entry.loc.clone() });
  }

  let contract = Contract { name: ast.name, storage: storage_ty, globals, entries, init };
  Ok((contract, env))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::loc::Spanned;
  use crate::symbol::intern;
  use crate::types::ast::{UEntry, UExprKind};
  use crate::types::konst::Const;

  #[test]
  fn minimal_contract_with_unit_storage_typechecks() {
    let unit = Spanned::new(FileSpan::dummy(), UExprKind::Const(Const::Unit));
    let ast = UContract {
      name: intern("C"),
      type_decls: vec![],
      storage_ty: UTy::Ground("unit"),
      init: None,
      globals: vec![],
      entries: vec![UEntry {
        name: intern("main"),
        param_name: intern("param"),
        param_ty: UTy::Ground("unit"),
        storage_name: intern("storage"),
        body: unit.clone().map(|_| UExprKind::Let(
          crate::types::ast::UPattern::Wild, Box::new(unit.clone()),
          Box::new(Spanned::new(FileSpan::dummy(), UExprKind::Var(intern("storage")))),
        )),
        loc: FileSpan::dummy(),
      }],
    };
    let err = typecheck_contract(&ast).unwrap_err();
    // `storage` has type `unit`, not the required `(operation list * unit)`:
    // this exercises the full pipeline down to the expected mismatch.
    assert!(matches!(err, CompileError::Semantic(_)));
  }

  #[test]
  fn named_type_must_be_declared_before_use() {
    let env = Env::default();
    let err = resolve_ty(&env, &UTy::Named(intern("Undeclared")), &FileSpan::dummy());
    assert!(err.is_err());
  }

  #[test]
  fn bigmap_as_storage_head_is_allowed() {
    let bm = TyKind::BigMap(TyKind::int(), TyKind::string()).into();
    let storage = TyKind::tuple(vec![bm, TyKind::unit()]);
    assert!(check_storage_shape(&storage, &FileSpan::dummy()).is_ok());
  }

  #[test]
  fn bigmap_in_non_head_storage_position_is_rejected() {
    let bm = TyKind::BigMap(TyKind::int(), TyKind::string()).into();
    let storage = TyKind::tuple(vec![TyKind::unit(), bm]);
    assert!(check_storage_shape(&storage, &FileSpan::dummy()).is_err());
  }

  #[test]
  fn bigmap_nested_in_option_is_rejected_everywhere() {
    let bm = TyKind::BigMap(TyKind::int(), TyKind::string()).into();
    let nested: Ty = TyKind::Option(bm).into();
    assert!(forbid_bigmap(&nested, &FileSpan::dummy()).is_err());
  }
}
