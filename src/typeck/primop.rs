//! Result-type rules for [`PrimOp`] applications (§4.1 "Integer kinds",
//! §3 "Symbolic M instruction" op table). Kept separate from `expr.rs` since
//! this is the one place every int/nat/tez combination has to be spelled out.

use crate::error::{CompileError, TypeError, TypeErrorKind};
use crate::loc::FileSpan;
use crate::prim::PrimOp;
use crate::types::term::Term;
use crate::types::ty::{Ground, Ty, TyKind};

type Result<T> = std::result::Result<T, CompileError>;

fn mismatch(expected: &Ty, found: &Ty, loc: &FileSpan) -> CompileError {
  CompileError::Semantic(TypeError {
    kind: TypeErrorKind::TypeMismatch { expected: expected.clone(), found: found.clone() },
    loc: loc.clone(),
    expected_at: None,
  })
}

fn bad(msg: &'static str, loc: &FileSpan) -> CompileError {
  CompileError::Semantic(TypeError { kind: TypeErrorKind::BadBigMap(msg), loc: loc.clone(), expected_at: None })
}

fn arity(expected: usize, found: usize, loc: &FileSpan) -> CompileError {
  CompileError::Semantic(TypeError {
    kind: TypeErrorKind::ArityMismatch { expected, found },
    loc: loc.clone(),
    expected_at: None,
  })
}

fn ground(ty: &Ty) -> Option<Ground> {
  match &**ty { TyKind::Ground(g) => Some(*g), _ => None }
}

/// Compute the result type of `op` applied to `args`, or reject the
/// combination with a located [`CompileError`].
pub fn result_ty(op: PrimOp, args: &[Term], loc: &FileSpan) -> Result<Ty> {
  let tys: Vec<Ty> = args.iter().map(|t| t.ty.clone()).collect();
  match op {
    PrimOp::Add => arith2(&tys, loc, add_kind),
    PrimOp::Sub => arith2(&tys, loc, sub_kind),
    PrimOp::Mul => arith2(&tys, loc, mul_kind),
    PrimOp::EDiv => {
      let quot = arith2(&tys, loc, mul_kind)?;
      Ok(TyKind::Option(TyKind::pair(quot.clone(), TyKind::nat())).into())
    }
    PrimOp::Neg => unary_int(&tys, loc, |g| match g {
      Ground::Nat | Ground::Int => Some(Ground::Int),
      _ => None,
    }),
    PrimOp::Abs => unary_int(&tys, loc, |g| matches!(g, Ground::Int).then_some(Ground::Nat)),
    PrimOp::IsNat => {
      let [a] = one_arg(&tys, loc)?;
      require_ground(&a, Ground::Int, loc)?;
      Ok(TyKind::Option(TyKind::nat()).into())
    }
    PrimOp::ToInt => {
      let [a] = one_arg(&tys, loc)?;
      require_ground(&a, Ground::Nat, loc)?;
      Ok(TyKind::int())
    }
    PrimOp::Eq | PrimOp::Ne | PrimOp::Lt | PrimOp::Le | PrimOp::Gt | PrimOp::Ge => {
      let (a, b) = pair_args(&tys, loc)?;
      comparable_same(&a, &b, loc)?;
      Ok(TyKind::bool_())
    }
    PrimOp::Compare => {
      let (a, b) = pair_args(&tys, loc)?;
      comparable_same(&a, &b, loc)?;
      Ok(TyKind::int())
    }
    PrimOp::And | PrimOp::Or => {
      let (a, b) = pair_args(&tys, loc)?;
      match (ground(&a), ground(&b)) {
        (Some(Ground::Bool), Some(Ground::Bool)) => Ok(TyKind::bool_()),
        (Some(Ground::Nat), Some(Ground::Nat)) => Ok(TyKind::nat()),
        _ => Err(mismatch(&a, &b, loc)),
      }
    }
    PrimOp::Xor => {
      let (a, b) = pair_args(&tys, loc)?;
      match (ground(&a), ground(&b)) {
        (Some(Ground::Bool), Some(Ground::Bool)) => Ok(TyKind::bool_()),
        (Some(Ground::Nat), Some(Ground::Nat)) => Ok(TyKind::nat()),
        _ => Err(mismatch(&a, &b, loc)),
      }
    }
    PrimOp::Not => {
      let [a] = one_arg(&tys, loc)?;
      match ground(&a) {
        Some(Ground::Bool) => Ok(TyKind::bool_()),
        Some(Ground::Nat) | Some(Ground::Int) => Ok(TyKind::int()),
        _ => Err(bad("`not` needs a bool, nat, or int argument", loc)),
      }
    }
    PrimOp::Shl | PrimOp::Shr => {
      let (a, b) = pair_args(&tys, loc)?;
      require_ground(&a, Ground::Nat, loc)?;
      require_ground(&b, Ground::Nat, loc)?;
      Ok(TyKind::nat())
    }
    PrimOp::Concat => {
      let (a, b) = pair_args(&tys, loc)?;
      match (ground(&a), ground(&b)) {
        (Some(Ground::String), Some(Ground::String)) => Ok(TyKind::string()),
        (Some(Ground::Bytes), Some(Ground::Bytes)) => Ok(TyKind::ground(Ground::Bytes)),
        _ => Err(bad("`concat` needs two strings or two byte sequences", loc)),
      }
    }
    PrimOp::Size => {
      let [a] = one_arg(&tys, loc)?;
      match &*a {
        TyKind::List(_) | TyKind::Set(_) | TyKind::Map(..) | TyKind::Ground(Ground::String | Ground::Bytes) =>
          Ok(TyKind::nat()),
        _ => Err(bad("`size` needs a list, set, map, string, or bytes", loc)),
      }
    }
    PrimOp::Slice => {
      let [off, len, s] = three_args(&tys, loc)?;
      require_ground(&off, Ground::Nat, loc)?;
      require_ground(&len, Ground::Nat, loc)?;
      match ground(&s) {
        Some(Ground::String) => Ok(TyKind::Option(TyKind::string()).into()),
        Some(Ground::Bytes) => Ok(TyKind::Option(TyKind::ground(Ground::Bytes)).into()),
        _ => Err(bad("`slice` needs a string or bytes as its third argument", loc)),
      }
    }
    PrimOp::MemSet => {
      let (k, coll) = pair_args(&tys, loc)?;
      match &*coll {
        TyKind::Set(t) if *t == k => Ok(TyKind::bool_()),
        TyKind::Map(kt, _) | TyKind::BigMap(kt, _) if *kt == k => Ok(TyKind::bool_()),
        _ => Err(bad("`mem` needs a key and a matching set, map, or big_map", loc)),
      }
    }
    PrimOp::GetMap => {
      let (k, coll) = pair_args(&tys, loc)?;
      match &*coll {
        TyKind::Map(kt, v) | TyKind::BigMap(kt, v) if *kt == k => Ok(TyKind::Option(v.clone()).into()),
        _ => Err(bad("`get` needs a key and a matching map or big_map", loc)),
      }
    }
    PrimOp::UpdateMap => {
      let [k, v, coll] = three_args(&tys, loc)?;
      match &*coll {
        TyKind::Set(t) if *t == k => { require_ground(&v, Ground::Bool, loc)?; Ok(coll) }
        TyKind::Map(kt, vt) if *kt == k => {
          let expect_opt: Ty = TyKind::Option(vt.clone()).into();
          if v != expect_opt { return Err(mismatch(&expect_opt, &v, loc)) }
          Ok(coll)
        }
        TyKind::BigMap(kt, vt) if *kt == k => {
          let expect_opt: Ty = TyKind::Option(vt.clone()).into();
          if v != expect_opt { return Err(mismatch(&expect_opt, &v, loc)) }
          Ok(coll)
        }
        _ => Err(bad("`update` needs a key, a new value, and a matching set, map, or big_map", loc)),
      }
    }
    PrimOp::CheckSignature => {
      let [k, s, m] = three_args(&tys, loc)?;
      require_ground(&k, Ground::Key, loc)?;
      require_ground(&s, Ground::Signature, loc)?;
      require_ground(&m, Ground::Bytes, loc)?;
      Ok(TyKind::bool_())
    }
    PrimOp::Blake2b | PrimOp::Sha256 | PrimOp::Sha512 => {
      let [a] = one_arg(&tys, loc)?;
      require_ground(&a, Ground::Bytes, loc)?;
      Ok(TyKind::ground(Ground::Bytes))
    }
    PrimOp::HashKey => {
      let [a] = one_arg(&tys, loc)?;
      require_ground(&a, Ground::Key, loc)?;
      Ok(TyKind::ground(Ground::KeyHash))
    }
    PrimOp::Pack => {
      let [_] = one_arg(&tys, loc)?;
      Ok(TyKind::ground(Ground::Bytes))
    }
    PrimOp::Self_ => {
      no_args(&tys, loc)?;
      Err(bad("`self` requires the enclosing entry point's parameter type, resolved by the caller", loc))
    }
    PrimOp::Balance | PrimOp::Amount => { no_args(&tys, loc)?; Ok(TyKind::tez()) }
    PrimOp::Now => { no_args(&tys, loc)?; Ok(TyKind::ground(Ground::Timestamp)) }
    PrimOp::Sender | PrimOp::Source => { no_args(&tys, loc)?; Ok(TyKind::ground(Ground::Address)) }
    PrimOp::StepsToQuota => { no_args(&tys, loc)?; Ok(TyKind::nat()) }
    PrimOp::Address => {
      let [a] = one_arg(&tys, loc)?;
      match &*a {
        TyKind::Contract(_) => Ok(TyKind::ground(Ground::Address)),
        _ => Err(bad("`address_of` needs a contract value", loc)),
      }
    }
    PrimOp::SetDelegate => {
      let [a] = one_arg(&tys, loc)?;
      let expect: Ty = TyKind::Option(TyKind::ground(Ground::KeyHash)).into();
      if a != expect { return Err(mismatch(&expect, &a, loc)) }
      Ok(TyKind::operation())
    }
    PrimOp::ImplicitAccount => {
      let [a] = one_arg(&tys, loc)?;
      require_ground(&a, Ground::KeyHash, loc)?;
      Ok(TyKind::Contract(TyKind::unit()).into())
    }
  }
}

fn one_arg(tys: &[Ty], loc: &FileSpan) -> Result<[Ty; 1]> {
  <[Ty; 1]>::try_from(tys.to_vec()).map_err(|v| arity(1, v.len(), loc))
}
fn two_args(tys: &[Ty], loc: &FileSpan) -> Result<(Ty, Ty)> {
  let [a, b] = <[Ty; 2]>::try_from(tys.to_vec()).map_err(|v| arity(2, v.len(), loc))?;
  Ok((a, b))
}
fn pair_args(tys: &[Ty], loc: &FileSpan) -> Result<(Ty, Ty)> { two_args(tys, loc) }
fn three_args(tys: &[Ty], loc: &FileSpan) -> Result<[Ty; 3]> {
  <[Ty; 3]>::try_from(tys.to_vec()).map_err(|v| arity(3, v.len(), loc))
}
fn no_args(tys: &[Ty], loc: &FileSpan) -> Result<()> {
  if tys.is_empty() { Ok(()) } else { Err(arity(0, tys.len(), loc)) }
}

fn require_ground(ty: &Ty, want: Ground, loc: &FileSpan) -> Result<()> {
  match ground(ty) {
    Some(g) if g == want => Ok(()),
    _ => Err(mismatch(&TyKind::ground(want), ty, loc)),
  }
}

fn comparable_same(a: &Ty, b: &Ty, loc: &FileSpan) -> Result<()> {
  if !a.is_comparable() { return Err(bad("operand is not a comparable type", loc)) }
  if a != b { return Err(mismatch(a, b, loc)) }
  Ok(())
}

fn unary_int(tys: &[Ty], loc: &FileSpan, rule: impl Fn(Ground) -> Option<Ground>) -> Result<Ty> {
  let [a] = one_arg(tys, loc)?;
  ground(&a).and_then(rule).map(TyKind::ground)
    .ok_or_else(|| bad("operand has the wrong integer kind", loc))
}

fn add_kind(a: Ground, b: Ground) -> Option<Ground> {
  use Ground::{Int, Nat, Tez};
  match (a, b) {
    (Nat, Nat) => Some(Nat),
    (Int, Int) | (Int, Nat) | (Nat, Int) => Some(Int),
    (Tez, Tez) => Some(Tez),
    _ => None,
  }
}

fn sub_kind(a: Ground, b: Ground) -> Option<Ground> {
  use Ground::{Int, Nat, Tez};
  match (a, b) {
    (Nat, Nat) | (Int, Int) | (Int, Nat) | (Nat, Int) => Some(Int),
    (Tez, Tez) => Some(Tez),
    _ => None,
  }
}

fn mul_kind(a: Ground, b: Ground) -> Option<Ground> {
  use Ground::{Int, Nat, Tez};
  match (a, b) {
    (Nat, Nat) => Some(Nat),
    (Int, Int) | (Int, Nat) | (Nat, Int) => Some(Int),
    (Nat, Tez) | (Tez, Nat) => Some(Tez),
    _ => None,
  }
}

fn arith2(tys: &[Ty], loc: &FileSpan, rule: impl Fn(Ground, Ground) -> Option<Ground>) -> Result<Ty> {
  let (a, b) = pair_args(tys, loc)?;
  match (ground(&a), ground(&b)) {
    (Some(ga), Some(gb)) => rule(ga, gb).map(TyKind::ground)
      .ok_or_else(|| bad("incompatible integer kinds for this operator", loc)),
    _ => Err(bad("operand is not an integer kind", loc)),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::loc::FileSpan;
  use crate::types::konst::Const;
  use crate::types::term::TermNode;

  fn lit(ty: Ty) -> Term { TermNode::new(crate::types::term::TermKind::Const(Const::Unit), ty, FileSpan::dummy()) }

  #[test]
  fn nat_minus_nat_is_int() {
    let args = [lit(TyKind::nat()), lit(TyKind::nat())];
    let ty = result_ty(PrimOp::Sub, &args, &FileSpan::dummy()).unwrap();
    assert_eq!(ty, TyKind::int());
  }

  #[test]
  fn int_times_tez_is_rejected() {
    let args = [lit(TyKind::int()), lit(TyKind::tez())];
    assert!(result_ty(PrimOp::Mul, &args, &FileSpan::dummy()).is_err());
  }

  #[test]
  fn nat_times_tez_is_tez() {
    let args = [lit(TyKind::nat()), lit(TyKind::tez())];
    let ty = result_ty(PrimOp::Mul, &args, &FileSpan::dummy()).unwrap();
    assert_eq!(ty, TyKind::tez());
  }
}
