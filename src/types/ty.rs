//! The canonical type algebra (§3 "Types"): a closed sum of ground types,
//! composite type constructors, and named record/variant references.

use std::rc::Rc;
use crate::symbol::Symbol;

/// The ground (non-parametric) types.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Ground {
  Unit, Bool, Int, Nat, Tez, String, Bytes, Timestamp,
  Key, KeyHash, Signature, Operation, Address,
}

/// A fully monomorphic type, shared via `Rc` so that encoder/simplifier
/// passes can compare subtrees by identity before rebuilding (§9 Design Notes).
pub type Ty = Rc<TyKind>;

/// The spine of a [`Ty`]. `record`/`variant` are referenced by name; the
/// definition itself lives in the [`crate::env::Env`] registries, not here,
/// so that two occurrences of `record Foo` compare equal without deep recursion.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TyKind {
  Ground(Ground),
  Tuple(Box<[Ty]>),
  Option(Ty),
  Or(Ty, Ty),
  List(Ty),
  Set(Ty),
  Map(Ty, Ty),
  BigMap(Ty, Ty),
  Contract(Ty),
  Lambda(Ty, Ty),
  /// A closure type `A -> B` paired with the type of its captured environment.
  Closure(Ty, Ty, Ty),
  Record(Symbol),
  Variant(Symbol),
}

impl TyKind {
  #[must_use] pub fn ground(g: Ground) -> Ty { Rc::new(TyKind::Ground(g)) }
  #[must_use] pub fn unit() -> Ty { Self::ground(Ground::Unit) }
  #[must_use] pub fn bool_() -> Ty { Self::ground(Ground::Bool) }
  #[must_use] pub fn int() -> Ty { Self::ground(Ground::Int) }
  #[must_use] pub fn nat() -> Ty { Self::ground(Ground::Nat) }
  #[must_use] pub fn tez() -> Ty { Self::ground(Ground::Tez) }
  #[must_use] pub fn string() -> Ty { Self::ground(Ground::String) }
  #[must_use] pub fn operation() -> Ty { Self::ground(Ground::Operation) }

  #[must_use] pub fn tuple(tys: impl Into<Box<[Ty]>>) -> Ty {
    let tys = tys.into();
    debug_assert!(tys.len() >= 2, "a tuple needs at least two components");
    Rc::new(TyKind::Tuple(tys))
  }

  #[must_use] pub fn pair(a: Ty, b: Ty) -> Ty { Rc::new(TyKind::Tuple(Box::new([a, b]))) }

  /// The `operation list * storage` pair every entry point must return.
  #[must_use] pub fn entry_result(storage: Ty) -> Ty {
    Self::pair(Rc::new(TyKind::List(Self::operation())), storage)
  }

  #[must_use] pub fn is_comparable(&self) -> bool {
    matches!(self,
      TyKind::Ground(_) | TyKind::Option(_) | TyKind::Or(..) | TyKind::Tuple(_))
  }

  /// `true` for the integer sub-kinds that the typechecker keeps distinct
  /// (§4.1 "Integer kinds").
  #[must_use] pub fn is_int_kind(&self) -> bool {
    matches!(self, TyKind::Ground(Ground::Int | Ground::Nat | Ground::Tez))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn equal_ty_trees_are_structurally_equal() {
    let a = TyKind::pair(TyKind::int(), TyKind::string());
    let b = TyKind::pair(TyKind::int(), TyKind::string());
    assert_eq!(a, b);
    assert!(!Rc::ptr_eq(&a, &b), "distinct allocations, equal by value");
  }

  #[test]
  fn entry_result_wraps_operation_list() {
    let ty = TyKind::entry_result(TyKind::nat());
    match &*ty {
      TyKind::Tuple(ts) => {
        assert_eq!(ts.len(), 2);
        assert!(matches!(&*ts[0], TyKind::List(_)));
        assert_eq!(ts[1], TyKind::nat());
      }
      _ => panic!("expected tuple"),
    }
  }
}
