//! Constant literals, mirroring the type algebra (§3 "Constants"). `bigmap`
//! and `operation` constants have restricted construction sites (§4.2): the
//! only way to build either is inside the encoder, never from user syntax.

use std::rc::Rc;
use num::BigInt;
use crate::symbol::Symbol;
use crate::types::ty::Ty;

/// A literal value. Integers are arbitrary precision (`nat`/`int`/`tez` are
/// all unbounded in L; truncation to machine words is an M-side concern).
#[derive(Clone, Debug, PartialEq)]
pub enum Const {
  Unit,
  Bool(bool),
  Int(BigInt),
  Nat(BigInt),
  Tez(BigInt),
  String(Rc<str>),
  Bytes(Rc<[u8]>),
  Timestamp(BigInt),
  Key(Rc<str>),
  KeyHash(Rc<str>),
  Signature(Rc<str>),
  Address(Rc<str>),
  None(Ty),
  Some(Box<Const>),
  Left(Box<Const>, Ty),
  Right(Ty, Box<Const>),
  Tuple(Box<[Const]>),
  List(Ty, Box<[Const]>),
  Set(Ty, Box<[Const]>),
  Map(Ty, Ty, Box<[(Const, Const)]>),
  /// Only ever constructed by the encoder as the pre-bound slot-0 argument of
  /// a storage initializer (§9 Design Notes, `subst_empty_big_map`); never a
  /// literal a user can write.
  EmptyBigMap(Ty, Ty),
  Record(Symbol, Box<[(Symbol, Const)]>),
  Variant(Symbol, Symbol, Box<Const>),
}

impl Const {
  #[must_use] pub fn bytes_hex(&self) -> Option<String> {
    match self {
      Const::Bytes(b) => Some(hex::encode(b)),
      _ => None,
    }
  }
}

impl std::fmt::Display for Const {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Const::Unit => write!(f, "Unit"),
      Const::Bool(b) => write!(f, "{b}"),
      Const::Int(n) | Const::Nat(n) | Const::Tez(n) | Const::Timestamp(n) => write!(f, "{n}"),
      Const::String(s) => write!(f, "{s:?}"),
      Const::Bytes(b) => write!(f, "0x{}", hex::encode(b)),
      Const::Key(s) | Const::KeyHash(s) | Const::Signature(s) | Const::Address(s) => write!(f, "{s}"),
      Const::None(_) => write!(f, "None"),
      Const::Some(c) => write!(f, "Some({c})"),
      Const::Left(c, _) => write!(f, "Left({c})"),
      Const::Right(_, c) => write!(f, "Right({c})"),
      Const::Tuple(cs) => write!(f, "({})", cs.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")),
      Const::List(_, cs) => write!(f, "[{}]", cs.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")),
      Const::Set(_, cs) => write!(f, "{{{}}}", cs.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")),
      Const::Map(_, _, kvs) => write!(f, "{{{}}}",
        kvs.iter().map(|(k, v)| format!("{k} -> {v}")).collect::<Vec<_>>().join("; ")),
      Const::EmptyBigMap(..) => write!(f, "BigMap[]"),
      Const::Record(name, fs) => write!(f, "{{{name}: {}}}",
        fs.iter().map(|(k, v)| format!("{k} = {v}")).collect::<Vec<_>>().join("; ")),
      Const::Variant(_, ctor, c) => write!(f, "{ctor}({c})"),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn bytes_render_as_hex() {
    let c = Const::Bytes(Rc::from(&b"\x00\x01\xff"[..]));
    assert_eq!(c.bytes_hex().unwrap(), "0001ff");
    assert_eq!(c.to_string(), "0x0001ff");
  }
}
