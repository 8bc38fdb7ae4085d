//! Primitive operator keywords, resolved once by the typechecker from the
//! name-based [`UExprKind::Apply`](crate::types::ast::UExprKind::Apply) into a
//! closed, typed enum the rest of the pipeline can match on exhaustively.
//!
//! The `make_prims!` macro generates the keyword<->enum lookup tables; the
//! generated `scan`/`from_str`/`as_symbol` methods are what the encoder uses
//! to reject a primitive that somehow survived typechecking unresolved (§4.2
//! "Unknown primitive must not survive encoding").

use crate::symbol::{Symbol, intern, init_dense_symbol_map};

macro_rules! make_prims {
  {$($(#[$attr0:meta])* enum $name:ident {
    $($(#[$attr:meta])* $x:ident: $e:expr,)*
  })* } => {
    $(
      $(#[$attr0])*
      #[derive(Debug, PartialEq, Eq, Copy, Clone, Hash)]
      pub enum $name { $($(#[$attr])* $x),* }

      impl $name {
        /// Evaluate a function on all elements of the type, with their keyword spelling.
        pub fn scan(#[allow(unused)] mut f: impl FnMut(Self, &'static str)) {
          $(f($name::$x, $e);)*
        }
        /// Parse a keyword into this type.
        #[allow(clippy::should_implement_trait)]
        #[must_use] pub fn from_str(s: &str) -> Option<Self> {
          match s {
            $($e => Some(Self::$x),)*
            _ => None
          }
        }
        /// Resolve an already-interned symbol into this type.
        #[must_use] pub fn from_symbol(s: Symbol) -> Option<Self> {
          use std::sync::LazyLock;
          static SYMBOL_MAP: LazyLock<Box<[Option<$name>]>> = LazyLock::new(|| {
            let mut pairs = Vec::new();
            $name::scan(|p, kw| pairs.push((intern(kw), p)));
            init_dense_symbol_map(&pairs)
          });
          SYMBOL_MAP.get(s.into_usize()).copied().flatten()
        }
        /// The keyword spelling of this primitive, for diagnostics.
        #[must_use] pub fn keyword(self) -> &'static str {
          match self { $($name::$x => $e),* }
        }
      }
    )*
  }
}

make_prims! {
  /// Arithmetic, comparison, logical, and collection primitives (§3 "Symbolic
  /// M instruction" ops category, surface-level spelling).
  enum PrimOp {
    Add: "+",
    Sub: "-",
    Mul: "*",
    EDiv: "/",
    Neg: "~-",
    Abs: "abs",
    IsNat: "is_nat",
    ToInt: "int",
    Eq: "=",
    Ne: "<>",
    Lt: "<",
    Le: "<=",
    Gt: ">",
    Ge: ">=",
    Compare: "compare",
    And: "and",
    Or: "or",
    Xor: "xor",
    Not: "not",
    Shl: "lsl",
    Shr: "lsr",
    Concat: "concat",
    Size: "size",
    Slice: "slice",
    MemSet: "mem",
    GetMap: "get",
    UpdateMap: "update",
    CheckSignature: "check_signature",
    Blake2b: "blake2b",
    Sha256: "sha256",
    Sha512: "sha512",
    HashKey: "hash_key",
    Pack: "pack",
    Self_: "self",
    Balance: "balance",
    Now: "now",
    Amount: "amount",
    Sender: "sender",
    Source: "source",
    StepsToQuota: "steps_to_quota",
    Address: "address_of",
    SetDelegate: "set_delegate",
    ImplicitAccount: "implicit_account",
  }
}

impl PrimOp {
  /// Operators that may enqueue an operation or read ambient transaction
  /// state in a way the typechecker's effect analysis must track (§4.1).
  /// `sender`/`source` are singled out because a storage initializer rejects
  /// them even though they do not themselves transfer.
  #[must_use] pub fn is_ambient(self) -> bool {
    matches!(self,
      PrimOp::Self_ | PrimOp::Balance | PrimOp::Now | PrimOp::Amount |
      PrimOp::Sender | PrimOp::Source | PrimOp::StepsToQuota | PrimOp::SetDelegate)
  }

  #[must_use] pub fn forbidden_in_initializer(self) -> bool {
    matches!(self, PrimOp::Sender | PrimOp::Source)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn keyword_round_trips_through_symbol() {
    let sym = intern("+");
    assert_eq!(PrimOp::from_symbol(sym), Some(PrimOp::Add));
    assert_eq!(PrimOp::Add.keyword(), "+");
  }

  #[test]
  fn unknown_keyword_does_not_resolve() {
    assert_eq!(PrimOp::from_str("frobnicate"), None);
  }

  #[test]
  fn sender_and_source_are_forbidden_in_initializers() {
    assert!(PrimOp::Sender.forbidden_in_initializer());
    assert!(PrimOp::Source.forbidden_in_initializer());
    assert!(!PrimOp::Balance.forbidden_in_initializer());
  }
}
