//! The typed contract record (§3 "Contract record").

use crate::loc::FileSpan;
use crate::symbol::Symbol;
use crate::types::term::{Term, VarId};
use crate::types::ty::Ty;

#[derive(Clone, Debug)]
pub struct Global {
  pub name: Symbol,
  pub var: VarId,
  pub body: Term,
}

/// `(entry_name, parameter_ty, parameter_name, storage_name)` plus its body,
/// typed `(operation list * storage)`, exactly as §3 specifies.
#[derive(Clone, Debug)]
pub struct Entry {
  pub name: Symbol,
  pub param_ty: Ty,
  pub param_var: VarId,
  pub storage_var: VarId,
  pub body: Term,
  pub loc: FileSpan,
}

#[derive(Clone, Debug)]
pub struct Contract {
  pub name: Symbol,
  pub storage: Ty,
  pub globals: Vec<Global>,
  pub entries: Vec<Entry>,
  /// The initializer body, if storage is not a compile-time constant; `None`
  /// means a constant initial storage was computed directly (§6 "Artifacts").
  pub init: Option<Term>,
}
