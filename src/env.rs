//! The per-translation-unit environment (§2 "Environment"): name→type
//! bindings, the record/variant registries, and the counters that hand out
//! fresh [`VarId`]s. Lives from parsing through emission (§3 "Lifecycle").
//!
//! Variable scopes are a persistent (`im`) map rather than a `HashMap` with
//! explicit push/pop, per the Design Notes' suggestion: branch arms of
//! `if`/`match` can extend the scope independently and be discarded by simply
//! dropping the clone, with structural sharing of the unchanged prefix.

use std::collections::HashMap;
use im::HashMap as PMap;

use crate::error::{CompileError, TypeError, TypeErrorKind};
use crate::loc::FileSpan;
use crate::symbol::Symbol;
use crate::types::term::{VarId, VarIdGen};
use crate::types::ty::Ty;

#[derive(Clone, Debug)]
pub struct RecordDef {
  pub name: Symbol,
  /// Declaration order is semantically meaningful: it is the tuple-binarization
  /// order the encoder uses (§4.2 "Record construction and projection").
  pub fields: Vec<(Symbol, Ty)>,
}

impl RecordDef {
  #[must_use] pub fn field_index(&self, field: Symbol) -> Option<usize> {
    self.fields.iter().position(|(f, _)| *f == field)
  }
}

#[derive(Clone, Debug)]
pub struct VariantDef {
  pub name: Symbol,
  /// Declaration order fixes the right-leaning `Left`/`Right` path of each
  /// constructor (§4.2 "Variant constructors", §8 "stable under declaration
  /// order").
  pub ctors: Vec<(Symbol, Ty)>,
}

impl VariantDef {
  #[must_use] pub fn ctor_index(&self, ctor: Symbol) -> Option<usize> {
    self.ctors.iter().position(|(c, _)| *c == ctor)
  }
}

/// Global, append-only registries plus the scoped variable environment used
/// while walking into a body.
#[derive(Clone, Debug, Default)]
pub struct Env {
  pub records: HashMap<Symbol, RecordDef>,
  pub variants: HashMap<Symbol, VariantDef>,
  /// Reverse index: which record a field belongs to, used to detect the
  /// "ambiguous field names across two record types" error (§4.1).
  field_owner: HashMap<Symbol, Vec<Symbol>>,
  /// Reverse index: which variant a constructor belongs to.
  ctor_owner: HashMap<Symbol, Vec<Symbol>>,
  scope: PMap<Symbol, (VarId, Ty)>,
  pub vars: VarIdGen,
  /// Set while typechecking a storage initializer or the body of a
  /// `map`/`fold`/lambda, so the effect analysis can reject `transfer`,
  /// `sender`, `source` at the right granularity (§4.1 "Effect analysis").
  pub effect_ctx: EffectCtx,
  /// The parameter type of the entry point currently being typechecked, so
  /// that `self` (§3 op table) can resolve to `contract <param_ty>` without
  /// threading it through every recursive call.
  pub current_entry_param: Option<Ty>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum EffectCtx {
  #[default]
  Unrestricted,
  /// Inside a lambda, `map`/`fold` body, or a `bigmap` lookup: no transfer allowed.
  NoTransfer,
  /// Inside a storage initializer: no transfer, and `sender`/`source` are
  /// also rejected outright (§4.1 cross-component contract).
  Initializer,
}

impl Env {
  pub fn define_record(&mut self, def: RecordDef) {
    for (f, _) in &def.fields { self.field_owner.entry(*f).or_default().push(def.name); }
    self.records.insert(def.name, def);
  }

  pub fn define_variant(&mut self, def: VariantDef) {
    for (c, _) in &def.ctors { self.ctor_owner.entry(*c).or_default().push(def.name); }
    self.variants.insert(def.name, def);
  }

  /// Resolve a field name to its owning record, erroring if zero or more
  /// than one record declares it (§4.1 "ambiguous field names ... is a type error").
  pub fn resolve_field(&self, field: Symbol, loc: &FileSpan) -> Result<&RecordDef, CompileError> {
    match self.field_owner.get(&field).map(Vec::as_slice) {
      Some([only]) => Ok(&self.records[only]),
      Some(many) if many.len() > 1 => Err(CompileError::Semantic(TypeError {
        kind: TypeErrorKind::UnknownField(field),
        loc: loc.clone(),
        expected_at: None,
      })),
      _ => Err(CompileError::Semantic(TypeError {
        kind: TypeErrorKind::UnknownField(field),
        loc: loc.clone(),
        expected_at: None,
      })),
    }
  }

  pub fn resolve_ctor(&self, ctor: Symbol, loc: &FileSpan) -> Result<&VariantDef, CompileError> {
    match self.ctor_owner.get(&ctor).map(Vec::as_slice) {
      Some([only]) => Ok(&self.variants[only]),
      _ => Err(CompileError::Semantic(TypeError {
        kind: TypeErrorKind::UnknownConstructor(ctor),
        loc: loc.clone(),
        expected_at: None,
      })),
    }
  }

  pub fn lookup_var(&self, name: Symbol) -> Option<(VarId, Ty)> { self.scope.get(&name).cloned() }

  /// Bind `name` in a cloned scope, returning the extended environment and
  /// the fresh [`VarId`]. The caller typically shadows `self.scope` with the
  /// result only for the subtree that should see the binding.
  pub fn bind(&mut self, name: Symbol, ty: Ty) -> VarId {
    let var = self.vars.fresh();
    self.scope.insert(name, (var, ty));
    var
  }

  /// Run `f` with `name` bound to `(var, ty)` in a scope that is discarded
  /// afterwards (the persistent map makes this O(1) amortized, no explicit pop).
  pub fn with_binding<R>(&mut self, name: Symbol, ty: Ty, f: impl FnOnce(&mut Self, VarId) -> R) -> R {
    let saved = self.scope.clone();
    let var = self.bind(name, ty);
    let r = f(self, var);
    self.scope = saved;
    r
  }

  pub fn with_effect_ctx<R>(&mut self, ctx: EffectCtx, f: impl FnOnce(&mut Self) -> R) -> R {
    let saved = self.effect_ctx;
    // Once restricted, nesting can only ever tighten, never loosen.
    self.effect_ctx = match (saved, ctx) {
      (EffectCtx::Initializer, _) => EffectCtx::Initializer,
      (_, c) => c,
    };
    let r = f(self);
    self.effect_ctx = saved;
    r
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::symbol::intern;
  use crate::types::ty::TyKind;

  #[test]
  fn bindings_do_not_leak_out_of_with_binding() {
    let mut env = Env::default();
    let x = intern("x");
    assert!(env.lookup_var(x).is_none());
    env.with_binding(x, TyKind::int(), |env, var| {
      assert_eq!(env.lookup_var(x).map(|(v, _)| v), Some(var));
    });
    assert!(env.lookup_var(x).is_none());
  }

  #[test]
  fn ambiguous_field_across_two_records_is_an_error() {
    let mut env = Env::default();
    let f = intern("x");
    env.define_record(RecordDef { name: intern("A"), fields: vec![(f, TyKind::int())] });
    env.define_record(RecordDef { name: intern("B"), fields: vec![(f, TyKind::string())] });
    assert!(env.resolve_field(f, &FileSpan::dummy()).is_err());
  }

  #[test]
  fn unambiguous_field_resolves() {
    let mut env = Env::default();
    let f = intern("y");
    env.define_record(RecordDef { name: intern("A"), fields: vec![(f, TyKind::int())] });
    let rec = env.resolve_field(f, &FileSpan::dummy()).unwrap();
    assert_eq!(rec.name, intern("A"));
  }

  #[test]
  fn effect_ctx_cannot_loosen_once_in_initializer() {
    let mut env = Env::default();
    env.with_effect_ctx(EffectCtx::Initializer, |env| {
      env.with_effect_ctx(EffectCtx::Unrestricted, |env| {
        assert_eq!(env.effect_ctx, EffectCtx::Initializer);
      });
    });
  }
}
