//! Global string interning for identifiers, field labels, and constructor names.

use std::collections::HashMap;
use std::sync::{LazyLock, Mutex};

/// An interned identifier. Cheap to copy and compare; the backing string lives
/// in the global [`Interner`] for the lifetime of the process.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Symbol(u32);

impl std::fmt::Debug for Symbol {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{:?}", self.as_str())
  }
}
impl std::fmt::Display for Symbol {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(&self.as_str())
  }
}

impl Symbol {
  /// The symbol for `_`, used as the wildcard binder in patterns.
  pub fn under() -> Self { intern("_") }

  #[must_use] pub fn into_usize(self) -> usize { self.0 as usize }

  /// Look up the text behind this symbol. Allocates a fresh `String` since the
  /// interner cannot hand out a `&'static str` borrow across a mutex.
  #[must_use] pub fn as_str(self) -> String {
    INTERNER.lock().unwrap_or_else(std::sync::PoisonError::into_inner).resolve(self)
  }
}

#[derive(Default)]
struct Interner {
  strings: Vec<Box<str>>,
  map: HashMap<Box<str>, Symbol>,
}

impl Interner {
  fn intern(&mut self, s: &str) -> Symbol {
    if let Some(&sym) = self.map.get(s) { return sym }
    let id = u32::try_from(self.strings.len()).expect("too many distinct symbols");
    let sym = Symbol(id);
    let boxed: Box<str> = s.into();
    self.strings.push(boxed.clone());
    self.map.insert(boxed, sym);
    sym
  }

  fn resolve(&self, sym: Symbol) -> String {
    self.strings[sym.0 as usize].to_string()
  }
}

static INTERNER: LazyLock<Mutex<Interner>> = LazyLock::new(Default::default);

/// Intern a string, returning a [`Symbol`] that compares equal for equal strings.
pub fn intern(s: &str) -> Symbol {
  INTERNER.lock().unwrap_or_else(std::sync::PoisonError::into_inner).intern(s)
}

/// Build a dense lookup table from `Symbol` to `T`, for small closed enumerations
/// of keyword-like symbols (mirrors the dense map used for primitive keyword lookup).
pub fn init_dense_symbol_map<T: Copy>(pairs: &[(Symbol, T)]) -> Box<[Option<T>]> {
  let len = pairs.iter().map(|(s, _)| s.into_usize() + 1).max().unwrap_or(0);
  let mut out = vec![None; len];
  for &(s, v) in pairs { out[s.into_usize()] = Some(v); }
  out.into_boxed_slice()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn interning_is_stable_and_deduplicates() {
    let a = intern("storage");
    let b = intern("storage");
    let c = intern("parameter");
    assert_eq!(a, b);
    assert_ne!(a, c);
    assert_eq!(a.as_str(), "storage");
  }

  #[test]
  fn dense_map_round_trips() {
    let x = intern("x");
    let y = intern("y");
    let map = init_dense_symbol_map(&[(x, 1), (y, 2)]);
    assert_eq!(map[x.into_usize()], Some(1));
    assert_eq!(map[y.into_usize()], Some(2));
  }
}
