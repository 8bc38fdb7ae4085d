//! The untyped AST handed to us by the (out-of-scope) surface parser.
//!
//! This is deliberately name-based and type-free: field/constructor/primitive
//! resolution, integer-kind disambiguation, and closure analysis are all the
//! typechecker's job (§4.1). Only syntax shows up here.

use crate::loc::{FileSpan, Spanned};
use crate::symbol::Symbol;

/// A surface type annotation, as written by the user: `record`/`variant` refer
/// to names that must be registered (by a preceding `typedef`) before use.
#[derive(Clone, Debug)]
pub enum UTy {
  Ground(&'static str),
  Tuple(Vec<UTy>),
  Option(Box<UTy>),
  Or(Box<UTy>, Box<UTy>),
  List(Box<UTy>),
  Set(Box<UTy>),
  Map(Box<UTy>, Box<UTy>),
  BigMap(Box<UTy>, Box<UTy>),
  Contract(Box<UTy>),
  Lambda(Box<UTy>, Box<UTy>),
  Named(Symbol),
}

/// An untyped binding pattern, used by `let`, lambda parameters, and match arms.
#[derive(Clone, Debug)]
pub enum UPattern {
  /// `_`: binds nothing.
  Wild,
  Var(Symbol),
  Tuple(Vec<UPattern>),
  Typed(Box<UPattern>, UTy),
}

#[derive(Clone, Debug)]
pub struct UMatchCase {
  pub ctor: Symbol,
  pub pat: UPattern,
  pub body: UExpr,
}

pub type UExpr = Spanned<UExprKind>;

/// An untyped surface expression. Operators (`+`, `=`, …) and coercions
/// (`int`, `abs`, `is_nat`) are represented as applications of a named
/// primitive, exactly as the parser would hand them to us; the typechecker
/// is what turns `Apply("+", [a, b])` into a type-directed addition node.
#[derive(Clone, Debug)]
pub enum UExprKind {
  Var(Symbol),
  Const(crate::types::konst::Const),
  /// `(a, b, c)`: a runtime tuple, each component checked independently.
  /// `Const::Tuple` covers the all-literal case; this covers everything
  /// else, including the `(operations, storage)` pair every entry returns.
  Tuple(Vec<UExpr>),
  Let(UPattern, Box<UExpr>, Box<UExpr>),
  Seq(Box<UExpr>, Box<UExpr>),
  If(Box<UExpr>, Box<UExpr>, Box<UExpr>),
  Lambda(Vec<UPattern>, Box<UExpr>),
  /// Named-primitive or user-function application: `f(a, b, ...)`.
  Apply(Symbol, Vec<UExpr>),
  MatchOption(Box<UExpr>, Box<UExpr>, UPattern, Box<UExpr>),
  /// `match l with [] -> nil | x :: xs -> cons`.
  MatchList(Box<UExpr>, Box<UExpr>, UPattern, UPattern, Box<UExpr>),
  /// `match%nat n with plus p -> .. | minus m -> ..`.
  MatchNat(Box<UExpr>, UPattern, Box<UExpr>, UPattern, Box<UExpr>),
  MatchVariant(Box<UExpr>, Vec<UMatchCase>),
  /// `Ctor(arg)`, resolved against the variant registry by the typechecker.
  Variant(Symbol, Box<UExpr>),
  RecordConstruct(Symbol, Vec<(Symbol, UExpr)>),
  Project(Box<UExpr>, Symbol),
  SetField(Box<UExpr>, Symbol, Box<UExpr>),
  /// `loop (fun acc -> (continue, acc')) init`.
  Loop(Box<UExpr>, Box<UExpr>),
  LoopLeft(Box<UExpr>, Box<UExpr>),
  Fold(Box<UExpr>, Box<UExpr>, Box<UExpr>),
  Map(Box<UExpr>, Box<UExpr>),
  MapFold(Box<UExpr>, Box<UExpr>, Box<UExpr>),
  /// `contract.call(dest, amount, arg)`.
  Transfer(Box<UExpr>, Box<UExpr>, Box<UExpr>),
  Failwith(Box<UExpr>),
  CreateContract(Box<UExpr>),
  ContractAt(Box<UExpr>, UTy),
  Unpack(Box<UExpr>, UTy),
}

/// A user `type NAME = record/variant { ... }` declaration.
#[derive(Clone, Debug)]
pub enum UTypeDecl {
  Record(Symbol, Vec<(Symbol, UTy)>),
  Variant(Symbol, Vec<(Symbol, UTy)>),
}

/// A top-level global value binding (`let NAME = EXPR`).
#[derive(Clone, Debug)]
pub struct UGlobal {
  pub name: Symbol,
  pub body: UExpr,
}

/// `let%entry NAME (param : T) (storage_name : S) = body`.
#[derive(Clone, Debug)]
pub struct UEntry {
  pub name: Symbol,
  pub param_name: Symbol,
  pub param_ty: UTy,
  pub storage_name: Symbol,
  pub body: UExpr,
  pub loc: FileSpan,
}

#[derive(Clone, Debug)]
pub struct UContract {
  pub name: Symbol,
  pub type_decls: Vec<UTypeDecl>,
  pub storage_ty: UTy,
  /// `let%init` storage initializer body, if the contract's initial storage
  /// is not a compile-time constant.
  pub init: Option<UExpr>,
  pub globals: Vec<UGlobal>,
  pub entries: Vec<UEntry>,
}
