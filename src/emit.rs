//! Rendering symbolic M (§4.4's output) into the external concrete syntax
//! tree (§4.6, §6), and its inverse: parsing that same tree back into
//! symbolic M for the decompiler (§4.7) to interpret.
//!
//! Record/variant types have no concrete-syntax counterpart — M only knows
//! `pair`/`or` — so every [`Ty`] is resolved through the [`Env`]'s
//! registries before rendering ([`resolve_ty_shape`]). The inverse direction
//! never needs this: a parsed type is already built from `pair`/`or`, so it
//! decodes straight into the same structural [`TyKind`] shapes.

use crate::codegen::Compiled;
use crate::env::Env;
use crate::error::{CompileError, DecompileError, DecompileErrorKind, InternalError, Result};
use crate::loc::FileSpan;
use crate::prim::PrimOp;
use crate::symbol::{Symbol, intern};
use crate::types::concrete::{Node, Program, field_annot, var_annot};
use crate::types::instr::{Block, Cadr, Inst, InstForm};
use crate::types::konst::Const;
use crate::types::ty::{Ground, Ty, TyKind};

fn internal(message: impl Into<String>) -> CompileError {
  CompileError::Internal(InternalError::new("emit", message.into()))
}

fn unstructured(message: impl Into<String>) -> CompileError {
  CompileError::Decompilation(DecompileError {
    kind: DecompileErrorKind::UnstructuredProgram(message.into()),
    loc: FileSpan::dummy(),
  })
}

// ---------------------------------------------------------------------------
// compile direction: Compiled -> Program
// ---------------------------------------------------------------------------

/// Render a compiled contract as the external syntax tree (§6). `env` supplies
/// the record/variant registries the parameter/storage types may still refer
/// to, since the encoder only binarizes terms, not declared type shapes.
pub fn emit(compiled: &Compiled, env: &Env) -> Result<Program> {
  Ok(Program {
    parameter: ty_to_node(env, &compiled.parameter)?,
    storage: ty_to_node(env, &compiled.storage)?,
    code: Node::Seq(emit_block(env, &compiled.code)?),
  })
}

/// Expand every [`TyKind::Record`]/[`TyKind::Variant`] reachable from `ty`
/// into the `pair`/`or` shape the encoder would have binarized it to, using
/// declaration order exactly as the encoder does (§4.2 "Record construction",
/// "Variant constructors").
pub fn resolve_ty_shape(env: &Env, ty: &Ty) -> Result<Ty> {
  Ok(match &**ty {
    TyKind::Record(name) => {
      let def = env.records.get(name).ok_or_else(|| internal(format!("unknown record `{name}`")))?;
      let tys: Vec<Ty> = def.fields.iter().map(|(_, t)| resolve_ty_shape(env, t)).collect::<Result<_>>()?;
      if tys.len() == 1 { tys[0].clone() } else { TyKind::tuple(tys) }
    }
    TyKind::Variant(name) => {
      let def = env.variants.get(name).ok_or_else(|| internal(format!("unknown variant `{name}`")))?;
      let tys: Vec<Ty> = def.ctors.iter().map(|(_, t)| resolve_ty_shape(env, t)).collect::<Result<_>>()?;
      right_leaning_or(&tys)
    }
    TyKind::Tuple(ts) => TyKind::tuple(ts.iter().map(|t| resolve_ty_shape(env, t)).collect::<Result<Vec<_>>>()?),
    TyKind::Option(t) => TyKind::Option(resolve_ty_shape(env, t)?).into(),
    TyKind::Or(a, b) => TyKind::Or(resolve_ty_shape(env, a)?, resolve_ty_shape(env, b)?).into(),
    TyKind::List(t) => TyKind::List(resolve_ty_shape(env, t)?).into(),
    TyKind::Set(t) => TyKind::Set(resolve_ty_shape(env, t)?).into(),
    TyKind::Map(k, v) => TyKind::Map(resolve_ty_shape(env, k)?, resolve_ty_shape(env, v)?).into(),
    TyKind::BigMap(k, v) => TyKind::BigMap(resolve_ty_shape(env, k)?, resolve_ty_shape(env, v)?).into(),
    TyKind::Contract(t) => TyKind::Contract(resolve_ty_shape(env, t)?).into(),
    TyKind::Lambda(a, b) => TyKind::Lambda(resolve_ty_shape(env, a)?, resolve_ty_shape(env, b)?).into(),
    TyKind::Closure(a, b, c) =>
      TyKind::Closure(resolve_ty_shape(env, a)?, resolve_ty_shape(env, b)?, resolve_ty_shape(env, c)?).into(),
    TyKind::Ground(_) => ty.clone(),
  })
}

fn right_leaning_or(tys: &[Ty]) -> Ty {
  match tys {
    [] => TyKind::unit(),
    [t] => t.clone(),
    [t, rest @ ..] => TyKind::Or(t.clone(), right_leaning_or(rest)).into(),
  }
}

fn ground_name(g: Ground) -> &'static str {
  match g {
    Ground::Unit => "unit", Ground::Bool => "bool", Ground::Int => "int", Ground::Nat => "nat",
    Ground::Tez => "tez", Ground::String => "string", Ground::Bytes => "bytes",
    Ground::Timestamp => "timestamp", Ground::Key => "key", Ground::KeyHash => "key_hash",
    Ground::Signature => "signature", Ground::Operation => "operation", Ground::Address => "address",
  }
}

fn ground_of_name(s: &str) -> Option<Ground> {
  Some(match s {
    "unit" => Ground::Unit, "bool" => Ground::Bool, "int" => Ground::Int, "nat" => Ground::Nat,
    "tez" => Ground::Tez, "string" => Ground::String, "bytes" => Ground::Bytes,
    "timestamp" => Ground::Timestamp, "key" => Ground::Key, "key_hash" => Ground::KeyHash,
    "signature" => Ground::Signature, "operation" => Ground::Operation, "address" => Ground::Address,
    _ => return None,
  })
}

fn ty_to_node(env: &Env, ty: &Ty) -> Result<Node> { shape_to_node(&resolve_ty_shape(env, ty)?) }

fn shape_to_node(ty: &Ty) -> Result<Node> {
  Ok(match &**ty {
    TyKind::Ground(g) => Node::prim(ground_name(*g)),
    TyKind::Tuple(ts) => tuple_shape_node(ts)?,
    TyKind::Option(t) => Node::prim_args("option", vec![shape_to_node(t)?]),
    TyKind::Or(a, b) => Node::prim_args("or", vec![shape_to_node(a)?, shape_to_node(b)?]),
    TyKind::List(t) => Node::prim_args("list", vec![shape_to_node(t)?]),
    TyKind::Set(t) => Node::prim_args("set", vec![shape_to_node(t)?]),
    TyKind::Map(k, v) => Node::prim_args("map", vec![shape_to_node(k)?, shape_to_node(v)?]),
    TyKind::BigMap(k, v) => Node::prim_args("big_map", vec![shape_to_node(k)?, shape_to_node(v)?]),
    TyKind::Contract(t) => Node::prim_args("contract", vec![shape_to_node(t)?]),
    TyKind::Lambda(a, b) | TyKind::Closure(a, b, _) => Node::prim_args("lambda", vec![shape_to_node(a)?, shape_to_node(b)?]),
    TyKind::Record(_) | TyKind::Variant(_) => return Err(internal("unresolved record/variant reached rendering")),
  })
}

fn tuple_shape_node(ts: &[Ty]) -> Result<Node> {
  if ts.len() == 2 { return Ok(Node::prim_args("pair", vec![shape_to_node(&ts[0])?, shape_to_node(&ts[1])?])); }
  Ok(Node::prim_args("pair", vec![shape_to_node(&ts[0])?, tuple_shape_node(&ts[1..])?]))
}

fn const_to_node(c: &Const) -> Result<Node> {
  Ok(match c {
    Const::Unit => Node::prim("Unit"),
    Const::Bool(b) => Node::prim(if *b { "True" } else { "False" }),
    Const::Int(n) | Const::Nat(n) | Const::Tez(n) | Const::Timestamp(n) => Node::int(n),
    Const::String(s) => Node::string(s.to_string()),
    Const::Bytes(b) => Node::bytes_hex(hex::encode(&**b)),
    Const::Key(s) | Const::KeyHash(s) | Const::Signature(s) | Const::Address(s) => Node::string(s.to_string()),
    Const::None(_) => Node::prim("None"),
    Const::Some(inner) => Node::prim_args("Some", vec![const_to_node(inner)?]),
    Const::Left(inner, _) => Node::prim_args("Left", vec![const_to_node(inner)?]),
    Const::Right(_, inner) => Node::prim_args("Right", vec![const_to_node(inner)?]),
    Const::Tuple(cs) => tuple_const_node(cs)?,
    Const::List(_, cs) | Const::Set(_, cs) => Node::Seq(cs.iter().map(const_to_node).collect::<Result<_>>()?),
    Const::Map(_, _, kvs) => Node::Seq(
      kvs.iter().map(|(k, v)| Ok(Node::prim_args("Elt", vec![const_to_node(k)?, const_to_node(v)?]))).collect::<Result<_>>()?,
    ),
    Const::EmptyBigMap(..) => Node::Seq(vec![]),
    Const::Record(..) | Const::Variant(..) => return Err(internal("unresolved record/variant constant reached rendering")),
  })
}

fn tuple_const_node(cs: &[Const]) -> Result<Node> {
  if cs.len() == 2 { return Ok(Node::prim_args("Pair", vec![const_to_node(&cs[0])?, const_to_node(&cs[1])?])); }
  Ok(Node::prim_args("Pair", vec![const_to_node(&cs[0])?, tuple_const_node(&cs[1..])?]))
}

fn cadr_mnemonic(c: Cadr) -> &'static str { match c { Cadr::Car => "CAR", Cadr::Cdr => "CDR" } }

/// Every pure arithmetic/comparison/collection primitive's M mnemonic (§3 op
/// table). The ambient ones (`self`, `balance`, ...) never reach this match —
/// the code generator already lowered them to their own dedicated [`InstForm`].
fn prim_mnemonic(op: PrimOp) -> &'static str {
  match op {
    PrimOp::Add => "ADD", PrimOp::Sub => "SUB", PrimOp::Mul => "MUL", PrimOp::EDiv => "EDIV",
    PrimOp::Neg => "NEG", PrimOp::Abs => "ABS", PrimOp::IsNat => "ISNAT", PrimOp::ToInt => "INT",
    PrimOp::Eq => "EQ", PrimOp::Ne => "NEQ", PrimOp::Lt => "LT", PrimOp::Le => "LE",
    PrimOp::Gt => "GT", PrimOp::Ge => "GE", PrimOp::Compare => "COMPARE",
    PrimOp::And => "AND", PrimOp::Or => "OR", PrimOp::Xor => "XOR", PrimOp::Not => "NOT",
    PrimOp::Shl => "LSL", PrimOp::Shr => "LSR", PrimOp::Concat => "CONCAT",
    PrimOp::Size => "SIZE", PrimOp::Slice => "SLICE", PrimOp::MemSet => "MEM", PrimOp::GetMap => "GET",
    PrimOp::UpdateMap => "UPDATE", PrimOp::CheckSignature => "CHECK_SIGNATURE",
    PrimOp::Blake2b => "BLAKE2B", PrimOp::Sha256 => "SHA256", PrimOp::Sha512 => "SHA512",
    PrimOp::HashKey => "HASH_KEY",
    // ambient primitives have dedicated InstForm variants; kept here only so
    // this match stays exhaustive against PrimOp.
    PrimOp::Pack => "PACK", PrimOp::Self_ => "SELF", PrimOp::Balance => "BALANCE", PrimOp::Now => "NOW",
    PrimOp::Amount => "AMOUNT", PrimOp::Sender => "SENDER", PrimOp::Source => "SOURCE",
    PrimOp::StepsToQuota => "STEPS_TO_QUOTA", PrimOp::Address => "ADDRESS",
    PrimOp::SetDelegate => "SET_DELEGATE", PrimOp::ImplicitAccount => "IMPLICIT_ACCOUNT",
  }
}

/// The four-instruction shape the entry frame prelude always opens with
/// (`DUP; CAR; SWAP; CDR`), unpacking the machine's single `pair parameter
/// storage` argument. It has no dedicated [`InstForm`] — the code generator
/// builds it from the same `Access`/`Dup`/`Swap` primitives a user projection
/// would — but is common enough, and distinctive enough as `UNPAIR` in the
/// rendered syntax (§8 scenario 1), to fold back into one node here.
fn unpair_prelude(block: &[Inst]) -> bool {
  matches!(
    block,
    [
      Inst { form: InstForm::Dup(0), .. },
      Inst { form: InstForm::Access(chain1, None), .. },
      Inst { form: InstForm::Swap, .. },
      Inst { form: InstForm::Access(chain2, None), .. },
      ..
    ] if **chain1 == [Cadr::Car] && **chain2 == [Cadr::Cdr]
  )
}

fn emit_block(env: &Env, block: &Block) -> Result<Vec<Node>> {
  let mut out = Vec::with_capacity(block.len());
  let mut i = 0;
  while i < block.len() {
    if unpair_prelude(&block[i..]) {
      out.push(Node::prim("UNPAIR"));
      i += 4;
      continue;
    }
    emit_inst(env, &block[i], &mut out)?;
    i += 1;
  }
  Ok(out)
}

fn emit_inst(env: &Env, inst: &Inst, out: &mut Vec<Node>) -> Result<()> {
  if let InstForm::Rename(sym) = &inst.form {
    if let Some(last) = out.pop() { out.push(last.with_annot(var_annot(&sym.as_str()))); }
    return Ok(());
  }
  let mut node = match &inst.form {
    InstForm::Dup(0) => Node::prim("DUP"),
    InstForm::Dup(n) => Node::prim_args("DUP", vec![Node::int(n)]),
    InstForm::Swap => Node::prim("SWAP"),
    InstForm::Dip(n, b) => Node::prim_args("DIP", vec![Node::int(n), Node::Seq(emit_block(env, b)?)]),
    InstForm::DipDrop(0, k) => Node::prim_args("DROP", vec![Node::int(k)]),
    InstForm::DipDrop(n, k) =>
      Node::prim_args("DIP", vec![Node::int(n), Node::Seq(vec![Node::prim_args("DROP", vec![Node::int(k)])])]),
    InstForm::Drop(n) => if *n == 1 { Node::prim("DROP") } else { Node::prim_args("DROP", vec![Node::int(n)]) },
    InstForm::Pair => Node::prim("PAIR"),
    InstForm::Access(chain, label) => {
      for (idx, step) in chain.iter().enumerate() {
        let mut n = Node::prim(cadr_mnemonic(*step));
        if idx + 1 == chain.len() { if let Some(l) = label { n = n.with_annot(field_annot(&l.as_str())); } }
        out.push(n);
      }
      return Ok(());
    }
    InstForm::Record(fields) => {
      for f in fields.iter() {
        if let Some(label) = f { out.push(Node::prim("PAIR").with_annot(field_annot(&label.as_str()))); }
      }
      record_shape_node(fields.len())
    }
    InstForm::Left(other_ty, label) => {
      let mut n = Node::prim_args("LEFT", vec![ty_to_node(env, other_ty)?]);
      if let Some(l) = label { n = n.with_annot(var_annot(&l.as_str())); }
      n
    }
    InstForm::Right(other_ty, label) => {
      let mut n = Node::prim_args("RIGHT", vec![ty_to_node(env, other_ty)?]);
      if let Some(l) = label { n = n.with_annot(var_annot(&l.as_str())); }
      n
    }
    InstForm::Some_ => Node::prim("SOME"),
    InstForm::None_(ty) => Node::prim_args("NONE", vec![ty_to_node(env, ty)?]),
    InstForm::Nil(ty) => Node::prim_args("NIL", vec![ty_to_node(env, ty)?]),
    InstForm::Cons => Node::prim("CONS"),
    InstForm::EmptySet(ty) => Node::prim_args("EMPTY_SET", vec![ty_to_node(env, ty)?]),
    InstForm::EmptyMap(k, v) => Node::prim_args("EMPTY_MAP", vec![ty_to_node(env, k)?, ty_to_node(env, v)?]),
    InstForm::EmptyBigMap(k, v) => Node::prim_args("EMPTY_BIG_MAP", vec![ty_to_node(env, k)?, ty_to_node(env, v)?]),
    InstForm::Push(c) => Node::prim_args("PUSH", vec![shape_to_node(&const_shape_ty(c)?)?, const_to_node(c)?]),
    InstForm::If(a, b) => Node::prim_args("IF", vec![Node::Seq(emit_block(env, a)?), Node::Seq(emit_block(env, b)?)]),
    InstForm::IfNone(a, b) => Node::prim_args("IF_NONE", vec![Node::Seq(emit_block(env, a)?), Node::Seq(emit_block(env, b)?)]),
    InstForm::IfLeft(a, b) => Node::prim_args("IF_LEFT", vec![Node::Seq(emit_block(env, a)?), Node::Seq(emit_block(env, b)?)]),
    InstForm::IfCons(a, b) => Node::prim_args("IF_CONS", vec![Node::Seq(emit_block(env, a)?), Node::Seq(emit_block(env, b)?)]),
    InstForm::Loop(b) => Node::prim_args("LOOP", vec![Node::Seq(emit_block(env, b)?)]),
    InstForm::LoopLeft(b) => Node::prim_args("LOOP_LEFT", vec![Node::Seq(emit_block(env, b)?)]),
    InstForm::Iter(b) => Node::prim_args("ITER", vec![Node::Seq(emit_block(env, b)?)]),
    InstForm::Map(b) => Node::prim_args("MAP", vec![Node::Seq(emit_block(env, b)?)]),
    InstForm::Lambda(a, b, body) =>
      Node::prim_args("LAMBDA", vec![ty_to_node(env, a)?, ty_to_node(env, b)?, Node::Seq(emit_block(env, body)?)]),
    InstForm::Exec => Node::prim("EXEC"),
    InstForm::Rename(_) => unreachable!("handled above"),
    InstForm::Failwith => Node::prim("FAILWITH"),
    InstForm::Prim(op) => Node::prim(prim_mnemonic(*op)),
    InstForm::TransferTokens => Node::prim("TRANSFER_TOKENS"),
    InstForm::Self_ => Node::prim("SELF"),
    InstForm::Balance => Node::prim("BALANCE"),
    InstForm::Now => Node::prim("NOW"),
    InstForm::Amount => Node::prim("AMOUNT"),
    InstForm::Sender => Node::prim("SENDER"),
    InstForm::Source => Node::prim("SOURCE"),
    InstForm::StepsToQuota => Node::prim("STEPS_TO_QUOTA"),
    InstForm::AddressOf => Node::prim("ADDRESS"),
    InstForm::Contract(ty) => Node::prim_args("CONTRACT", vec![ty_to_node(env, ty)?]),
    InstForm::SetDelegate => Node::prim("SET_DELEGATE"),
    InstForm::ImplicitAccount => Node::prim("IMPLICIT_ACCOUNT"),
    InstForm::CreateAccount => Node::prim("CREATE_ACCOUNT"),
    InstForm::CreateContract => Node::prim("CREATE_CONTRACT"),
    InstForm::Pack => Node::prim("PACK"),
    InstForm::Unpack(ty) => Node::prim_args("UNPACK", vec![ty_to_node(env, ty)?]),
  };
  if let Some(name) = inst.name { node = node.with_annot(var_annot(&name.as_str())); }
  out.push(node);
  Ok(())
}

fn record_shape_node(n: usize) -> Node {
  if n <= 2 { Node::prim("PAIR") } else { Node::prim_args("PAIR", vec![Node::int(n)]) }
}

/// The type a literal [`Const`] carries on its own, without consulting the
/// surrounding [`Ty`] that typechecking assigned it — enough to render the
/// type argument `PUSH` needs, since `compile_const` only ever reaches
/// `Push` for the atomic, self-describing constant kinds.
fn const_shape_ty(c: &Const) -> Result<Ty> {
  Ok(match c {
    Const::Unit => TyKind::unit(),
    Const::Bool(_) => TyKind::bool_(),
    Const::Int(_) => TyKind::int(),
    Const::Nat(_) => TyKind::nat(),
    Const::Tez(_) => TyKind::tez(),
    Const::String(_) => TyKind::string(),
    Const::Bytes(_) => TyKind::ground(Ground::Bytes),
    Const::Timestamp(_) => TyKind::ground(Ground::Timestamp),
    Const::Key(_) => TyKind::ground(Ground::Key),
    Const::KeyHash(_) => TyKind::ground(Ground::KeyHash),
    Const::Signature(_) => TyKind::ground(Ground::Signature),
    Const::Address(_) => TyKind::ground(Ground::Address),
    _ => return Err(internal("PUSH of a non-atomic constant")),
  })
}

// ---------------------------------------------------------------------------
// decompile direction: Program -> Compiled's pieces
// ---------------------------------------------------------------------------

/// Parse a rendered type node back into its structural shape. Since the
/// rendered form already erased record/variant names to `pair`/`or`, this is
/// total over every node the emitter could have produced — there is nothing
/// left to re-resolve.
pub fn decode_ty(node: &Node) -> Result<Ty> {
  let Node::Prim { prim, args, .. } = node else { return Err(unstructured("expected a type node")) };
  if let Some(g) = ground_of_name(prim) { return Ok(TyKind::ground(g)); }
  Ok(match (prim.as_str(), args.as_slice()) {
    ("pair", [a, b]) => TyKind::pair(decode_ty(a)?, decode_ty(b)?),
    ("option", [t]) => TyKind::Option(decode_ty(t)?).into(),
    ("or", [a, b]) => TyKind::Or(decode_ty(a)?, decode_ty(b)?).into(),
    ("list", [t]) => TyKind::List(decode_ty(t)?).into(),
    ("set", [t]) => TyKind::Set(decode_ty(t)?).into(),
    ("map", [k, v]) => TyKind::Map(decode_ty(k)?, decode_ty(v)?).into(),
    ("big_map", [k, v]) => TyKind::BigMap(decode_ty(k)?, decode_ty(v)?).into(),
    ("contract", [t]) => TyKind::Contract(decode_ty(t)?).into(),
    ("lambda", [a, b]) => TyKind::Lambda(decode_ty(a)?, decode_ty(b)?).into(),
    _ => return Err(unstructured(format!("unrecognized type constructor `{prim}`"))),
  })
}

fn decode_const(node: &Node, ty: &Ty) -> Result<Const> {
  Ok(match (&**ty, node) {
    (TyKind::Ground(Ground::Unit), Node::Prim { prim, .. }) if prim == "Unit" => Const::Unit,
    (TyKind::Ground(Ground::Bool), Node::Prim { prim, .. }) => Const::Bool(prim == "True"),
    (TyKind::Ground(Ground::Int), Node::Int { int }) => Const::Int(parse_bigint(int)?),
    (TyKind::Ground(Ground::Nat), Node::Int { int }) => Const::Nat(parse_bigint(int)?),
    (TyKind::Ground(Ground::Tez), Node::Int { int }) => Const::Tez(parse_bigint(int)?),
    (TyKind::Ground(Ground::Timestamp), Node::Int { int }) => Const::Timestamp(parse_bigint(int)?),
    (TyKind::Ground(Ground::String), Node::String { string }) => Const::String(string.as_str().into()),
    (TyKind::Ground(Ground::Bytes), Node::Bytes { bytes }) =>
      Const::Bytes(hex::decode(bytes).map_err(|e| unstructured(e.to_string()))?.into()),
    (TyKind::Ground(Ground::Key), Node::String { string }) => Const::Key(string.as_str().into()),
    (TyKind::Ground(Ground::KeyHash), Node::String { string }) => Const::KeyHash(string.as_str().into()),
    (TyKind::Ground(Ground::Signature), Node::String { string }) => Const::Signature(string.as_str().into()),
    (TyKind::Ground(Ground::Address), Node::String { string }) => Const::Address(string.as_str().into()),
    (TyKind::Option(t), Node::Prim { prim, args, .. }) if prim == "None" && args.is_empty() => Const::None(t.clone()),
    (TyKind::Option(t), Node::Prim { prim, args, .. }) if prim == "Some" && args.len() == 1 =>
      Const::Some(Box::new(decode_const(&args[0], t)?)),
    (TyKind::Or(a, b), Node::Prim { prim, args, .. }) if prim == "Left" && args.len() == 1 =>
      Const::Left(Box::new(decode_const(&args[0], a)?), b.clone()),
    (TyKind::Or(a, b), Node::Prim { prim, args, .. }) if prim == "Right" && args.len() == 1 =>
      Const::Right(a.clone(), Box::new(decode_const(&args[0], b)?)),
    (TyKind::Tuple(ts), Node::Prim { prim, args, .. }) if prim == "Pair" && ts.len() == 2 && args.len() == 2 =>
      Const::Tuple(Box::new([decode_const(&args[0], &ts[0])?, decode_const(&args[1], &ts[1])?])),
    (TyKind::List(t), Node::Seq(items)) =>
      Const::List(t.clone(), items.iter().map(|n| decode_const(n, t)).collect::<Result<_>>()?),
    (TyKind::Set(t), Node::Seq(items)) =>
      Const::Set(t.clone(), items.iter().map(|n| decode_const(n, t)).collect::<Result<_>>()?),
    (TyKind::Map(k, v), Node::Seq(items)) => {
      let kvs = items.iter().map(|n| match n {
        Node::Prim { prim, args, .. } if prim == "Elt" && args.len() == 2 =>
          Ok((decode_const(&args[0], k)?, decode_const(&args[1], v)?)),
        _ => Err(unstructured("expected an `Elt` pair inside a map literal")),
      }).collect::<Result<_>>()?;
      Const::Map(k.clone(), v.clone(), kvs)
    }
    _ => return Err(unstructured("constant node does not match its declared type")),
  })
}

fn parse_bigint(s: &str) -> Result<num::BigInt> {
  s.parse().map_err(|_| unstructured(format!("`{s}` is not an integer literal")))
}

fn mnemonic_to_prim(m: &str) -> Option<PrimOp> {
  PrimOp::from_str(match m {
    "ADD" => "+", "SUB" => "-", "MUL" => "*", "EDIV" => "/",
    "NEG" => "~-", "ABS" => "abs", "ISNAT" => "is_nat", "INT" => "int",
    "EQ" => "=", "NEQ" => "<>", "LT" => "<", "LE" => "<=",
    "GT" => ">", "GE" => ">=", "COMPARE" => "compare",
    "AND" => "and", "OR" => "or", "XOR" => "xor", "NOT" => "not",
    "LSL" => "lsl", "LSR" => "lsr", "CONCAT" => "concat", "SIZE" => "size",
    "SLICE" => "slice", "MEM" => "mem", "GET" => "get", "UPDATE" => "update",
    "CHECK_SIGNATURE" => "check_signature", "BLAKE2B" => "blake2b", "SHA256" => "sha256",
    "SHA512" => "sha512", "HASH_KEY" => "hash_key",
    _ => return None,
  })
}

fn annot_name(annots: &[String]) -> Option<Symbol> {
  annots.iter().find_map(|a| a.strip_prefix('@')).map(intern)
}
fn annot_field(annots: &[String]) -> Option<Symbol> {
  annots.iter().find_map(|a| a.strip_prefix('%')).map(intern)
}

/// Decode a rendered sequence back into a symbolic [`Block`]. `UNPAIR`, which
/// has no dedicated [`InstForm`], expands back to the four-instruction shape
/// [`emit_block`] folds it from, so nothing downstream has to special-case it.
pub fn decode_block(node: &Node) -> Result<Block> {
  let Node::Seq(nodes) = node else { return Err(unstructured("expected an instruction sequence")) };
  let mut out = Vec::with_capacity(nodes.len());
  for n in nodes {
    out.extend(decode_inst(n)?);
    fold_cadr_run(&mut out);
  }
  Ok(out)
}

/// Merge a maximal trailing run of bare `CAR`/`CDR` instructions just
/// appended to `out` into one [`InstForm::Access`], the inverse of how
/// [`emit_inst`] flattens an `Access` chain into individual nodes.
fn fold_cadr_run(out: &mut Vec<Inst>) {
  let mut chain = Vec::new();
  let mut label = None;
  while let Some(last) = out.last() {
    match &last.form {
      InstForm::Access(c, l) if c.len() == 1 => {
        if chain.is_empty() { label = *l; }
        chain.push(c[0]);
        out.pop();
      }
      _ => break,
    }
  }
  if chain.len() > 1 {
    chain.reverse();
    out.push(Inst::new(InstForm::Access(chain.into_boxed_slice(), label), FileSpan::dummy()));
  } else if let Some(step) = chain.pop() {
    out.push(Inst::new(InstForm::Access(Box::new([step]), label), FileSpan::dummy()));
  }
}

fn decode_inst(node: &Node) -> Result<Vec<Inst>> {
  let loc = FileSpan::dummy();
  let Node::Prim { prim, args, annots } = node else { return Err(unstructured("expected an instruction node")) };
  let name = annot_name(annots);
  let mut single = |form: InstForm| {
    let mut inst = Inst::new(form, loc.clone());
    inst.name = name;
    vec![inst]
  };
  let block_arg = |i: usize| -> Result<Block> { decode_block(args.get(i).ok_or_else(|| unstructured("missing block argument"))?) };
  let ty_arg = |i: usize| -> Result<Ty> { decode_ty(args.get(i).ok_or_else(|| unstructured("missing type argument"))?) };

  if let Some(op) = mnemonic_to_prim(prim) { return Ok(single(InstForm::Prim(op))); }

  Ok(match prim.as_str() {
    "UNPAIR" => vec![
      Inst::new(InstForm::Dup(0), loc.clone()),
      Inst::new(InstForm::Access(Box::new([Cadr::Car]), None), loc.clone()),
      Inst::new(InstForm::Swap, loc.clone()),
      Inst::new(InstForm::Access(Box::new([Cadr::Cdr]), None), loc),
    ],
    "DUP" => single(InstForm::Dup(args.first().map(node_to_u32).transpose()?.unwrap_or(0))),
    "SWAP" => single(InstForm::Swap),
    "DIP" => match args.as_slice() {
      [n, b] => single(InstForm::Dip(node_to_u32(n)?, decode_block(b)?)),
      [b] => single(InstForm::Dip(1, decode_block(b)?)),
      _ => return Err(unstructured("DIP with an unexpected argument count")),
    },
    "DROP" => single(InstForm::Drop(args.first().map(node_to_u32).transpose()?.unwrap_or(1))),
    "PAIR" => single(InstForm::Pair),
    "CAR" => single(InstForm::Access(Box::new([Cadr::Car]), annot_field(annots))),
    "CDR" => single(InstForm::Access(Box::new([Cadr::Cdr]), annot_field(annots))),
    "LEFT" => single(InstForm::Left(ty_arg(0)?, name)),
    "RIGHT" => single(InstForm::Right(ty_arg(0)?, name)),
    "SOME" => single(InstForm::Some_),
    "NONE" => single(InstForm::None_(ty_arg(0)?)),
    "NIL" => single(InstForm::Nil(ty_arg(0)?)),
    "CONS" => single(InstForm::Cons),
    "EMPTY_SET" => single(InstForm::EmptySet(ty_arg(0)?)),
    "EMPTY_MAP" => single(InstForm::EmptyMap(ty_arg(0)?, ty_arg(1)?)),
    "EMPTY_BIG_MAP" => single(InstForm::EmptyBigMap(ty_arg(0)?, ty_arg(1)?)),
    "PUSH" => {
      let ty = ty_arg(0)?;
      let val = args.get(1).ok_or_else(|| unstructured("PUSH missing its value argument"))?;
      single(InstForm::Push(decode_const(val, &ty)?))
    }
    "IF" => single(InstForm::If(block_arg(0)?, block_arg(1)?)),
    "IF_NONE" => single(InstForm::IfNone(block_arg(0)?, block_arg(1)?)),
    "IF_LEFT" => single(InstForm::IfLeft(block_arg(0)?, block_arg(1)?)),
    "IF_CONS" => single(InstForm::IfCons(block_arg(0)?, block_arg(1)?)),
    "LOOP" => single(InstForm::Loop(block_arg(0)?)),
    "LOOP_LEFT" => single(InstForm::LoopLeft(block_arg(0)?)),
    "ITER" => single(InstForm::Iter(block_arg(0)?)),
    "MAP" => single(InstForm::Map(block_arg(0)?)),
    "LAMBDA" => single(InstForm::Lambda(ty_arg(0)?, ty_arg(1)?, block_arg(2)?)),
    "EXEC" => single(InstForm::Exec),
    "FAILWITH" => single(InstForm::Failwith),
    "TRANSFER_TOKENS" => single(InstForm::TransferTokens),
    "SELF" => single(InstForm::Self_),
    "BALANCE" => single(InstForm::Balance),
    "NOW" => single(InstForm::Now),
    "AMOUNT" => single(InstForm::Amount),
    "SENDER" => single(InstForm::Sender),
    "SOURCE" => single(InstForm::Source),
    "STEPS_TO_QUOTA" => single(InstForm::StepsToQuota),
    "ADDRESS" => single(InstForm::AddressOf),
    "CONTRACT" => single(InstForm::Contract(ty_arg(0)?)),
    "SET_DELEGATE" => single(InstForm::SetDelegate),
    "IMPLICIT_ACCOUNT" => single(InstForm::ImplicitAccount),
    "CREATE_ACCOUNT" => single(InstForm::CreateAccount),
    "CREATE_CONTRACT" => single(InstForm::CreateContract),
    "PACK" => single(InstForm::Pack),
    "UNPACK" => single(InstForm::Unpack(ty_arg(0)?)),
    other => return Err(unstructured(format!("unrecognized instruction mnemonic `{other}`"))),
  })
}

fn node_to_u32(n: &Node) -> Result<u32> {
  match n {
    Node::Int { int } => int.parse().map_err(|_| unstructured(format!("`{int}` is not a valid count"))),
    _ => Err(unstructured("expected an integer argument")),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::env::Env;

  #[test]
  fn atomic_type_renders_lowercase() {
    let node = ty_to_node(&Env::default(), &TyKind::int()).unwrap();
    assert_eq!(node, Node::prim("int"));
  }

  #[test]
  fn push_round_trips_through_decode() {
    let inst = Inst::new(InstForm::Push(Const::Int(5.into())), FileSpan::dummy());
    let mut nodes = Vec::new();
    emit_inst(&Env::default(), &inst, &mut nodes).unwrap();
    let decoded = decode_inst(&nodes[0]).unwrap();
    assert_eq!(decoded.len(), 1);
    assert_eq!(decoded[0].form, InstForm::Push(Const::Int(5.into())));
  }

  #[test]
  fn entry_prelude_folds_to_unpair() {
    let loc = FileSpan::dummy();
    let block = vec![
      Inst::new(InstForm::Dup(0), loc.clone()),
      Inst::new(InstForm::Access(Box::new([Cadr::Car]), None), loc.clone()),
      Inst::new(InstForm::Swap, loc.clone()),
      Inst::new(InstForm::Access(Box::new([Cadr::Cdr]), None), loc.clone()),
      Inst::new(InstForm::Prim(PrimOp::Add), loc),
    ];
    let nodes = emit_block(&Env::default(), &block).unwrap();
    assert_eq!(nodes[0], Node::prim("UNPAIR"));
    assert_eq!(nodes.len(), 2);
  }

  #[test]
  fn record_shape_resolves_through_env() {
    use crate::env::RecordDef;
    use crate::symbol::intern;
    let mut env = Env::default();
    env.define_record(RecordDef { name: intern("Point"), fields: vec![(intern("x"), TyKind::int()), (intern("y"), TyKind::int())] });
    let ty: Ty = TyKind::Record(intern("Point")).into();
    let node = ty_to_node(&env, &ty).unwrap();
    assert_eq!(node, Node::prim_args("pair", vec![Node::prim("int"), Node::prim("int")]));
  }
}
