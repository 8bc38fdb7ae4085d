//! A bidirectional compiler between a small statically-typed contract
//! language (L) and a stack-machine contract assembly (M).
//!
//! The compile direction is a pipeline of independent passes, each module
//! below named for its stage: [`typeck`] (§4.1) produces a typed [`Contract`],
//! [`encode`] (§4.2) lowers it to a closure-converted, binarized [`Term`]
//! tree, [`simplify`] (§4.3) cleans that tree up, [`codegen`] (§4.4) emits
//! symbolic M instructions, [`peephole`] (§4.5) rewrites and truncates them,
//! and [`emit`] (§4.6) renders the result as the external concrete syntax.
//! The decompile direction runs [`interp`] (§4.7) over a concrete program to
//! recover a typed [`Term`] tree, which [`typeck`] can re-check in
//! decompiling mode.
//!
//! [`Contract`]: types::contract::Contract
//! [`Term`]: types::term::Term

pub mod config;
pub mod env;
pub mod error;
pub mod loc;
pub mod prim;
pub mod symbol;
pub mod types;

pub mod typeck;
pub mod encode;
pub mod simplify;
pub mod codegen;
pub mod peephole;
pub mod emit;
pub mod interp;

use crate::codegen::Compiled;
use crate::config::Config;
use crate::env::Env;
use crate::error::Result;
use crate::types::ast::UContract;
use crate::types::concrete::Program;
use crate::types::term::Term;

/// Run the whole compile pipeline on an already-parsed contract: typecheck,
/// encode, simplify, generate code, and (unless disabled in `config`) run
/// the peephole/tail-fail finalizer. The emitter (§4.6) is a separate step
/// so a driver can choose text or JSON output without recompiling. The
/// returned [`Env`] carries the record/variant registries the emitter needs
/// to resolve the parameter/storage types' declared shapes.
pub fn compile_contract(ast: &UContract, config: &Config) -> Result<(Compiled, Env)> {
  let (contract, env) = typeck::typecheck_contract_with_env(ast)?;
  tracing::debug!(entries = contract.entries.len(), "typechecked contract");
  let encoded = encode::encode_contract(&env, &contract, env.vars)?;
  let mut compiled = codegen::compile(&encoded)?;
  if config.peephole {
    let before = compiled.code.len();
    compiled.code = peephole::finalize_block(peephole::optimize_block(compiled.code));
    compiled.init = compiled.init.map(|b| peephole::finalize_block(peephole::optimize_block(b)));
    tracing::debug!(before, after = compiled.code.len(), "ran peephole/tail-fail finalizer");
  }
  Ok((compiled, env))
}

/// Render a [`Compiled`] program as the external concrete syntax tree (§6),
/// ready for `serde_json` serialization or the out-of-scope textual printer.
pub fn emit_program(compiled: &Compiled, env: &Env) -> Result<Program> {
  emit::emit(compiled, env)
}

/// Run the decompile direction (§4.7): symbolically interpret a concrete
/// program and recover a typed [`Term`] fit for the untyper/printer
/// collaborator. Retries once with annotations ignored on `AnnotationConflict`,
/// per §5's explicit recovery rule.
pub fn decompile_program(program: &Program) -> Result<Term> {
  interp::decompile(program)
}
