//! Peephole rewriting and tail-fail finalization (§4.5), run over the
//! symbolic M [`Block`]s the code generator (§4.4) produces, before they
//! reach the emitter (§4.6).
//!
//! The two passes are independent and run in sequence from [`crate::compile_contract`]:
//! [`optimize_block`] rewrites small windowed instruction subsequences to a
//! cheaper equivalent, and [`finalize_block`] truncates every straight-line
//! sequence at the point it is statically known to fail, since `FAILWITH`
//! poisons the M typechecker's view of the rest of the stack.

use crate::types::instr::{Block, Inst, InstForm};

/// Rewrite every nested block bottom-up, then repeatedly apply the windowed
/// rules at this level until a full pass makes no change. Each rule strictly
/// shrinks or merges instructions, so the loop terminates.
#[must_use] pub fn optimize_block(block: Block) -> Block {
  let mut block: Block = block.into_iter().map(optimize_nested).collect();
  loop {
    let mut changed = false;
    block = peephole_pass(block, &mut changed);
    if !changed { return block; }
  }
}

fn optimize_nested(inst: Inst) -> Inst {
  let form = match inst.form {
    InstForm::Dip(n, b) => InstForm::Dip(n, optimize_block(b)),
    InstForm::If(a, b) => InstForm::If(optimize_block(a), optimize_block(b)),
    InstForm::IfNone(a, b) => InstForm::IfNone(optimize_block(a), optimize_block(b)),
    InstForm::IfLeft(a, b) => InstForm::IfLeft(optimize_block(a), optimize_block(b)),
    InstForm::IfCons(a, b) => InstForm::IfCons(optimize_block(a), optimize_block(b)),
    InstForm::Loop(b) => InstForm::Loop(optimize_block(b)),
    InstForm::LoopLeft(b) => InstForm::LoopLeft(optimize_block(b)),
    InstForm::Iter(b) => InstForm::Iter(optimize_block(b)),
    InstForm::Map(b) => InstForm::Map(optimize_block(b)),
    InstForm::Lambda(a, b, body) => InstForm::Lambda(a, b, optimize_block(body)),
    other => other,
  };
  Inst { form, ..inst }
}

/// `true` for a literal whose construction has no observable effect beyond
/// leaving a value on the stack — i.e. every [`crate::types::konst::Const`],
/// since constants never fail or touch ambient state.
fn is_pure_push(form: &InstForm) -> bool { matches!(form, InstForm::Push(_)) }

fn peephole_pass(block: Block, changed: &mut bool) -> Block {
  let mut out: Block = Vec::with_capacity(block.len());
  let mut i = 0;
  while i < block.len() {
    if i + 1 < block.len() {
      match (&block[i].form, &block[i + 1].form) {
        // PUSH k; DROP collapses away entirely: `k` is pure, so nothing
        // observable depended on it having been pushed at all.
        (form, InstForm::Drop(1)) if is_pure_push(form) => { *changed = true; i += 2; continue; }
        // SWAP; SWAP is its own inverse.
        (InstForm::Swap, InstForm::Swap) => { *changed = true; i += 2; continue; }
        // adjacent DIPs at the same depth dip past the same frame; run one
        // after the other under it rather than two separate dips.
        (InstForm::Dip(n1, a), InstForm::Dip(n2, b)) if n1 == n2 => {
          let mut merged = a.clone();
          merged.extend(b.clone());
          out.push(Inst::new(InstForm::Dip(*n1, merged), block[i].loc.clone()));
          *changed = true;
          i += 2;
          continue;
        }
        _ => {}
      }
    }
    // a DIP/DROP that moves or removes nothing is a no-op.
    match &block[i].form {
      InstForm::DipDrop(_, 0) | InstForm::Drop(0) => { *changed = true; i += 1; continue; }
      _ => {}
    }
    out.push(block[i].clone());
    i += 1;
  }
  out
}

/// Truncate every block, recursively, at the first instruction whose tail
/// position is known to fail (§4.5's `end_fails` relation) — anything after
/// it in the same straight-line sequence is unreachable.
#[must_use] pub fn finalize_block(block: Block) -> Block {
  let mut block: Block = block.into_iter().map(finalize_nested).collect();
  if let Some(cut) = block.iter().position(ends_fails) {
    block.truncate(cut + 1);
  }
  block
}

fn finalize_nested(inst: Inst) -> Inst {
  let form = match inst.form {
    InstForm::Dip(n, b) => InstForm::Dip(n, finalize_block(b)),
    InstForm::If(a, b) => InstForm::If(finalize_block(a), finalize_block(b)),
    InstForm::IfNone(a, b) => InstForm::IfNone(finalize_block(a), finalize_block(b)),
    InstForm::IfLeft(a, b) => InstForm::IfLeft(finalize_block(a), finalize_block(b)),
    InstForm::IfCons(a, b) => InstForm::IfCons(finalize_block(a), finalize_block(b)),
    InstForm::Loop(b) => InstForm::Loop(finalize_block(b)),
    InstForm::LoopLeft(b) => InstForm::LoopLeft(finalize_block(b)),
    InstForm::Iter(b) => InstForm::Iter(finalize_block(b)),
    InstForm::Map(b) => InstForm::Map(finalize_block(b)),
    InstForm::Lambda(a, b, body) => InstForm::Lambda(a, b, finalize_block(body)),
    other => other,
  };
  Inst { form, ..inst }
}

/// §4.5's `end_fails`: `FAILWITH`; a two-armed control form both of whose
/// arms fail; a `DIP` whose dipped-under block fails. Blocks passed in here
/// have already been finalized bottom-up, so `block_fails` only needs to
/// look at the (already-truncated) last instruction.
fn ends_fails(inst: &Inst) -> bool {
  match &inst.form {
    InstForm::Failwith => true,
    InstForm::If(a, b) | InstForm::IfNone(a, b) | InstForm::IfLeft(a, b) | InstForm::IfCons(a, b) =>
      block_fails(a) && block_fails(b),
    InstForm::Dip(_, b) => block_fails(b),
    _ => false,
  }
}

fn block_fails(b: &Block) -> bool { b.last().is_some_and(ends_fails) }

#[cfg(test)]
mod tests {
  use super::*;
  use crate::loc::FileSpan;
  use crate::types::konst::Const;

  fn inst(form: InstForm) -> Inst { Inst::new(form, FileSpan::dummy()) }

  #[test]
  fn push_then_drop_collapses_away() {
    let block = vec![inst(InstForm::Push(Const::Unit)), inst(InstForm::Drop(1))];
    assert!(optimize_block(block).is_empty());
  }

  #[test]
  fn double_swap_collapses_away() {
    let block = vec![inst(InstForm::Swap), inst(InstForm::Swap)];
    assert!(optimize_block(block).is_empty());
  }

  #[test]
  fn adjacent_same_depth_dips_merge() {
    let block = vec![
      inst(InstForm::Dip(1, vec![inst(InstForm::Drop(1))])),
      inst(InstForm::Dip(1, vec![inst(InstForm::Swap)])),
    ];
    let out = optimize_block(block);
    assert_eq!(out.len(), 1);
    match &out[0].form {
      InstForm::Dip(1, inner) => assert_eq!(inner.len(), 2),
      _ => panic!("expected a single merged Dip"),
    }
  }

  #[test]
  fn instructions_after_failwith_are_dropped() {
    let block = vec![inst(InstForm::Failwith), inst(InstForm::Drop(1))];
    assert_eq!(finalize_block(block), vec![inst(InstForm::Failwith)]);
  }

  #[test]
  fn if_with_both_arms_failing_poisons_the_rest_of_the_sequence() {
    let block = vec![
      inst(InstForm::If(vec![inst(InstForm::Failwith)], vec![inst(InstForm::Failwith)])),
      inst(InstForm::Drop(1)),
    ];
    let out = finalize_block(block);
    assert_eq!(out.len(), 1);
  }

  #[test]
  fn if_with_one_live_arm_does_not_poison_the_sequence() {
    let block = vec![
      inst(InstForm::If(vec![inst(InstForm::Failwith)], vec![inst(InstForm::Drop(1))])),
      inst(InstForm::Drop(1)),
    ];
    let out = finalize_block(block);
    assert_eq!(out.len(), 2);
  }
}
