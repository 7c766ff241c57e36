//! Backward liveness of stack slots.
//!
//! The fact at a block is the set of sub-areas live on entry to it. The
//! transfer for an instruction kills everything it defines, then makes
//! everything it uses live. Call terminators additionally keep their
//! outgoing-argument block live across the call: a call that never
//! returns holds the old call area open (its bytes double as the update
//! frame), a returning call holds its continuation's young area open, and
//! a returning call under an update frame holds both. At a block's entry
//! the block's own young area is deleted wholesale: values a call returns
//! into this block are defined here, not live-in.

use cmmc_ir::{Area, BlockId, Cfg, Function, Isa, Last, Middle, SlotNode, SubArea};

use crate::dataflow::{run_backward, BackwardAnalysis, BlockEnv};

use super::slots::SubAreaSet;

/// Sub-areas live on entry to each block.
pub fn live_slot_anal(isa: &Isa, func: &Function) -> BlockEnv<SubAreaSet> {
    let cfg = Cfg::compute(func);
    run_backward(func, &cfg, &SlotLiveness { isa })
}

pub(super) struct SlotLiveness<'a> {
    pub(super) isa: &'a Isa,
}

impl BackwardAnalysis for SlotLiveness<'_> {
    type Fact = SubAreaSet;

    fn join(&self, acc: &mut SubAreaSet, new: &SubAreaSet) -> bool {
        acc.union_with(new)
    }

    fn last(
        &self,
        _func: &Function,
        _block: BlockId,
        last: &Last,
        env: &BlockEnv<SubAreaSet>,
    ) -> SubAreaSet {
        let out = live_last_out(last, env);
        live_in_slots(self.isa, last, out)
    }

    fn middle(&self, _func: &Function, middle: &Middle, fact: SubAreaSet) -> SubAreaSet {
        live_in_slots(self.isa, middle, fact)
    }

    fn first(&self, block: BlockId, mut fact: SubAreaSet) -> SubAreaSet {
        fact.remove_area(Area::young(block));
        fact
    }
}

/// Look up the live-at-entry fact for `block`.
pub fn live_at_entry<'a>(env: &'a BlockEnv<SubAreaSet>, block: BlockId) -> &'a SubAreaSet {
    env.get(&block)
        .unwrap_or_else(|| panic!("unknown block {block} in liveness environment"))
}

/// Kill everything `node` defines, then make everything it uses live.
pub(super) fn live_in_slots<N: SlotNode>(
    isa: &Isa,
    node: &N,
    mut fact: SubAreaSet,
) -> SubAreaSet {
    node.for_each_slot_defd(isa, &mut |s| fact.remove(s));
    node.for_each_slot_used(isa, &mut |s| {
        fact.insert(s);
    });
    fact
}

/// The set live immediately after `last`: the join of its successors'
/// entry facts plus the call-area injection for call terminators.
pub(super) fn live_last_out(
    last: &Last,
    env: &BlockEnv<SubAreaSet>,
) -> SubAreaSet {
    let mut out = SubAreaSet::new();
    for succ in last.succs() {
        out.union_with(live_at_entry(env, succ));
    }
    if let Last::Call {
        cont,
        args_bytes: n,
        update_frame,
        ..
    } = last
    {
        if *n > 0 {
            match (cont, update_frame) {
                (None, _) => {
                    out.insert(SubArea::new(Area::OLD, *n, *n));
                }
                (Some(k), Some(_)) => {
                    out.insert(SubArea::new(Area::OLD, *n, *n));
                    out.insert(SubArea::new(Area::young(*k), *n, *n));
                }
                (Some(k), None) => {
                    out.insert(SubArea::new(Area::young(*k), *n, *n));
                }
            }
        }
    }
    out
}

/// Facts along one block's tail.
///
/// `facts[j]` is the set live immediately before the `j`-th middle;
/// `facts[middles.len()]` is the set live immediately before the last.
/// The walks in allocation, interference building and stubbing all
/// re-derive these positions from the converged per-block facts.
pub(super) fn tail_live_facts(
    isa: &Isa,
    func: &Function,
    env: &BlockEnv<SubAreaSet>,
    block: BlockId,
) -> Vec<SubAreaSet> {
    let data = &func.blocks[block];
    let n = data.middles.len();
    let mut facts = vec![SubAreaSet::new(); n + 1];
    let out = live_last_out(&data.last, env);
    facts[n] = live_in_slots(isa, &data.last, out);
    for j in (0..n).rev() {
        facts[j] = live_in_slots(isa, &data.middles[j], facts[j + 1].clone());
    }
    facts
}
