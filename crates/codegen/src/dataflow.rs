//! A worklist-free backward dataflow driver.
//!
//! Analyses describe a join-semilattice fact and three transfer functions
//! (for a block's last, its middles, and its entry); the driver sweeps the
//! graph in post order, joining each block's recomputed fact into the
//! stored one, until a full sweep changes nothing. Termination follows
//! from monotone transfers over a finite lattice.

use rustc_hash::FxHashMap;

use cmmc_ir::{BlockId, Cfg, Function, Last, Middle};

/// Per-block facts keyed by block id.
pub type BlockEnv<T> = FxHashMap<BlockId, T>;

pub trait BackwardAnalysis {
    type Fact: Clone + Default;

    /// Join `new` into `acc`, reporting whether `acc` grew.
    fn join(&self, acc: &mut Self::Fact, new: &Self::Fact) -> bool;

    /// Fact immediately before a block's last, given the current
    /// environment of entry facts (from which successor facts are read).
    fn last(
        &self,
        func: &Function,
        block: BlockId,
        last: &Last,
        env: &BlockEnv<Self::Fact>,
    ) -> Self::Fact;

    /// Fact immediately before `middle`, given the fact after it.
    fn middle(&self, func: &Function, middle: &Middle, fact: Self::Fact) -> Self::Fact;

    /// Fact at block entry, given the fact before the first middle.
    fn first(&self, block: BlockId, fact: Self::Fact) -> Self::Fact;
}

pub fn run_backward<A: BackwardAnalysis>(
    func: &Function,
    cfg: &Cfg,
    analysis: &A,
) -> BlockEnv<A::Fact> {
    let mut env: BlockEnv<A::Fact> = func
        .blocks
        .keys()
        .map(|b| (b, A::Fact::default()))
        .collect();

    loop {
        let mut changed = false;
        for block in cfg.post_order() {
            let data = &func.blocks[block];
            let mut fact = analysis.last(func, block, &data.last, &env);
            for m in data.middles.iter().rev() {
                fact = analysis.middle(func, m, fact);
            }
            let fact = analysis.first(block, fact);
            let acc = env.get_mut(&block).unwrap();
            if analysis.join(acc, &fact) {
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }

    env
}
