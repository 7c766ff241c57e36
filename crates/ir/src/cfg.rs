//! Block traversal order.
//!
//! The layout passes want two things from the graph: blocks in post order
//! (a backward sweep then sees every successor's fact before the block
//! itself, and the fixpoint drivers replay that order many times) and,
//! for the reaching-points analysis, predecessor lists. Both are derived
//! here in one pass, straight from each block's terminator.

use cranelift_entity::SecondaryMap;
use smallvec::SmallVec;

use crate::function::{BlockId, Function};

type BlockList = SmallVec<[BlockId; 2]>;

/// Precomputed traversal data for one procedure.
///
/// Only blocks reachable from the entry appear in the orders; facts for
/// unreachable blocks stay at bottom, which is what the analyses want.
pub struct Cfg {
    post_order: Vec<BlockId>,
    preds: SecondaryMap<BlockId, BlockList>,
}

impl Cfg {
    pub fn compute(func: &Function) -> Self {
        let mut preds: SecondaryMap<BlockId, BlockList> = SecondaryMap::new();
        for (block, data) in func.blocks.iter() {
            for succ in data.last.succs() {
                let ps = &mut preds[succ];
                if !ps.contains(&block) {
                    ps.push(block);
                }
            }
        }

        // Iterative depth-first walk. A frame remembers how far into its
        // block's successor list the walk has gotten; a block joins the
        // order once its frame is exhausted, so successors come first.
        let mut post_order = Vec::with_capacity(func.blocks.len());
        let mut visited: SecondaryMap<BlockId, bool> = SecondaryMap::new();
        let mut frames: Vec<(BlockId, BlockList, usize)> = Vec::new();

        visited[func.entry] = true;
        frames.push((func.entry, func.blocks[func.entry].last.succs(), 0));
        loop {
            let next = match frames.last_mut() {
                None => break,
                Some((_, succs, cursor)) => {
                    let s = succs.get(*cursor).copied();
                    *cursor += 1;
                    s
                }
            };
            match next {
                Some(succ) => {
                    if !visited[succ] {
                        visited[succ] = true;
                        frames.push((succ, func.blocks[succ].last.succs(), 0));
                    }
                }
                None => {
                    let (block, ..) = frames.pop().unwrap();
                    post_order.push(block);
                }
            }
        }

        Self { post_order, preds }
    }

    pub fn post_order(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.post_order.iter().copied()
    }

    pub fn reverse_post_order(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.post_order.iter().rev().copied()
    }

    pub fn preds_of(&self, block: BlockId) -> &[BlockId] {
        &self.preds[block]
    }
}
