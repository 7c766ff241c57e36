//! Procedure points and the reaching-point map.
//!
//! A *procedure point* is a block at which the stack pointer must hold its
//! conventional value (the entry, return continuations, GC-safe points).
//! The layout passes consume the point set together with a map that tells,
//! for every other block, which points can reach it without crossing
//! another point; [`reached_by_analysis`] computes that map.

use core::fmt;

use bit_set::BitSet;
use cranelift_entity::EntityRef;

use crate::dataflow::BlockEnv;
use cmmc_ir::{BlockId, Cfg, Function};

/// A set of block ids, bit-vector backed.
///
/// Block ids are small dense indices, so a bit per block beats a hash
/// set for the join-heavy reaching-points fixpoint below.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct BlockSet {
    bits: BitSet,
}

impl BlockSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns whether `block` was newly added.
    pub fn insert(&mut self, block: BlockId) -> bool {
        self.bits.insert(block.index())
    }

    pub fn contains(&self, block: BlockId) -> bool {
        self.bits.contains(block.index())
    }

    pub fn union_with(&mut self, other: &Self) {
        self.bits.union_with(&other.bits);
    }

    pub fn is_subset(&self, other: &Self) -> bool {
        self.bits.is_subset(&other.bits)
    }

    pub fn iter(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.bits.iter().map(BlockId::new)
    }
}

impl FromIterator<BlockId> for BlockSet {
    fn from_iter<I: IntoIterator<Item = BlockId>>(iter: I) -> Self {
        let mut set = Self::new();
        for block in iter {
            set.insert(block);
        }
        set
    }
}

impl fmt::Debug for BlockSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

pub type ProcPointSet = BlockSet;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcPointStatus {
    /// The block is itself a procedure point.
    ProcPoint,
    /// The block is reached by exactly the named procedure points.
    ReachedBy(BlockSet),
}

/// Forward analysis: for each block, the set of procedure points from
/// which it is reachable without passing through another point.
pub fn reached_by_analysis(
    proc_points: &ProcPointSet,
    func: &Function,
    cfg: &Cfg,
) -> BlockEnv<ProcPointStatus> {
    let mut reach: BlockEnv<BlockSet> = func
        .blocks
        .keys()
        .map(|b| (b, BlockSet::new()))
        .collect();

    loop {
        let mut changed = false;
        for block in cfg.reverse_post_order() {
            let mut incoming = BlockSet::new();
            for &pred in cfg.preds_of(block) {
                if proc_points.contains(pred) {
                    incoming.insert(pred);
                } else {
                    incoming.union_with(&reach[&pred]);
                }
            }
            let acc = reach.get_mut(&block).unwrap();
            if !incoming.is_subset(acc) {
                acc.union_with(&incoming);
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }

    func.blocks
        .keys()
        .map(|b| {
            let status = if proc_points.contains(b) {
                ProcPointStatus::ProcPoint
            } else {
                ProcPointStatus::ReachedBy(reach.remove(&b).unwrap())
            };
            (b, status)
        })
        .collect()
}
