//! Procedure bodies: blocks of middles terminated by a last.

use core::fmt;

use cranelift_entity::{entity_impl, PrimaryMap};
use smol_str::SmolStr;

use crate::inst::{Last, Middle};

/// An opaque reference to a basic block.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockId(pub u32);
entity_impl!(BlockId, "block");

/// Stack convention recorded on a block by earlier pipeline stages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StackInfo {
    /// Byte size of the argument block calls returning here deposit, when
    /// the block is a return point.
    pub arg_bytes: Option<i32>,
    /// Byte offset of the return address within that argument block.
    pub return_off: Option<i32>,
}

/// One basic block.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockData {
    pub stack_info: StackInfo,
    pub middles: Vec<Middle>,
    pub last: Last,
}

/// A procedure: an entry block plus the block graph.
#[derive(Debug, Clone)]
pub struct Function {
    pub name: SmolStr,
    /// Byte size of the procedure's own incoming argument block.
    pub arg_bytes: i32,
    pub entry: BlockId,
    pub blocks: PrimaryMap<BlockId, BlockData>,
}

impl Function {
    pub fn block(&self, id: BlockId) -> &BlockData {
        self.blocks
            .get(id)
            .unwrap_or_else(|| panic!("{} has no block {id}", self.name))
    }

    /// Splice a fresh block carrying `middles` onto the edge
    /// `from -> succ`; every edge from `from` to `succ` is redirected
    /// through the new block, which ends in a branch to `succ`.
    pub fn insert_between(
        &mut self,
        from: BlockId,
        middles: Vec<Middle>,
        succ: BlockId,
    ) -> BlockId {
        debug_assert!(self.blocks.get(succ).is_some(), "no block {succ}");
        let fresh = self.blocks.push(BlockData {
            stack_info: StackInfo::default(),
            middles,
            last: Last::Branch(succ),
        });
        self.blocks[from].last.replace_succ(succ, fresh);
        fresh
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "proc {} (args={}) entry={} {{", self.name, self.arg_bytes, self.entry)?;
        for (id, data) in self.blocks.iter() {
            write!(f, "  {id}:")?;
            if let Some(a) = data.stack_info.arg_bytes {
                write!(f, " // arg_bytes={a}")?;
                if let Some(r) = data.stack_info.return_off {
                    write!(f, " return_off={r}")?;
                }
            }
            writeln!(f)?;
            for m in &data.middles {
                writeln!(f, "    {m}")?;
            }
            writeln!(f, "    {}", data.last)?;
        }
        writeln!(f, "}}")
    }
}
