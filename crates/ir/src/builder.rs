//! A small imperative builder for procedure graphs.

use cranelift_entity::PrimaryMap;
use smallvec::SmallVec;
use smol_str::SmolStr;

use crate::{
    expr::Expr,
    function::{BlockData, BlockId, Function, StackInfo},
    inst::{Last, Middle},
    reg::{LocalReg, Reg},
};

#[derive(Default)]
struct PartialBlock {
    stack_info: StackInfo,
    middles: Vec<Middle>,
    last: Option<Last>,
}

/// Builds a [`Function`] one block at a time.
///
/// Blocks are created with [`make_block`](Self::make_block), filled through
/// the instruction methods while selected with
/// [`switch_to_block`](Self::switch_to_block), and sealed by one of the
/// terminator methods. The first block created is the entry.
pub struct FunctionBuilder {
    name: SmolStr,
    arg_bytes: i32,
    blocks: PrimaryMap<BlockId, PartialBlock>,
    current: Option<BlockId>,
}

impl FunctionBuilder {
    pub fn new(name: &str, arg_bytes: i32) -> Self {
        Self {
            name: name.into(),
            arg_bytes,
            blocks: PrimaryMap::new(),
            current: None,
        }
    }

    pub fn make_block(&mut self) -> BlockId {
        self.blocks.push(PartialBlock::default())
    }

    pub fn switch_to_block(&mut self, block: BlockId) {
        assert!(self.blocks.get(block).is_some(), "no block {block}");
        self.current = Some(block);
    }

    pub fn set_stack_info(&mut self, block: BlockId, arg_bytes: i32, return_off: Option<i32>) {
        let b = &mut self.blocks[block];
        b.stack_info = StackInfo {
            arg_bytes: Some(arg_bytes),
            return_off,
        };
    }

    fn current_mut(&mut self) -> &mut PartialBlock {
        let cur = self.current.expect("no block selected");
        let b = &mut self.blocks[cur];
        assert!(b.last.is_none(), "block {cur} already terminated");
        b
    }

    pub fn assign(&mut self, reg: impl Into<Reg>, value: Expr) {
        self.current_mut().middles.push(Middle::Assign(reg.into(), value));
    }

    pub fn store(&mut self, addr: Expr, value: Expr) {
        self.current_mut().middles.push(Middle::Store { addr, value });
    }

    pub fn safe_foreign_call(
        &mut self,
        target: Expr,
        args: Vec<Expr>,
        results: impl IntoIterator<Item = LocalReg>,
        cont: BlockId,
    ) {
        let results: SmallVec<[LocalReg; 2]> = results.into_iter().collect();
        self.current_mut().middles.push(Middle::SafeForeignCall {
            target,
            args,
            results,
            cont,
        });
    }

    pub fn branch(&mut self, dest: BlockId) {
        self.current_mut().last = Some(Last::Branch(dest));
    }

    pub fn cond_branch(&mut self, cond: Expr, then_dest: BlockId, else_dest: BlockId) {
        self.current_mut().last = Some(Last::CondBranch {
            cond,
            then_dest,
            else_dest,
        });
    }

    pub fn call(
        &mut self,
        target: Expr,
        cont: Option<BlockId>,
        args_bytes: i32,
        update_frame: Option<i32>,
    ) {
        self.current_mut().last = Some(Last::Call {
            target,
            cont,
            args_bytes,
            update_frame,
        });
    }

    pub fn exit(&mut self) {
        self.current_mut().last = Some(Last::Exit);
    }

    pub fn finish(self) -> Function {
        let mut blocks = PrimaryMap::with_capacity(self.blocks.len());
        let mut entry = None;
        for (id, partial) in self.blocks.into_iter() {
            entry.get_or_insert(id);
            let last = partial
                .last
                .unwrap_or_else(|| panic!("block {id} has no terminator"));
            blocks.push(BlockData {
                stack_info: partial.stack_info,
                middles: partial.middles,
                last,
            });
        }
        Function {
            name: self.name,
            arg_bytes: self.arg_bytes,
            entry: entry.expect("function has no blocks"),
            blocks,
        }
    }
}
