//! Block instructions: straight-line middles and block-terminating lasts.

use core::fmt;

use smallvec::SmallVec;

use crate::{
    area::{Area, SubArea},
    expr::Expr,
    function::BlockId,
    isa::Isa,
    reg::{LocalReg, Reg},
};

/// A non-terminating instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum Middle {
    /// `reg = expr`
    Assign(Reg, Expr),
    /// `mem[addr] = value`; a [`Expr::StackSlot`] address makes this a
    /// definition of that slot.
    Store { addr: Expr, value: Expr },
    /// A foreign call that may trigger garbage collection. `cont` names
    /// the block execution resumes in; the runtime parks an info-table
    /// pointer in that block's call area while the call is in flight.
    SafeForeignCall {
        target: Expr,
        args: Vec<Expr>,
        results: SmallVec<[LocalReg; 2]>,
        cont: BlockId,
    },
}

/// A block terminator.
#[derive(Debug, Clone, PartialEq)]
pub enum Last {
    Exit,
    Branch(BlockId),
    CondBranch {
        cond: Expr,
        then_dest: BlockId,
        else_dest: BlockId,
    },
    /// A CMM-level call. `cont: None` is a tail-like call that never
    /// returns here; `update_frame` carries the byte size of a runtime
    /// update frame when one is live across the call.
    Call {
        target: Expr,
        cont: Option<BlockId>,
        args_bytes: i32,
        update_frame: Option<i32>,
    },
}

impl Last {
    pub fn succs(&self) -> SmallVec<[BlockId; 2]> {
        match self {
            Last::Exit => SmallVec::new(),
            Last::Branch(b) => SmallVec::from_slice(&[*b]),
            Last::CondBranch {
                then_dest,
                else_dest,
                ..
            } => SmallVec::from_slice(&[*then_dest, *else_dest]),
            Last::Call { cont, .. } => cont.iter().copied().collect(),
        }
    }

    /// Redirect every successor edge that targets `old` to `new`.
    pub fn replace_succ(&mut self, old: BlockId, new: BlockId) {
        let patch = |b: &mut BlockId| {
            if *b == old {
                *b = new;
            }
        };
        match self {
            Last::Exit => {}
            Last::Branch(b) => patch(b),
            Last::CondBranch {
                then_dest,
                else_dest,
                ..
            } => {
                patch(then_dest);
                patch(else_dest);
            }
            Last::Call { cont, .. } => {
                if let Some(b) = cont {
                    patch(b);
                }
            }
        }
    }
}

/// Instructions whose stack-slot footprint can be enumerated.
///
/// A slot is *used* wherever a load of a [`Expr::StackSlot`] address
/// appears in an operand; it is *defined* by a store whose address is a
/// stack slot. Widths come from the load type and the stored value's type
/// respectively.
pub trait SlotNode {
    fn for_each_expr(&self, f: &mut dyn FnMut(&Expr));

    /// Rewrite every contained expression, bottom-up.
    fn map_exprs(&mut self, f: &mut dyn FnMut(Expr) -> Expr);

    fn for_each_slot_used(&self, _isa: &Isa, f: &mut dyn FnMut(SubArea)) {
        self.for_each_expr(&mut |e| {
            e.for_each(&mut |e| {
                if let Expr::Load(addr, ty) = e {
                    if let Expr::StackSlot(area, off) = **addr {
                        f(SubArea::new(area, off, ty.bytes()));
                    }
                }
            })
        });
    }

    fn for_each_slot_defd(&self, isa: &Isa, f: &mut dyn FnMut(SubArea));
}

impl SlotNode for Middle {
    fn for_each_expr(&self, f: &mut dyn FnMut(&Expr)) {
        match self {
            Middle::Assign(_, e) => f(e),
            Middle::Store { addr, value } => {
                f(addr);
                f(value);
            }
            Middle::SafeForeignCall { target, args, .. } => {
                f(target);
                for a in args {
                    f(a);
                }
            }
        }
    }

    fn map_exprs(&mut self, f: &mut dyn FnMut(Expr) -> Expr) {
        let mut map = |e: &mut Expr| {
            let owned = std::mem::replace(e, Expr::StackSlot(Area::OLD, 0));
            *e = owned.map_deep(&mut |e| f(e));
        };
        match self {
            Middle::Assign(_, e) => map(e),
            Middle::Store { addr, value } => {
                map(addr);
                map(value);
            }
            Middle::SafeForeignCall { target, args, .. } => {
                map(target);
                for a in args {
                    map(a);
                }
            }
        }
    }

    fn for_each_slot_defd(&self, isa: &Isa, f: &mut dyn FnMut(SubArea)) {
        if let Middle::Store { addr, value } = self {
            if let Expr::StackSlot(area, off) = *addr {
                f(SubArea::new(area, off, value.ty(isa).bytes()));
            }
        }
    }
}

impl SlotNode for Last {
    fn for_each_expr(&self, f: &mut dyn FnMut(&Expr)) {
        match self {
            Last::Exit | Last::Branch(_) => {}
            Last::CondBranch { cond, .. } => f(cond),
            Last::Call { target, .. } => f(target),
        }
    }

    fn map_exprs(&mut self, f: &mut dyn FnMut(Expr) -> Expr) {
        let mut map = |e: &mut Expr| {
            let owned = std::mem::replace(e, Expr::StackSlot(Area::OLD, 0));
            *e = owned.map_deep(&mut |e| f(e));
        };
        match self {
            Last::Exit | Last::Branch(_) => {}
            Last::CondBranch { cond, .. } => map(cond),
            Last::Call { target, .. } => map(target),
        }
    }

    fn for_each_slot_defd(&self, _isa: &Isa, _f: &mut dyn FnMut(SubArea)) {
        // Lasts hand values to callees through call areas, which the
        // liveness transfer models directly; they define no slots.
    }
}

impl fmt::Display for Middle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Middle::Assign(reg, e) => write!(f, "{reg} = {e};"),
            Middle::Store { addr, value } => write!(f, "mem[{addr}] = {value};"),
            Middle::SafeForeignCall {
                target,
                args,
                results,
                cont,
            } => {
                write!(f, "safe call {target}(")?;
                for (i, a) in args.iter().enumerate() {
                    if i != 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{a}")?;
                }
                write!(f, ") -> [")?;
                for (i, r) in results.iter().enumerate() {
                    if i != 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{r}")?;
                }
                write!(f, "] resumes {cont};")
            }
        }
    }
}

impl fmt::Display for Last {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Last::Exit => write!(f, "exit;"),
            Last::Branch(b) => write!(f, "goto {b};"),
            Last::CondBranch {
                cond,
                then_dest,
                else_dest,
            } => write!(f, "if {cond} goto {then_dest}; else goto {else_dest};"),
            Last::Call {
                target,
                cont,
                args_bytes,
                update_frame,
            } => {
                write!(f, "call {target} args={args_bytes}")?;
                if let Some(u) = update_frame {
                    write!(f, " updfr={u}")?;
                }
                match cont {
                    Some(k) => write!(f, " returns to {k};"),
                    None => write!(f, " never returns;"),
                }
            }
        }
    }
}
