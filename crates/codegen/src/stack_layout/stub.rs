//! Dead-slot stubbing.
//!
//! After an instruction makes the last use of a stack slot, overwrite the
//! slot with a zero literal of its width. Live stale pointers in dead
//! slots would otherwise keep heap objects retained (and make stack
//! scans harder to debug). Slots whose last use sits in a block
//! terminator are not covered; the terminator hands control away, so
//! there is no program point to attach the stub to.

use cmmc_ir::{BlockId, Expr, Function, Isa, Middle, SlotNode, SubArea, Width};

use super::liveness::{live_slot_anal, tail_live_facts};

/// Rewrite `func` in place, stubbing every slot right after its death.
pub fn stub_slots_on_death(isa: &Isa, func: &mut Function) {
    let env = live_slot_anal(isa, func);

    let blocks: Vec<BlockId> = func.blocks.keys().collect();
    for block in blocks {
        let facts = tail_live_facts(isa, func, &env, block);
        let middles = std::mem::take(&mut func.blocks[block].middles);
        let mut out = Vec::with_capacity(middles.len());
        for (j, m) in middles.into_iter().enumerate() {
            let mut used: Vec<SubArea> = Vec::new();
            m.for_each_slot_used(isa, &mut |s| {
                if !used.contains(&s) {
                    used.push(s);
                }
            });
            out.push(m);
            for s in used {
                if !facts[j + 1].overlaps(s) {
                    out.push(stub_store(s));
                }
            }
        }
        func.blocks[block].middles = out;
    }
}

fn stub_store(s: SubArea) -> Middle {
    Middle::Store {
        addr: Expr::StackSlot(s.area, s.hi),
        value: Expr::int(0, Width::from_bytes(s.width)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cmmc_ir::{Area, FunctionBuilder, LocalReg, Type};

    fn isa() -> Isa {
        Isa::new(8)
    }

    fn reg(id: u32) -> LocalReg {
        LocalReg::new(id, Type::int(Width::W64))
    }

    fn slot_load(r: LocalReg) -> Expr {
        Expr::load(Expr::StackSlot(Area::slot(r), 8), Type::int(Width::W64))
    }

    #[test]
    fn last_use_is_followed_by_a_stub_store() {
        let mut b = FunctionBuilder::new("f", 0);
        let entry = b.make_block();
        b.switch_to_block(entry);
        let r = reg(0);
        b.store(Expr::StackSlot(Area::slot(r), 8), Expr::int(7, Width::W64));
        b.assign(r, slot_load(r)); // the slot dies here
        b.exit();
        let mut func = b.finish();

        stub_slots_on_death(&isa(), &mut func);

        let middles = &func.blocks[entry].middles;
        assert_eq!(middles.len(), 3);
        assert_eq!(
            middles[2],
            Middle::Store {
                addr: Expr::StackSlot(Area::slot(r), 8),
                value: Expr::int(0, Width::W64),
            }
        );
    }

    #[test]
    fn uses_with_a_live_future_are_left_alone() {
        let mut b = FunctionBuilder::new("f", 0);
        let entry = b.make_block();
        b.switch_to_block(entry);
        let r = reg(0);
        b.store(Expr::StackSlot(Area::slot(r), 8), Expr::int(7, Width::W64));
        b.assign(r, slot_load(r));
        b.assign(reg(1), slot_load(r)); // still live between the loads
        b.exit();
        let mut func = b.finish();

        stub_slots_on_death(&isa(), &mut func);

        let middles = &func.blocks[entry].middles;
        assert_eq!(middles.len(), 4);
        assert!(matches!(middles[1], Middle::Assign(..)));
        assert!(matches!(middles[2], Middle::Assign(..)));
        assert!(matches!(middles[3], Middle::Store { .. }));
    }
}
