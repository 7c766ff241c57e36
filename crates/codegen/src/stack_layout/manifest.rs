//! Stack-pointer manifestation.
//!
//! Consumes the area map and replaces every symbolic stack-slot
//! expression with stack-pointer arithmetic, inserts the stack-pointer
//! adjustments the calling convention requires, and substitutes the
//! frame's high-water mark for its placeholder literal.
//!
//! Offsets are *virtual*: the byte at virtual offset `v` lives at machine
//! address `Sp + (sp_off - v)` when the walk's symbolic offset is
//! `sp_off`. Adjustments are plain additions to `Sp`; the walk recognizes
//! them on re-entry, so running the pass on its own output changes
//! nothing.

use cmmc_ir::{
    Area, BlockId, Expr, Function, GlobalReg, Isa, Last, Lit, MachOp, Middle, Reg,
    SlotNode,
};

use crate::{
    dataflow::BlockEnv,
    proc_points::{ProcPointSet, ProcPointStatus},
};

use super::AreaMap;

/// Rewrite `func` in place, fixing every stack access to the stack
/// pointer and reconciling the stack pointer across every edge.
pub fn manifest_sp(
    isa: &Isa,
    proc_points: &ProcPointSet,
    proc_map: &BlockEnv<ProcPointStatus>,
    area_map: &AreaMap,
    func: &mut Function,
) {
    let word = isa.word_bytes();
    let proc_entry_sp = area_map.expect_offset(Area::OLD) + func.arg_bytes;
    let high_water = (max_slot(isa, area_map, func) - proc_entry_sp).max(0);

    let blocks: Vec<BlockId> = func.blocks.keys().collect();
    for block in blocks {
        let mut sp_off = sp_on_entry(func, proc_points, proc_map, area_map, proc_entry_sp, block);

        let middles = std::mem::take(&mut func.blocks[block].middles);
        let mut out = Vec::with_capacity(middles.len());
        let mut iter = middles.into_iter().peekable();
        while let Some(mut m) = iter.next() {
            if let Some(delta) = sp_adjust_delta(&m) {
                out.push(m);
                sp_off -= delta;
                continue;
            }
            m.map_exprs(&mut |e| repl_slot(isa, e, sp_off, area_map, high_water));
            if let Middle::SafeForeignCall { cont, .. } = &m {
                // The runtime parks an info pointer one word into the
                // continuation's young area; Sp must point at it for the
                // duration of the call.
                let next = area_map.expect_offset(Area::young(*cont)) + word;
                out.push(m);
                if next != sp_off {
                    let upcoming = iter.peek().and_then(sp_adjust_delta);
                    if upcoming == Some(sp_off - next) {
                        // An equivalent adjustment already follows; the
                        // walk will consume it on the next step.
                    } else {
                        out.push(sp_adjust(isa, sp_off - next));
                        sp_off = next;
                    }
                } else {
                    sp_off = next;
                }
            } else {
                out.push(m);
            }
        }

        let mut last = std::mem::replace(&mut func.blocks[block].last, Last::Exit);
        let mut splice: Vec<BlockId> = Vec::new();
        match &last {
            Last::Call {
                cont, args_bytes, ..
            } => {
                let area = cont.map(Area::young).unwrap_or(Area::OLD);
                let next = area_map.expect_offset(area) + args_bytes;
                if next != sp_off {
                    out.push(sp_adjust(isa, sp_off - next));
                }
                sp_off = next;
                last.map_exprs(&mut |e| repl_slot(isa, e, sp_off, area_map, high_water));
            }
            Last::Branch(k) => {
                let next = sp_on_entry(func, proc_points, proc_map, area_map, proc_entry_sp, *k);
                if next != sp_off {
                    out.push(sp_adjust(isa, sp_off - next));
                }
            }
            Last::Exit => {}
            Last::CondBranch { .. } => {
                last.map_exprs(&mut |e| repl_slot(isa, e, sp_off, area_map, high_water));
                let mut succs: Vec<BlockId> = last.succs().into_vec();
                succs.sort_unstable();
                succs.dedup();
                splice = succs;
            }
        }

        func.blocks[block].middles = out;
        func.blocks[block].last = last;

        // Successors that expect a different Sp get a trampoline block on
        // the edge.
        for succ in splice {
            let expected =
                sp_on_entry(func, proc_points, proc_map, area_map, proc_entry_sp, succ);
            if expected != sp_off {
                func.insert_between(block, vec![sp_adjust(isa, sp_off - expected)], succ);
            }
        }
    }
}

/// The symbolic stack offset every predecessor must establish before
/// entering `block`.
fn sp_on_entry(
    func: &Function,
    proc_points: &ProcPointSet,
    proc_map: &BlockEnv<ProcPointStatus>,
    area_map: &AreaMap,
    proc_entry_sp: i32,
    block: BlockId,
) -> i32 {
    let mut block = block;
    loop {
        if block == func.entry {
            return proc_entry_sp;
        }
        if let Some(off) = func.blocks[block].stack_info.arg_bytes {
            return area_map.expect_offset(Area::young(block)) + off;
        }
        if proc_points.contains(block) {
            panic!("procedure point {block} carries no argument info");
        }
        match proc_map.get(&block) {
            Some(ProcPointStatus::ReachedBy(points)) => {
                let mut points = points.iter();
                match (points.next(), points.next()) {
                    (Some(point), None) => block = point,
                    (None, _) => panic!(
                        "{block} is reached by no procedure point; its stack convention is unknown"
                    ),
                    _ => panic!(
                        "{block} is reached by several procedure points; its stack convention is ambiguous"
                    ),
                }
            }
            Some(ProcPointStatus::ProcPoint) => {
                panic!("procedure point {block} carries no argument info")
            }
            None => panic!("unknown block {block} in procedure-point map"),
        }
    }
}

/// The highest virtual offset any slot access reaches.
fn max_slot(isa: &Isa, area_map: &AreaMap, func: &Function) -> i32 {
    let mut hi = 0;
    for (_, data) in func.blocks.iter() {
        let mut bump = |s: cmmc_ir::SubArea| {
            hi = hi.max(area_map.expect_offset(s.area) + s.hi);
        };
        for m in &data.middles {
            m.for_each_slot_used(isa, &mut bump);
            m.for_each_slot_defd(isa, &mut bump);
        }
        data.last.for_each_slot_used(isa, &mut bump);
        data.last.for_each_slot_defd(isa, &mut bump);
    }
    hi
}

fn repl_slot(isa: &Isa, e: Expr, sp_off: i32, area_map: &AreaMap, high_water: i32) -> Expr {
    match e {
        Expr::StackSlot(area, off) => {
            let rel = sp_off - (area_map.expect_offset(area) + off);
            sp_rel(rel, isa.word_width())
        }
        Expr::Lit(Lit::HighWaterMark(w)) => Expr::int(high_water as i64, w),
        e => e,
    }
}

fn sp_rel(off: i32, w: cmmc_ir::Width) -> Expr {
    Expr::op(
        MachOp::Add(w),
        vec![Expr::Reg(Reg::SP), Expr::int(off as i64, w)],
    )
}

/// `Sp = Sp + delta`.
fn sp_adjust(isa: &Isa, delta: i32) -> Middle {
    let w = isa.word_width();
    Middle::Assign(Reg::SP, sp_rel(delta, w))
}

/// Recognize the adjustments this pass emits, so the symbolic walk stays
/// faithful on graphs that already carry them.
fn sp_adjust_delta(m: &Middle) -> Option<i32> {
    if let Middle::Assign(Reg::Global(GlobalReg::Sp), Expr::Op(MachOp::Add(_), args)) = m {
        if let [Expr::Reg(Reg::Global(GlobalReg::Sp)), Expr::Lit(Lit::Int(d, _))] =
            args.as_slice()
        {
            return Some(*d as i32);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        proc_points::reached_by_analysis,
        stack_layout::{layout, live_slot_anal},
    };
    use cmmc_ir::{Cfg, FunctionBuilder, LocalReg, Type, Width};

    fn isa() -> Isa {
        Isa::new(8)
    }

    fn reg(id: u32) -> LocalReg {
        LocalReg::new(id, Type::int(Width::W64))
    }

    fn manifest(func: &mut Function, proc_points: &ProcPointSet) {
        let isa = isa();
        let env = live_slot_anal(&isa, func);
        let area_map = layout(&isa, proc_points, &env, func);
        let cfg = Cfg::compute(func);
        let proc_map = reached_by_analysis(proc_points, func, &cfg);
        manifest_sp(&isa, proc_points, &proc_map, &area_map, func);
    }

    fn no_slots_remain(func: &Function) -> bool {
        let mut found = false;
        for (_, data) in func.blocks.iter() {
            let mut scan = |e: &Expr| {
                e.for_each(&mut |e| {
                    if matches!(e, Expr::StackSlot(..)) {
                        found = true;
                    }
                })
            };
            for m in &data.middles {
                m.for_each_expr(&mut scan);
            }
            data.last.for_each_expr(&mut scan);
        }
        !found
    }

    #[test]
    fn slots_become_sp_relative_addresses() {
        let mut b = FunctionBuilder::new("f", 0);
        let entry = b.make_block();
        b.switch_to_block(entry);
        let r = reg(0);
        b.store(Expr::StackSlot(Area::slot(r), 8), Expr::int(7, Width::W64));
        b.assign(
            r,
            Expr::load(Expr::StackSlot(Area::slot(r), 8), Type::int(Width::W64)),
        );
        b.exit();
        let mut func = b.finish();

        let pps: ProcPointSet = [entry].into_iter().collect();
        manifest(&mut func, &pps);

        assert!(no_slots_remain(&func));
        // The slot sits at area offset 0, hi 8; with Sp at virtual offset
        // 0 on entry the address is Sp + (0 - 8).
        let Middle::Store { addr, .. } = &func.blocks[entry].middles[0] else {
            panic!("store was rewritten away");
        };
        assert_eq!(addr, &sp_rel(-8, Width::W64));
    }

    #[test]
    fn high_water_mark_literal_is_substituted() {
        let mut b = FunctionBuilder::new("f", 0);
        let entry = b.make_block();
        b.switch_to_block(entry);
        let r = reg(0);
        b.assign(r, Expr::Lit(Lit::HighWaterMark(Width::W64)));
        b.store(Expr::StackSlot(Area::slot(r), 8), Expr::int(7, Width::W64));
        b.assign(
            r,
            Expr::load(Expr::StackSlot(Area::slot(r), 8), Type::int(Width::W64)),
        );
        b.exit();
        let mut func = b.finish();

        let pps: ProcPointSet = [entry].into_iter().collect();
        manifest(&mut func, &pps);

        // One 8-byte slot at offset 0 and no incoming args: the frame
        // reaches 8 bytes past the entry Sp.
        assert_eq!(
            func.blocks[entry].middles[0],
            Middle::Assign(Reg::Local(reg(0)), Expr::int(8, Width::W64)),
        );
    }

    #[test]
    fn call_gets_an_adjustment_to_its_argument_block() {
        let mut b = FunctionBuilder::new("f", 0);
        let entry = b.make_block();
        let cont = b.make_block();
        b.set_stack_info(cont, 16, Some(8));
        b.switch_to_block(entry);
        b.call(Expr::int(0, Width::W64), Some(cont), 16, None);
        b.switch_to_block(cont);
        b.exit();
        let mut func = b.finish();

        let pps: ProcPointSet = [entry, cont].into_iter().collect();
        manifest(&mut func, &pps);

        // Young(cont) sits at 8 (below the 8-byte return offset), so the
        // call boundary is at virtual offset 8 + 16 = 24.
        let middles = &func.blocks[entry].middles;
        assert_eq!(middles.len(), 1);
        assert_eq!(sp_adjust_delta(&middles[0]), Some(-24));
    }

    #[test]
    fn mismatched_branch_edges_get_trampolines() {
        let mut b = FunctionBuilder::new("f", 0);
        let entry = b.make_block();
        let ret_point = b.make_block();
        let plain = b.make_block();
        b.set_stack_info(ret_point, 16, None);
        b.switch_to_block(entry);
        b.cond_branch(Expr::int(1, Width::W64), ret_point, plain);
        b.switch_to_block(ret_point);
        b.exit();
        b.switch_to_block(plain);
        b.exit();
        let mut func = b.finish();

        let before = func.blocks.len();
        let pps: ProcPointSet = [entry, ret_point].into_iter().collect();
        manifest(&mut func, &pps);

        // One trampoline, on the edge to the return point (entry Sp 16 vs
        // 0); the plain edge is left untouched.
        assert_eq!(func.blocks.len(), before + 1);
        let (then_dest, else_dest) = match &func.blocks[entry].last {
            Last::CondBranch {
                then_dest,
                else_dest,
                ..
            } => (*then_dest, *else_dest),
            last => panic!("terminator changed shape: {last}"),
        };
        assert_eq!(else_dest, plain);
        assert_ne!(then_dest, ret_point);
        let tramp = &func.blocks[then_dest];
        assert_eq!(tramp.middles.len(), 1);
        assert_eq!(sp_adjust_delta(&tramp.middles[0]), Some(-16));
        assert_eq!(tramp.last, Last::Branch(ret_point));
    }

    #[test]
    fn manifesting_twice_changes_nothing() {
        let mut b = FunctionBuilder::new("f", 0);
        let entry = b.make_block();
        let ret_point = b.make_block();
        let plain = b.make_block();
        b.set_stack_info(ret_point, 16, None);
        b.switch_to_block(entry);
        let r = reg(0);
        b.store(Expr::StackSlot(Area::slot(r), 8), Expr::int(7, Width::W64));
        b.assign(
            r,
            Expr::load(Expr::StackSlot(Area::slot(r), 8), Type::int(Width::W64)),
        );
        b.cond_branch(Expr::int(1, Width::W64), ret_point, plain);
        b.switch_to_block(ret_point);
        b.exit();
        b.switch_to_block(plain);
        b.branch(ret_point);
        let mut func = b.finish();

        let isa = isa();
        let pps: ProcPointSet = [entry, ret_point].into_iter().collect();
        let env = live_slot_anal(&isa, &func);
        let area_map = layout(&isa, &pps, &env, &func);

        let cfg = Cfg::compute(&func);
        let proc_map = reached_by_analysis(&pps, &func, &cfg);
        manifest_sp(&isa, &pps, &proc_map, &area_map, &mut func);
        let once = func.to_string();

        let cfg = Cfg::compute(&func);
        let proc_map = reached_by_analysis(&pps, &func, &cfg);
        manifest_sp(&isa, &pps, &proc_map, &area_map, &mut func);
        assert_eq!(func.to_string(), once);
    }
}
