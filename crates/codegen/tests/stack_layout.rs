//! End-to-end layout of a procedure with spills, a safe foreign call and
//! an ordinary call.

use cmmc_codegen::{
    layout, live_slot_anal, manifest_sp, reached_by_analysis, stub_slots_on_death,
    ProcPointSet,
};
use cmmc_ir::{
    verify, Area, BlockId, Cfg, Expr, Function, FunctionBuilder, GlobalReg, Isa, Last, Lit,
    LocalReg, MachOp, Middle, Reg, SlotNode, Type, Width,
};

fn isa() -> Isa {
    Isa::new(8)
}

fn reg(id: u32) -> LocalReg {
    LocalReg::new(id, Type::int(Width::W64))
}

fn gc_reg(id: u32) -> LocalReg {
    LocalReg::new(id, Type::gcptr(Width::W64))
}

fn spill(b: &mut FunctionBuilder, r: LocalReg) {
    b.store(
        Expr::StackSlot(Area::slot(r), r.ty.bytes()),
        Expr::reg(r),
    );
}

fn reload(b: &mut FunctionBuilder, r: LocalReg) {
    b.assign(
        r,
        Expr::load(Expr::StackSlot(Area::slot(r), r.ty.bytes()), r.ty),
    );
}

/// A procedure with one GC spill held across a safe foreign call, one
/// plain spill, a CMM call, and a joining branch.
fn build() -> (Function, BlockId, BlockId, BlockId) {
    let mut b = FunctionBuilder::new("fib_worker", 8);
    let entry = b.make_block();
    let ffi_cont = b.make_block();
    let call_cont = b.make_block();
    let finish = b.make_block();

    b.set_stack_info(call_cont, 16, Some(8));

    let ptr = gc_reg(0);
    let tmp = reg(1);

    b.switch_to_block(entry);
    b.assign(tmp, Expr::Lit(Lit::HighWaterMark(Width::W64)));
    spill(&mut b, ptr);
    b.safe_foreign_call(
        Expr::int(0x1000, Width::W64),
        vec![Expr::reg(tmp)],
        [tmp],
        ffi_cont,
    );
    b.branch(ffi_cont);

    b.switch_to_block(ffi_cont);
    reload(&mut b, ptr);
    spill(&mut b, tmp);
    b.call(Expr::reg(ptr), Some(call_cont), 16, None);

    b.switch_to_block(call_cont);
    reload(&mut b, tmp);
    b.branch(finish);

    b.switch_to_block(finish);
    b.call(Expr::int(0x2000, Width::W64), None, 8, None);

    let func = b.finish();
    (func, entry, ffi_cont, call_cont)
}

fn run_pipeline(func: &mut Function, pps: &ProcPointSet) -> cmmc_codegen::AreaMap {
    let isa = isa();
    let env = live_slot_anal(&isa, func);
    let area_map = layout(&isa, pps, &env, func);
    let cfg = Cfg::compute(func);
    let proc_map = reached_by_analysis(pps, func, &cfg);
    manifest_sp(&isa, pps, &proc_map, &area_map, func);
    area_map
}

fn for_each_expr(func: &Function, f: &mut dyn FnMut(&Expr)) {
    for (_, data) in func.blocks.iter() {
        for m in &data.middles {
            m.for_each_expr(&mut |e| e.for_each(&mut |e| f(e)));
        }
        data.last.for_each_expr(&mut |e| e.for_each(&mut |e| f(e)));
    }
}

#[test]
fn pipeline_eliminates_every_symbolic_slot() {
    let (mut func, entry, _, call_cont) = build();
    let pps: ProcPointSet = [entry, call_cont].into_iter().collect();
    run_pipeline(&mut func, &pps);

    assert_eq!(verify(&func), Ok(()));
    for_each_expr(&func, &mut |e| {
        assert!(
            !matches!(e, Expr::StackSlot(..)),
            "symbolic slot survived layout: {e}"
        );
        assert!(
            !matches!(e, Expr::Lit(Lit::HighWaterMark(_))),
            "high-water placeholder survived layout"
        );
    });
}

#[test]
fn spill_areas_get_placed_and_aligned() {
    let (mut func, entry, _, call_cont) = build();
    let pps: ProcPointSet = [entry, call_cont].into_iter().collect();
    let area_map = run_pipeline(&mut func, &pps);

    assert_eq!(area_map.expect_offset(Area::OLD), 0);
    assert_eq!(area_map.expect_offset(Area::slot(gc_reg(0))) % 8, 0);
    assert_eq!(area_map.expect_offset(Area::young(call_cont)) % 8, 0);
    assert!(area_map.expect_offset(Area::slot(reg(1))) >= 0);
}

/// Property: the symbolic stack offset on leaving a block matches what
/// every successor assumes on entry, treating recognized `Sp = Sp + c`
/// assignments as moves of the symbolic offset.
#[test]
fn stack_pointer_agrees_on_every_edge() {
    let (mut func, entry, _, call_cont) = build();
    let pps: ProcPointSet = [entry, call_cont].into_iter().collect();
    let isa = isa();

    let env = live_slot_anal(&isa, &func);
    let area_map = layout(&isa, &pps, &env, &func);
    let cfg = Cfg::compute(&func);
    let proc_map = reached_by_analysis(&pps, &func, &cfg);
    manifest_sp(&isa, &pps, &proc_map, &area_map, &mut func);

    // Reconstruct each block's entry offset from the rewritten graph
    // alone: entry starts at old-area + incoming bytes, a call boundary
    // fixes its continuation, and plain edges must agree.
    let proc_entry_sp = area_map.expect_offset(Area::OLD) + func.arg_bytes;
    let mut entry_sp: std::collections::HashMap<BlockId, i32> = Default::default();
    entry_sp.insert(func.entry, proc_entry_sp);

    // Seed continuation conventions from their stack info.
    for (block, data) in func.blocks.iter() {
        if let Some(off) = data.stack_info.arg_bytes {
            entry_sp.insert(block, area_map.expect_offset(Area::young(block)) + off);
        }
    }

    // Propagate until every reachable block has a value, checking
    // consistency along the way.
    let mut worklist = vec![func.entry];
    let mut seen = std::collections::HashSet::new();
    while let Some(block) = worklist.pop() {
        if !seen.insert(block) {
            continue;
        }
        let mut sp = *entry_sp.get(&block).expect("unseeded block reached first");
        let data = &func.blocks[block];
        for m in &data.middles {
            if let Middle::Assign(Reg::Global(GlobalReg::Sp), Expr::Op(MachOp::Add(_), args)) = m
            {
                if let [Expr::Reg(Reg::Global(GlobalReg::Sp)), Expr::Lit(Lit::Int(d, _))] =
                    args.as_slice()
                {
                    sp -= *d as i32;
                }
            }
        }
        if let Last::Call {
            cont: Some(k),
            args_bytes,
            ..
        } = &data.last
        {
            assert_eq!(
                sp,
                area_map.expect_offset(Area::young(*k)) + args_bytes,
                "call in {block} leaves Sp off its argument block"
            );
        }
        for succ in data.last.succs() {
            match entry_sp.get(&succ) {
                Some(&expected) => assert_eq!(sp, expected, "edge {block} -> {succ} disagrees"),
                None => {
                    entry_sp.insert(succ, sp);
                }
            }
            worklist.push(succ);
        }
    }
}

/// Property: no rewritten stack access reaches past the reported
/// high-water mark.
#[test]
fn high_water_mark_bounds_every_access() {
    let (mut func, entry, _, call_cont) = build();
    let pps: ProcPointSet = [entry, call_cont].into_iter().collect();
    let isa = isa();

    // Record the deepest virtual offset before rewriting.
    let env = live_slot_anal(&isa, &func);
    let area_map = layout(&isa, &pps, &env, &func);
    let mut deepest = 0;
    for (_, data) in func.blocks.iter() {
        let mut bump = |s: cmmc_ir::SubArea| {
            deepest = deepest.max(area_map.expect_offset(s.area) + s.hi);
        };
        for m in &data.middles {
            m.for_each_slot_used(&isa, &mut bump);
            m.for_each_slot_defd(&isa, &mut bump);
        }
        data.last.for_each_slot_used(&isa, &mut bump);
        data.last.for_each_slot_defd(&isa, &mut bump);
    }

    let cfg = Cfg::compute(&func);
    let proc_map = reached_by_analysis(&pps, &func, &cfg);
    manifest_sp(&isa, &pps, &proc_map, &area_map, &mut func);

    // The substituted literal appears in the first middle of the entry.
    let Middle::Assign(_, Expr::Lit(Lit::Int(high_water, _))) = &func.blocks[entry].middles[0]
    else {
        panic!("high-water literal was not substituted");
    };
    let proc_entry_sp = area_map.expect_offset(Area::OLD) + func.arg_bytes;
    assert_eq!(*high_water as i32, (deepest - proc_entry_sp).max(0));
}

#[test]
fn stubbing_runs_on_the_symbolic_graph() {
    let (mut func, ..) = build();
    let before: usize = func.blocks.iter().map(|(_, d)| d.middles.len()).sum();
    stub_slots_on_death(&isa(), &mut func);
    let after: usize = func.blocks.iter().map(|(_, d)| d.middles.len()).sum();
    assert!(after > before, "no stub stores were inserted");
    assert_eq!(verify(&func), Ok(()));
}
