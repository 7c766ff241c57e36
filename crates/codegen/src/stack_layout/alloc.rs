//! Area sizing and the greedy frame packer.

use cmmc_ir::{Area, Cfg, Function, Isa, Last, Middle, SlotNode, SubArea};

use crate::{dataflow::BlockEnv, proc_points::ProcPointSet};

use super::{
    igraph::{build_igraph, AreaNodes, IGraph, InterferenceNodes},
    liveness::tail_live_facts,
    slots::SubAreaSet,
    AreaMap,
};

/// Forward scan computing the byte size of every area.
///
/// Register-slot areas are sized by the highest sub-area offset touching
/// them; call areas by their argument byte counts. The old call area is
/// seeded with the procedure's own incoming bytes.
pub(super) fn area_sizes(isa: &Isa, func: &Function) -> AreaMap {
    let mut sizes = AreaMap::new();
    sizes.insert(Area::OLD, func.arg_bytes);

    for (block, data) in func.blocks.iter() {
        if let Some(off) = data.stack_info.arg_bytes {
            sizes.insert_max(Area::young(block), off);
        }
        for m in &data.middles {
            record_reg_slots(isa, m, &mut sizes);
        }
        record_reg_slots(isa, &data.last, &mut sizes);
        if let Last::Call {
            cont, args_bytes, ..
        } = &data.last
        {
            let area = cont.map(Area::young).unwrap_or(Area::OLD);
            sizes.insert_max(area, *args_bytes);
        }
    }

    sizes
}

fn record_reg_slots<N: SlotNode>(isa: &Isa, node: &N, sizes: &mut AreaMap) {
    let mut record = |s: SubArea| {
        if let Area::RegSlot(_) = s.area {
            sizes.insert_max(s.area, s.hi);
        }
    };
    node.for_each_slot_used(isa, &mut record);
    node.for_each_slot_defd(isa, &mut record);
}

/// The numerically largest `position + offset` over the live, already
/// placed sub-areas: the youngest byte the frame currently reaches.
fn youngest_live(placed: &AreaMap, live: &SubAreaSet) -> i32 {
    live.iter()
        .filter_map(|s| placed.get(s.area).map(|top| top + s.hi))
        .fold(0, i32::max)
}

/// Place `area` at the lowest aligned offset at or above `start` whose
/// byte window avoids every already placed interference neighbor.
fn alloc_area(
    isa: &Isa,
    graph: &IGraph<Area>,
    sizes: &AreaMap,
    placed: &mut AreaMap,
    area: Area,
    start: i32,
) {
    if placed.get(area).is_some() {
        return;
    }
    let size = sizes.get(area).unwrap_or(0);

    let mut conflicts = Vec::new();
    for n in graph.neighbors(area) {
        AreaNodes.occupied_bytes(sizes, placed, n, &mut conflicts);
    }
    conflicts.sort_unstable();
    conflicts.dedup();

    let align = |off: i32| match area {
        Area::CallArea(_) => isa.align_up(off),
        Area::RegSlot(r) if r.is_gc_pointer() => isa.align_up(off),
        Area::RegSlot(_) => off,
    };

    let mut off = align(start.max(0));
    loop {
        let window = off..off + size;
        match conflicts.iter().find(|c| window.contains(c)) {
            Some(&c) => off = align(c + 1),
            None => break,
        }
    }
    placed.insert(area, off);
}

/// Assign every area a concrete byte offset.
///
/// Blocks are visited in post order and instructions front to back, so
/// allocation order is deterministic. Spill slots are placed on first
/// contact, starting the search at offset zero. A safe foreign call grows
/// its continuation's young area by one word for the info-table pointer
/// and places it just past the youngest byte still live after the call.
/// A block in the procedure-point set has its own young area placed at
/// the end of its walk, below its return address and below everything
/// live along its tail.
pub fn layout(
    isa: &Isa,
    proc_points: &ProcPointSet,
    env: &BlockEnv<SubAreaSet>,
    func: &Function,
) -> AreaMap {
    let cfg = Cfg::compute(func);

    let mut sizes = area_sizes(isa, func);
    let graph = build_igraph(&AreaNodes, isa, func, &cfg, env);

    let mut placed = AreaMap::new();
    placed.insert(Area::OLD, 0);

    for block in cfg.post_order() {
        let data = &func.blocks[block];
        let lives = tail_live_facts(isa, func, env, block);

        for (j, m) in data.middles.iter().enumerate() {
            alloc_reg_slots(isa, &graph, &sizes, &mut placed, m);
            if let Middle::SafeForeignCall { cont, .. } = m {
                let mut live_after = lives[j + 1].clone();
                m.for_each_slot_defd(isa, &mut |s| live_after.remove(s));
                let young = youngest_live(&placed, &live_after);

                let area = Area::young(*cont);
                let grown = sizes.get(area).unwrap_or(0) + isa.word_bytes();
                sizes.insert(area, grown);
                alloc_area(isa, &graph, &sizes, &mut placed, area, young);
            }
        }
        alloc_reg_slots(isa, &graph, &sizes, &mut placed, &data.last);

        if proc_points.contains(block) {
            let young = youngest_live(&placed, &lives[0]);
            let start = data.stack_info.return_off.unwrap_or(0).max(young);
            alloc_area(isa, &graph, &sizes, &mut placed, Area::young(block), start);
        }
    }

    placed
}

fn alloc_reg_slots<N: SlotNode>(
    isa: &Isa,
    graph: &IGraph<Area>,
    sizes: &AreaMap,
    placed: &mut AreaMap,
    node: &N,
) {
    let mut on_slot = |s: SubArea| {
        if let Area::RegSlot(_) = s.area {
            alloc_area(isa, graph, sizes, placed, s.area, 0);
        }
    };
    node.for_each_slot_used(isa, &mut on_slot);
    node.for_each_slot_defd(isa, &mut on_slot);
}
