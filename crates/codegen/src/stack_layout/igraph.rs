//! Interference between stack areas.
//!
//! The builder is generic over what counts as an interference node: a
//! [`InterferenceNodes`] instance maps sub-areas to nodes and nodes to the
//! byte offsets they occupy once placed. The realized instance,
//! [`AreaNodes`], treats each whole area as a single node; that
//! over-approximates interference (harmless for packing) while the
//! liveness it reads stays exact.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use cmmc_ir::{Area, Cfg, Function, Isa, SlotNode, SubArea};

use crate::dataflow::BlockEnv;

use super::{
    liveness::{live_in_slots, live_last_out},
    slots::SubAreaSet,
    AreaMap,
};

pub trait InterferenceNodes {
    type Node: Copy + Ord + fmt::Debug;

    /// Enumerate the nodes a sub-area maps to.
    fn for_each_node(&self, sub: &SubArea, f: &mut dyn FnMut(Self::Node));

    /// Push every byte offset `node` occupies under the given sizing and
    /// placement, or nothing if it has not been placed.
    fn occupied_bytes(
        &self,
        sizes: &AreaMap,
        placed: &AreaMap,
        node: Self::Node,
        out: &mut Vec<i32>,
    );
}

/// One node per area.
pub struct AreaNodes;

impl InterferenceNodes for AreaNodes {
    type Node = Area;

    fn for_each_node(&self, sub: &SubArea, f: &mut dyn FnMut(Area)) {
        f(sub.area);
    }

    fn occupied_bytes(
        &self,
        sizes: &AreaMap,
        placed: &AreaMap,
        node: Area,
        out: &mut Vec<i32>,
    ) {
        if let Some(pos) = placed.get(node) {
            let size = sizes.get(node).unwrap_or(0);
            out.extend(pos..pos + size);
        }
    }
}

/// An undirected interference graph; both edge directions are stored.
#[derive(Debug, Clone, Default)]
pub struct IGraph<N: Ord> {
    edges: BTreeMap<N, BTreeSet<N>>,
}

impl<N: Copy + Ord> IGraph<N> {
    pub fn new() -> Self {
        Self {
            edges: BTreeMap::new(),
        }
    }

    pub fn add_edge(&mut self, a: N, b: N) {
        if a == b {
            return;
        }
        self.edges.entry(a).or_default().insert(b);
        self.edges.entry(b).or_default().insert(a);
    }

    pub fn interferes(&self, a: N, b: N) -> bool {
        self.edges.get(&a).is_some_and(|ns| ns.contains(&b))
    }

    pub fn neighbors(&self, n: N) -> impl Iterator<Item = N> + '_ {
        self.edges.get(&n).into_iter().flatten().copied()
    }
}

/// Build the interference graph from converged liveness facts.
///
/// Blocks are walked in post order; within a block the middles are walked
/// back to front carrying the live-out set, and every node defined at an
/// instruction interferes with every node live after it as well as with
/// the other nodes defined at the same instruction.
pub fn build_igraph<B: InterferenceNodes>(
    builder: &B,
    isa: &Isa,
    func: &Function,
    cfg: &Cfg,
    env: &BlockEnv<SubAreaSet>,
) -> IGraph<B::Node> {
    let mut graph = IGraph::new();

    for block in cfg.post_order() {
        let data = &func.blocks[block];
        let mut out = live_last_out(&data.last, env);
        add_def_edges(builder, isa, &data.last, &mut out, &mut graph);
        out = live_in_slots(isa, &data.last, out);
        for m in data.middles.iter().rev() {
            add_def_edges(builder, isa, m, &mut out, &mut graph);
            out = live_in_slots(isa, m, out);
        }
    }

    graph
}

fn add_def_edges<B: InterferenceNodes>(
    builder: &B,
    isa: &Isa,
    node: &impl SlotNode,
    out: &mut SubAreaSet,
    graph: &mut IGraph<B::Node>,
) {
    let mut defs = Vec::new();
    node.for_each_slot_defd(isa, &mut |d| defs.push(d));
    for def in defs {
        let mut live_nodes: BTreeSet<B::Node> = BTreeSet::new();
        for s in out.iter() {
            builder.for_each_node(&s, &mut |n| {
                live_nodes.insert(n);
            });
        }
        let mut def_nodes = Vec::new();
        builder.for_each_node(&def, &mut |n| def_nodes.push(n));
        for &dn in &def_nodes {
            for &ln in &live_nodes {
                graph.add_edge(dn, ln);
            }
        }
        // Later defs of the same instruction must see this one.
        out.insert(def);
    }
}
