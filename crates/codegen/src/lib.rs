pub mod dataflow;
pub mod proc_points;
pub mod stack_layout;

pub use dataflow::{run_backward, BackwardAnalysis, BlockEnv};
pub use proc_points::{reached_by_analysis, BlockSet, ProcPointSet, ProcPointStatus};
pub use stack_layout::{
    layout, live_slot_anal, manifest_sp, stub_slots_on_death, AreaMap, SubAreaSet,
};
