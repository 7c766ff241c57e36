//! Symbolic stack regions.
//!
//! Before layout runs, stack memory is addressed through named regions
//! ("areas") rather than through concrete stack-pointer offsets. An area is
//! either the outgoing-argument block of some call or the spill slot of a
//! virtual register; within an area, bytes are identified by sub-intervals.

use core::fmt;

use crate::{function::BlockId, reg::LocalReg};

/// Identity of a call's outgoing-argument block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AreaId {
    /// The block the current procedure was itself called with.
    Old,
    /// The block of a call whose continuation is the named block.
    Young(BlockId),
}

/// A named region of the stack frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Area {
    CallArea(AreaId),
    RegSlot(LocalReg),
}

impl Area {
    pub const OLD: Area = Area::CallArea(AreaId::Old);

    pub fn young(block: BlockId) -> Area {
        Area::CallArea(AreaId::Young(block))
    }

    pub fn slot(reg: LocalReg) -> Area {
        Area::RegSlot(reg)
    }

    pub fn is_call_area(self) -> bool {
        matches!(self, Area::CallArea(_))
    }
}

impl fmt::Display for Area {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Area::CallArea(AreaId::Old) => write!(f, "old"),
            Area::CallArea(AreaId::Young(b)) => write!(f, "young({b})"),
            Area::RegSlot(r) => write!(f, "spill({r})"),
        }
    }
}

/// The byte interval `[hi - width, hi)` within an area.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubArea {
    pub area: Area,
    pub hi: i32,
    pub width: i32,
}

impl SubArea {
    pub fn new(area: Area, hi: i32, width: i32) -> Self {
        debug_assert!(width > 0, "zero-width sub-area in {area}");
        Self { area, hi, width }
    }

    pub fn lo(self) -> i32 {
        self.hi - self.width
    }
}

impl fmt::Display for SubArea {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}..{})", self.area, self.lo(), self.hi)
    }
}
