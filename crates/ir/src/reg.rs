//! Register definitions.

use core::fmt;

use crate::{
    isa::Isa,
    types::{Type, Width},
};

/// A virtual register local to one procedure.
///
/// Carries its own [`Type`] so that predicates such as
/// [`LocalReg::is_gc_pointer`] need no side table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LocalReg {
    pub id: u32,
    pub ty: Type,
}

impl LocalReg {
    pub fn new(id: u32, ty: Type) -> Self {
        Self { id, ty }
    }

    /// Does the garbage collector need to see this register's spill slot?
    pub fn is_gc_pointer(self) -> bool {
        self.ty.is_gc_ptr()
    }
}

impl fmt::Display for LocalReg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.id)
    }
}

/// Machine-global registers the code generator manipulates directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum GlobalReg {
    /// The stack pointer.
    Sp,
    /// The heap allocation pointer.
    Hp,
}

impl GlobalReg {
    pub fn ty(self, isa: &Isa) -> Type {
        Type::int(isa.word_width())
    }
}

impl fmt::Display for GlobalReg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sp => write!(f, "Sp"),
            Self::Hp => write!(f, "Hp"),
        }
    }
}

/// Either kind of register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Reg {
    Local(LocalReg),
    Global(GlobalReg),
}

impl Reg {
    pub const SP: Reg = Reg::Global(GlobalReg::Sp);

    pub fn ty(self, isa: &Isa) -> Type {
        match self {
            Self::Local(r) => r.ty,
            Self::Global(g) => g.ty(isa),
        }
    }

    pub fn width(self, isa: &Isa) -> Width {
        self.ty(isa).width
    }
}

impl From<LocalReg> for Reg {
    fn from(r: LocalReg) -> Reg {
        Reg::Local(r)
    }
}

impl From<GlobalReg> for Reg {
    fn from(g: GlobalReg) -> Reg {
        Reg::Global(g)
    }
}

impl fmt::Display for Reg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local(r) => write!(f, "{r}"),
            Self::Global(g) => write!(f, "{g}"),
        }
    }
}
